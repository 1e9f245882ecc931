//! Builds `RLYB` blobs in memory.
//!
//! Used by tests that need a blob without shipping binary fixtures.

use alloc::vec::Vec;
use core::ops::Range;

use crate::{AUTO, HEADER_SIZE, MAGIC, NAME_LEN, RECORD_SIZE, VERSION};

/// Content alignment within the blob.
const CONTENT_ALIGN: usize = 16;

/// One record and its content.
#[derive(Debug)]
struct Entry {
	/// Raw kind field.
	kind:    u32,
	/// Name, truncated to [`NAME_LEN`].
	name:    [u8; NAME_LEN],
	/// Raw `phys_start` field.
	phys:    u64,
	/// Linked range.
	virt:    Range<u64>,
	/// Entry point.
	entry:   u64,
	/// Content.
	content: Vec<u8>,
}

/// Accumulates records for a blob.
#[derive(Debug, Default)]
pub struct BlobBuilder {
	/// Records, in blob order.
	entries: Vec<Entry>,
}

impl BlobBuilder {
	/// Creates an empty builder.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends a record.
	fn push(&mut self, kind: u32, name: &str, phys: u64, virt: Range<u64>, entry: u64, content: &[u8]) -> &mut Self {
		let mut raw = [0; NAME_LEN];
		let len = name.len().min(NAME_LEN);
		raw[..len].copy_from_slice(&name.as_bytes()[..len]);

		self.entries.push(Entry {
			kind,
			name: raw,
			phys,
			virt,
			entry,
			content: content.to_vec(),
		});
		self
	}

	/// Appends a kernel record.
	pub fn kernel(&mut self, name: &str, phys: u64, virt: Range<u64>, entry: u64, content: &[u8]) -> &mut Self {
		self.push(0, name, phys, virt, entry, content)
	}

	/// Appends a companion record; `None` requests automatic placement.
	pub fn companion(
		&mut self,
		name: &str,
		phys: Option<u64>,
		virt: Range<u64>,
		entry: u64,
		content: &[u8],
	) -> &mut Self {
		self.push(1, name, phys.unwrap_or(AUTO), virt, entry, content)
	}

	/// Appends a device tree record.
	pub fn device_tree(&mut self, name: &str, content: &[u8]) -> &mut Self {
		self.push(2, name, AUTO, 0..0, 0, content)
	}

	/// Encodes the blob.
	#[must_use]
	pub fn finish(&self) -> Vec<u8> {
		let table_end = HEADER_SIZE + self.entries.len() * RECORD_SIZE;

		let mut out = Vec::with_capacity(table_end);
		out.extend_from_slice(&MAGIC);
		out.extend_from_slice(&VERSION.to_le_bytes());
		out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());

		let mut offset = table_end.next_multiple_of(CONTENT_ALIGN);
		for e in &self.entries {
			out.extend_from_slice(&e.kind.to_le_bytes());
			out.extend_from_slice(&0_u32.to_le_bytes());
			out.extend_from_slice(&e.name);
			for word in [
				e.phys,
				e.virt.start,
				e.virt.end,
				e.entry,
				offset as u64,
				e.content.len() as u64,
				0,
			] {
				out.extend_from_slice(&word.to_le_bytes());
			}
			offset = (offset + e.content.len()).next_multiple_of(CONTENT_ALIGN);
		}

		for e in &self.entries {
			out.resize(out.len().next_multiple_of(CONTENT_ALIGN), 0);
			out.extend_from_slice(&e.content);
		}

		out
	}
}
