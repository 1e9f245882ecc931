//! Builds small DeviceTree blobs in memory.
//!
//! Only the subset the loader reads is supported: nodes, properties and
//! memory reservations. Used by tests that need a tree
//! without shipping binary fixtures.

use alloc::vec::Vec;

use crate::{FDT_MAGIC, HEADER_SIZE, SUPPORTED_VERSION, token};

/// Accumulates structure tokens and strings for a blob.
#[derive(Debug, Default)]
pub struct FdtBuilder {
	/// The structure block.
	structs:    Vec<u8>,
	/// The strings block.
	strings:    Vec<u8>,
	/// The boot CPU's physical ID.
	boot_cpuid: u32,
	/// Memory reservation entries, without the terminator.
	reserved:   Vec<(u64, u64)>,
}

impl FdtBuilder {
	/// Creates an empty builder.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the boot CPU ID written to the header.
	pub fn boot_cpuid(&mut self, id: u32) -> &mut Self {
		self.boot_cpuid = id;
		self
	}

	/// Adds a memory reservation entry.
	pub fn reserve(&mut self, address: u64, size: u64) -> &mut Self {
		self.reserved.push((address, size));
		self
	}

	/// Pads the structure block to a 4-byte boundary.
	fn pad(&mut self) {
		while self.structs.len() % 4 != 0 {
			self.structs.push(0);
		}
	}

	/// Opens a node. The root node's name is empty.
	pub fn begin_node(&mut self, name: &str) -> &mut Self {
		self.structs.extend_from_slice(&token::BEGIN_NODE.to_be_bytes());
		self.structs.extend_from_slice(name.as_bytes());
		self.structs.push(0);
		self.pad();
		self
	}

	/// Closes the innermost open node.
	pub fn end_node(&mut self) -> &mut Self {
		self.structs.extend_from_slice(&token::END_NODE.to_be_bytes());
		self
	}

	/// Returns the offset of `name` in the strings block, adding it if needed.
	fn string_offset(&mut self, name: &str) -> u32 {
		let mut offset = 0;
		for existing in self.strings.split(|&b| b == 0) {
			if existing == name.as_bytes() {
				return offset as u32;
			}
			offset += existing.len() + 1;
		}

		let offset = self.strings.len();
		self.strings.extend_from_slice(name.as_bytes());
		self.strings.push(0);
		offset as u32
	}

	/// Adds a property with a raw value.
	pub fn prop(&mut self, name: &str, value: &[u8]) -> &mut Self {
		let nameoff = self.string_offset(name);
		self.structs.extend_from_slice(&token::PROP.to_be_bytes());
		self.structs.extend_from_slice(&(value.len() as u32).to_be_bytes());
		self.structs.extend_from_slice(&nameoff.to_be_bytes());
		self.structs.extend_from_slice(value);
		self.pad();
		self
	}

	/// Adds a single-cell property.
	pub fn prop_u32(&mut self, name: &str, value: u32) -> &mut Self {
		self.prop(name, &value.to_be_bytes())
	}

	/// Adds a multi-cell property.
	pub fn prop_cells(&mut self, name: &str, cells: &[u32]) -> &mut Self {
		let value: Vec<u8> = cells.iter().flat_map(|c| c.to_be_bytes()).collect();
		self.prop(name, &value)
	}

	/// Adds a NUL-terminated string property.
	pub fn prop_str(&mut self, name: &str, value: &str) -> &mut Self {
		self.prop_strs(name, &[value])
	}

	/// Adds a string-list property.
	pub fn prop_strs(&mut self, name: &str, values: &[&str]) -> &mut Self {
		let mut value = Vec::new();
		for s in values {
			value.extend_from_slice(s.as_bytes());
			value.push(0);
		}
		self.prop(name, &value)
	}

	/// Terminates the structure block and lays out the blob.
	#[must_use]
	pub fn finish(&mut self) -> Vec<u8> {
		self.structs.extend_from_slice(&token::END.to_be_bytes());

		// Header, then the reservations and their terminating (zero) entry.
		let off_mem_rsvmap = HEADER_SIZE;
		let off_dt_struct = off_mem_rsvmap + 16 * (self.reserved.len() + 1);
		let off_dt_strings = off_dt_struct + self.structs.len();
		let totalsize = off_dt_strings + self.strings.len();

		let header = [
			FDT_MAGIC,
			totalsize as u32,
			off_dt_struct as u32,
			off_dt_strings as u32,
			off_mem_rsvmap as u32,
			SUPPORTED_VERSION,
			16,
			self.boot_cpuid,
			self.strings.len() as u32,
			self.structs.len() as u32,
		];

		let mut blob = Vec::with_capacity(totalsize);
		for word in header {
			blob.extend_from_slice(&word.to_be_bytes());
		}
		for &(address, size) in self.reserved.iter().chain(&[(0, 0)]) {
			blob.extend_from_slice(&address.to_be_bytes());
			blob.extend_from_slice(&size.to_be_bytes());
		}
		blob.extend_from_slice(&self.structs);
		blob.extend_from_slice(&self.strings);
		blob
	}
}
