//! DeviceTree blob reader for the Relay boot loader.
//!
//! The loader only validates the header (magic, version and size) and
//! otherwise forwards the blob to the kernel untouched. It does walk the
//! structure block read-only to discover devices and `/memory` nodes;
//! every access here is bounds checked against the blob's byte slice.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(doc, feature(doc_cfg))]

#[cfg(any(test, feature = "builder"))]
extern crate alloc;

#[cfg(any(test, feature = "builder"))]
pub mod builder;
mod prop;

use core::ffi::CStr;

use relay_type::{Be, ByteReader};

pub use self::prop::{CellReader, strings, u32_value};

/// The magic number at the start of every blob.
pub const FDT_MAGIC: u32 = 0xD00D_FEED;
/// The size of the blob header, in bytes.
pub const HEADER_SIZE: usize = 40;
/// The newest format version this reader understands.
pub const SUPPORTED_VERSION: u32 = 17;
/// The oldest format version this reader accepts.
pub const MIN_VERSION: u32 = 16;

/// An error that occurs when validating a DeviceTree blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
	/// Fewer bytes than a header were supplied.
	#[error("device tree truncated: {len} bytes is smaller than the header")]
	TooShort {
		/// Bytes available.
		len: usize,
	},
	/// Magic number mismatch (expects `0xd00dfeed`).
	#[error("device tree magic mismatch (found {0:#010x})")]
	BadMagic(u32),
	/// The header reports a total size smaller than the header itself.
	#[error("device tree reports an impossible total size of {0} bytes")]
	TooSmall(u32),
	/// The header reports more bytes than are available.
	#[error("device tree reports {reported} bytes but only {available} are available")]
	Truncated {
		/// Reported length (by the DeviceTree header).
		reported:  u32,
		/// Bytes actually available.
		available: usize,
	},
	/// Version mismatch.
	///
	/// **Note:** The least compatible version is checked, not
	/// just the actual version number.
	#[error("unsupported device tree version {reported} (compatible with {compatible})")]
	VersionMismatch {
		/// Reported version.
		reported:   u32,
		/// Lowest compatible version.
		compatible: u32,
	},
	/// The structure offset is not 4-byte aligned.
	#[error("device tree structure block is unaligned")]
	StructUnaligned,
	/// The structure or strings block lies outside the blob.
	#[error("device tree block lies outside the blob")]
	BlockOutOfBounds,
}

/// A validated, borrowed flattened DeviceTree blob.
///
/// Documented in section 5 of the DeviceTree specification
/// <https://www.devicetree.org/specifications/>.
#[derive(Debug, Clone, Copy)]
pub struct Fdt<'a> {
	/// The whole blob, `totalsize` bytes long.
	bytes:   &'a [u8],
	/// The structure block.
	structs: &'a [u8],
	/// The strings block.
	strings: &'a [u8],
	/// The physical ID of the boot CPU.
	boot_cpuid: u32,
	/// The format version.
	version: u32,
}

/// Reads the header word at `offset`.
fn header_word(bytes: &[u8], offset: usize) -> u32 {
	bytes
		.get(offset..)
		.and_then(Be::<u32>::from_bytes)
		.map_or(0, Be::read)
}

/// Checks the magic and size fields and returns the blob's total size.
///
/// Only the first [`HEADER_SIZE`] bytes are looked at.
pub fn total_size(header: &[u8]) -> Result<usize, ValidationError> {
	if header.len() < HEADER_SIZE {
		return Err(ValidationError::TooShort { len: header.len() });
	}

	let magic = header_word(header, 0);
	if magic != FDT_MAGIC {
		return Err(ValidationError::BadMagic(magic));
	}

	let totalsize = header_word(header, 4);
	if (totalsize as usize) < HEADER_SIZE {
		return Err(ValidationError::TooSmall(totalsize));
	}

	Ok(totalsize as usize)
}

impl<'a> Fdt<'a> {
	/// Validates the header and borrows the blob.
	///
	/// `bytes` may be longer than the blob; the header's `totalsize`
	/// decides how much of it belongs to the tree.
	pub fn new(bytes: &'a [u8]) -> Result<Self, ValidationError> {
		let totalsize = total_size(bytes)?;

		let bytes = bytes
			.get(..totalsize)
			.ok_or(ValidationError::Truncated {
				reported:  totalsize as u32,
				available: bytes.len(),
			})?;

		let version = header_word(bytes, 20);
		let last_comp_version = header_word(bytes, 24);
		if version < MIN_VERSION || last_comp_version > SUPPORTED_VERSION {
			return Err(ValidationError::VersionMismatch {
				reported:   version,
				compatible: last_comp_version,
			});
		}

		let off_dt_struct = header_word(bytes, 8) as usize;
		if off_dt_struct % 4 != 0 {
			return Err(ValidationError::StructUnaligned);
		}

		let off_dt_strings = header_word(bytes, 12) as usize;
		let size_dt_strings = header_word(bytes, 32) as usize;
		let size_dt_struct = header_word(bytes, 36) as usize;

		let block = move |off: usize, size: usize| {
			off.checked_add(size)
				.and_then(|end| bytes.get(off..end))
				.ok_or(ValidationError::BlockOutOfBounds)
		};

		Ok(Self {
			bytes,
			structs: block(off_dt_struct, size_dt_struct)?,
			strings: block(off_dt_strings, size_dt_strings)?,
			boot_cpuid: header_word(bytes, 28),
			version,
		})
	}

	/// Returns the whole blob.
	#[must_use]
	pub fn as_bytes(&self) -> &'a [u8] {
		self.bytes
	}

	/// Returns the blob's total size in bytes.
	#[must_use]
	pub fn total_size(&self) -> usize {
		self.bytes.len()
	}

	/// Returns the bootstrap (primary) processor's physical ID.
	#[must_use]
	pub fn boot_cpuid(&self) -> u32 {
		self.boot_cpuid
	}

	/// Returns the format version.
	#[must_use]
	pub fn version(&self) -> u32 {
		self.version
	}

	/// Returns the memory reservation block's entries, up to its
	/// terminating empty entry.
	///
	/// A block that runs off the end of the blob ends the iteration early.
	pub fn reservations(&self) -> impl Iterator<Item = Reservation> + use<'a> {
		let offset = header_word(self.bytes, 16) as usize;
		let mut reader = ByteReader::new(self.bytes.get(offset..).unwrap_or_default());

		core::iter::from_fn(move || {
			let address = reader.be::<u64>()?;
			let size = reader.be::<u64>()?;
			(address != 0 || size != 0).then_some(Reservation { address, size })
		})
	}

	/// Returns an iterator over the raw structure tokens.
	#[must_use]
	pub fn tokens(&self) -> FdtIter<'a> {
		FdtIter {
			reader:  ByteReader::new(self.structs),
			strings: self.strings,
			done:    false,
		}
	}
}

/// A memory reservation block entry: RAM the client program must leave
/// alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
	/// Physical address of the first reserved byte.
	pub address: u64,
	/// Length in bytes.
	pub size:    u64,
}

/// A single token in a DeviceTree blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdtToken<'a> {
	/// A property token.
	Property {
		/// The property's name.
		name:  &'a CStr,
		/// The property's value.
		value: &'a [u8],
	},
	/// A node token.
	Node {
		/// The node's name (unit address included).
		name: &'a CStr,
	},
	/// An end node token.
	EndNode,
	/// A NOP token.
	Nop,
	/// An end token.
	End,
}

/// Structure block token values.
mod token {
	/// `FDT_BEGIN_NODE`
	pub const BEGIN_NODE: u32 = 1;
	/// `FDT_END_NODE`
	pub const END_NODE: u32 = 2;
	/// `FDT_PROP`
	pub const PROP: u32 = 3;
	/// `FDT_NOP`
	pub const NOP: u32 = 4;
	/// `FDT_END`
	pub const END: u32 = 9;
}

/// Iterates a DTB structure block and returns tokens.
///
/// Returned by [`Fdt::tokens`]. Stops (returns `None`) after
/// [`FdtToken::End`] or at the first malformed token.
#[derive(Debug, Clone)]
pub struct FdtIter<'a> {
	/// Cursor into the structure block.
	reader:  ByteReader<'a>,
	/// The strings block.
	strings: &'a [u8],
	/// Whether the iterator is exhausted.
	done:    bool,
}

impl<'a> FdtIter<'a> {
	/// Decodes the next token, or `None` if the block is malformed.
	fn decode(&mut self) -> Option<FdtToken<'a>> {
		match self.reader.be::<u32>()? {
			token::END => Some(FdtToken::End),
			token::NOP => Some(FdtToken::Nop),
			token::END_NODE => Some(FdtToken::EndNode),
			token::PROP => {
				let len = self.reader.be::<u32>()? as usize;
				let nameoff = self.reader.be::<u32>()? as usize;
				let value = self.reader.take(len)?;
				self.reader.align(4)?;

				let name = CStr::from_bytes_until_nul(self.strings.get(nameoff..)?).ok()?;
				Some(FdtToken::Property { name, value })
			}
			token::BEGIN_NODE => {
				let rest = self.reader.clone().take(self.reader.remaining())?;
				let name = CStr::from_bytes_until_nul(rest).ok()?;
				// Name plus NUL, padded to the next 32-bit boundary.
				self.reader.take(name.count_bytes() + 1)?;
				self.reader.align(4)?;
				Some(FdtToken::Node { name })
			}
			_ => None,
		}
	}
}

impl<'a> Iterator for FdtIter<'a> {
	type Item = FdtToken<'a>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.done {
			return None;
		}

		let token = self.decode();
		if matches!(token, None | Some(FdtToken::End)) {
			self.done = true;
		}

		token
	}
}

impl core::iter::FusedIterator for FdtIter<'_> {}
