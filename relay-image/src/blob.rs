//! The `RLYB` blob format.
//!
//! All integers are little-endian. A 16-byte header is followed directly
//! by up to [`MAX_IMAGES`] 80-byte records; content lives anywhere after
//! that, located by each record's offset.

use relay_arch_base::PAGE_SIZE;
use relay_type::ByteReader;

use crate::{LoadError, MAX_IMAGES, NAME_LEN, Name};

/// Blob magic.
pub const MAGIC: [u8; 8] = *b"RLYBLOB\0";
/// The only format version understood.
pub const VERSION: u32 = 1;
/// Size of the header.
pub const HEADER_SIZE: usize = 16;
/// Size of one record.
pub const RECORD_SIZE: usize = 80;
/// `phys_start` value requesting automatic placement.
pub const AUTO: u64 = u64::MAX;

/// What an image is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
	/// The privileged kernel image.
	Kernel,
	/// Any other image the kernel expects.
	Companion,
	/// A flattened device tree, used when firmware supplies none.
	DeviceTree,
}

impl Kind {
	/// Decodes the record's kind field.
	const fn from_raw(raw: u32) -> Option<Self> {
		match raw {
			0 => Some(Self::Kernel),
			1 => Some(Self::Companion),
			2 => Some(Self::DeviceTree),
			_ => None,
		}
	}
}

/// One validated record.
///
/// For [`Kind::DeviceTree`] records only `offset` and `file_size` are
/// meaningful; the tree is always relocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
	/// What the image is.
	pub kind:       Kind,
	/// The image's name.
	pub name:       Name,
	/// Declared placement, or `None` for automatic.
	pub phys_start: Option<usize>,
	/// Linked start.
	pub virt_start: usize,
	/// Linked end (exclusive).
	pub virt_end:   usize,
	/// Linked entry point.
	pub virt_entry: usize,
	/// Content offset from the start of the blob.
	pub offset:     usize,
	/// Content length.
	pub file_size:  usize,
}

impl Record {
	/// Size of the linked range.
	#[must_use]
	pub const fn virt_size(&self) -> usize {
		self.virt_end - self.virt_start
	}
}

/// A parsed blob: its records, checked against each other and against
/// the blob's length.
#[derive(Debug, Clone)]
pub struct Blob {
	/// The records, in blob order.
	records: heapless::Vec<Record, MAX_IMAGES>,
}

/// Converts a 64-bit field to a machine word.
fn word(value: u64) -> Result<usize, LoadError> {
	usize::try_from(value).map_err(|_| LoadError::AddressOutOfRange(value))
}

/// Fails unless `addr` is page aligned.
fn aligned(name: Name, addr: usize) -> Result<(), LoadError> {
	if addr % PAGE_SIZE == 0 {
		Ok(())
	} else {
		Err(LoadError::Unaligned {
			name,
			addr: addr as u64,
		})
	}
}

impl Blob {
	/// Parses and validates a blob.
	///
	/// `bytes` may extend past the end of the blob.
	pub fn parse(bytes: &[u8]) -> Result<Self, LoadError> {
		let mut reader = ByteReader::new(bytes);

		let magic = reader.take(MAGIC.len()).ok_or(LoadError::Truncated)?;
		if magic != MAGIC {
			return Err(LoadError::BadMagic);
		}

		let version = reader.le::<u32>().ok_or(LoadError::Truncated)?;
		if version != VERSION {
			return Err(LoadError::UnsupportedVersion(version));
		}

		let count = reader.le::<u32>().ok_or(LoadError::Truncated)?;
		if count == 0 {
			return Err(LoadError::NoRecords);
		}
		if count as usize > MAX_IMAGES {
			return Err(LoadError::TooManyRecords(count));
		}

		let mut records = heapless::Vec::new();

		for index in 0..count as usize {
			let raw = reader.take(RECORD_SIZE).ok_or(LoadError::Truncated)?;
			let record = Self::record(index, raw, bytes.len())?;

			match (index, record.kind) {
				(0, Kind::Kernel) | (1.., Kind::Companion) | (1, Kind::DeviceTree) => {}
				(0, _) => return Err(LoadError::KernelNotFirst),
				(_, Kind::Kernel) => return Err(LoadError::MultipleKernels(index)),
				(_, Kind::DeviceTree) => return Err(LoadError::DeviceTreeOutOfOrder(index)),
			}

			// Cannot fail; `count` was checked against the capacity.
			let _ = records.push(record);
		}

		if !records.iter().any(|r| r.kind == Kind::Companion) {
			return Err(LoadError::NoCompanions);
		}

		Ok(Self { records })
	}

	/// Decodes and checks one record on its own.
	fn record(index: usize, raw: &[u8], blob_len: usize) -> Result<Record, LoadError> {
		let mut r = ByteReader::new(raw);
		// A record is exactly `RECORD_SIZE` bytes, so none of these reads fail.
		let mut field = || r.le::<u64>().ok_or(LoadError::Truncated);

		let head = field()?;
		let kind = Kind::from_raw(head as u32).ok_or(LoadError::BadKind {
			index,
			kind: head as u32,
		})?;
		if head >> 32 != 0 {
			return Err(LoadError::ReservedNonZero(index));
		}

		let mut raw_name = [0; NAME_LEN];
		raw_name[..8].copy_from_slice(&field()?.to_le_bytes());
		raw_name[8..].copy_from_slice(&field()?.to_le_bytes());
		let name = Name::from_raw(raw_name).ok_or(LoadError::BadName(index))?;

		let phys_start = field()?;
		let virt_start = word(field()?)?;
		let virt_end = word(field()?)?;
		let virt_entry = word(field()?)?;
		let offset = word(field()?)?;
		let file_size = word(field()?)?;
		if field()? != 0 {
			return Err(LoadError::ReservedNonZero(index));
		}

		let phys_start = match phys_start {
			AUTO => None,
			phys => Some(word(phys)?),
		};

		if offset.checked_add(file_size).is_none_or(|end| end > blob_len) {
			return Err(LoadError::ContentOutOfBounds(name));
		}

		let record = Record {
			kind,
			name,
			phys_start,
			virt_start,
			virt_end,
			virt_entry,
			offset,
			file_size,
		};

		if kind == Kind::DeviceTree {
			return Ok(record);
		}

		if virt_end < virt_start {
			return Err(LoadError::InvertedRange(name));
		}
		aligned(name, virt_start)?;
		if let Some(phys) = phys_start {
			aligned(name, phys)?;
		}
		if file_size > record.virt_size() {
			return Err(LoadError::ContentTooLarge(name));
		}

		if kind == Kind::Kernel {
			if phys_start.is_none() {
				return Err(LoadError::KernelAutoPlaced);
			}
			if !(virt_start..virt_end).contains(&virt_entry) {
				return Err(LoadError::EntryOutsideImage(virt_entry));
			}
		}

		Ok(record)
	}

	/// Every record, in blob order.
	#[must_use]
	pub fn records(&self) -> &[Record] {
		&self.records
	}

	/// The kernel record.
	#[must_use]
	pub fn kernel(&self) -> &Record {
		// `parse` guarantees the kernel comes first.
		&self.records[0]
	}

	/// The device tree record, if the blob carries one.
	#[must_use]
	pub fn device_tree(&self) -> Option<&Record> {
		self.records.get(1).filter(|r| r.kind == Kind::DeviceTree)
	}

	/// The companion records, in blob order.
	pub fn companions(&self) -> impl Iterator<Item = &Record> {
		self.records.iter().filter(|r| r.kind == Kind::Companion)
	}
}
