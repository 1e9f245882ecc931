//! Property value decoding helpers.

use relay_type::ByteReader;

/// Splits a string-list property (`compatible`, for example) into its
/// NUL-terminated entries, most specific first.
///
/// Empty entries are skipped; a missing final NUL is tolerated.
pub fn strings(value: &[u8]) -> impl Iterator<Item = &[u8]> + '_ {
	value.split(|&b| b == 0).filter(|s| !s.is_empty())
}

/// Reads `#address-cells`/`#size-cells` sized values out of a property.
#[derive(Debug, Clone)]
pub struct CellReader<'a> {
	/// Cursor over the property value.
	reader: ByteReader<'a>,
}

impl<'a> CellReader<'a> {
	/// Creates a reader over a property value.
	#[must_use]
	pub const fn new(value: &'a [u8]) -> Self {
		Self {
			reader: ByteReader::new(value),
		}
	}

	/// Reads a value made of `cells` 32-bit big-endian cells.
	///
	/// Returns `None` once the value is exhausted, or when `cells` is
	/// zero or more than two (the value would not fit in 64 bits).
	pub fn read(&mut self, cells: u32) -> Option<u64> {
		match cells {
			1 => self.reader.be::<u32>().map(u64::from),
			2 => self.reader.be::<u64>(),
			_ => None,
		}
	}

	/// Reads one `(address, size)` pair.
	pub fn pair(&mut self, address_cells: u32, size_cells: u32) -> Option<(u64, u64)> {
		let address = self.read(address_cells)?;
		let size = if size_cells == 0 {
			0
		} else {
			self.read(size_cells)?
		};
		Some((address, size))
	}

	/// Returns whether every byte has been read.
	#[must_use]
	pub const fn is_empty(&self) -> bool {
		self.reader.remaining() == 0
	}
}

/// Reads a single big-endian `u32` property (`#address-cells`, etc.).
#[must_use]
pub fn u32_value(value: &[u8]) -> Option<u32> {
	if value.len() == 4 {
		ByteReader::new(value).be::<u32>()
	} else {
		None
	}
}
