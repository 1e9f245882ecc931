//! A radix-tree table builder shared by the 64-bit descriptor formats
//! (AArch64 long descriptors, ARMv7 LPAE and RISC-V Sv39).
//!
//! Every format uses 4 KiB tables of 512 eight-byte entries below the
//! root; they only differ in descriptor encoding, the number of levels
//! and the size of the root. The [`Format`] trait captures those
//! differences and [`Pool`] does the rest.
//!
//! Tables are handed out of a fixed pool. Table "physical addresses"
//! are computed from a base the caller supplies, which on hardware is
//! the pool's own (identity mapped) address.

use static_assertions::const_assert_eq;

use crate::{BuildError, MemAttr};

/// Entries in every non-root table.
pub const ENTRIES: usize = 512;
/// Size of one table, in bytes.
pub const TABLE_SIZE: u64 = 4096;
/// The largest leaf the kernel window is ever built from (2 MiB).
pub const MAX_WINDOW_SHIFT: u32 = 21;

/// A single 4 KiB translation table.
#[derive(Debug, Clone)]
#[repr(C, align(4096))]
pub struct Table64(pub [u64; ENTRIES]);

const_assert_eq!(size_of::<Table64>(), TABLE_SIZE as usize);
const_assert_eq!(align_of::<Table64>(), TABLE_SIZE as usize);

impl Table64 {
	/// A table whose contents have not been written yet.
	///
	/// Zero is not assumed to mean "invalid"; [`Pool::alloc`]
	/// always writes [`Format::INVALID`] explicitly.
	pub const UNWRITTEN: Self = Self([0; ENTRIES]);
}

/// A decoded descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
	/// The walk stops here and faults.
	Invalid,
	/// Points to the next-level table.
	Table(u64),
	/// Maps a block (or page) of `1 << shift(level)` bytes.
	Leaf {
		/// Output address of the block.
		phys: u64,
		/// Attributes of the block.
		attr: MemAttr,
	},
}

/// The result of walking a virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
	/// The physical address the virtual address resolves to.
	pub phys:       u64,
	/// The attributes of the mapping.
	pub attr:       MemAttr,
	/// The size of the leaf that mapped it.
	pub block_size: u64,
}

/// A 64-bit descriptor format.
///
/// Level `0` is the root table.
pub trait Format {
	/// Number of table levels.
	const LEVELS: usize;
	/// Entries used in the root table.
	const ROOT_ENTRIES: usize;
	/// One past the highest output address the format can express.
	const PHYS_LIMIT: u64;
	/// The encoding of an invalid entry.
	const INVALID: u64 = 0;

	/// Address bits resolved below the given level.
	fn shift(level: usize) -> u32;

	/// Whether a leaf may be placed at the given level.
	fn leaf_allowed(level: usize) -> bool;

	/// Encodes a pointer to a next-level table.
	fn encode_table(phys: u64) -> u64;

	/// Encodes a leaf at the given level.
	fn encode_leaf(level: usize, phys: u64, attr: MemAttr) -> u64;

	/// Decodes an entry read at the given level.
	fn decode(level: usize, raw: u64) -> Descriptor;

	/// Number of entries in a table at the given level.
	#[must_use]
	fn entries(level: usize) -> usize {
		if level == 0 {
			Self::ROOT_ENTRIES
		} else {
			ENTRIES
		}
	}

	/// One past the highest input address one root table covers.
	#[must_use]
	fn va_limit() -> u64 {
		(Self::ROOT_ENTRIES as u64) << Self::shift(0)
	}

	/// The index `virt` selects at the given level.
	#[must_use]
	fn index(level: usize, virt: u64) -> usize {
		((virt >> Self::shift(level)) as usize) & (Self::entries(level) - 1)
	}
}

/// A fixed pool of tables.
///
/// `tables` is the first field, so the pool's own address is the
/// address of its first table.
#[derive(Debug)]
#[repr(C)]
pub struct Pool<const N: usize> {
	/// The tables themselves.
	tables: [Table64; N],
	/// How many tables have been handed out.
	used:   usize,
	/// The physical address of `tables[0]`.
	base:   u64,
}

impl<const N: usize> Pool<N> {
	/// A pool with nothing allocated, suitable for `static` storage.
	pub const EMPTY: Self = Self {
		tables: [Table64::UNWRITTEN; N],
		used:   0,
		base:   0,
	};

	/// Forgets every allocation and sets the pool's physical base.
	pub fn reset(&mut self, base: u64) {
		self.used = 0;
		self.base = base;
	}

	/// The number of tables handed out so far.
	#[must_use]
	pub fn used(&self) -> usize {
		self.used
	}

	/// The physical base and length of the whole pool.
	#[must_use]
	pub fn footprint(&self) -> (u64, u64) {
		(self.base, N as u64 * TABLE_SIZE)
	}

	/// Reads a raw entry.
	#[must_use]
	pub fn entry(&self, table: usize, index: usize) -> u64 {
		self.tables[table].0[index]
	}

	/// Writes a raw entry.
	pub fn set_entry(&mut self, table: usize, index: usize, raw: u64) {
		self.tables[table].0[index] = raw;
	}

	/// The physical address of the given table.
	#[must_use]
	pub fn phys(&self, table: usize) -> u64 {
		self.base + table as u64 * TABLE_SIZE
	}

	/// The pool index of the table at `phys`, if it is an allocated table.
	#[must_use]
	pub fn index_of(&self, phys: u64) -> Option<usize> {
		let offset = phys.checked_sub(self.base)?;
		if offset % TABLE_SIZE != 0 {
			return None;
		}

		let index = usize::try_from(offset / TABLE_SIZE).ok()?;
		(index < self.used).then_some(index)
	}

	/// Allocates a table with every entry explicitly invalid.
	pub fn alloc<F: Format>(&mut self) -> Result<usize, BuildError> {
		if self.used >= N {
			return Err(BuildError::OutOfTables);
		}

		let index = self.used;
		self.used += 1;
		self.tables[index].0.fill(F::INVALID);
		Ok(index)
	}

	/// Maps one leaf of `1 << shift` bytes at `virt`.
	///
	/// Missing intermediate tables are allocated. A leaf that already
	/// covers `virt` at a higher level is split into a table that
	/// reproduces its mapping before descending.
	pub fn map<F: Format>(
		&mut self,
		root: usize,
		virt: u64,
		phys: u64,
		shift: u32,
		attr: MemAttr,
	) -> Result<(), BuildError> {
		let mut table = root;

		for level in 0..F::LEVELS {
			let index = F::index(level, virt);

			if F::shift(level) == shift {
				if !F::leaf_allowed(level) {
					return Err(BuildError::AddressOutOfRange(virt));
				}

				self.set_entry(table, index, F::encode_leaf(level, phys, attr));
				return Ok(());
			}

			table = match F::decode(level, self.entry(table, index)) {
				Descriptor::Table(next) => {
					self.index_of(next)
						.ok_or(BuildError::AddressOutOfRange(next))?
				}
				Descriptor::Invalid => {
					let next = self.alloc::<F>()?;
					self.set_entry(table, index, F::encode_table(self.phys(next)));
					next
				}
				Descriptor::Leaf {
					phys: block,
					attr: block_attr,
				} => {
					let next = self.split::<F>(level + 1, block, block_attr)?;
					self.set_entry(table, index, F::encode_table(self.phys(next)));
					next
				}
			};
		}

		Err(BuildError::AddressOutOfRange(virt))
	}

	/// Allocates a level-`level` table whose leaves reproduce a block
	/// starting at `phys`.
	fn split<F: Format>(&mut self, level: usize, phys: u64, attr: MemAttr) -> Result<usize, BuildError> {
		if level >= F::LEVELS || !F::leaf_allowed(level) {
			return Err(BuildError::AddressOutOfRange(phys));
		}

		let table = self.alloc::<F>()?;
		let shift = F::shift(level);

		for index in 0..F::entries(level) {
			let out = phys + ((index as u64) << shift);
			self.set_entry(table, index, F::encode_leaf(level, out, attr));
		}

		Ok(table)
	}

	/// Maps `len` bytes with leaves of `1 << shift` bytes.
	///
	/// `virt`, `phys` and `len` must be multiples of the leaf size.
	pub fn map_range<F: Format>(
		&mut self,
		root: usize,
		virt: u64,
		phys: u64,
		len: u64,
		shift: u32,
		attr: MemAttr,
	) -> Result<(), BuildError> {
		let size = 1_u64 << shift;
		debug_assert_eq!((virt | phys | len) & (size - 1), 0);

		let mut offset = 0;
		while offset < len {
			self.map::<F>(root, virt + offset, phys + offset, shift, attr)?;
			offset += size;
		}

		Ok(())
	}

	/// Follows the tables from `root` exactly as the hardware would.
	///
	/// `virt` must already be reduced to the root's input range.
	#[must_use]
	pub fn walk<F: Format>(&self, root: usize, virt: u64) -> Option<Translation> {
		if virt >= F::va_limit() || root >= self.used {
			return None;
		}

		let mut table = root;

		for level in 0..F::LEVELS {
			match F::decode(level, self.entry(table, F::index(level, virt))) {
				Descriptor::Invalid => return None,
				Descriptor::Table(next) => table = self.index_of(next)?,
				Descriptor::Leaf { phys, attr } => {
					let block_size = 1_u64 << F::shift(level);
					return Some(Translation {
						phys: phys + (virt & (block_size - 1)),
						attr,
						block_size,
					});
				}
			}
		}

		None
	}
}

/// The region the kernel window maps, and the leaves it is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
	/// First virtual address of the window.
	pub virt:  u64,
	/// First physical address of the window.
	pub phys:  u64,
	/// Length of the window in bytes.
	pub len:   u64,
	/// Leaf size, as a shift.
	pub shift: u32,
}

impl Window {
	/// One past the window's last virtual address.
	#[must_use]
	pub fn virt_end(&self) -> u64 {
		self.virt + self.len
	}
}

/// Computes the kernel window for an image linked at
/// `virt_start..virt_end` and placed at `phys_start`.
///
/// Addresses must already be reduced to the root's input range.
///
/// The leaf size is the largest one not above 2 MiB for which the virtual
/// and physical starts are congruent. The window starts at the leaf that
/// contains `virt_start` and runs to the end of the table holding it, and
/// at least to `virt_end`.
pub fn kernel_window<F: Format>(virt_start: u64, virt_end: u64, phys_start: u64) -> Result<Window, BuildError> {
	let page = TABLE_SIZE - 1;
	if virt_start & page != 0 {
		return Err(BuildError::Unaligned(virt_start));
	}
	if phys_start & page != 0 {
		return Err(BuildError::Unaligned(phys_start));
	}
	if virt_end < virt_start || virt_end > F::va_limit() {
		return Err(BuildError::AddressOutOfRange(virt_end));
	}

	let (level, shift) = (0..F::LEVELS)
		.map(|level| (level, F::shift(level)))
		.find(|&(level, shift)| {
			F::leaf_allowed(level)
				&& shift <= MAX_WINDOW_SHIFT
				&& (virt_start ^ phys_start) & ((1_u64 << shift) - 1) == 0
		})
		.ok_or(BuildError::Unaligned(phys_start))?;

	let size = 1_u64 << shift;
	let span = if level == 0 {
		F::va_limit()
	} else {
		size * ENTRIES as u64
	};

	let virt = virt_start & !(size - 1);
	let phys = phys_start & !(size - 1);
	let min_end = virt_end
		.checked_add(size - 1)
		.ok_or(BuildError::AddressOutOfRange(virt_end))?
		& !(size - 1);
	let table_end = (virt & !(span - 1)) + span;

	let mut end = table_end.max(min_end);
	if phys + (end - virt) > F::PHYS_LIMIT {
		end = min_end;
	}

	if end > F::va_limit() {
		return Err(BuildError::AddressOutOfRange(end));
	}
	if phys + (end - virt) > F::PHYS_LIMIT {
		return Err(BuildError::AddressOutOfRange(phys_start));
	}

	Ok(Window {
		virt,
		phys,
		len: end - virt,
		shift,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	/// A three level format shaped like Sv39, with AArch64-like encodings.
	struct Test;

	const VALID: u64 = 0b01;
	const TABLE: u64 = 0b10;
	const DEVICE: u64 = 1 << 2;
	const MASK: u64 = 0x0000_FFFF_FFFF_F000;

	impl Format for Test {
		const LEVELS: usize = 3;
		const ROOT_ENTRIES: usize = 512;
		const PHYS_LIMIT: u64 = 1 << 48;
		const INVALID: u64 = 0xDEAD_0000;

		fn shift(level: usize) -> u32 {
			[30, 21, 12][level]
		}

		fn leaf_allowed(_: usize) -> bool {
			true
		}

		fn encode_table(phys: u64) -> u64 {
			phys | TABLE | VALID
		}

		fn encode_leaf(level: usize, phys: u64, attr: MemAttr) -> u64 {
			let attr = if attr == MemAttr::Device { DEVICE } else { 0 };
			let kind = if level == 2 { TABLE } else { 0 };
			phys | attr | kind | VALID
		}

		fn decode(level: usize, raw: u64) -> Descriptor {
			if raw & VALID == 0 {
				return Descriptor::Invalid;
			}

			let attr = if raw & DEVICE == 0 {
				MemAttr::Normal
			} else {
				MemAttr::Device
			};

			match (level, raw & TABLE != 0) {
				(2, true) | (0 | 1, false) => Descriptor::Leaf { phys: raw & MASK, attr },
				(0 | 1, true) => Descriptor::Table(raw & MASK),
				_ => Descriptor::Invalid,
			}
		}
	}

	fn pool() -> Box<Pool<8>> {
		let mut pool = Box::new(Pool::<8>::EMPTY);
		pool.reset(0x8000_0000);
		pool
	}

	#[test]
	fn fresh_tables_are_explicitly_invalid() {
		let mut pool = pool();
		pool.set_entry(0, 7, 0x1234);
		let root = pool.alloc::<Test>().unwrap();
		assert!((0..ENTRIES).all(|i| pool.entry(root, i) == Test::INVALID));
	}

	#[test]
	fn identity_blocks_walk_to_themselves() {
		let mut pool = pool();
		let root = pool.alloc::<Test>().unwrap();
		pool.map_range::<Test>(root, 0, 0, 256 << 30, 30, MemAttr::Device).unwrap();
		assert_eq!(pool.used(), 1);

		for addr in [0, 0x4008_0000, 0x3F_FFFF_F000] {
			let t = pool.walk::<Test>(root, addr).unwrap();
			assert_eq!(t.phys, addr);
			assert_eq!(t.attr, MemAttr::Device);
			assert_eq!(t.block_size, 1 << 30);
		}

		assert_eq!(pool.walk::<Test>(root, 256 << 30), None);
	}

	#[test]
	fn congruent_kernels_get_2mib_blocks_to_the_end_of_the_table() {
		let w = kernel_window::<Test>(0x4020_0000 + (1 << 30), 0x4040_0000 + (1 << 30), 0x4020_0000).unwrap();
		assert_eq!(w.shift, 21);
		assert_eq!(w.virt, 0x4020_0000 + (1 << 30));
		assert_eq!(w.phys, 0x4020_0000);
		assert_eq!(w.virt_end(), 0x8000_0000 + (1 << 30));
	}

	#[test]
	fn incongruent_kernels_fall_back_to_pages() {
		let w = kernel_window::<Test>(0x8000_0000, 0x8000_1000, 0x1000).unwrap();
		assert_eq!(w.shift, 12);
		assert_eq!(w.virt, 0x8000_0000);
		assert_eq!(w.phys, 0x1000);
		assert_eq!(w.len, 2 << 20);

		let mut pool = pool();
		let root = pool.alloc::<Test>().unwrap();
		pool.map_range::<Test>(root, w.virt, w.phys, w.len, w.shift, MemAttr::Normal)
			.unwrap();

		let t = pool.walk::<Test>(root, 0x8000_0040).unwrap();
		assert_eq!(t.phys, 0x1040);
		assert_eq!(t.attr, MemAttr::Normal);
		assert_eq!(t.block_size, 4096);
	}

	#[test]
	fn windows_extend_to_cover_the_whole_image() {
		let w = kernel_window::<Test>(0x7FE0_0000, 0x8060_0000, 0x7FE0_0000).unwrap();
		assert_eq!(w.shift, 21);
		assert_eq!(w.virt_end(), 0x8060_0000);
	}

	#[test]
	fn unaligned_placements_are_rejected() {
		assert_eq!(
			kernel_window::<Test>(0x8000_0800, 0x8000_1000, 0x1000),
			Err(BuildError::Unaligned(0x8000_0800))
		);
		assert_eq!(
			kernel_window::<Test>(0x8000_0000, 0x8000_1000, 0x1800),
			Err(BuildError::Unaligned(0x1800))
		);
	}

	#[test]
	fn mapping_inside_a_block_splits_it() {
		let mut pool = pool();
		let root = pool.alloc::<Test>().unwrap();
		pool.map_range::<Test>(root, 0, 0, 4 << 30, 30, MemAttr::Device).unwrap();
		pool.map::<Test>(root, 0x4020_0000, 0x9000_0000, 21, MemAttr::Normal)
			.unwrap();

		// Split L1 block is reproduced by a table of 2 MiB leaves...
		let t = pool.walk::<Test>(root, 0x4000_1234).unwrap();
		assert_eq!(t.phys, 0x4000_1234);
		assert_eq!(t.attr, MemAttr::Device);
		assert_eq!(t.block_size, 2 << 20);
		let t = pool.walk::<Test>(root, 0x7FFF_F000).unwrap();
		assert_eq!(t.phys, 0x7FFF_F000);

		// ...except where it was overwritten.
		let t = pool.walk::<Test>(root, 0x4020_0040).unwrap();
		assert_eq!(t.phys, 0x9000_0040);
		assert_eq!(t.attr, MemAttr::Normal);

		// Neighbouring blocks are untouched.
		assert_eq!(pool.walk::<Test>(root, 0x8000_0000).unwrap().block_size, 1 << 30);
	}

	#[test]
	fn exhausting_the_pool_is_an_error() {
		let mut pool = pool();
		let root = pool.alloc::<Test>().unwrap();
		let mut result = Ok(());
		for i in 0..16_u64 {
			result = pool.map::<Test>(root, i << 30, 0, 12, MemAttr::Normal);
			if result.is_err() {
				break;
			}
		}
		assert_eq!(result, Err(BuildError::OutOfTables));
	}

	#[test]
	fn walks_ignore_pointers_outside_the_pool() {
		let mut pool = pool();
		let root = pool.alloc::<Test>().unwrap();
		pool.set_entry(root, 0, Test::encode_table(0x1000));
		assert_eq!(pool.walk::<Test>(root, 0), None);
	}
}
