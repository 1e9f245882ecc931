//! ARMv7 short-descriptor translation tables (B3.5 of ARM DDI 0406C).
//!
//! `TTBCR.N` is zero, so a single 4096-entry first-level table covers the
//! whole 4 GiB input range with 1 MiB entries. Each entry is either a
//! section or a pointer to a 256-entry coarse table of 4 KiB small pages.
//!
//! The first-level table must be 16 KiB aligned and every coarse table
//! 1 KiB aligned; both follow from the layout of [`ShortTables`].
//!
//! Memory attributes use the `TEX[2:0]`, `C`, `B` encoding directly
//! (`SCTLR.TRE` is cleared when translation is enabled):
//!
//! - Device: `TEX=000 C=0 B=0`, strongly ordered.
//! - Normal: `TEX=001 C=1 B=1`, outer and inner write-back write-allocate,
//!   shareable.

use core::mem::offset_of;

use relay_arch_base::{
	BuildError, MapRequest, MemAttr, Translation, align_up,
	radix::Window,
};
use static_assertions::const_assert_eq;

/// Entries in the first-level table.
pub const L1_ENTRIES: usize = 4096;
/// Entries in a coarse (second-level) table.
pub const L2_ENTRIES: usize = 256;
/// Number of coarse tables available.
pub const COARSE_TABLES: usize = 16;

/// Address bits resolved below the first level.
const SECTION_SHIFT: u32 = 20;
const SECTION_SIZE: u64 = 1 << SECTION_SHIFT;
/// Address bits resolved below the second level.
const PAGE_SHIFT: u32 = 12;
const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;
/// One past the highest input and output address.
const SPACE: u64 = 1 << 32;

const INVALID: u32 = 0;

/// First level: coarse table pointer.
const L1_COARSE: u32 = 0b01;
/// First level: section.
const L1_SECTION: u32 = 0b10;
/// First level: supersection marker in a section encoding.
const L1_SUPERSECTION: u32 = 1 << 18;
const L1_TYPE_MASK: u32 = 0b11;
const SECTION_ADDR: u32 = 0xFFF0_0000;
const COARSE_ADDR: u32 = 0xFFFF_FC00;
/// `AP[1:0]` = 0b01, privileged read/write.
const SECTION_AP: u32 = 0b01 << 10;
const SECTION_TEX1: u32 = 0b001 << 12;
const SECTION_S: u32 = 1 << 16;

/// Second level: small page (bit 0 is `XN`).
const L2_SMALL: u32 = 0b10;
const PAGE_ADDR: u32 = 0xFFFF_F000;
const PAGE_AP: u32 = 0b01 << 4;
const PAGE_TEX1: u32 = 0b001 << 6;
const PAGE_S: u32 = 1 << 10;

/// Cacheable.
const C: u32 = 1 << 3;
/// Bufferable.
const B: u32 = 1 << 2;

/// A decoded first-level entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum First {
	/// Faults.
	Invalid,
	/// Points to a coarse table.
	Coarse(u64),
	/// Maps 1 MiB.
	Section {
		/// Output address of the section.
		phys: u64,
		/// Attributes of the section.
		attr: MemAttr,
	},
}

/// Encodes a section.
#[must_use]
pub fn encode_section(phys: u64, attr: MemAttr) -> u32 {
	let attr = match attr {
		MemAttr::Device => 0,
		MemAttr::Normal => SECTION_TEX1 | C | B | SECTION_S,
	};

	(phys as u32 & SECTION_ADDR) | SECTION_AP | attr | L1_SECTION
}

/// Encodes a pointer to a coarse table.
#[must_use]
pub fn encode_coarse(phys: u64) -> u32 {
	(phys as u32 & COARSE_ADDR) | L1_COARSE
}

/// Encodes a small page.
#[must_use]
pub fn encode_page(phys: u64, attr: MemAttr) -> u32 {
	let attr = match attr {
		MemAttr::Device => 0,
		MemAttr::Normal => PAGE_TEX1 | C | B | PAGE_S,
	};

	(phys as u32 & PAGE_ADDR) | PAGE_AP | attr | L2_SMALL
}

fn decode_attr(raw: u32) -> MemAttr {
	if raw & C == 0 {
		MemAttr::Device
	} else {
		MemAttr::Normal
	}
}

/// Decodes a first-level entry.
#[must_use]
pub fn decode_first(raw: u32) -> First {
	match raw & L1_TYPE_MASK {
		L1_COARSE => First::Coarse(u64::from(raw & COARSE_ADDR)),
		L1_SECTION if raw & L1_SUPERSECTION == 0 => {
			First::Section {
				phys: u64::from(raw & SECTION_ADDR),
				attr: decode_attr(raw),
			}
		}
		// Faults, supersections, and the PXN section form (never written).
		_ => First::Invalid,
	}
}

/// Decodes a second-level entry, returning the page's output address.
///
/// Large pages are never written and decode as invalid.
#[must_use]
pub fn decode_page(raw: u32) -> Option<(u64, MemAttr)> {
	(raw & L2_SMALL != 0).then(|| (u64::from(raw & PAGE_ADDR), decode_attr(raw)))
}

/// Computes the kernel window for short descriptors.
///
/// Congruent modulo 1 MiB, the window is made of sections and runs to the
/// end of the 4 GiB space (or only to the end of the image, if the
/// physical side would run past 4 GiB). Otherwise it is made of small
/// pages and runs to the end of the coarse table holding `virt_start`,
/// and at least to `virt_end`.
pub fn kernel_window(virt_start: u64, virt_end: u64, phys_start: u64) -> Result<Window, BuildError> {
	if virt_start & (PAGE_SIZE - 1) != 0 {
		return Err(BuildError::Unaligned(virt_start));
	}
	if phys_start & (PAGE_SIZE - 1) != 0 {
		return Err(BuildError::Unaligned(phys_start));
	}
	if virt_end < virt_start || virt_end > SPACE {
		return Err(BuildError::AddressOutOfRange(virt_end));
	}
	if phys_start >= SPACE {
		return Err(BuildError::AddressOutOfRange(phys_start));
	}

	let (virt, phys, shift, min_end, table_end) = if (virt_start ^ phys_start) & (SECTION_SIZE - 1) == 0 {
		let virt = virt_start & !(SECTION_SIZE - 1);
		let min_end = (virt_end + SECTION_SIZE - 1) & !(SECTION_SIZE - 1);
		(virt, phys_start & !(SECTION_SIZE - 1), SECTION_SHIFT, min_end, SPACE)
	} else {
		let table_end = (virt_start & !(SECTION_SIZE - 1)) + SECTION_SIZE;
		let min_end = (virt_end + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
		(virt_start, phys_start, PAGE_SHIFT, min_end, table_end)
	};

	let mut end = table_end.max(min_end);
	if phys + (end - virt) > SPACE {
		end = min_end;
	}
	if phys + (end - virt) > SPACE {
		return Err(BuildError::AddressOutOfRange(phys_start));
	}

	Ok(Window {
		virt,
		phys,
		len: end - virt,
		shift,
	})
}

/// A first-level table and a pool of coarse tables.
///
/// `l1` is the first field, so the structure's address is the address
/// to load into `TTBR0`.
#[derive(Debug)]
#[repr(C, align(16384))]
pub struct ShortTables {
	/// The first-level table.
	l1:     [u32; L1_ENTRIES],
	/// The coarse tables.
	coarse: [[u32; L2_ENTRIES]; COARSE_TABLES],
	/// How many coarse tables have been handed out.
	used:   usize,
	/// The physical address of `l1`.
	base:   u64,
}

const_assert_eq!(offset_of!(ShortTables, coarse), 16384);

impl ShortTables {
	/// Unbuilt tables, suitable for `static` storage.
	pub const EMPTY: Self = Self {
		l1:     [INVALID; L1_ENTRIES],
		coarse: [[INVALID; L2_ENTRIES]; COARSE_TABLES],
		used:   0,
		base:   0,
	};

	/// The physical address of the first-level table.
	#[must_use]
	pub fn ttbr0(&self) -> u64 {
		self.base
	}

	/// The number of coarse tables the last build used.
	#[must_use]
	pub fn coarse_used(&self) -> usize {
		self.used
	}

	/// Reads a raw first-level entry.
	#[must_use]
	pub fn first(&self, index: usize) -> u32 {
		self.l1[index]
	}

	fn coarse_phys(&self, table: usize) -> u64 {
		self.base + (offset_of!(Self, coarse) + table * L2_ENTRIES * 4) as u64
	}

	fn coarse_index(&self, phys: u64) -> Option<usize> {
		let offset = phys.checked_sub(self.coarse_phys(0))?;
		let size = (L2_ENTRIES * 4) as u64;
		if offset % size != 0 {
			return None;
		}
		let index = usize::try_from(offset / size).ok()?;
		(index < self.used).then_some(index)
	}

	/// Allocates a coarse table with every entry explicitly invalid.
	fn alloc(&mut self) -> Result<usize, BuildError> {
		if self.used >= COARSE_TABLES {
			return Err(BuildError::OutOfTables);
		}

		let table = self.used;
		self.used += 1;
		self.coarse[table].fill(INVALID);
		Ok(table)
	}

	/// Allocates a coarse table whose pages reproduce a section.
	fn split(&mut self, phys: u64, attr: MemAttr) -> Result<usize, BuildError> {
		let table = self.alloc()?;

		for (i, entry) in self.coarse[table].iter_mut().enumerate() {
			*entry = encode_page(phys + ((i as u64) << PAGE_SHIFT), attr);
		}

		Ok(table)
	}

	/// Maps one small page, splitting the section that holds it if needed.
	fn map_page(&mut self, virt: u64, phys: u64, attr: MemAttr) -> Result<(), BuildError> {
		let index = (virt >> SECTION_SHIFT) as usize;

		let table = match decode_first(self.l1[index]) {
			First::Coarse(next) => self.coarse_index(next).ok_or(BuildError::AddressOutOfRange(next))?,
			First::Section {
				phys: block,
				attr: block_attr,
			} => {
				let table = self.split(block, block_attr)?;
				self.l1[index] = encode_coarse(self.coarse_phys(table));
				table
			}
			First::Invalid => {
				let table = self.alloc()?;
				self.l1[index] = encode_coarse(self.coarse_phys(table));
				table
			}
		};

		self.coarse[table][(virt >> PAGE_SHIFT) as usize & (L2_ENTRIES - 1)] = encode_page(phys, attr);
		Ok(())
	}

	/// Builds the identity map and the kernel window.
	///
	/// `req.tables_phys` is the physical address of `self`.
	pub fn build(&mut self, req: &MapRequest) -> Result<(), BuildError> {
		let (base, kernel) = (req.tables_phys as u64, &req.kernel);
		if base >= SPACE {
			return Err(BuildError::AddressOutOfRange(base));
		}

		self.used = 0;
		self.base = base;

		let virt_end = align_up(kernel.virt_region_end, PAGE_SIZE as usize)
			.ok_or(BuildError::AddressOutOfRange(kernel.virt_region_end as u64))?;
		let window = kernel_window(
			kernel.virt_region_start as u64,
			virt_end as u64,
			kernel.phys_region_start as u64,
		)?;

		req.check_window(window.virt, window.virt_end())?;

		for (i, entry) in self.l1.iter_mut().enumerate() {
			*entry = encode_section((i as u64) << SECTION_SHIFT, MemAttr::Device);
		}

		let step = 1_u64 << window.shift;
		let mut offset = 0;
		while offset < window.len {
			let virt = window.virt + offset;
			let phys = window.phys + offset;

			if window.shift == SECTION_SHIFT {
				self.l1[(virt >> SECTION_SHIFT) as usize] = encode_section(phys, MemAttr::Normal);
			} else {
				self.map_page(virt, phys, MemAttr::Normal)?;
			}

			offset += step;
		}

		Ok(())
	}

	/// Follows the tables exactly as the hardware would.
	#[must_use]
	pub fn walk(&self, virt: u64) -> Option<Translation> {
		if virt >= SPACE {
			return None;
		}

		match decode_first(self.l1[(virt >> SECTION_SHIFT) as usize]) {
			First::Invalid => None,
			First::Section { phys, attr } => {
				Some(Translation {
					phys: phys + (virt & (SECTION_SIZE - 1)),
					attr,
					block_size: SECTION_SIZE,
				})
			}
			First::Coarse(next) => {
				let table = self.coarse_index(next)?;
				let (phys, attr) = decode_page(self.coarse[table][(virt >> PAGE_SHIFT) as usize & (L2_ENTRIES - 1)])?;
				Some(Translation {
					phys: phys + (virt & (PAGE_SIZE - 1)),
					attr,
					block_size: PAGE_SIZE,
				})
			}
		}
	}
}
