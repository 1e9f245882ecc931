//! Boot translation tables using VMSAv8-64 long descriptors with a
//! 4 KiB granule.
//!
//! The lower half (`TTBR0_EL1`) identity maps the first 512 GiB with
//! 1 GiB device blocks. A kernel linked into the upper half (bit 63 set)
//! gets its own `TTBR1_EL1` tree; a kernel linked into the lower half
//! shares the identity tree, splitting whichever identity block its
//! window lands in. That window may not cover the loader or the console.
//!
//! Some notes on the descriptor layout (D8.3 of ARM DDI 0487):
//!
//! - Bit 0 marks an entry valid. At levels 0 through 2, bit 1 selects a
//!   table (set) or a block (clear). Level 0 cannot hold blocks.
//! - At level 3 the same `0b11` encoding means "page"; `0b01` is reserved
//!   and treated as invalid.
//! - Output addresses occupy bits 47:12.

use relay_arch_base::{
	AddrRange, BootTables, BuildError, MapRequest, MemAttr, Translation,
	radix::{Descriptor, Format, Pool, kernel_window},
};

use crate::reg::{MAIR_DEVICE_INDEX, MAIR_NORMAL_INDEX};

/// Number of tables in the pool.
pub const POOL_TABLES: usize = 16;

/// Output address bits of a descriptor.
const ADDR_MASK: u64 = 0x0000_FFFF_FFFF_F000;
/// Descriptor is valid.
const VALID: u64 = 1 << 0;
/// Table (levels 0..=2) or page (level 3) descriptor.
const TABLE_OR_PAGE: u64 = 1 << 1;
/// `AttrIndx[2:0]` shift.
const ATTR_SHIFT: u64 = 2;
/// `AttrIndx[2:0]` mask.
const ATTR_MASK: u64 = 0b111 << ATTR_SHIFT;
/// Inner shareable.
const SH_INNER: u64 = 0b11 << 8;
/// Access flag.
const AF: u64 = 1 << 10;

/// One past the highest lower-half address.
const HALF: u64 = 1 << 48;
/// The bits that must all be set for an upper-half address.
const UPPER_BITS: u64 = !(HALF - 1);

/// The VMSAv8-64 4 KiB granule, 48-bit descriptor format.
pub struct LongDescriptor;

impl Format for LongDescriptor {
	const LEVELS: usize = 4;
	const PHYS_LIMIT: u64 = HALF;
	const ROOT_ENTRIES: usize = 512;

	fn shift(level: usize) -> u32 {
		39 - 9 * level as u32
	}

	fn leaf_allowed(level: usize) -> bool {
		level >= 1
	}

	fn encode_table(phys: u64) -> u64 {
		(phys & ADDR_MASK) | TABLE_OR_PAGE | VALID
	}

	fn encode_leaf(level: usize, phys: u64, attr: MemAttr) -> u64 {
		let attr = match attr {
			MemAttr::Device => MAIR_DEVICE_INDEX << ATTR_SHIFT,
			MemAttr::Normal => (MAIR_NORMAL_INDEX << ATTR_SHIFT) | SH_INNER,
		};

		let kind = if level == 3 { TABLE_OR_PAGE } else { 0 };

		(phys & ADDR_MASK) | AF | attr | kind | VALID
	}

	fn decode(level: usize, raw: u64) -> Descriptor {
		if raw & VALID == 0 {
			return Descriptor::Invalid;
		}

		let attr = if (raw & ATTR_MASK) >> ATTR_SHIFT == MAIR_DEVICE_INDEX {
			MemAttr::Device
		} else {
			MemAttr::Normal
		};

		match (level, raw & TABLE_OR_PAGE != 0) {
			(0..=2, true) => Descriptor::Table(raw & ADDR_MASK),
			(1 | 2, false) | (3, true) => {
				Descriptor::Leaf {
					phys: raw & ADDR_MASK,
					attr,
				}
			}
			_ => Descriptor::Invalid,
		}
	}
}

/// The AArch64 boot translation tables.
///
/// The pool comes first so the structure's address is the pool's.
#[repr(C)]
pub struct Tables {
	/// The table pool.
	pool:  Pool<POOL_TABLES>,
	/// Pool index of the `TTBR0_EL1` root, once built.
	ttbr0: Option<usize>,
	/// Pool index of the `TTBR1_EL1` root, if the kernel is in the upper half.
	ttbr1: Option<usize>,
}

/// Splits an address into its half and its offset inside that half.
///
/// Returns `None` for non-canonical addresses.
fn split_half(virt: u64) -> Option<(bool, u64)> {
	if virt < HALF {
		Some((false, virt))
	} else if virt & UPPER_BITS == UPPER_BITS {
		Some((true, virt & !UPPER_BITS))
	} else {
		None
	}
}

impl Tables {
	/// The physical address to load into `TTBR0_EL1`.
	#[must_use]
	pub fn ttbr0(&self) -> Option<u64> {
		self.ttbr0.map(|t| self.pool.phys(t))
	}

	/// The physical address to load into `TTBR1_EL1`, if the upper half is used.
	#[must_use]
	pub fn ttbr1(&self) -> Option<u64> {
		self.ttbr1.map(|t| self.pool.phys(t))
	}

	/// The number of tables the last build used.
	#[must_use]
	pub fn tables_used(&self) -> usize {
		self.pool.used()
	}
}

impl BootTables for Tables {
	const EMPTY: Self = Self {
		pool:  Pool::EMPTY,
		ttbr0: None,
		ttbr1: None,
	};

	fn build(&mut self, req: &MapRequest) -> Result<(), BuildError> {
		self.pool.reset(req.tables_phys as u64);
		self.ttbr0 = None;
		self.ttbr1 = None;

		let kernel = &req.kernel;
		let virt_start = kernel.virt_region_start as u64;
		let virt_last = (kernel.virt_region_end as u64).saturating_sub(1).max(virt_start);

		let (upper, start) = split_half(virt_start).ok_or(BuildError::NonCanonical(virt_start))?;
		let (upper_last, last) = split_half(virt_last).ok_or(BuildError::NonCanonical(virt_last))?;
		if upper != upper_last {
			return Err(BuildError::NonCanonical(virt_last));
		}

		let window = kernel_window::<LongDescriptor>(start, last + 1, kernel.phys_region_start as u64)?;

		// Identity: L0[0] -> 512 x 1 GiB.
		let root0 = self.pool.alloc::<LongDescriptor>()?;
		self.pool
			.map_range::<LongDescriptor>(root0, 0, 0, 512 << 30, 30, MemAttr::Device)?;
		self.ttbr0 = Some(root0);

		let root = if upper {
			let root1 = self.pool.alloc::<LongDescriptor>()?;
			self.ttbr1 = Some(root1);
			root1
		} else {
			req.check_window(window.virt, window.virt_end())?;
			root0
		};

		self.pool.map_range::<LongDescriptor>(
			root,
			window.virt,
			window.phys,
			window.len,
			window.shift,
			MemAttr::Normal,
		)
	}

	fn walk(&self, virt: usize) -> Option<Translation> {
		let (upper, offset) = split_half(virt as u64)?;
		let root = if upper { self.ttbr1? } else { self.ttbr0? };
		self.pool.walk::<LongDescriptor>(root, offset)
	}

	fn footprint(&self) -> AddrRange {
		let (base, len) = self.pool.footprint();
		AddrRange::new(base as usize, (base + len) as usize)
	}
}

#[cfg(test)]
mod tests {
	use relay_arch_base::ImageInfo;

	use super::*;

	const TABLES_PHYS: usize = 0x4010_0000;

	fn build(kernel: ImageInfo, loader: AddrRange) -> Result<Box<Tables>, BuildError> {
		let mut tables = Box::new(Tables::EMPTY);
		tables.build(&MapRequest {
			kernel,
			loader,
			console: uart(),
			tables_phys: TABLES_PHYS,
		})?;
		Ok(tables)
	}

	fn loader() -> AddrRange {
		AddrRange::new(0x4008_0000, 0x4020_0000)
	}

	/// The PL011 on QEMU virt.
	fn uart() -> AddrRange {
		AddrRange::new(0x0900_0000, 0x0900_1000)
	}

	#[test]
	fn upper_half_kernel_uses_ttbr1() {
		let kernel = ImageInfo::new(0x4040_0000, 0xFFFF_FF80_0000_0000, 0xFFFF_FF80_0030_0000, 0xFFFF_FF80_0000_1000)
			.unwrap();
		let tables = build(kernel, loader()).unwrap();

		assert_eq!(tables.ttbr0(), Some(TABLES_PHYS as u64));
		assert!(tables.ttbr1().is_some());

		let t = tables.walk(kernel.virt_entry).unwrap();
		assert_eq!(t.phys, 0x4040_1000);
		assert_eq!(t.attr, MemAttr::Normal);
		assert_eq!(t.block_size, 2 << 20);

		for virt in (kernel.virt_region_start..kernel.virt_region_end).step_by(0x1_0000) {
			assert_eq!(tables.walk(virt).unwrap().phys as usize, kernel.virt_to_phys(virt));
		}
	}

	#[test]
	fn loader_stays_identity_mapped() {
		let kernel = ImageInfo::new(0x4040_0000, 0xFFFF_FF80_0000_0000, 0xFFFF_FF80_0030_0000, 0xFFFF_FF80_0000_0000)
			.unwrap();
		let tables = build(kernel, loader()).unwrap();

		for addr in (loader().start..loader().end).step_by(0x1000) {
			let t = tables.walk(addr).unwrap();
			assert_eq!(t.phys as usize, addr);
			assert_eq!(t.attr, MemAttr::Device);
		}

		assert_eq!(tables.walk(uart().start).unwrap().phys as usize, uart().start);
	}

	#[test]
	fn low_kernel_with_incongruent_placement_gets_pages() {
		let kernel = ImageInfo::new(0x1000, 0x8000_0000, 0x8000_1000, 0x8000_0040).unwrap();
		let tables = build(kernel, loader()).unwrap();

		assert!(tables.ttbr1().is_none());
		let t = tables.walk(0x8000_0040).unwrap();
		assert_eq!(t.phys, 0x1040);
		assert_eq!(t.block_size, 4096);

		// The split identity block still maps the rest of its range.
		let t = tables.walk(0xBFFF_F000).unwrap();
		assert_eq!(t.phys, 0xBFFF_F000);
		assert_eq!(t.attr, MemAttr::Device);

		// And the loader is untouched.
		assert_eq!(tables.walk(0x4008_0000).unwrap().phys, 0x4008_0000);
	}

	#[test]
	fn low_kernel_over_the_loader_is_rejected() {
		let kernel = ImageInfo::new(0x4400_0000, 0x4000_0000, 0x4010_0000, 0x4000_0000).unwrap();
		assert!(matches!(
			build(kernel, loader()),
			Err(BuildError::WindowOverlapsLoader { .. })
		));
	}

	#[test]
	fn low_kernel_over_the_console_is_rejected() {
		// The window runs from the UART's 2 MiB block to the end of its
		// second-level table.
		let kernel = ImageInfo::new(0x4040_0000, 0x0900_0000, 0x0910_0000, 0x0900_0000).unwrap();
		assert_eq!(
			build(kernel, loader()).err(),
			Some(BuildError::WindowOverlapsConsole {
				start: 0x0900_0000,
				end:   0x4000_0000,
			})
		);

		// The same kernel clear of the UART's block is fine.
		let kernel = ImageInfo::new(0x4040_0000, 0x0940_0000, 0x0950_0000, 0x0940_0000).unwrap();
		let tables = build(kernel, loader()).unwrap();
		assert_eq!(tables.walk(uart().start).unwrap().phys as usize, uart().start);
		assert_eq!(tables.walk(0x0940_0000).unwrap().phys, 0x4040_0000);
	}

	#[test]
	fn non_canonical_kernels_are_rejected() {
		let kernel = ImageInfo::new(0x4040_0000, 0x0008_0000_0000_0000, 0x0008_0000_0010_0000, 0x0008_0000_0000_0000)
			.unwrap();
		assert_eq!(
			build(kernel, loader()).err(),
			Some(BuildError::NonCanonical(0x0008_0000_0000_0000))
		);
	}

	#[test]
	fn elevated_tables_are_unsupported() {
		let kernel = ImageInfo::new(0x4040_0000, 0x4040_0000, 0x4050_0000, 0x4040_0000).unwrap();
		let mut tables = build(kernel, loader()).unwrap();
		let req = MapRequest {
			kernel,
			loader: loader(),
			console: uart(),
			tables_phys: TABLES_PHYS,
		};
		assert_eq!(tables.build_elevated(&req), Err(BuildError::ElevatedUnsupported));
		assert_eq!(tables.walk_elevated(0x4040_0000), None);
	}

	#[test]
	fn descriptors_match_the_architecture() {
		assert_eq!(LongDescriptor::encode_table(0x4010_1000), 0x4010_1003);
		assert_eq!(
			LongDescriptor::encode_leaf(1, 0x4000_0000, MemAttr::Device),
			0x4000_0000 | AF | VALID
		);
		assert_eq!(
			LongDescriptor::encode_leaf(3, 0x1000, MemAttr::Normal),
			0x1000 | AF | SH_INNER | (4 << 2) | 0b11
		);
		assert_eq!(LongDescriptor::decode(3, 0x1000 | VALID), Descriptor::Invalid);
		assert_eq!(LongDescriptor::decode(0, 0x4000_0000 | VALID), Descriptor::Invalid);
	}

	#[test]
	fn footprint_covers_the_pool() {
		let kernel = ImageInfo::new(0x4040_0000, 0x4040_0000, 0x4050_0000, 0x4040_0000).unwrap();
		let tables = build(kernel, loader()).unwrap();
		let fp = tables.footprint();
		assert_eq!(fp.start, TABLES_PHYS);
		assert_eq!(fp.len(), POOL_TABLES * 4096);
	}
}
