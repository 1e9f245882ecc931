//! Sv39 boot translation tables.
//!
//! A single root covers both halves of the 39-bit address space: indices
//! `0..256` hold the lower half, `256..512` the sign-extended upper half.
//! The lower half is identity mapped with 1 GiB leaves; the upper-half
//! entries stay invalid unless the kernel window lands there.
//!
//! Sv39 has no memory types without Svpbmt. The intended attribute is
//! kept in the first software (`RSW`) bit so that walks can report it.

use relay_arch_base::{
	AddrRange, BootTables, BuildError, MapRequest, MemAttr, Translation,
	radix::{Descriptor, Format, Pool, kernel_window},
};

use crate::reg;

/// Number of tables in the pool.
pub const POOL_TABLES: usize = 8;

const V: u64 = 1 << 0;
const R: u64 = 1 << 1;
const W: u64 = 1 << 2;
const X: u64 = 1 << 3;
const A: u64 = 1 << 6;
const D: u64 = 1 << 7;
/// `RSW[0]`, set on device mappings.
const DEVICE: u64 = 1 << 8;
const PPN_SHIFT: u64 = 10;
const PPN_MASK: u64 = ((1 << 44) - 1) << PPN_SHIFT;

/// Width of the input address.
const VA_BITS: u32 = 39;
/// The mask reducing a canonical address to the root's range.
const VA_MASK: u64 = (1 << VA_BITS) - 1;
/// One past the highest lower-half address.
const HALF: u64 = 1 << (VA_BITS - 1);

/// The Sv39 descriptor format.
pub struct Sv39;

fn ppn(phys: u64) -> u64 {
	((phys >> 12) << PPN_SHIFT) & PPN_MASK
}

fn phys(raw: u64) -> u64 {
	((raw & PPN_MASK) >> PPN_SHIFT) << 12
}

impl Format for Sv39 {
	const LEVELS: usize = 3;
	const PHYS_LIMIT: u64 = 1 << 56;
	const ROOT_ENTRIES: usize = 512;

	fn shift(level: usize) -> u32 {
		30 - 9 * level as u32
	}

	fn leaf_allowed(_level: usize) -> bool {
		true
	}

	fn encode_table(phys: u64) -> u64 {
		ppn(phys) | V
	}

	fn encode_leaf(_level: usize, phys: u64, attr: MemAttr) -> u64 {
		let attr = match attr {
			MemAttr::Device => DEVICE,
			MemAttr::Normal => 0,
		};

		ppn(phys) | attr | D | A | X | W | R | V
	}

	fn decode(level: usize, raw: u64) -> Descriptor {
		if raw & V == 0 {
			return Descriptor::Invalid;
		}

		// Write-only and write-execute are reserved.
		if raw & (R | W) == W {
			return Descriptor::Invalid;
		}

		if raw & (R | W | X) == 0 {
			return if level + 1 < Self::LEVELS {
				Descriptor::Table(phys(raw))
			} else {
				Descriptor::Invalid
			};
		}

		Descriptor::Leaf {
			phys: phys(raw),
			attr: if raw & DEVICE == 0 {
				MemAttr::Normal
			} else {
				MemAttr::Device
			},
		}
	}
}

/// Reduces a canonical Sv39 address to the root's input range.
///
/// Returns `None` if bits 63:39 do not all equal bit 38.
#[must_use]
pub fn reduce(virt: u64) -> Option<u64> {
	let upper = virt & !VA_MASK;
	let sign = virt & HALF != 0;

	match (sign, upper) {
		(false, 0) => Some(virt),
		(true, u) if u == !VA_MASK => Some(virt & VA_MASK),
		_ => None,
	}
}

/// The RISC-V boot translation tables.
#[derive(Debug)]
#[repr(C)]
pub struct Tables {
	/// The table pool.
	pool: Pool<POOL_TABLES>,
	/// Pool index of the root, once built.
	root: Option<usize>,
}

impl Tables {
	/// The `satp` value enabling these tables, once built.
	#[must_use]
	pub fn satp(&self) -> Option<u64> {
		self.root.map(|r| reg::satp(self.pool.phys(r)))
	}
}

impl BootTables for Tables {
	const EMPTY: Self = Self {
		pool: Pool::EMPTY,
		root: None,
	};

	fn build(&mut self, req: &MapRequest) -> Result<(), BuildError> {
		self.pool.reset(req.tables_phys as u64);
		self.root = None;

		let kernel = &req.kernel;
		let virt_start = kernel.virt_region_start as u64;
		let virt_last = (kernel.virt_region_end as u64).saturating_sub(1).max(virt_start);

		let start = reduce(virt_start).ok_or(BuildError::NonCanonical(virt_start))?;
		let last = reduce(virt_last).ok_or(BuildError::NonCanonical(virt_last))?;
		if (start < HALF) != (last < HALF) {
			return Err(BuildError::NonCanonical(virt_last));
		}

		let window = kernel_window::<Sv39>(start, last + 1, kernel.phys_region_start as u64)?;

		if start < HALF {
			req.check_window(window.virt, window.virt_end())?;
		}

		let root = self.pool.alloc::<Sv39>()?;
		self.pool
			.map_range::<Sv39>(root, 0, 0, HALF, 30, MemAttr::Device)?;
		self.pool.map_range::<Sv39>(
			root,
			window.virt,
			window.phys,
			window.len,
			window.shift,
			MemAttr::Normal,
		)?;

		self.root = Some(root);
		Ok(())
	}

	fn walk(&self, virt: usize) -> Option<Translation> {
		self.pool.walk::<Sv39>(self.root?, reduce(virt as u64)?)
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

	const TABLES_PHYS: usize = 0x8020_0000;

	fn build(kernel: ImageInfo) -> Result<Box<Tables>, BuildError> {
		let mut tables = Box::new(Tables::EMPTY);
		tables.build(&MapRequest {
			kernel,
			loader: AddrRange::new(0x8020_0000, 0x8040_0000),
			console: AddrRange::new(0x1000_0000, 0x1000_0100),
			tables_phys: TABLES_PHYS,
		})?;
		Ok(tables)
	}

	#[test]
	fn upper_half_kernel_shares_the_root() {
		let kernel = ImageInfo::new(0x8060_0000, 0xFFFF_FFFF_C000_0000, 0xFFFF_FFFF_C020_0000, 0xFFFF_FFFF_C000_0000)
			.unwrap();
		let tables = build(kernel).unwrap();

		assert_eq!(tables.satp(), Some(reg::satp(TABLES_PHYS as u64)));

		let t = tables.walk(0xFFFF_FFFF_C000_0100).unwrap();
		assert_eq!(t.phys, 0x8060_0100);
		assert_eq!(t.attr, MemAttr::Normal);
		assert_eq!(t.block_size, 2 << 20);

		// The loader and the UART stay identity mapped.
		for addr in [0x8020_0000, 0x1000_0000] {
			let t = tables.walk(addr).unwrap();
			assert_eq!(t.phys as usize, addr);
			assert_eq!(t.attr, MemAttr::Device);
			assert_eq!(t.block_size, 1 << 30);
		}
	}

	#[test]
	fn unmapped_upper_half_faults() {
		let kernel = ImageInfo::new(0x8060_0000, 0xFFFF_FFFF_C000_0000, 0xFFFF_FFFF_C020_0000, 0xFFFF_FFFF_C000_0000)
			.unwrap();
		let tables = build(kernel).unwrap();
		assert_eq!(tables.walk(0xFFFF_FFC0_0000_0000), None);
	}

	#[test]
	fn non_canonical_kernels_are_rejected() {
		let kernel = ImageInfo::new(0x8060_0000, 0x0000_0080_0000_0000, 0x0000_0080_0010_0000, 0x0000_0080_0000_0000)
			.unwrap();
		assert_eq!(
			build(kernel).err(),
			Some(BuildError::NonCanonical(0x0000_0080_0000_0000))
		);
	}

	#[test]
	fn low_kernel_splits_the_identity_leaf() {
		let kernel = ImageInfo::new(0x8060_1000, 0xC000_0000, 0xC000_4000, 0xC000_0000).unwrap();
		let tables = build(kernel).unwrap();

		let t = tables.walk(0xC000_3008).unwrap();
		assert_eq!(t.phys, 0x8060_4008);
		assert_eq!(t.block_size, 4096);

		let t = tables.walk(0xC020_0000).unwrap();
		assert_eq!(t.phys, 0xC020_0000);
		assert_eq!(t.attr, MemAttr::Device);
		assert_eq!(t.block_size, 2 << 20);
	}

	#[test]
	fn low_kernel_over_the_uart_is_rejected() {
		let kernel = ImageInfo::new(0x8060_0000, 0x1000_0000, 0x1010_0000, 0x1000_0000).unwrap();
		assert_eq!(
			build(kernel).err(),
			Some(BuildError::WindowOverlapsConsole {
				start: 0x1000_0000,
				end:   0x4000_0000,
			})
		);
	}

	#[test]
	fn reduce_follows_sign_extension() {
		assert_eq!(reduce(0x3F_FFFF_FFFF), Some(0x3F_FFFF_FFFF));
		assert_eq!(reduce(0x40_0000_0000), None);
		assert_eq!(reduce(0xFFFF_FFC0_0000_0000), Some(0x40_0000_0000));
		assert_eq!(reduce(0xFFFF_FF80_0000_0000), None);
	}

	#[test]
	fn descriptors_match_the_privileged_architecture() {
		assert_eq!(Sv39::encode_table(0x8020_1000), (0x80201 << 10) | V);
		assert_eq!(Sv39::encode_leaf(0, 0x4000_0000, MemAttr::Normal), (0x40000 << 10) | 0xCF);
		assert_eq!(Sv39::decode(2, (0x80201 << 10) | V), Descriptor::Invalid);
		assert_eq!(Sv39::decode(1, (0x80201 << 10) | W | V), Descriptor::Invalid);
	}
}
