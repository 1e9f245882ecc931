//! The ARMv7 boot tables: short descriptors for Supervisor mode and an
//! LPAE pool for Hyp mode.

use core::mem::offset_of;

use relay_arch_base::{
	AddrRange, BootTables, BuildError, MapRequest, MemAttr, Translation,
	radix::{Pool, kernel_window},
};

use crate::{lpae::Lpae, short::ShortTables};

/// Number of LPAE tables in the Hyp pool.
pub const LPAE_TABLES: usize = 8;

/// The ARMv7 boot translation tables.
///
/// The short-descriptor tables come first, so the structure's address is
/// the first-level table's.
#[derive(Debug)]
#[repr(C)]
pub struct Tables {
	/// Supervisor-mode tables.
	short:     ShortTables,
	/// Hyp-mode tables.
	lpae:      Pool<LPAE_TABLES>,
	/// Pool index of the `HTTBR` root, once built.
	lpae_root: Option<usize>,
}

impl Tables {
	/// The physical address to load into `TTBR0`.
	#[must_use]
	pub fn ttbr0(&self) -> u64 {
		self.short.ttbr0()
	}

	/// The physical address to load into `HTTBR`, once the Hyp tables are built.
	#[must_use]
	pub fn httbr(&self) -> Option<u64> {
		self.lpae_root.map(|t| self.lpae.phys(t))
	}
}

impl BootTables for Tables {
	const EMPTY: Self = Self {
		short:     ShortTables::EMPTY,
		lpae:      Pool::EMPTY,
		lpae_root: None,
	};

	fn build(&mut self, req: &MapRequest) -> Result<(), BuildError> {
		self.short.build(req)
	}

	fn build_elevated(&mut self, req: &MapRequest) -> Result<(), BuildError> {
		self.lpae
			.reset(req.tables_phys as u64 + offset_of!(Self, lpae) as u64);
		self.lpae_root = None;

		let kernel = &req.kernel;
		let window = kernel_window::<Lpae>(
			kernel.virt_region_start as u64,
			kernel.virt_region_end as u64,
			kernel.phys_region_start as u64,
		)?;

		req.check_window(window.virt, window.virt_end())?;

		// Identity: 4 x 1 GiB at the first level.
		let root = self.lpae.alloc::<Lpae>()?;
		self.lpae
			.map_range::<Lpae>(root, 0, 0, 4 << 30, 30, MemAttr::Device)?;

		self.lpae.map_range::<Lpae>(
			root,
			window.virt,
			window.phys,
			window.len,
			window.shift,
			MemAttr::Normal,
		)?;

		self.lpae_root = Some(root);
		Ok(())
	}

	fn walk(&self, virt: usize) -> Option<Translation> {
		self.short.walk(virt as u64)
	}

	fn walk_elevated(&self, virt: usize) -> Option<Translation> {
		self.lpae.walk::<Lpae>(self.lpae_root?, virt as u64)
	}

	fn footprint(&self) -> AddrRange {
		let start = self.short.ttbr0() as usize;
		AddrRange::new(start, start + size_of::<Self>())
	}
}

#[cfg(test)]
mod tests {
	use relay_arch_base::ImageInfo;

	use super::*;

	const TABLES_PHYS: usize = 0x0010_0000;

	fn request(kernel: ImageInfo) -> MapRequest {
		MapRequest {
			kernel,
			loader: AddrRange::new(0x0000_8000, 0x0010_0000),
			console: AddrRange::new(0x101F_1000, 0x101F_2000),
			tables_phys: TABLES_PHYS,
		}
	}

	#[test]
	fn hyp_tables_map_the_kernel_with_2mib_blocks() {
		let kernel = ImageInfo::new(0x0020_0000, 0xC000_0000, 0xC012_3000, 0xC000_8000).unwrap();
		let mut tables = Box::new(Tables::EMPTY);
		tables.build_elevated(&request(kernel)).unwrap();

		assert_eq!(tables.httbr(), Some((TABLES_PHYS + offset_of!(Tables, lpae)) as u64));

		let t = tables.walk_elevated(0xC000_8000).unwrap();
		assert_eq!(t.phys, 0x0020_8000);
		assert_eq!(t.attr, MemAttr::Normal);
		assert_eq!(t.block_size, 2 << 20);

		// The window runs to the end of its second-level table.
		assert_eq!(tables.walk_elevated(0xFFE0_0000).unwrap().phys, 0x4000_0000);

		let t = tables.walk_elevated(0x0000_8000).unwrap();
		assert_eq!(t.phys, 0x8000);
		assert_eq!(t.attr, MemAttr::Device);
		assert_eq!(t.block_size, 1 << 30);
	}

	#[test]
	fn hyp_tables_reject_windows_over_the_loader() {
		let kernel = ImageInfo::new(0x0020_0000, 0x0000_0000, 0x0010_0000, 0x0).unwrap();
		let mut tables = Box::new(Tables::EMPTY);
		assert!(matches!(
			tables.build_elevated(&request(kernel)),
			Err(BuildError::WindowOverlapsLoader { .. })
		));
		assert_eq!(tables.walk_elevated(0x8000), None);
	}

	#[test]
	fn both_regimes_agree_on_the_kernel() {
		let kernel = ImageInfo::new(0x0040_0000, 0x8000_0000, 0x8030_0000, 0x8000_0000).unwrap();
		let req = request(kernel);
		let mut tables = Box::new(Tables::EMPTY);
		tables.build(&req).unwrap();
		tables.build_elevated(&req).unwrap();

		for virt in (kernel.virt_region_start..kernel.virt_region_end).step_by(0x8000) {
			let native = tables.walk(virt).unwrap();
			let elevated = tables.walk_elevated(virt).unwrap();
			assert_eq!(native.phys, elevated.phys);
			assert_eq!(native.phys as usize, kernel.virt_to_phys(virt));
		}
	}

	#[test]
	fn footprint_covers_both_table_sets() {
		let mut tables = Box::new(Tables::EMPTY);
		let kernel = ImageInfo::new(0x0020_0000, 0xC000_0000, 0xC010_0000, 0xC000_0000).unwrap();
		tables.build(&request(kernel)).unwrap();

		let fp = tables.footprint();
		assert_eq!(fp.start, TABLES_PHYS);
		assert!(fp.len() >= 16384 + 16 * 1024 + LPAE_TABLES * 4096);
		assert_eq!(tables.ttbr0(), TABLES_PHYS as u64);
	}
}
