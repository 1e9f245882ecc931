//! Address ranges, image records and the kernel argument record.

use core::fmt;

/// The translation granule every placement is aligned to.
pub const PAGE_SIZE: usize = 4096;

/// Rounds `value` down to a multiple of `align` (a power of two).
#[must_use]
pub const fn align_down(value: usize, align: usize) -> usize {
	value & !(align - 1)
}

/// Rounds `value` up to a multiple of `align` (a power of two).
///
/// Returns `None` on overflow.
#[must_use]
pub const fn align_up(value: usize, align: usize) -> Option<usize> {
	match value.checked_add(align - 1) {
		Some(v) => Some(v & !(align - 1)),
		None => None,
	}
}

/// A half-open `[start, end)` address range.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct AddrRange {
	/// First address in the range.
	pub start: usize,
	/// One past the last address in the range.
	pub end:   usize,
}

impl AddrRange {
	/// The empty range at address zero.
	pub const EMPTY: Self = Self { start: 0, end: 0 };

	/// Creates a range from its bounds.
	#[must_use]
	pub const fn new(start: usize, end: usize) -> Self {
		Self { start, end }
	}

	/// Creates a range from a base and a length, or `None` on overflow.
	#[must_use]
	pub const fn from_len(start: usize, len: usize) -> Option<Self> {
		match start.checked_add(len) {
			Some(end) => Some(Self { start, end }),
			None => None,
		}
	}

	/// Length in bytes (zero for inverted ranges).
	#[must_use]
	pub const fn len(&self) -> usize {
		self.end.saturating_sub(self.start)
	}

	/// Returns whether the range covers no bytes.
	#[must_use]
	pub const fn is_empty(&self) -> bool {
		self.end <= self.start
	}

	/// Returns whether `addr` lies inside the range.
	#[must_use]
	pub const fn contains(&self, addr: usize) -> bool {
		self.start <= addr && addr < self.end
	}

	/// Returns whether `other` lies entirely inside this range.
	#[must_use]
	pub const fn covers(&self, other: &Self) -> bool {
		other.is_empty() || (self.start <= other.start && other.end <= self.end)
	}

	/// Returns whether the two ranges share at least one byte.
	#[must_use]
	pub const fn overlaps(&self, other: &Self) -> bool {
		!self.is_empty() && !other.is_empty() && self.start < other.end && other.start < self.end
	}
}

impl fmt::Debug for AddrRange {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:#x}..{:#x}", self.start, self.end)
	}
}

/// Where an image was placed and where it is linked.
///
/// Created once per image by the loader, read-only afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
	/// Start of the physical placement window.
	pub phys_region_start: usize,
	/// End of the physical placement window (exclusive, page aligned).
	pub phys_region_end:   usize,
	/// Start of the linked virtual range.
	pub virt_region_start: usize,
	/// End of the linked virtual range (exclusive, page aligned).
	pub virt_region_end:   usize,
	/// The linked entry point.
	pub virt_entry:        usize,
	/// `phys_region_start - virt_region_start`, wrapping.
	pub phys_virt_offset:  usize,
}

impl ImageInfo {
	/// Creates a record for an image placed at `phys_start`.
	///
	/// The virtual end is rounded up to a page and the physical window
	/// is given the same size, so the size invariant always holds.
	/// Returns `None` if the range is inverted or rounding overflows.
	#[must_use]
	pub const fn new(
		phys_start: usize,
		virt_start: usize,
		virt_end: usize,
		virt_entry: usize,
	) -> Option<Self> {
		if virt_end < virt_start {
			return None;
		}

		let Some(virt_end) = align_up(virt_end, PAGE_SIZE) else {
			return None;
		};

		let Some(phys_end) = phys_start.checked_add(virt_end - virt_start) else {
			return None;
		};

		Some(Self {
			phys_region_start: phys_start,
			phys_region_end: phys_end,
			virt_region_start: virt_start,
			virt_region_end: virt_end,
			virt_entry,
			phys_virt_offset: phys_start.wrapping_sub(virt_start),
		})
	}

	/// The size of the image's window, in bytes.
	#[must_use]
	pub const fn size(&self) -> usize {
		self.phys_region_end - self.phys_region_start
	}

	/// The physical placement window.
	#[must_use]
	pub const fn phys(&self) -> AddrRange {
		AddrRange::new(self.phys_region_start, self.phys_region_end)
	}

	/// The linked virtual range.
	#[must_use]
	pub const fn virt(&self) -> AddrRange {
		AddrRange::new(self.virt_region_start, self.virt_region_end)
	}

	/// The entry point's physical address.
	#[must_use]
	pub const fn entry_phys(&self) -> usize {
		self.virt_entry.wrapping_add(self.phys_virt_offset)
	}

	/// Translates a linked address to its physical placement.
	#[must_use]
	pub const fn virt_to_phys(&self, virt: usize) -> usize {
		virt.wrapping_add(self.phys_virt_offset)
	}
}

/// The six-word argument record the kernel is entered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct EntryArgs {
	/// Physical start of the described image.
	pub phys_start: usize,
	/// Physical end of the described image.
	pub phys_end:   usize,
	/// The image's `phys_virt_offset`.
	pub pv_offset:  usize,
	/// The image's linked entry point.
	pub virt_entry: usize,
	/// Physical address of the device tree (zero if none).
	pub dtb_addr:   usize,
	/// Size of the device tree in bytes (zero if none).
	pub dtb_size:   usize,
}

impl EntryArgs {
	/// Builds the record describing `image` and the relocated device tree.
	#[must_use]
	pub const fn new(image: &ImageInfo, dtb: AddrRange) -> Self {
		Self {
			phys_start: image.phys_region_start,
			phys_end:   image.phys_region_end,
			pv_offset:  image.phys_virt_offset,
			virt_entry: image.virt_entry,
			dtb_addr:   dtb.start,
			dtb_size:   dtb.len(),
		}
	}

	/// The record in register order.
	#[must_use]
	pub const fn words(&self) -> [usize; 6] {
		[
			self.phys_start,
			self.phys_end,
			self.pv_offset,
			self.virt_entry,
			self.dtb_addr,
			self.dtb_size,
		]
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn image_info_keeps_sizes_equal() {
		let info = ImageInfo::new(0x4020_0000, 0xFFFF_FF80_0000_0000, 0xFFFF_FF80_0012_3456, 0xFFFF_FF80_0000_0040)
			.unwrap();
		assert_eq!(info.phys_region_end - info.phys_region_start, info.virt_region_end - info.virt_region_start);
		assert_eq!(info.virt_region_end % PAGE_SIZE, 0);
		assert_eq!(info.entry_phys(), 0x4020_0040);
	}

	#[test]
	fn image_info_offset_wraps_for_high_links() {
		let info = ImageInfo::new(0x1000, 0x8000_0000, 0x8000_1000, 0x8000_0040).unwrap();
		assert_eq!(info.phys_virt_offset, 0x1000_usize.wrapping_sub(0x8000_0000));
		assert_eq!(info.virt_to_phys(0x8000_0040), 0x1040);
	}

	#[test]
	fn image_info_rejects_inverted_ranges() {
		assert!(ImageInfo::new(0, 0x2000, 0x1000, 0x2000).is_none());
		assert!(ImageInfo::new(usize::MAX - 0xFFF, 0, 0x2000, 0).is_none());
	}

	#[test]
	fn ranges_overlap_only_when_sharing_bytes() {
		let a = AddrRange::new(0x1000, 0x2000);
		assert!(a.overlaps(&AddrRange::new(0x1FFF, 0x3000)));
		assert!(!a.overlaps(&AddrRange::new(0x2000, 0x3000)));
		assert!(!a.overlaps(&AddrRange::EMPTY));
		assert!(a.covers(&AddrRange::new(0x1800, 0x2000)));
		assert!(!a.covers(&AddrRange::new(0x1800, 0x2001)));
	}

	#[test]
	fn entry_args_are_in_register_order() {
		let info = ImageInfo::new(0x4000_0000, 0x4000_0000, 0x4001_0000, 0x4000_0100).unwrap();
		let args = EntryArgs::new(&info, AddrRange::new(0x4001_0000, 0x4001_2000));
		assert_eq!(args.words(), [0x4000_0000, 0x4001_0000, 0, 0x4000_0100, 0x4001_0000, 0x2000]);
	}

	#[test]
	fn alignment_helpers() {
		assert_eq!(align_down(0x1234, 0x1000), 0x1000);
		assert_eq!(align_up(0x1234, 0x1000), Some(0x2000));
		assert_eq!(align_up(0x2000, 0x1000), Some(0x2000));
		assert_eq!(align_up(usize::MAX, 0x1000), None);
	}
}
