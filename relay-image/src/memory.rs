//! Views of physical memory.

use relay_arch_base::AddrRange;

use crate::LoadError;

/// Maximum number of usable memory regions tracked.
pub const MAX_REGIONS: usize = 8;

/// A usable physical RAM window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
	/// First byte.
	pub base: usize,
	/// Length in bytes.
	pub size: usize,
}

impl MemoryRegion {
	/// Creates a region.
	#[must_use]
	pub const fn new(base: usize, size: usize) -> Self {
		Self { base, size }
	}

	/// The region as an address range, clipped at the top of the address space.
	#[must_use]
	pub const fn range(&self) -> AddrRange {
		AddrRange::new(self.base, self.base.saturating_add(self.size))
	}
}

/// The usable memory regions, in discovery order.
pub type MemoryMap = heapless::Vec<MemoryRegion, MAX_REGIONS>;

/// Removes `hole` from every region of `map`, splitting any region it
/// falls inside of. The remaining pieces keep their order.
///
/// Pieces past the map's capacity are dropped; returns `false` if that
/// happened.
pub fn carve(map: &mut MemoryMap, hole: AddrRange) -> bool {
	if hole.is_empty() {
		return true;
	}

	let mut kept = true;
	let mut carved = MemoryMap::new();
	let mut keep = |range: AddrRange| {
		if !range.is_empty() && carved.push(MemoryRegion::new(range.start, range.len())).is_err() {
			kept = false;
		}
	};

	for region in map.iter() {
		let range = region.range();
		if range.overlaps(&hole) {
			keep(AddrRange::new(range.start, hole.start.max(range.start)));
			keep(AddrRange::new(hole.end.min(range.end), range.end));
		} else {
			keep(range);
		}
	}

	*map = carved;
	kept
}

/// Access to physical memory.
pub trait PhysMemory {
	/// Borrows the bytes of `range`, or `None` if the view doesn't cover it.
	fn bytes(&self, range: AddrRange) -> Option<&[u8]>;

	/// Copies `len` bytes from `src` to `dst`. The ranges may overlap.
	fn copy(&mut self, dst: usize, src: usize, len: usize) -> Result<(), LoadError>;

	/// Sets `len` bytes at `dst` to `byte`.
	fn fill(&mut self, dst: usize, len: usize, byte: u8) -> Result<(), LoadError>;
}

/// Physical memory accessed directly, with translation disabled.
#[derive(Debug)]
pub struct IdentityMemory {
	/// Not constructible outside of [`IdentityMemory::new`].
	_private: (),
}

impl IdentityMemory {
	/// Creates the view.
	///
	/// # Safety
	/// Translation must be disabled (or identity), and the caller must
	/// only access ranges that are RAM not otherwise in use. [`crate::plan`]
	/// ensures this for every range it hands out.
	#[must_use]
	pub const unsafe fn new() -> Self {
		Self { _private: () }
	}
}

impl PhysMemory for IdentityMemory {
	fn bytes(&self, range: AddrRange) -> Option<&[u8]> {
		if range.end < range.start {
			return None;
		}
		let ptr = core::ptr::with_exposed_provenance::<u8>(range.start);
		// SAFETY: Guaranteed by `new`'s contract.
		Some(unsafe { core::slice::from_raw_parts(ptr, range.len()) })
	}

	fn copy(&mut self, dst: usize, src: usize, len: usize) -> Result<(), LoadError> {
		if dst == src || len == 0 {
			return Ok(());
		}

		let dst = core::ptr::with_exposed_provenance_mut::<u8>(dst);
		let src = core::ptr::with_exposed_provenance::<u8>(src);
		// SAFETY: Guaranteed by `new`'s contract. `ptr::copy` has memmove
		// SAFETY: semantics: forward when `dst` is below `src`, backward otherwise.
		unsafe {
			core::ptr::copy(src, dst, len);
		}
		Ok(())
	}

	fn fill(&mut self, dst: usize, len: usize, byte: u8) -> Result<(), LoadError> {
		let dst = core::ptr::with_exposed_provenance_mut::<u8>(dst);
		// SAFETY: Guaranteed by `new`'s contract.
		unsafe {
			core::ptr::write_bytes(dst, byte, len);
		}
		Ok(())
	}
}

/// A window of physical memory backed by a byte slice.
///
/// Address `base` is the first byte of the slice.
#[derive(Debug)]
pub struct SliceMemory<'a> {
	/// Physical address of `bytes[0]`.
	base:  usize,
	/// The backing bytes.
	bytes: &'a mut [u8],
}

impl<'a> SliceMemory<'a> {
	/// Creates a view of `bytes` as the memory at `base`.
	#[must_use]
	pub fn new(base: usize, bytes: &'a mut [u8]) -> Self {
		Self { base, bytes }
	}

	/// The slice index range of `[addr, addr + len)`.
	fn index(&self, addr: usize, len: usize) -> Result<core::ops::Range<usize>, LoadError> {
		let unbacked = LoadError::Unbacked { addr, len };
		let start = addr.checked_sub(self.base).ok_or(unbacked)?;
		let end = start.checked_add(len).ok_or(unbacked)?;
		if end > self.bytes.len() {
			return Err(unbacked);
		}
		Ok(start..end)
	}

	/// Writes `data` at `addr`.
	pub fn write(&mut self, addr: usize, data: &[u8]) -> Result<(), LoadError> {
		let range = self.index(addr, data.len())?;
		self.bytes[range].copy_from_slice(data);
		Ok(())
	}
}

impl PhysMemory for SliceMemory<'_> {
	fn bytes(&self, range: AddrRange) -> Option<&[u8]> {
		let index = self.index(range.start, range.end.checked_sub(range.start)?).ok()?;
		self.bytes.get(index)
	}

	fn copy(&mut self, dst: usize, src: usize, len: usize) -> Result<(), LoadError> {
		let from = self.index(src, len)?;
		let to = self.index(dst, len)?;
		self.bytes.copy_within(from, to.start);
		Ok(())
	}

	fn fill(&mut self, dst: usize, len: usize, byte: u8) -> Result<(), LoadError> {
		let range = self.index(dst, len)?;
		self.bytes[range].fill(byte);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn map(regions: &[(usize, usize)]) -> MemoryMap {
		regions.iter().map(|&(base, size)| MemoryRegion::new(base, size)).collect()
	}

	#[test]
	fn carving_splits_trims_and_removes() {
		let mut m = map(&[(0x4000_0000, 0x100_0000), (0x8000_0000, 0x1000)]);

		// Inside: split in two.
		assert!(carve(&mut m, AddrRange::new(0x4010_0000, 0x4020_0000)));
		assert_eq!(m, map(&[(0x4000_0000, 0x10_0000), (0x4020_0000, 0xE0_0000), (0x8000_0000, 0x1000)]));

		// Over the start of a region and all of another.
		assert!(carve(&mut m, AddrRange::new(0x3000_0000, 0x4008_0000)));
		assert!(carve(&mut m, AddrRange::new(0x8000_0000, 0x8000_1000)));
		assert_eq!(m, map(&[(0x4008_0000, 0x8_0000), (0x4020_0000, 0xE0_0000)]));

		// Clear of everything, or empty.
		let before = m.clone();
		assert!(carve(&mut m, AddrRange::new(0x9000_0000, 0x9000_1000)));
		assert!(carve(&mut m, AddrRange::EMPTY));
		assert_eq!(m, before);
	}

	#[test]
	fn carving_a_full_map_drops_pieces() {
		let mut m: MemoryMap = (0..MAX_REGIONS).map(|i| MemoryRegion::new(i * 0x10_0000, 0x1_0000)).collect();

		assert!(!carve(&mut m, AddrRange::new(0x8000, 0x9000)));
		assert_eq!(m.len(), MAX_REGIONS);
		assert_eq!(m[0], MemoryRegion::new(0, 0x8000));
		assert_eq!(m[1], MemoryRegion::new(0x9000, 0x7000));
		// The last region no longer fits.
		assert_eq!(m[MAX_REGIONS - 1], MemoryRegion::new((MAX_REGIONS - 2) * 0x10_0000, 0x1_0000));
	}

	#[test]
	fn overlapping_copies_preserve_the_source() {
		let mut backing: Vec<u8> = (0..64).collect();
		let mut mem = SliceMemory::new(0x1000, &mut backing);

		// Destination above the source: must copy backward.
		mem.copy(0x1008, 0x1000, 32).unwrap();
		assert_eq!(mem.bytes(AddrRange::new(0x1008, 0x1028)).unwrap(), &(0..32).collect::<Vec<u8>>()[..]);

		// And back down again: forward.
		mem.copy(0x1000, 0x1008, 32).unwrap();
		assert_eq!(mem.bytes(AddrRange::new(0x1000, 0x1020)).unwrap(), &(0..32).collect::<Vec<u8>>()[..]);
	}

	#[test]
	fn accesses_outside_the_window_fail() {
		let mut backing = [0_u8; 16];
		let mut mem = SliceMemory::new(0x1000, &mut backing);
		assert_eq!(mem.fill(0x0FFF, 1, 0), Err(LoadError::Unbacked { addr: 0x0FFF, len: 1 }));
		assert_eq!(mem.copy(0x1008, 0x1000, 9), Err(LoadError::Unbacked { addr: 0x1008, len: 9 }));
		assert!(mem.bytes(AddrRange::new(0x1000, 0x1011)).is_none());
		assert!(mem.write(0x100F, &[1]).is_ok());
	}

	#[test]
	fn regions_clip_at_the_top() {
		let r = MemoryRegion::new(usize::MAX - 0xFFF, 0x2000);
		assert_eq!(r.range().end, usize::MAX);
	}

	#[test]
	fn identity_memory_moves_real_bytes() {
		let mut backing: Vec<u8> = (0..32).collect();
		let base = backing.as_mut_ptr().expose_provenance();

		// SAFETY: Only `backing` is touched.
		let mut mem = unsafe { IdentityMemory::new() };
		mem.copy(base + 4, base, 16).unwrap();
		mem.fill(base, 4, 0xEE).unwrap();
		assert_eq!(&backing[..4], &[0xEE; 4]);
		assert_eq!(&backing[4..20], &(0..16).collect::<Vec<u8>>()[..]);
	}
}
