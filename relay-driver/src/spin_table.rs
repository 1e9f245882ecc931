//! Spin-table release.
//!
//! Cores held by the firmware sit in a `wfe` loop polling a 64-bit
//! release word; writing an entry address there and issuing `sev` lets
//! them go. A core's word is the one its device tree `cpu` node names in
//! `cpu-release-addr`; core `n` without one uses `release_base + 8 * n`.

use relay_arch_base::Firmware;
use relay_type::Volatile;

use crate::{ActivationError, Activator, Bound, CoreActivator, Device, DriverError, MatchData};

/// Spacing of the per-core release words.
pub const SLOT_STRIDE: usize = 8;

/// Most release words a spin table takes from the device tree.
pub const MAX_RELEASE_ADDRS: usize = 8;

/// A core's release word, as named by its `cpu` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseAddr {
	/// The core's hardware target (its `cpu` node's `reg`).
	pub target: usize,
	/// Physical address of its release word.
	pub addr:   usize,
}

/// A spin table with release words starting at `release_base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinTable {
	/// Address of core 0's release word.
	release_base:  usize,
	/// Release words that override the stride layout.
	release_addrs: [Option<ReleaseAddr>; MAX_RELEASE_ADDRS],
}

impl SpinTable {
	/// Creates a spin table activator.
	#[must_use]
	pub const fn new(release_base: usize) -> Self {
		Self {
			release_base,
			release_addrs: [None; MAX_RELEASE_ADDRS],
		}
	}

	/// Uses `release.addr` for `release.target` instead of the stride
	/// layout. A later address for the same target replaces the earlier
	/// one.
	///
	/// Returns `false` if the table is full and the address was dropped.
	#[must_use]
	pub fn set_release_addr(&mut self, release: ReleaseAddr) -> bool {
		let free = self
			.release_addrs
			.iter_mut()
			.find(|r| r.is_none_or(|r| r.target == release.target));

		match free {
			Some(entry) => {
				*entry = Some(release);
				true
			}
			None => false,
		}
	}

	/// The address of `target`'s release word.
	#[must_use]
	pub fn release_addr(&self, target: usize) -> Option<usize> {
		if let Some(r) = self.release_addrs.iter().flatten().find(|r| r.target == target) {
			return Some(r.addr);
		}

		target
			.checked_mul(SLOT_STRIDE)
			.and_then(|off| self.release_base.checked_add(off))
	}

	/// The release word for `target`.
	fn slot(&self, target: usize) -> Option<&'static Volatile<u64>> {
		let addr = self.release_addr(target)?;
		// SAFETY: The release words are firmware memory reserved for this
		// SAFETY: purpose, identity mapped, and never reused.
		unsafe { Volatile::<u64>::at(addr) }
	}
}

impl CoreActivator for SpinTable {
	fn cpu_on<F: Firmware>(&self, target: usize, entry: usize, _stack: usize) -> Result<(), ActivationError> {
		let slot = self.slot(target).ok_or(ActivationError::NoReleaseSlot(target))?;
		slot.set(entry as u64);
		core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
		F::wake_waiting_cores();
		Ok(())
	}
}

/// Registry initializer.
pub fn init(_device: &Device<'_>, data: &MatchData) -> Result<Option<Bound>, DriverError> {
	let MatchData::SpinTable { release_base } = *data else {
		return Err(DriverError::BadMatchData);
	};

	Ok(Some(Bound::Activator(Activator::SpinTable(SpinTable::new(release_base)))))
}

#[cfg(test)]
mod tests {
	use core::sync::atomic::{AtomicUsize, Ordering::SeqCst};

	use super::*;

	static WAKES: AtomicUsize = AtomicUsize::new(0);

	struct Fw;

	impl Firmware for Fw {
		fn wake_waiting_cores() {
			WAKES.fetch_add(1, SeqCst);
		}
	}

	#[test]
	fn release_writes_the_targets_slot_and_wakes() {
		static SLOTS: [Volatile<u64>; 4] = [const { Volatile::new(0) }; 4];
		let base = core::ptr::from_ref(&SLOTS).expose_provenance();

		let table = SpinTable::new(base);
		table.cpu_on::<Fw>(2, 0x8_0000, 0).unwrap();

		assert_eq!(SLOTS[2].get(), 0x8_0000);
		assert_eq!(SLOTS[1].get(), 0);
		assert_eq!(SLOTS[3].get(), 0);
		assert!(WAKES.load(SeqCst) >= 1);
	}

	#[test]
	fn unreachable_slots_are_errors() {
		let table = SpinTable::new(usize::MAX - 4);
		assert_eq!(table.cpu_on::<Fw>(1, 0x8_0000, 0), Err(ActivationError::NoReleaseSlot(1)));
	}

	#[test]
	fn device_tree_addresses_override_the_stride() {
		static WORDS: [Volatile<u64>; 2] = [const { Volatile::new(0) }; 2];
		let word = |i: usize| core::ptr::from_ref(&WORDS[i]).expose_provenance();

		let mut table = SpinTable::new(0xD8);
		assert!(table.set_release_addr(ReleaseAddr { target: 1, addr: 0x1000 }));
		assert!(table.set_release_addr(ReleaseAddr { target: 3, addr: word(1) }));
		assert!(table.set_release_addr(ReleaseAddr { target: 1, addr: word(0) }));

		assert_eq!(table.release_addr(1), Some(word(0)));
		assert_eq!(table.release_addr(2), Some(0xE8));

		table.cpu_on::<Fw>(3, 0x8_0000, 0).unwrap();
		assert_eq!(WORDS[1].get(), 0x8_0000);
		assert_eq!(WORDS[0].get(), 0);
	}

	#[test]
	fn release_addresses_are_bounded() {
		let mut table = SpinTable::new(0xD8);
		for target in 0..MAX_RELEASE_ADDRS {
			assert!(table.set_release_addr(ReleaseAddr { target, addr: 0x1000 + target }));
		}
		assert!(!table.set_release_addr(ReleaseAddr {
			target: MAX_RELEASE_ADDRS,
			addr:   0x2000,
		}));
		assert!(table.set_release_addr(ReleaseAddr { target: 0, addr: 0x3000 }));
		assert_eq!(table.release_addr(0), Some(0x3000));
		assert_eq!(table.release_addr(MAX_RELEASE_ADDRS), Some(0xD8 + 8 * MAX_RELEASE_ADDRS));
	}

	#[test]
	fn init_needs_a_release_base() {
		let dev = Device::new("firmware", b"raspberrypi,bcm2835-firmware\0", &[], None);
		assert!(matches!(init(&dev, &MatchData::None), Err(DriverError::BadMatchData)));
		assert!(matches!(
			init(&dev, &MatchData::SpinTable { release_base: 0xD8 }),
			Ok(Some(Bound::Activator(Activator::SpinTable(t)))) if t == SpinTable::new(0xD8)
		));
	}
}
