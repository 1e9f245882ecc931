//! Volatile cells for memory-mapped registers and firmware mailboxes.

use core::cell::UnsafeCell;

/// A volatile cell.
///
/// Every access goes through `read_volatile`/`write_volatile`,
/// so the compiler never elides or merges accesses to the
/// underlying location.
#[repr(transparent)]
pub struct Volatile<T> {
	/// The value behind the cell.
	///
	/// `UnsafeCell` is used as it is a special case in the compiler
	/// when it comes to UB prevention and optimization.
	value: UnsafeCell<T>,
}

// SAFETY: Accesses are single volatile loads/stores of `Copy + Send` values.
unsafe impl<T: Copy + Send> Sync for Volatile<T> {}

impl<T> Volatile<T>
where
	T: Copy + Send,
{
	/// Creates a new volatile cell.
	///
	/// # Discouraged
	/// You probably don't want to create a `Volatile` directly.
	/// It's intended to be used by casting the address of a
	/// register or mailbox word via [`Volatile::at`].
	#[inline(always)]
	#[must_use]
	pub const fn new(value: T) -> Self {
		Self {
			value: UnsafeCell::new(value),
		}
	}

	/// Casts a physical (identity-mapped) address to a volatile cell.
	///
	/// Returns `None` if the address is null or unaligned for `T`.
	///
	/// # Safety
	/// The address must refer to a location that stays valid, and is
	/// safe to access with `T`-sized volatile accesses, for the rest of
	/// the loader's execution.
	#[inline(always)]
	#[must_use]
	pub unsafe fn at(addr: usize) -> Option<&'static Self> {
		let ptr = core::ptr::with_exposed_provenance::<Self>(addr);
		if ptr.is_aligned() {
			// SAFETY: Validity for 'static is guaranteed by the caller.
			unsafe { ptr.as_ref() }
		} else {
			None
		}
	}

	/// Gets the value.
	#[inline(always)]
	#[must_use]
	pub fn get(&self) -> T {
		// SAFETY: A valid reference to `self` implies the location is readable.
		unsafe { self.value.get().read_volatile() }
	}

	/// Sets the value.
	#[inline(always)]
	pub fn set(&self, value: T) {
		// SAFETY: A valid reference to `self` implies the location is writable.
		unsafe { self.value.get().write_volatile(value) }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn set_then_get() {
		let cell = Volatile::new(0_u32);
		cell.set(0xA5A5);
		assert_eq!(cell.get(), 0xA5A5);
	}

	#[test]
	fn at_rejects_unaligned_and_null() {
		// SAFETY: Neither address is dereferenced; both fail the checks.
		unsafe {
			assert!(Volatile::<u64>::at(0).is_none());
			assert!(Volatile::<u64>::at(0x1003).is_none());
		}
	}

	#[test]
	fn at_views_an_existing_word() {
		static WORD: Volatile<u64> = Volatile::new(7);
		let addr = core::ptr::from_ref(&WORD).expose_provenance();
		// SAFETY: `WORD` is a static, valid for the whole program.
		let view = unsafe { Volatile::<u64>::at(addr) }.unwrap();
		view.set(42);
		assert_eq!(WORD.get(), 42);
	}
}
