//! Relaxed types for atomic operations.
//!
//! Only plain loads and stores are exposed. Read-modify-write
//! operations compile to exclusive-access sequences that are not
//! reliable while caches and translation are still disabled.

use core::sync::atomic::{AtomicUsize, Ordering::Relaxed};

#[doc(hidden)]
macro_rules! impl_relaxed {
	($ident:ident, $atomic:ty, $inner:ty) => {
		#[doc = concat!("A relaxed atomic ", stringify!($inner), ".")]
		#[derive(Debug)]
		#[repr(transparent)]
		pub struct $ident($atomic);

		impl $ident {
			/// Creates a new relaxed atomic of the given type.
			#[inline(always)]
			#[must_use]
			pub const fn new(value: $inner) -> Self {
				Self(<$atomic>::new(value))
			}

			/// Loads the value of the relaxed atomic.
			#[inline(always)]
			#[must_use]
			pub fn load(&self) -> $inner {
				self.0.load(Relaxed)
			}

			/// Stores a value into the relaxed atomic.
			#[inline(always)]
			pub fn store(&self, value: $inner) {
				self.0.store(value, Relaxed);
			}
		}

		impl Default for $ident {
			#[inline(always)]
			fn default() -> Self {
				Self::new(0)
			}
		}
	};
}

impl_relaxed!(RelaxedUsize, AtomicUsize, usize);
