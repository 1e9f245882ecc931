//! Synchronization primitives for the Relay boot loader.
//!
//! Everything here is built on plain atomic loads and stores with
//! acquire/release ordering. No primitive performs a read-modify-write
//! operation: before translation is enabled memory is not cacheable,
//! and exclusive-access sequences are not guaranteed to make progress
//! on such memory.
//!
//! Waiting is always a busy spin; there is nothing to sleep on this
//! early in boot.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(doc, feature(doc_cfg))]

use core::{
	cell::UnsafeCell,
	mem::MaybeUninit,
	sync::atomic::{
		AtomicBool,
		Ordering::{Acquire, Relaxed, Release},
	},
};

/// A one-shot flag.
///
/// Raised at most once, by one core, and never lowered. Raising has
/// release semantics; observing has acquire semantics, so everything
/// written before [`Latch::raise`] is visible to a core that has seen
/// [`Latch::is_raised`] return `true`.
#[derive(Debug)]
pub struct Latch {
	/// Whether the latch has been raised.
	raised: AtomicBool,
}

impl Latch {
	/// Creates a lowered latch.
	#[must_use]
	pub const fn new() -> Self {
		Self {
			raised: AtomicBool::new(false),
		}
	}

	/// Raises the latch.
	pub fn raise(&self) {
		self.raised.store(true, Release);
	}

	/// Returns whether the latch has been raised.
	#[must_use]
	pub fn is_raised(&self) -> bool {
		self.raised.load(Acquire)
	}

	/// Spins until the latch is raised, calling `relax` between polls.
	pub fn wait(&self, mut relax: impl FnMut()) {
		while !self.is_raised() {
			relax();
		}
	}
}

impl Default for Latch {
	fn default() -> Self {
		Self::new()
	}
}

/// A value handed from one core to any number of waiting cores.
///
/// The writer stores the value and then raises an internal [`Latch`];
/// readers spin on that latch and copy the value out once it's up.
/// The value can never be observed half-written.
pub struct Handoff<T: Copy + Send> {
	/// The published value; initialized iff `ready` is raised.
	value: UnsafeCell<MaybeUninit<T>>,
	/// Raised once `value` has been written.
	ready: Latch,
}

// SAFETY: `value` is written once before `ready` is raised (release)
// SAFETY: and only read after `ready` is observed (acquire).
unsafe impl<T: Copy + Send> Sync for Handoff<T> {}

impl<T: Copy + Send> Handoff<T> {
	/// Creates an empty handoff.
	#[must_use]
	pub const fn new() -> Self {
		Self {
			value: UnsafeCell::new(MaybeUninit::uninit()),
			ready: Latch::new(),
		}
	}

	/// Publishes the value and releases every waiter.
	///
	/// # Safety
	/// Must be called at most once, from a single core. There is no
	/// read-modify-write guard against a second writer.
	pub unsafe fn publish(&self, value: T) {
		debug_assert!(!self.ready.is_raised(), "handoff published twice");
		// SAFETY: Single writer, and no reader touches `value` before `ready`.
		unsafe {
			(*self.value.get()).write(value);
		}
		self.ready.raise();
	}

	/// Returns the value if it has been published.
	#[must_use]
	pub fn try_get(&self) -> Option<T> {
		if self.ready.is_raised() {
			// SAFETY: `ready` is only raised after `value` was initialized.
			Some(unsafe { (*self.value.get()).assume_init() })
		} else {
			None
		}
	}

	/// Spins until the value is published, then returns it.
	pub fn wait(&self, mut relax: impl FnMut()) -> T {
		loop {
			if let Some(value) = self.try_get() {
				return value;
			}

			relax();
		}
	}

	/// Returns whether the value has been published.
	#[must_use]
	pub fn is_published(&self) -> bool {
		self.ready.is_raised()
	}
}

impl<T: Copy + Send> Default for Handoff<T> {
	fn default() -> Self {
		Self::new()
	}
}

/// Statically allocated storage that is handed out mutably exactly once.
///
/// Used for state the boot core builds (translation tables) before
/// sharing it read-only with the other cores.
pub struct BootCell<T> {
	/// The stored value.
	value: UnsafeCell<T>,
	/// Whether the mutable reference has been handed out.
	taken: AtomicBool,
}

// SAFETY: Only one `&mut` is ever handed out (see `take`), and shared
// SAFETY: access afterwards goes through `Handoff`, which orders it.
unsafe impl<T: Send + Sync> Sync for BootCell<T> {}

impl<T> BootCell<T> {
	/// Creates a new cell.
	#[must_use]
	pub const fn new(value: T) -> Self {
		Self {
			value: UnsafeCell::new(value),
			taken: AtomicBool::new(false),
		}
	}

	/// Takes the one mutable reference to the value.
	///
	/// Returns `None` on every call after the first.
	///
	/// # Safety
	/// Must only be called by the boot core while it is the only core
	/// running; the check-then-set is not atomic.
	pub unsafe fn take(&'static self) -> Option<&'static mut T> {
		if self.taken.load(Relaxed) {
			return None;
		}

		self.taken.store(true, Relaxed);

		// SAFETY: First and only hand-out; the caller guarantees exclusivity.
		Some(unsafe { &mut *self.value.get() })
	}
}
