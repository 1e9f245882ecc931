//! Secondary core bring-up.
//!
//! The boot core starts secondaries strictly one at a time: it hands the
//! next core its stack, asks the activator to start it, and then spins on
//! that core's liveness latch before touching the next one. Each
//! secondary works out its logical ID from its stack pointer, announces
//! itself, and then spins on the single release handoff, which carries
//! everything it needs to enter the kernel.
//!
//! Only plain loads and stores are used (see [`relay_sync`]); nothing here
//! requires coherent caches or translation.

use core::cell::UnsafeCell;

use relay_arch_base::Firmware;
use relay_debug::{Console, dbg};
use relay_driver::{ActivationError, CoreActivator};
use relay_sync::{Handoff, Latch};

use crate::platform::TargetEncoder;

/// An error that stops secondary bring-up. Always fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BringUpError {
	/// More cores are configured than the platform (or the loader) has.
	#[error("{configured} cores configured, at most {max} supported")]
	TooManyCores {
		/// Configured core count.
		configured: usize,
		/// The limit.
		max:        usize,
	},
	/// More than one core is configured but no activator was bound.
	#[error("no core activation driver bound")]
	NoActivator,
	/// The activator failed to start a core.
	#[error("core {core} failed to start: {error}")]
	Activation {
		/// Logical ID of the core.
		core:  usize,
		/// What the activator reported.
		#[source]
		error: ActivationError,
	},
	/// The stack layout has no stack for the core.
	#[error("no stack for core {0}")]
	NoStack(usize),
	/// The value is not the stack pointer of any secondary core.
	#[error("{0:#x} is not a secondary stack top")]
	BadStack(usize),
	/// There is no liveness latch for the logical ID.
	#[error("no such core: {0}")]
	UnknownCore(usize),
}

/// Where the secondary stacks are.
///
/// Core `id` (`1..cores`) starts with its stack pointer at
/// `base + id * size` and grows down towards `base + (id - 1) * size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackLayout {
	/// Bottom of core 1's stack.
	base:  usize,
	/// Bytes per stack.
	size:  usize,
	/// Configured cores, the boot core included.
	cores: usize,
}

impl StackLayout {
	/// Describes `cores - 1` stacks of `size` bytes at `base`.
	#[must_use]
	pub const fn new(base: usize, size: usize, cores: usize) -> Self {
		Self { base, size, cores }
	}

	/// The initial stack pointer of core `id`.
	#[must_use]
	pub fn top(&self, id: usize) -> Option<usize> {
		if id == 0 || id >= self.cores {
			return None;
		}
		id.checked_mul(self.size)?.checked_add(self.base)
	}

	/// The logical ID of the core whose initial stack pointer is `sp`.
	#[must_use]
	pub fn logical_id(&self, sp: usize) -> Option<usize> {
		let offset = sp.checked_sub(self.base)?;
		if self.size == 0 || offset % self.size != 0 {
			return None;
		}
		let id = offset / self.size;
		(1..self.cores).contains(&id).then_some(id)
	}
}

/// Statically allocated secondary stacks, `BYTES` in total.
#[repr(C, align(16))]
pub struct Stacks<const BYTES: usize>(UnsafeCell<[u8; BYTES]>);

// SAFETY: Each stack is only ever used by the one core whose stack
// SAFETY: pointer lands in it; the loader itself never touches the bytes.
unsafe impl<const BYTES: usize> Sync for Stacks<BYTES> {}

impl<const BYTES: usize> Stacks<BYTES> {
	/// Zero-filled stacks, for a `static`.
	#[must_use]
	pub const fn new() -> Self {
		Self(UnsafeCell::new([0; BYTES]))
	}

	/// The layout of `cores - 1` stacks of `size` bytes each.
	///
	/// Returns `None` if they don't fit.
	#[must_use]
	pub fn layout(&self, size: usize, cores: usize) -> Option<StackLayout> {
		let needed = cores.checked_sub(1)?.checked_mul(size)?;
		(needed <= BYTES).then(|| StackLayout::new(self.0.get().expose_provenance(), size, cores))
	}
}

/// Cross-core state of a bring-up of up to `N` cores.
///
/// `H` is the handoff every secondary receives on release.
pub struct Coordinator<H: Copy + Send, const N: usize> {
	/// One liveness latch per logical core; index 0 is unused.
	alive:   [Latch; N],
	/// Published once every core is up.
	release: Handoff<H>,
}

impl<H: Copy + Send, const N: usize> Coordinator<H, N> {
	/// A coordinator with no core alive and nothing released.
	#[must_use]
	pub const fn new() -> Self {
		Self {
			alive:   [const { Latch::new() }; N],
			release: Handoff::new(),
		}
	}

	/// Starts cores `1..cores`, one at a time.
	///
	/// For each core: computes its stack top, passes it to `publish_stack`
	/// (the architecture mailbox), starts the core at `entry` through the
	/// activator using the encoder's token, and spins (calling `relax`)
	/// until the core announces itself. The first failure stops the
	/// sequence; cores after it are never started.
	#[expect(
		clippy::too_many_arguments,
		reason = "each argument is a distinct per-boot input; bundling them only moves the list"
	)]
	pub fn bring_up<F, A, E>(
		&self,
		cores: usize,
		max_cores: usize,
		activator: Option<&A>,
		encoder: &E,
		stacks: &StackLayout,
		entry: usize,
		mut publish_stack: impl FnMut(usize),
		mut relax: impl FnMut(),
		mut console: Option<&mut dyn Console>,
	) -> Result<(), BringUpError>
	where
		F: Firmware,
		A: CoreActivator,
		E: TargetEncoder,
	{
		let max = max_cores.min(N);
		if cores > max {
			return Err(BringUpError::TooManyCores {
				configured: cores,
				max,
			});
		}

		if cores <= 1 {
			return Ok(());
		}

		let activator = activator.ok_or(BringUpError::NoActivator)?;

		for core in 1..cores {
			let sp = stacks.top(core).ok_or(BringUpError::NoStack(core))?;
			let target = encoder.encode_target(core);

			dbg!(console.as_mut().map(|c| &mut **c as &mut dyn Console), "starting core {core} (target {target:#x}, sp {sp:#x})");

			publish_stack(sp);
			activator
				.cpu_on::<F>(target, entry, sp)
				.map_err(|error| BringUpError::Activation { core, error })?;

			self.alive[core].wait(&mut relax);
			dbg!(console.as_mut().map(|c| &mut **c as &mut dyn Console), "core {core} is alive");
		}

		Ok(())
	}

	/// Marks core `id` alive. Called by that core, once.
	pub fn announce(&self, id: usize) -> Result<(), BringUpError> {
		self.alive
			.get(id)
			.filter(|_| id != 0)
			.ok_or(BringUpError::UnknownCore(id))?
			.raise();
		Ok(())
	}

	/// Whether core `id` has announced itself.
	#[must_use]
	pub fn is_alive(&self, id: usize) -> bool {
		self.alive.get(id).is_some_and(Latch::is_raised)
	}

	/// Publishes the handoff and releases every secondary.
	///
	/// # Safety
	/// Must be called once, by the boot core.
	pub unsafe fn release(&self, handoff: H) {
		// SAFETY: Single call from the boot core, per the contract.
		unsafe {
			self.release.publish(handoff);
		}
	}

	/// Whether the secondaries have been released.
	#[must_use]
	pub fn is_released(&self) -> bool {
		self.release.is_published()
	}

	/// Spins until released, then returns the handoff.
	pub fn wait_release(&self, relax: impl FnMut()) -> H {
		self.release.wait(relax)
	}
}
