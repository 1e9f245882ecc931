//! The portable boot sequence of the Relay boot loader.
//!
//! This crate ties the others together. The boot core discovers devices
//! and memory (from the firmware's device tree when there is one, the
//! platform's tables otherwise), binds a console and a core activator,
//! loads the embedded images, builds the boot translation tables, brings
//! up the secondary cores and hands everything to them, and finally enters
//! the kernel itself. Secondary cores only announce themselves, wait for
//! the handoff and enter the kernel.
//!
//! Everything below the two entry points ([`boot_primary`] and
//! [`boot_secondary`]) is generic over [`Arch`](relay_arch_base::Arch) and [`Platform`], and runs
//! on the host in tests.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(doc, feature(doc_cfg))]

mod boot;
pub mod devices;
#[cfg(test)]
mod fake;
pub mod platform;
pub mod smp;
pub mod transition;

use relay_arch_base::BuildError;
use relay_image::LoadError;

pub use self::{
	boot::{BootStatics, boot_primary, boot_secondary, prepare},
	platform::Platform,
	smp::BringUpError,
};

/// Build-time configuration.
pub mod config {
	include!(concat!(env!("OUT_DIR"), "/config.rs"));

	/// Bytes of statically allocated secondary stack.
	pub const SECONDARY_STACK_BYTES: usize = (NUM_CORES - 1) * CORE_STACK_SIZE;

	static_assertions::const_assert!(NUM_CORES >= 1);
	static_assertions::const_assert!(CORE_STACK_SIZE.is_power_of_two() && CORE_STACK_SIZE >= 1024);
}

/// An error that stops the boot. Always fatal: reported, then the core halts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BootError {
	/// The images could not be loaded.
	#[error("loading images: {0}")]
	Load(#[from] LoadError),
	/// The translation tables could not be built.
	#[error("building translation tables: {0}")]
	Build(#[from] BuildError),
	/// A secondary core could not be brought up.
	#[error("bringing up cores: {0}")]
	BringUp(#[from] BringUpError),
	/// The built tables don't map an address where they should.
	#[error("{virt:#x} translates to {found:x?}, expected {expected:#x}")]
	SelfCheck {
		/// The address walked.
		virt:     usize,
		/// Where it should land.
		expected: usize,
		/// Where it landed, if mapped at all.
		found:    Option<usize>,
	},
	/// The boot tables were already handed out.
	#[error("boot tables already in use")]
	TablesTaken,
}
