//! Boot drivers for the Relay boot loader, the registry that lists them
//! and the matcher that binds devices to them.
//!
//! The loader needs exactly two kinds of driver: a console to report
//! through and a core activator to start secondary cores with. Each
//! driver declares the device-tree compatible strings it accepts (built
//! with [`relay_macro::compatible!`], which validates them at compile
//! time) and an initializer. The registry is a plain constant array; there
//! is no link-time collection.
//!
//! Everything here is free of inline assembly. Firmware calls go through
//! [`Firmware`], so the activators are exercised on the host with a fake
//! firmware.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(doc, feature(doc_cfg))]

// The `compatible!` macro emits absolute `::relay_driver` paths.
extern crate self as relay_driver;

mod matcher;
pub mod ns16550;
pub mod pl011;
pub mod psci;
mod registry;
pub mod sbi_hsm;
pub mod spin_table;

use relay_arch_base::{AddrRange, Firmware};
use relay_debug::Console;

pub use self::{
	matcher::{Bindings, Outcome, match_device, match_devices},
	registry::DRIVERS,
};

/// Maximum register windows kept per device.
pub const MAX_REGS: usize = 4;

/// The capability class of a driver (the "type tag" of the devices it binds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
	/// Byte output for diagnostics.
	Console,
	/// Starts secondary cores.
	CoreActivation,
}

/// Driver-specific data attached to one compatible string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchData {
	/// Nothing beyond the match itself.
	None,
	/// A 16550 whose registers are `1 << reg_shift` bytes apart.
	Ns16550 {
		/// Register stride, as a shift.
		reg_shift: u8,
	},
	/// A spin table whose per-core release words start at `release_base`.
	SpinTable {
		/// Address of core 0's release word; core `n` uses `release_base + 8 * n`
		/// unless its `cpu` node names its own.
		release_base: usize,
	},
}

/// One compatible string a driver accepts, and its match data.
#[derive(Debug, Clone, Copy)]
pub struct Compatible {
	/// The device-tree compatible string.
	pub string: &'static str,
	/// Handed to the initializer when this entry matches.
	pub data:   MatchData,
}

/// A memory-mapped register window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Regs {
	/// Physical base address.
	pub base: usize,
	/// Length in bytes.
	pub size: usize,
}

/// A device to be matched against the registry.
#[derive(Debug, Clone)]
pub struct Device<'a> {
	/// The node name (for diagnostics).
	pub name:       &'a str,
	/// Raw compatible list: NUL-separated strings, most specific first.
	pub compatible: &'a [u8],
	/// Register windows, in `reg` order.
	pub regs:       heapless::Vec<Regs, MAX_REGS>,
	/// The `method` property, if present (PSCI).
	pub method:     Option<&'a str>,
}

impl<'a> Device<'a> {
	/// Creates a device. Register windows past [`MAX_REGS`] are dropped.
	#[must_use]
	pub fn new(name: &'a str, compatible: &'a [u8], regs: &[Regs], method: Option<&'a str>) -> Self {
		let mut kept = heapless::Vec::new();
		for r in regs.iter().take(MAX_REGS) {
			// Cannot fail; at most `MAX_REGS` are taken.
			let _ = kept.push(*r);
		}

		Self {
			name,
			compatible,
			regs: kept,
			method,
		}
	}

	/// The device's compatible strings, most specific first.
	///
	/// Entries that are not valid UTF-8 are skipped.
	pub fn compatibles(&self) -> impl Iterator<Item = &'a str> + 'a {
		relay_dtb::strings(self.compatible).filter_map(|s| core::str::from_utf8(s).ok())
	}

	/// The first register window, if it is at least `len` bytes long.
	pub fn first_regs(&self, len: usize) -> Result<Regs, DriverError> {
		let regs = *self.regs.first().ok_or(DriverError::MissingRegs)?;
		if regs.size < len {
			return Err(DriverError::RegsTooSmall {
				size: regs.size,
				need: len,
			});
		}
		if regs.base == 0 {
			return Err(DriverError::NullRegs);
		}
		Ok(regs)
	}
}

/// An error returned by a driver initializer.
///
/// Never fatal; the device is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
	/// The device has no `reg` window.
	#[error("device has no register window")]
	MissingRegs,
	/// The register window is smaller than the register block.
	#[error("register window is {size:#x} bytes, need {need:#x}")]
	RegsTooSmall {
		/// The window's size.
		size: usize,
		/// The block's size.
		need: usize,
	},
	/// The register window is at address zero.
	#[error("register window at address zero")]
	NullRegs,
	/// The `method` property is missing or not `hvc`/`smc`.
	#[error("missing or unknown conduit method")]
	BadMethod,
	/// The match data does not belong to this driver.
	#[error("match data does not belong to this driver")]
	BadMatchData,
}

/// An error returned when a core cannot be started. Always fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ActivationError {
	/// The firmware rejected the request.
	#[error("firmware returned {0}")]
	Firmware(isize),
	/// The target has no release location.
	#[error("no release location for target {0:#x}")]
	NoReleaseSlot(usize),
}

/// Starts secondary cores.
pub trait CoreActivator {
	/// Starts the core identified by the platform `target` token at
	/// `entry` (a physical address).
	///
	/// `stack` is the stack pointer the core will use. Not every method
	/// can pass it; the loader also publishes it through the architecture
	/// mailbox before calling this.
	fn cpu_on<F: Firmware>(&self, target: usize, entry: usize, stack: usize) -> Result<(), ActivationError>;
}

/// The bound console driver.
#[derive(Debug)]
pub enum ConsoleDriver {
	/// An ARM PL011.
	Pl011(pl011::Pl011),
	/// A 16550-compatible UART.
	Ns16550(ns16550::Ns16550),
}

impl ConsoleDriver {
	/// The register block, which must stay identity mapped while the
	/// console is in use.
	#[must_use]
	pub fn window(&self) -> AddrRange {
		match self {
			Self::Pl011(uart) => uart.window(),
			Self::Ns16550(uart) => uart.window(),
		}
	}
}

impl Console for ConsoleDriver {
	fn putc(&mut self, byte: u8) {
		match self {
			Self::Pl011(uart) => uart.putc(byte),
			Self::Ns16550(uart) => uart.putc(byte),
		}
	}
}

/// The bound core activation driver.
#[derive(Debug, Clone, Copy)]
pub enum Activator {
	/// PSCI `CPU_ON`.
	Psci(psci::Psci),
	/// A spin-table release.
	SpinTable(spin_table::SpinTable),
	/// SBI HSM `hart_start`.
	SbiHsm(sbi_hsm::SbiHsm),
}

impl CoreActivator for Activator {
	fn cpu_on<F: Firmware>(&self, target: usize, entry: usize, stack: usize) -> Result<(), ActivationError> {
		match self {
			Self::Psci(a) => a.cpu_on::<F>(target, entry, stack),
			Self::SpinTable(a) => a.cpu_on::<F>(target, entry, stack),
			Self::SbiHsm(a) => a.cpu_on::<F>(target, entry, stack),
		}
	}
}

/// What an initializer hands back when its driver opts in.
#[derive(Debug)]
pub enum Bound {
	/// Becomes the active console.
	Console(ConsoleDriver),
	/// Becomes the active core activator.
	Activator(Activator),
}

impl Bound {
	/// The class the bound driver becomes active for.
	#[must_use]
	pub fn kind(&self) -> DriverKind {
		match self {
			Self::Console(_) => DriverKind::Console,
			Self::Activator(_) => DriverKind::CoreActivation,
		}
	}
}

/// A driver initializer.
///
/// Returns `Ok(Some(_))` to opt in as the active driver for its class,
/// `Ok(None)` to leave the current one in place.
pub type Init = fn(&Device<'_>, &MatchData) -> Result<Option<Bound>, DriverError>;

/// A registry entry.
#[derive(Debug, Clone, Copy)]
pub struct Driver {
	/// Driver name (for diagnostics).
	pub name:       &'static str,
	/// The class the driver provides.
	pub kind:       DriverKind,
	/// Accepted compatible strings, in the driver's preference order.
	pub compatible: &'static [Compatible],
	/// The initializer.
	pub init:       Init,
}

impl Driver {
	/// The match data of the entry accepting `compatible`, if any.
	#[must_use]
	pub fn accepts(&self, compatible: &str) -> Option<&'static MatchData> {
		self.compatible
			.iter()
			.find(|c| c.string == compatible)
			.map(|c| &c.data)
	}
}
