//! PSCI `CPU_ON` over the SMC calling convention.

use relay_arch_base::{Conduit, Firmware};

use crate::{ActivationError, Activator, Bound, CoreActivator, Device, DriverError, MatchData};

/// `CPU_ON`, SMC64 calling convention.
pub const CPU_ON_64: u32 = 0xC400_0003;
/// `CPU_ON`, SMC32 calling convention.
pub const CPU_ON_32: u32 = 0x8400_0003;

/// `PSCI_SUCCESS`
const SUCCESS: isize = 0;

/// The `CPU_ON` function ID for the native word size.
const fn cpu_on_fid() -> u32 {
	if size_of::<usize>() == 8 { CPU_ON_64 } else { CPU_ON_32 }
}

/// A PSCI implementation reached through `hvc` or `smc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Psci {
	/// The instruction used to call firmware.
	conduit: Conduit,
}

impl Psci {
	/// Creates a PSCI activator using `conduit`.
	#[must_use]
	pub const fn new(conduit: Conduit) -> Self {
		Self { conduit }
	}

	/// The conduit firmware is called through.
	#[must_use]
	pub const fn conduit(&self) -> Conduit {
		self.conduit
	}
}

impl CoreActivator for Psci {
	fn cpu_on<F: Firmware>(&self, target: usize, entry: usize, stack: usize) -> Result<(), ActivationError> {
		// The context ID is handed to the core in x0/r0; the stack is as
		// good a value as any and lets the entry stub check the mailbox.
		match F::smccc(self.conduit, cpu_on_fid(), [target, entry, stack]) {
			SUCCESS => Ok(()),
			err => Err(ActivationError::Firmware(err)),
		}
	}
}

/// Registry initializer.
pub fn init(device: &Device<'_>, _data: &MatchData) -> Result<Option<Bound>, DriverError> {
	let conduit = match device.method {
		Some("hvc") => Conduit::Hvc,
		Some("smc") => Conduit::Smc,
		_ => return Err(DriverError::BadMethod),
	};

	Ok(Some(Bound::Activator(Activator::Psci(Psci::new(conduit)))))
}
