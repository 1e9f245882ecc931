//! SBI hart state management.

use relay_arch_base::Firmware;

use crate::{ActivationError, Activator, Bound, CoreActivator, Device, DriverError, MatchData};

/// The HSM extension ID (`"HSM"`).
pub const EXT_HSM: usize = 0x0048_534D;
/// `sbi_hart_start`
pub const HART_START: usize = 0;

/// Starts harts with `sbi_hart_start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbiHsm;

impl CoreActivator for SbiHsm {
	fn cpu_on<F: Firmware>(&self, target: usize, entry: usize, stack: usize) -> Result<(), ActivationError> {
		// `opaque` arrives in a1; the entry stub ignores it and reads the
		// mailbox like every other family.
		let ret = F::sbi(EXT_HSM, HART_START, [target, entry, stack]);
		if ret.error == 0 {
			Ok(())
		} else {
			Err(ActivationError::Firmware(ret.error))
		}
	}
}

/// Registry initializer.
pub fn init(_device: &Device<'_>, _data: &MatchData) -> Result<Option<Bound>, DriverError> {
	Ok(Some(Bound::Activator(Activator::SbiHsm(SbiHsm))))
}
