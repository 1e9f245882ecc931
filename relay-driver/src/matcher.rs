//! Binds devices to drivers.

use relay_debug::{Console, dbg, dbg_warn};

use crate::{Activator, Bound, ConsoleDriver, Device, Driver, DriverError, DriverKind};

/// The active driver of each class.
#[derive(Debug, Default)]
pub struct Bindings {
	/// The active console.
	pub console:   Option<ConsoleDriver>,
	/// The active core activator.
	pub activator: Option<Activator>,
}

impl Bindings {
	/// No active drivers.
	#[must_use]
	pub const fn new() -> Self {
		Self {
			console:   None,
			activator: None,
		}
	}

	/// The active console, for logging.
	pub fn console(&mut self) -> Option<&mut dyn Console> {
		self.console.as_mut().map(|c| c as &mut dyn Console)
	}

	/// Makes `bound` the active driver of its class, replacing any
	/// earlier one.
	pub fn bind(&mut self, bound: Bound) {
		match bound {
			Bound::Console(c) => self.console = Some(c),
			Bound::Activator(a) => self.activator = Some(a),
		}
	}
}

/// What happened to one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
	/// No driver accepts any of the device's compatible strings.
	Unmatched,
	/// A driver matched and initialized, but did not opt in.
	Declined {
		/// The matched driver.
		driver: &'static str,
	},
	/// A driver matched and became active for its class.
	Bound {
		/// The matched driver.
		driver: &'static str,
		/// The class it is now active for.
		kind:   DriverKind,
	},
	/// A driver matched but its initializer failed.
	Failed {
		/// The matched driver.
		driver: &'static str,
		/// The initializer's error.
		error:  DriverError,
	},
}

/// Finds the driver for `device` and runs its initializer.
///
/// The device's compatible strings are tried most specific first; for
/// each one the registry is searched in order and the first driver that
/// accepts it wins. At most one initializer runs.
pub fn match_device(drivers: &[Driver], device: &Device<'_>, bindings: &mut Bindings) -> Outcome {
	let found = device.compatibles().find_map(|compatible| {
		drivers
			.iter()
			.find_map(|driver| driver.accepts(compatible).map(|data| (driver, data)))
	});

	let Some((driver, data)) = found else {
		return Outcome::Unmatched;
	};

	match (driver.init)(device, data) {
		Ok(Some(bound)) => {
			let kind = bound.kind();
			bindings.bind(bound);
			Outcome::Bound {
				driver: driver.name,
				kind,
			}
		}
		Ok(None) => {
			Outcome::Declined {
				driver: driver.name,
			}
		}
		Err(error) => {
			Outcome::Failed {
				driver: driver.name,
				error,
			}
		}
	}
}

/// Matches every device in order, logging to the console as it becomes
/// available.
///
/// Returns the number of devices that became active drivers.
pub fn match_devices<'a, I>(drivers: &[Driver], devices: I, bindings: &mut Bindings) -> usize
where
	I: IntoIterator<Item = Device<'a>>,
{
	let mut bound = 0;

	for device in devices {
		match match_device(drivers, &device, bindings) {
			Outcome::Unmatched => {}
			Outcome::Declined { driver } => {
				dbg!(bindings.console(), "{}: {driver} declined", device.name);
			}
			Outcome::Bound { driver, kind } => {
				bound += 1;
				dbg!(bindings.console(), "{}: bound {driver} ({kind:?})", device.name);
			}
			Outcome::Failed { driver, error } => {
				dbg_warn!(bindings.console(), "{}: {driver} failed: {error}; ignoring device", device.name);
			}
		}
	}

	bound
}

#[cfg(test)]
mod tests {
	use core::sync::atomic::{AtomicUsize, Ordering::SeqCst};

	use super::*;
	use crate::{MatchData, Regs, psci::Psci, sbi_hsm::SbiHsm};
	use relay_arch_base::Conduit;

	static FOO_CALLS: AtomicUsize = AtomicUsize::new(0);
	static FOO_SHIFT: AtomicUsize = AtomicUsize::new(usize::MAX);
	static BAR_CALLS: AtomicUsize = AtomicUsize::new(0);

	fn foo_init(_: &Device<'_>, data: &MatchData) -> Result<Option<Bound>, DriverError> {
		FOO_CALLS.fetch_add(1, SeqCst);
		if let MatchData::Ns16550 { reg_shift } = data {
			FOO_SHIFT.store(usize::from(*reg_shift), SeqCst);
		}
		Ok(Some(Bound::Activator(Activator::SbiHsm(SbiHsm))))
	}

	fn bar_init(_: &Device<'_>, _: &MatchData) -> Result<Option<Bound>, DriverError> {
		BAR_CALLS.fetch_add(1, SeqCst);
		Ok(None)
	}

	fn failing_init(_: &Device<'_>, _: &MatchData) -> Result<Option<Bound>, DriverError> {
		Err(DriverError::MissingRegs)
	}

	fn psci_init(dev: &Device<'_>, _: &MatchData) -> Result<Option<Bound>, DriverError> {
		let conduit = match dev.method {
			Some("smc") => Conduit::Smc,
			_ => Conduit::Hvc,
		};
		Ok(Some(Bound::Activator(Activator::Psci(Psci::new(conduit)))))
	}

	const FOO: Driver = Driver {
		name:       "foo",
		kind:       DriverKind::CoreActivation,
		compatible: relay_macro::compatible!["vendor,foo-v2", "vendor,foo" => MatchData::Ns16550 { reg_shift: 2 }],
		init:       foo_init,
	};

	const BAR: Driver = Driver {
		name:       "bar",
		kind:       DriverKind::Console,
		compatible: relay_macro::compatible!["vendor,bar", "vendor,foo"],
		init:       bar_init,
	};

	#[test]
	fn first_match_wins_and_runs_once_with_its_data() {
		let mut bindings = Bindings::new();
		let dev = Device::new("foo@0", b"board,foo\0vendor,foo\0", &[], None);

		let outcome = match_device(&[FOO, BAR], &dev, &mut bindings);
		assert_eq!(
			outcome,
			Outcome::Bound {
				driver: "foo",
				kind:   DriverKind::CoreActivation,
			}
		);
		assert_eq!(FOO_CALLS.load(SeqCst), 1);
		assert_eq!(FOO_SHIFT.load(SeqCst), 2);
		assert_eq!(BAR_CALLS.load(SeqCst), 0);
		assert!(matches!(bindings.activator, Some(Activator::SbiHsm(_))));
	}

	#[test]
	fn device_order_beats_registry_order() {
		static CALLS: AtomicUsize = AtomicUsize::new(0);

		fn counting(_: &Device<'_>, _: &MatchData) -> Result<Option<Bound>, DriverError> {
			CALLS.fetch_add(1, SeqCst);
			Ok(None)
		}

		let first = Driver {
			name: "generic",
			compatible: relay_macro::compatible!["vendor,generic"],
			init: failing_init,
			kind: DriverKind::Console,
		};
		let second = Driver {
			name: "specific",
			compatible: relay_macro::compatible!["vendor,specific"],
			init: counting,
			kind: DriverKind::Console,
		};

		let mut bindings = Bindings::new();
		let dev = Device::new("u", b"vendor,specific\0vendor,generic\0", &[], None);
		assert_eq!(
			match_device(&[first, second], &dev, &mut bindings),
			Outcome::Declined { driver: "specific" }
		);
		assert_eq!(CALLS.load(SeqCst), 1);
	}

	#[test]
	fn unmatched_devices_run_nothing() {
		static CALLS: AtomicUsize = AtomicUsize::new(0);

		fn counting(_: &Device<'_>, _: &MatchData) -> Result<Option<Bound>, DriverError> {
			CALLS.fetch_add(1, SeqCst);
			Ok(None)
		}

		let driver = Driver {
			name: "x",
			compatible: relay_macro::compatible!["vendor,x"],
			init: counting,
			kind: DriverKind::Console,
		};

		let mut bindings = Bindings::new();
		let devices = [
			Device::new("a", b"vendor,y\0", &[], None),
			Device::new("b", b"", &[], None),
		];
		assert_eq!(match_devices(&[driver], devices, &mut bindings), 0);
		assert_eq!(CALLS.load(SeqCst), 0);
		assert!(bindings.console.is_none());
	}

	#[test]
	fn initializer_failures_are_not_fatal() {
		let failing = Driver {
			name: "failing",
			compatible: relay_macro::compatible!["vendor,broken"],
			init: failing_init,
			kind: DriverKind::Console,
		};
		let psci = Driver {
			name: "psci",
			compatible: relay_macro::compatible!["arm,psci-0.2"],
			init: psci_init,
			kind: DriverKind::CoreActivation,
		};

		let mut bindings = Bindings::new();
		let devices = [
			Device::new("broken", b"vendor,broken\0", &[Regs { base: 0x1000, size: 0x10 }], None),
			Device::new("psci", b"arm,psci-0.2\0", &[], Some("smc")),
		];
		assert_eq!(match_devices(&[failing, psci], devices, &mut bindings), 1);
		assert!(matches!(
			bindings.activator,
			Some(Activator::Psci(p)) if p.conduit() == Conduit::Smc
		));
	}

	#[test]
	fn later_opt_ins_replace_earlier_ones() {
		let psci = Driver {
			name: "psci",
			compatible: relay_macro::compatible!["arm,psci-0.2"],
			init: psci_init,
			kind: DriverKind::CoreActivation,
		};

		let mut bindings = Bindings::new();
		let devices = [
			Device::new("psci", b"arm,psci-0.2\0", &[], Some("hvc")),
			Device::new("psci", b"arm,psci-0.2\0", &[], Some("smc")),
		];
		assert_eq!(match_devices(&[psci], devices, &mut bindings), 2);
		assert!(matches!(
			bindings.activator,
			Some(Activator::Psci(p)) if p.conduit() == Conduit::Smc
		));
	}
}
