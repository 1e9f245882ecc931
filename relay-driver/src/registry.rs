//! The driver registry.

use relay_macro::compatible;

use crate::{Driver, DriverKind, MatchData, ns16550, pl011, psci, sbi_hsm, spin_table};

/// Every driver the loader knows, in match priority order.
pub const DRIVERS: &[Driver] = &[
	Driver {
		name:       "pl011",
		kind:       DriverKind::Console,
		compatible: compatible!["arm,pl011", "arm,sbsa-uart"],
		init:       pl011::init,
	},
	Driver {
		name:       "ns16550",
		kind:       DriverKind::Console,
		compatible: compatible![
			"ns16550a",
			"ns16550",
			"nvidia,tegra20-uart" => MatchData::Ns16550 { reg_shift: 2 },
			"snps,dw-apb-uart" => MatchData::Ns16550 { reg_shift: 2 },
		],
		init:       ns16550::init,
	},
	Driver {
		name:       "psci",
		kind:       DriverKind::CoreActivation,
		compatible: compatible!["arm,psci-1.0", "arm,psci-0.2", "arm,psci"],
		init:       psci::init,
	},
	Driver {
		name:       "spin-table",
		kind:       DriverKind::CoreActivation,
		// The Raspberry Pi firmware's armstub parks cores 1..3 on words
		// at 0xE0, 0xE8 and 0xF0. A tree's `cpu-release-addr` wins.
		compatible: compatible![
			"raspberrypi,bcm2835-firmware" => MatchData::SpinTable { release_base: 0xD8 },
		],
		init:       spin_table::init,
	},
	Driver {
		name:       "sbi-hsm",
		kind:       DriverKind::CoreActivation,
		compatible: compatible!["riscv,sbi"],
		init:       sbi_hsm::init,
	},
];
