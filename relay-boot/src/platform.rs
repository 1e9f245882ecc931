//! Board descriptions.
//!
//! A platform supplies what the loader cannot discover on its own: the
//! maximum core count, how a core index becomes the token its activator
//! expects, and fallback memory and device tables for boots without a
//! device tree.

use relay_driver::{Device, Regs};
use relay_image::MemoryRegion;

/// Turns a logical core index into the platform's activation token.
pub trait TargetEncoder {
	/// The token that starts core `core_index` (`1..N`).
	fn encode_target(&self, core_index: usize) -> usize;
}

/// Core `n` is hardware ID `n` (MPIDR `Aff0`, or a spin-table slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flat;

impl TargetEncoder for Flat {
	fn encode_target(&self, core_index: usize) -> usize {
		core_index
	}
}

/// Cores are grouped into clusters of `PER_CLUSTER`; the token is
/// `(cluster << 16) | (core << 8)` (MPIDR with the MT bit layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cluster<const PER_CLUSTER: usize>;

impl<const PER_CLUSTER: usize> TargetEncoder for Cluster<PER_CLUSTER> {
	fn encode_target(&self, core_index: usize) -> usize {
		((core_index / PER_CLUSTER) << 16) | ((core_index % PER_CLUSTER) << 8)
	}
}

/// Hart IDs in order, skipping the boot hart (which may be any of them).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HartSkip {
	/// The hart the loader was entered on.
	pub boot_hart: usize,
}

impl TargetEncoder for HartSkip {
	fn encode_target(&self, core_index: usize) -> usize {
		if core_index <= self.boot_hart {
			core_index - 1
		} else {
			core_index
		}
	}
}

/// A device known without a device tree.
#[derive(Debug, Clone, Copy)]
pub struct StaticDevice {
	/// Node-style name.
	pub name:       &'static str,
	/// NUL-separated compatible list.
	pub compatible: &'static [u8],
	/// Register windows.
	pub regs:       &'static [Regs],
	/// PSCI conduit, if any.
	pub method:     Option<&'static str>,
}

impl StaticDevice {
	/// A device with one register window.
	#[must_use]
	pub const fn mmio(name: &'static str, compatible: &'static [u8], regs: &'static [Regs]) -> Self {
		Self {
			name,
			compatible,
			regs,
			method: None,
		}
	}

	/// A firmware interface without registers.
	#[must_use]
	pub const fn firmware(name: &'static str, compatible: &'static [u8], method: Option<&'static str>) -> Self {
		Self {
			name,
			compatible,
			regs: &[],
			method,
		}
	}

	/// The device in matcher form.
	#[must_use]
	pub fn device(&self) -> Device<'static> {
		Device::new(self.name, self.compatible, self.regs, self.method)
	}
}

/// A board the loader can be built for.
pub trait Platform {
	/// How core indices become activation tokens.
	type Encoder: TargetEncoder;

	/// Board name, for the banner.
	const NAME: &'static str;
	/// The most cores the board has.
	const MAX_CORES: usize;
	/// Usable RAM when the device tree has no `/memory` node.
	const MEMORY: &'static [MemoryRegion];
	/// Devices to match when there is no device tree.
	const DEVICES: &'static [StaticDevice];

	/// The encoder, given the boot core's hardware ID.
	fn encoder(boot_hardware_id: usize) -> Self::Encoder;
}

/// 1 GiB.
const GIB: usize = 1 << 30;

/// QEMU `virt`, AArch64.
#[derive(Debug)]
pub struct QemuVirt;

impl Platform for QemuVirt {
	type Encoder = Flat;

	const DEVICES: &'static [StaticDevice] = &[
		StaticDevice::mmio("pl011@9000000", b"arm,pl011\0arm,primecell\0", &[Regs {
			base: 0x0900_0000,
			size: 0x1000,
		}]),
		StaticDevice::firmware("psci", b"arm,psci-1.0\0arm,psci-0.2\0arm,psci\0", Some("hvc")),
	];
	const MAX_CORES: usize = 8;
	const MEMORY: &'static [MemoryRegion] = &[MemoryRegion::new(0x4000_0000, GIB)];
	const NAME: &'static str = "qemu-virt";

	fn encoder(_: usize) -> Flat {
		Flat
	}
}

/// Arm Fixed Virtual Platform (Base RevC), AArch64.
#[derive(Debug)]
pub struct Fvp;

impl Platform for Fvp {
	type Encoder = Cluster<4>;

	const DEVICES: &'static [StaticDevice] = &[
		StaticDevice::mmio("uart@1c090000", b"arm,pl011\0arm,primecell\0", &[Regs {
			base: 0x1c09_0000,
			size: 0x1000,
		}]),
		StaticDevice::firmware("psci", b"arm,psci-1.0\0arm,psci-0.2\0arm,psci\0", Some("smc")),
	];
	const MAX_CORES: usize = 8;
	const MEMORY: &'static [MemoryRegion] = &[MemoryRegion::new(0x8000_0000, 2 * GIB)];
	const NAME: &'static str = "fvp";

	fn encoder(_: usize) -> Cluster<4> {
		Cluster
	}
}

/// NVIDIA Jetson TX1 (Tegra X1), AArch64.
#[derive(Debug)]
pub struct Tx1;

impl Platform for Tx1 {
	type Encoder = Flat;

	const DEVICES: &'static [StaticDevice] = &[
		StaticDevice::mmio("serial@70006000", b"nvidia,tegra210-uart\0nvidia,tegra20-uart\0", &[Regs {
			base: 0x7000_6000,
			size: 0x40,
		}]),
		StaticDevice::firmware("psci", b"arm,psci-1.0\0arm,psci-0.2\0", Some("smc")),
	];
	const MAX_CORES: usize = 4;
	const MEMORY: &'static [MemoryRegion] = &[MemoryRegion::new(0x8000_0000, 2 * GIB)];
	const NAME: &'static str = "tx1";

	fn encoder(_: usize) -> Flat {
		Flat
	}
}

/// Raspberry Pi 3, AArch64.
#[derive(Debug)]
pub struct Rpi3;

impl Platform for Rpi3 {
	type Encoder = Flat;

	const DEVICES: &'static [StaticDevice] = &[
		StaticDevice::mmio("serial@7e201000", b"arm,pl011\0arm,primecell\0", &[Regs {
			base: 0x3f20_1000,
			size: 0x200,
		}]),
		StaticDevice::firmware("firmware", b"raspberrypi,bcm2835-firmware\0simple-mfd\0", None),
	];
	const MAX_CORES: usize = 4;
	// The top 16 MiB belong to the VideoCore.
	const MEMORY: &'static [MemoryRegion] = &[MemoryRegion::new(0, 1008 << 20)];
	const NAME: &'static str = "rpi3";

	fn encoder(_: usize) -> Flat {
		Flat
	}
}

/// Xilinx Zynq-7000, ARMv7-A. Single core; console from the device tree only.
#[derive(Debug)]
pub struct Zynq7000;

impl Platform for Zynq7000 {
	type Encoder = Flat;

	const DEVICES: &'static [StaticDevice] = &[];
	const MAX_CORES: usize = 1;
	const MEMORY: &'static [MemoryRegion] = &[MemoryRegion::new(0, GIB)];
	const NAME: &'static str = "zynq7000";

	fn encoder(_: usize) -> Flat {
		Flat
	}
}

/// QEMU `virt`, RV64.
#[derive(Debug)]
pub struct RiscvVirt;

impl Platform for RiscvVirt {
	type Encoder = HartSkip;

	const DEVICES: &'static [StaticDevice] = &[
		StaticDevice::mmio("serial@10000000", b"ns16550a\0", &[Regs {
			base: 0x1000_0000,
			size: 0x100,
		}]),
		StaticDevice::firmware("sbi", b"riscv,sbi\0", None),
	];
	const MAX_CORES: usize = 8;
	const MEMORY: &'static [MemoryRegion] = &[MemoryRegion::new(0x8000_0000, GIB)];
	const NAME: &'static str = "riscv-virt";

	fn encoder(boot_hardware_id: usize) -> HartSkip {
		HartSkip {
			boot_hart: boot_hardware_id,
		}
	}
}

#[cfg(test)]
mod tests {
	use relay_driver::{Activator, Bindings, DRIVERS, match_devices};

	use super::*;

	#[test]
	fn flat_targets_are_indices() {
		assert_eq!((1..4).map(|i| Flat.encode_target(i)).collect::<Vec<_>>(), [1, 2, 3]);
	}

	#[test]
	fn cluster_targets_use_mt_affinity() {
		let c = Fvp::encoder(0);
		assert_eq!(c.encode_target(1), 0x100);
		assert_eq!(c.encode_target(3), 0x300);
		assert_eq!(c.encode_target(4), 0x1_0000);
		assert_eq!(c.encode_target(7), 0x1_0300);
	}

	#[test]
	fn hart_targets_skip_the_boot_hart() {
		let from_zero = RiscvVirt::encoder(0);
		assert_eq!((1..4).map(|i| from_zero.encode_target(i)).collect::<Vec<_>>(), [1, 2, 3]);

		let from_two = RiscvVirt::encoder(2);
		assert_eq!((1..4).map(|i| from_two.encode_target(i)).collect::<Vec<_>>(), [0, 1, 3]);
	}

	/// Binds a platform's fallback firmware devices and returns the result.
	///
	/// MMIO devices are left out: binding a console programs the UART.
	fn bind<P: Platform>() -> Bindings {
		let mut bindings = Bindings::new();
		let firmware = P::DEVICES.iter().filter(|d| d.regs.is_empty()).map(StaticDevice::device);
		match_devices(DRIVERS, firmware, &mut bindings);
		bindings
	}

	#[test]
	fn fallback_tables_bind_the_expected_drivers() {
		assert!(matches!(bind::<QemuVirt>().activator, Some(Activator::Psci(_))));
		assert!(matches!(bind::<Fvp>().activator, Some(Activator::Psci(_))));
		assert!(matches!(bind::<Tx1>().activator, Some(Activator::Psci(_))));
		assert!(matches!(bind::<Rpi3>().activator, Some(Activator::SpinTable(_))));
		assert!(matches!(bind::<RiscvVirt>().activator, Some(Activator::SbiHsm(_))));

		let zynq = bind::<Zynq7000>();
		assert!(zynq.activator.is_none());
	}

	#[test]
	fn fallback_memory_is_page_aligned() {
		for region in [QemuVirt::MEMORY, Fvp::MEMORY, Tx1::MEMORY, Rpi3::MEMORY, Zynq7000::MEMORY, RiscvVirt::MEMORY]
			.into_iter()
			.flatten()
		{
			assert_eq!(region.base % 4096, 0);
			assert_eq!(region.size % 4096, 0);
		}
	}
}
