//! The Relay second-stage boot loader.
//!
//! This crate has both a library (which is common between architectures)
//! and individual, architecture-specific binaries. The library binds the
//! selected platform and the embedded blob to the portable boot sequence
//! in `relay-boot`; see the `bin/` directory for the entry points the
//! start code calls.
#![no_std]
#![cfg_attr(doc, feature(doc_cfg))]

use relay_arch::{AddrRange, Arch, Target};
use relay_boot::{BootStatics, Platform, config::NUM_CORES};
use relay_image::LoaderLayout;

/// The platform the loader is built for.
#[cfg(feature = "qemu-virt")]
pub type Board = relay_boot::platform::QemuVirt;
/// The platform the loader is built for.
#[cfg(feature = "fvp")]
pub type Board = relay_boot::platform::Fvp;
/// The platform the loader is built for.
#[cfg(feature = "tx1")]
pub type Board = relay_boot::platform::Tx1;
/// The platform the loader is built for.
#[cfg(feature = "rpi3")]
pub type Board = relay_boot::platform::Rpi3;
/// The platform the loader is built for.
#[cfg(feature = "zynq7000")]
pub type Board = relay_boot::platform::Zynq7000;
/// The platform the loader is built for.
#[cfg(feature = "riscv-virt")]
pub type Board = relay_boot::platform::RiscvVirt;

#[cfg(not(any(
	feature = "qemu-virt",
	feature = "fvp",
	feature = "tx1",
	feature = "rpi3",
	feature = "zynq7000",
	feature = "riscv-virt"
)))]
compile_error!("select a platform feature for relay-loader");

static_assertions::const_assert!(NUM_CORES <= Board::MAX_CORES);

/// Tables, stacks and bring-up state; lives in `.bss`.
static STATICS: BootStatics<Target> = BootStatics::new();

/// The image blob, embedded at build time.
static BLOB: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/blob.bin"));

unsafe extern "C" {
	/// First byte of the loader image (linker script).
	static __relay_image_start: u8;
	/// End of the loader image, including `.bss` and the boot stack.
	static __relay_image_end: u8;
}

/// Where the loader and its blob sit. Translation is off, so addresses
/// are physical.
fn layout() -> LoaderLayout {
	let image = AddrRange::new((&raw const __relay_image_start).addr(), (&raw const __relay_image_end).addr());
	let blob = BLOB.as_ptr().addr();

	LoaderLayout {
		image,
		blob: AddrRange::new(blob, blob + BLOB.len()),
	}
}

/// Runs the loader on the boot core.
///
/// # Safety
/// Do **NOT** call this function directly. It is only called by the
/// architecture-specific binaries, once, on the boot core.
pub unsafe fn boot(dtb: usize) -> ! {
	relay_boot::boot_primary::<Target, Board>(&STATICS, dtb, layout())
}

/// Runs the loader on a secondary core started on stack `sp`.
///
/// # Safety
/// Do **NOT** call this function directly. It is only called by the
/// architecture-specific binaries.
pub unsafe fn boot_secondary(sp: usize) -> ! {
	relay_boot::boot_secondary::<Target>(&STATICS, sp)
}

/// Panic handler for the loader.
///
/// Panics don't carry a console; the core simply halts.
///
/// # Safety
/// Do **NOT** call this function directly.
/// It is only called by the architecture-specific binaries.
pub unsafe fn panic(_info: &core::panic::PanicInfo<'_>) -> ! {
	Target::halt()
}
