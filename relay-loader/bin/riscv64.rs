//! Entry points of the Relay boot loader on RV64 (S-mode, under SBI).
#![no_std]
#![no_main]

/// Panic handler for the loader.
#[inline(never)]
#[panic_handler]
fn panic(info: &::core::panic::PanicInfo<'_>) -> ! {
	// SAFETY: Only ever called as the panic handler.
	unsafe { ::relay_loader::panic(info) }
}

/// Boot hart entry. SBI passes the hart ID in `a0` and the device tree
/// in `a1`; the start code swaps them and keeps the hart ID in `tp`.
///
/// # Safety
/// Do **NOT** call this function directly. It is called by `_start`.
#[inline(never)]
#[cold]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn relay_main(dtb: usize, _hart: usize) -> ! {
	// SAFETY: Called once, by the start code, on the boot hart.
	unsafe { ::relay_loader::boot(dtb) }
}

/// Secondary hart entry, called by the secondary stub with the stack
/// it picked up from the mailbox.
///
/// # Safety
/// Do **NOT** call this function directly. It is called by
/// `_relay_secondary_start`.
#[inline(never)]
#[cold]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn relay_secondary_main(sp: usize) -> ! {
	// SAFETY: Called by the secondary stub, once per hart.
	unsafe { ::relay_loader::boot_secondary(sp) }
}
