//! Entry points of the Relay boot loader on ARMv7-A.
#![no_std]
#![no_main]

/// Panic handler for the loader.
#[inline(never)]
#[panic_handler]
fn panic(info: &::core::panic::PanicInfo<'_>) -> ! {
	// SAFETY: Only ever called as the panic handler.
	unsafe { ::relay_loader::panic(info) }
}

/// Boot core entry. The start code passes the device tree address from
/// `r2` in `r0`, and zero in `r1`.
///
/// # Safety
/// Do **NOT** call this function directly. It is called by `_start`.
#[inline(never)]
#[cold]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn relay_main(dtb: usize, _zero: usize) -> ! {
	// SAFETY: Called once, by the start code, on the boot core.
	unsafe { ::relay_loader::boot(dtb) }
}

/// Secondary core entry, called by the secondary stub with the stack
/// it picked up from the mailbox.
///
/// # Safety
/// Do **NOT** call this function directly. It is called by
/// `_relay_secondary_start`.
#[inline(never)]
#[cold]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn relay_secondary_main(sp: usize) -> ! {
	// SAFETY: Called by the secondary stub, once per core.
	unsafe { ::relay_loader::boot_secondary(sp) }
}
