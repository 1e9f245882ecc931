//! The RISC-V 64 [`Arch`] implementation.
//!
//! The hart ID is only readable in M-mode, so the start stubs keep the
//! ID SBI hands them in `tp`. The logical core ID goes in `sscratch`.

use core::arch::asm;

use relay_arch_base::{
	Arch, CoreIdentity, EntryArgs, ExecMode, Firmware, SbiRet, TranslationMode,
};
use relay_type::RelaxedUsize;

use crate::tables::Tables;

/// The RISC-V 64 (GC) architecture.
pub struct Riscv64;

/// The stack pointer the next secondary hart starts on.
#[unsafe(no_mangle)]
static RELAY_SECONDARY_SP: RelaxedUsize = RelaxedUsize::new(0);

unsafe extern "C" {
	/// Secondary hart start stub (see `start.rs`).
	fn _relay_secondary_start() -> !;
}

impl Firmware for Riscv64 {
	fn sbi(ext: usize, fid: usize, args: [usize; 3]) -> SbiRet {
		let error: isize;
		let value: isize;

		// SAFETY: SBI calls preserve every register except a0 and a1.
		unsafe {
			asm!(
				"ecall",
				inlateout("a0") args[0] => error,
				inlateout("a1") args[1] => value,
				in("a2") args[2],
				in("a6") fid,
				in("a7") ext,
				options(nostack),
			);
		}

		SbiRet { error, value }
	}
}

impl Arch for Riscv64 {
	type Tables = Tables;

	const NAME: &'static str = "riscv64";

	fn execution_mode() -> ExecMode {
		ExecMode::Native
	}

	unsafe fn leave_elevated_mode() {}

	unsafe fn clean_dcache_range(_start: usize, _len: usize) {
		// Caches are coherent with table walks; order the stores.
		// SAFETY: Fence only.
		unsafe {
			asm!("fence rw, rw", options(nostack, preserves_flags));
		}
	}

	unsafe fn enable_translation(tables: &Tables, mode: TranslationMode) {
		// Walked in `mode` before any handoff existed; there is no elevated
		// regime to walk.
		let (TranslationMode::Native, Some(satp)) = (mode, tables.satp()) else {
			Self::halt();
		};

		// SAFETY: The caller guarantees the tables identity map everything
		// SAFETY: this hart touches until it enters the kernel.
		unsafe {
			asm!(
				"sfence.vma",
				"csrw satp, {satp}",
				"sfence.vma",
				"fence.i",
				satp = in(reg) satp,
				options(nostack),
			);
		}
	}

	unsafe fn enter_kernel(entry: usize, args: &EntryArgs, core: CoreIdentity) -> ! {
		let [a0, a1, a2, a3, a4, a5] = args.words();

		// SAFETY: The caller guarantees `entry` is executable. The kernel
		// SAFETY: never returns.
		unsafe {
			asm!(
				"jr {entry}",
				entry = in(reg) entry,
				in("a0") a0,
				in("a1") a1,
				in("a2") a2,
				in("a3") a3,
				in("a4") a4,
				in("a5") a5,
				in("a6") core.hardware,
				in("a7") core.logical,
				options(noreturn),
			);
		}
	}

	unsafe fn set_logical_core_id(id: usize) {
		// SAFETY: `sscratch` is not used by the loader for anything else.
		unsafe {
			asm!("csrw sscratch, {}", in(reg) id, options(nomem, nostack, preserves_flags));
		}
	}

	fn hardware_core_id() -> usize {
		let hart: usize;
		// SAFETY: `tp` holds the hart ID from entry onward (see `start.rs`).
		unsafe {
			asm!("mv {}, tp", out(reg) hart, options(nomem, nostack, preserves_flags));
		}
		hart
	}

	fn publish_secondary_stack(sp: usize) {
		RELAY_SECONDARY_SP.store(sp);
		// SAFETY: Fence only.
		unsafe {
			asm!("fence rw, rw", options(nostack, preserves_flags));
		}
	}

	fn secondary_entry() -> usize {
		(_relay_secondary_start as *const ()).expose_provenance()
	}

	fn halt() -> ! {
		loop {
			// SAFETY: Waiting for an interrupt has no side effects.
			unsafe {
				asm!("wfi", options(nomem, nostack, preserves_flags));
			}
		}
	}
}
