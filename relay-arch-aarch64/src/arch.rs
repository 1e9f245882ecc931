//! The AArch64 [`Arch`] implementation.

use core::arch::asm;

use relay_arch_base::{
	Arch, Conduit, CoreIdentity, EntryArgs, ExecMode, Firmware, TranslationMode,
};
use relay_type::RelaxedUsize;

use crate::{reg, tables::Tables};

/// The AArch64 architecture.
pub struct Aarch64;

/// The stack pointer the next secondary core starts on.
///
/// Read by the secondary start stub before any Rust code runs on that
/// core. Cores are started one at a time, so a single slot suffices.
#[unsafe(no_mangle)]
static RELAY_SECONDARY_SP: RelaxedUsize = RelaxedUsize::new(0);

unsafe extern "C" {
	/// Secondary core start stub (see `start.rs`).
	fn _relay_secondary_start() -> !;
}

impl Firmware for Aarch64 {
	fn smccc(conduit: Conduit, fid: u32, args: [usize; 3]) -> isize {
		let ret: isize;

		// NOTE: The conduit is a runtime property of the platform (read
		// NOTE: from the device tree), so both instructions are emitted.
		// SAFETY: SMCCC calls preserve x4-x17 and the stack; x0-x3 are
		// SAFETY: arguments and results.
		unsafe {
			match conduit {
				Conduit::Hvc => {
					asm!(
						"hvc #0",
						inlateout("x0") fid as usize => ret,
						inlateout("x1") args[0] => _,
						inlateout("x2") args[1] => _,
						inlateout("x3") args[2] => _,
						options(nostack),
					);
				}
				Conduit::Smc => {
					asm!(
						"smc #0",
						inlateout("x0") fid as usize => ret,
						inlateout("x1") args[0] => _,
						inlateout("x2") args[1] => _,
						inlateout("x3") args[2] => _,
						options(nostack),
					);
				}
			}
		}

		ret
	}

	fn wake_waiting_cores() {
		// SAFETY: Barrier and event; no memory is touched.
		unsafe {
			asm!("dsb sy", "sev", options(nostack, preserves_flags));
		}
	}
}

/// Reads the current exception level (`CurrentEL[3:2]`).
fn current_el() -> u64 {
	let el: u64;
	// SAFETY: Reading `CurrentEL` has no side effects.
	unsafe {
		asm!("mrs {}, CurrentEL", out(reg) el, options(nomem, nostack, preserves_flags));
	}
	(el >> 2) & 0b11
}

impl Arch for Aarch64 {
	type Tables = Tables;

	const NAME: &'static str = "aarch64";

	fn execution_mode() -> ExecMode {
		if current_el() == 2 {
			ExecMode::Elevated
		} else {
			ExecMode::Native
		}
	}

	unsafe fn leave_elevated_mode() {
		// SAFETY: The caller guarantees EL2 with translation disabled. The
		// SAFETY: current stack is handed to EL1 and execution continues
		// SAFETY: at the label after `eret`.
		unsafe {
			asm!(
				"mov {tmp}, sp",
				"msr sp_el1, {tmp}",
				"mrs {tmp}, vbar_el2",
				"msr vbar_el1, {tmp}",
				"msr sctlr_el1, {sctlr}",
				"msr hcr_el2, {hcr}",
				"msr cnthctl_el2, {cnthctl}",
				"msr cntvoff_el2, xzr",
				"msr spsr_el2, {spsr}",
				"adr {tmp}, 2f",
				"msr elr_el2, {tmp}",
				"isb",
				"eret",
				"2:",
				tmp = out(reg) _,
				sctlr = in(reg) reg::SCTLR_EL1_RESET,
				hcr = in(reg) reg::HCR_EL2_RW,
				cnthctl = in(reg) reg::CNTHCTL_EL2_EL1_ACCESS,
				spsr = in(reg) reg::SPSR_EL2_EL1H,
			);
		}
	}

	unsafe fn clean_dcache_range(start: usize, len: usize) {
		let ctr: u64;
		// SAFETY: Reading `CTR_EL0` has no side effects.
		unsafe {
			asm!("mrs {}, ctr_el0", out(reg) ctr, options(nomem, nostack, preserves_flags));
		}

		let line = reg::dcache_line_size(ctr);
		let end = start.saturating_add(len);
		let mut addr = start & !(line - 1);

		while addr < end {
			// SAFETY: The caller guarantees the range is mapped.
			unsafe {
				asm!("dc cvac, {}", in(reg) addr, options(nostack, preserves_flags));
			}
			addr += line;
		}

		// SAFETY: Barrier only.
		unsafe {
			asm!("dsb sy", options(nostack, preserves_flags));
		}
	}

	unsafe fn enable_translation(tables: &Tables, mode: TranslationMode) {
		// The tables were walked in `mode` before any handoff existed, so
		// the root is there. No EL2 tables are ever built, so an elevated
		// walk never succeeds.
		let (TranslationMode::Native, Some(ttbr0)) = (mode, tables.ttbr0()) else {
			Self::halt();
		};

		let mmfr0: u64;
		// SAFETY: Reading `ID_AA64MMFR0_EL1` has no side effects.
		unsafe {
			asm!("mrs {}, id_aa64mmfr0_el1", out(reg) mmfr0, options(nomem, nostack, preserves_flags));
		}

		let ttbr1 = tables.ttbr1();
		let tcr = reg::tcr_el1(reg::pa_range(mmfr0), ttbr1.is_some());
		let sctlr = reg::SCTLR_EL1_RESET | reg::SCTLR_M | reg::SCTLR_C | reg::SCTLR_I;

		// SAFETY: The caller guarantees the tables identity map everything
		// SAFETY: this core touches until it enters the kernel.
		unsafe {
			asm!(
				"msr mair_el1, {mair}",
				"msr tcr_el1, {tcr}",
				"msr ttbr0_el1, {ttbr0}",
				"msr ttbr1_el1, {ttbr1}",
				"isb",
				"tlbi vmalle1",
				"ic iallu",
				"dsb nsh",
				"isb",
				"msr sctlr_el1, {sctlr}",
				"isb",
				mair = in(reg) reg::MAIR_EL1,
				tcr = in(reg) tcr,
				ttbr0 = in(reg) ttbr0,
				ttbr1 = in(reg) ttbr1.unwrap_or(0),
				sctlr = in(reg) sctlr,
				options(nostack),
			);
		}
	}

	unsafe fn enter_kernel(entry: usize, args: &EntryArgs, _core: CoreIdentity) -> ! {
		let [a0, a1, a2, a3, a4, a5] = args.words();

		// SAFETY: The caller guarantees `entry` is executable. The kernel
		// SAFETY: never returns.
		unsafe {
			asm!(
				"br {entry}",
				entry = in(reg) entry,
				in("x0") a0,
				in("x1") a1,
				in("x2") a2,
				in("x3") a3,
				in("x4") a4,
				in("x5") a5,
				options(noreturn),
			);
		}
	}

	unsafe fn set_logical_core_id(id: usize) {
		// SAFETY: `TPIDR_EL1` is not used by the loader for anything else.
		unsafe {
			asm!("msr tpidr_el1, {}", in(reg) id, options(nomem, nostack, preserves_flags));
		}
	}

	fn hardware_core_id() -> usize {
		let mpidr: u64;
		// SAFETY: Reading `MPIDR_EL1` has no side effects.
		unsafe {
			asm!("mrs {}, mpidr_el1", out(reg) mpidr, options(nomem, nostack, preserves_flags));
		}
		reg::mpidr_affinity(mpidr) as usize
	}

	fn publish_secondary_stack(sp: usize) {
		RELAY_SECONDARY_SP.store(sp);
		// Caches are off; make the store visible before the core is started.
		// SAFETY: Barrier only.
		unsafe {
			asm!("dsb sy", options(nostack, preserves_flags));
		}
	}

	fn secondary_entry() -> usize {
		(_relay_secondary_start as *const ()).expose_provenance()
	}

	fn halt() -> ! {
		loop {
			// SAFETY: Waiting for an event has no side effects.
			unsafe {
				asm!("wfe", options(nomem, nostack, preserves_flags));
			}
		}
	}
}
