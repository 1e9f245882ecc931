//! The ARMv7 [`Arch`] implementation.

use core::arch::asm;

use relay_arch_base::{
	Arch, Conduit, CoreIdentity, EntryArgs, ExecMode, Firmware, TranslationMode,
};
use relay_type::RelaxedUsize;

use crate::{reg, tables::Tables};

/// The ARMv7-A architecture.
pub struct Armv7;

/// The stack pointer the next secondary core starts on.
#[unsafe(no_mangle)]
static RELAY_SECONDARY_SP: RelaxedUsize = RelaxedUsize::new(0);

unsafe extern "C" {
	/// Secondary core start stub (see `start.rs`).
	fn _relay_secondary_start() -> !;
}

impl Firmware for Armv7 {
	fn smccc(conduit: Conduit, fid: u32, args: [usize; 3]) -> isize {
		let ret: isize;

		// SAFETY: SMCCC calls preserve r4-r14; r0-r3 are arguments and results.
		unsafe {
			match conduit {
				Conduit::Hvc => {
					asm!(
						".arch_extension virt",
						"hvc #0",
						inlateout("r0") fid as usize => ret,
						inlateout("r1") args[0] => _,
						inlateout("r2") args[1] => _,
						inlateout("r3") args[2] => _,
						options(nostack),
					);
				}
				Conduit::Smc => {
					asm!(
						".arch_extension sec",
						"smc #0",
						inlateout("r0") fid as usize => ret,
						inlateout("r1") args[0] => _,
						inlateout("r2") args[1] => _,
						inlateout("r3") args[2] => _,
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

fn cpsr() -> u32 {
	let cpsr: u32;
	// SAFETY: Reading `CPSR` has no side effects.
	unsafe {
		asm!("mrs {}, cpsr", out(reg) cpsr, options(nomem, nostack, preserves_flags));
	}
	cpsr
}

impl Arch for Armv7 {
	type Tables = Tables;

	const NAME: &'static str = "armv7";

	fn execution_mode() -> ExecMode {
		if reg::is_hyp(cpsr()) {
			ExecMode::Elevated
		} else {
			ExecMode::Native
		}
	}

	unsafe fn leave_elevated_mode() {
		// SAFETY: The caller guarantees Hyp mode with translation disabled.
		// SAFETY: The current stack becomes `SP_svc` and execution continues
		// SAFETY: at the label after `eret`.
		unsafe {
			asm!(
				".arch_extension virt",
				"mov {tmp}, sp",
				"msr sp_svc, {tmp}",
				"mrc p15, 4, {tmp}, c12, c0, 0",
				"mcr p15, 0, {tmp}, c12, c0, 0",
				"mov {tmp}, #0",
				"mcr p15, 4, {tmp}, c1, c1, 0",
				"mcrr p15, 4, {tmp}, {tmp}, c14",
				"mcr p15, 4, {cnthctl}, c14, c1, 0",
				"msr spsr_hyp, {spsr}",
				"adr {tmp}, 2f",
				"msr elr_hyp, {tmp}",
				"isb",
				"eret",
				"2:",
				tmp = out(reg) _,
				cnthctl = in(reg) reg::CNTHCTL_PL1_ACCESS,
				spsr = in(reg) reg::SPSR_HYP_TO_SVC,
			);
		}
	}

	unsafe fn clean_dcache_range(start: usize, len: usize) {
		let ctr: u32;
		// SAFETY: Reading `CTR` has no side effects.
		unsafe {
			asm!("mrc p15, 0, {}, c0, c0, 1", out(reg) ctr, options(nomem, nostack, preserves_flags));
		}

		let line = reg::dcache_line_size(ctr);
		let end = start.saturating_add(len);
		let mut addr = start & !(line - 1);

		while addr < end {
			// SAFETY: DCCMVAC; the caller guarantees the range is mapped.
			unsafe {
				asm!("mcr p15, 0, {}, c7, c10, 1", in(reg) addr, options(nostack, preserves_flags));
			}
			addr += line;
		}

		// SAFETY: Barrier only.
		unsafe {
			asm!("dsb sy", options(nostack, preserves_flags));
		}
	}

	unsafe fn enable_translation(tables: &Tables, mode: TranslationMode) {
		match mode {
			TranslationMode::Native => {
				let ttbr0 = tables.ttbr0() as u32 | reg::TTBR_WALK_ATTRS;

				let sctlr: u32;
				// SAFETY: Reading `SCTLR` has no side effects.
				unsafe {
					asm!("mrc p15, 0, {}, c1, c0, 0", out(reg) sctlr, options(nomem, nostack, preserves_flags));
				}

				// SAFETY: The caller guarantees the tables identity map
				// SAFETY: everything this core touches until it enters the kernel.
				unsafe {
					asm!(
						"mcr p15, 0, {dacr}, c3, c0, 0",
						"mcr p15, 0, {zero}, c2, c0, 2",
						"mcr p15, 0, {ttbr0}, c2, c0, 0",
						"isb",
						"mcr p15, 0, {zero}, c8, c7, 0",
						"mcr p15, 0, {zero}, c7, c5, 0",
						"mcr p15, 0, {zero}, c7, c5, 6",
						"dsb sy",
						"isb",
						"mcr p15, 0, {sctlr}, c1, c0, 0",
						"isb",
						dacr = in(reg) reg::DACR_ALL_CLIENT,
						zero = in(reg) 0_u32,
						ttbr0 = in(reg) ttbr0,
						sctlr = in(reg) reg::sctlr_enabled(sctlr),
						options(nostack),
					);
				}
			}
			TranslationMode::Elevated => {
				// Walked in Hyp mode before any handoff existed.
				let Some(httbr) = tables.httbr() else {
					Self::halt();
				};

				let hsctlr: u32;
				// SAFETY: Reading `HSCTLR` has no side effects.
				unsafe {
					asm!("mrc p15, 4, {}, c1, c0, 0", out(reg) hsctlr, options(nomem, nostack, preserves_flags));
				}

				// SAFETY: As above, for the Hyp-mode regime.
				unsafe {
					asm!(
						"mcr p15, 4, {hmair0}, c10, c2, 0",
						"mcr p15, 4, {hmair1}, c10, c2, 1",
						"mcr p15, 4, {htcr}, c2, c0, 2",
						"mcrr p15, 4, {lo}, {hi}, c2",
						"isb",
						"mcr p15, 4, {zero}, c8, c7, 0",
						"mcr p15, 0, {zero}, c7, c5, 0",
						"dsb sy",
						"isb",
						"mcr p15, 4, {hsctlr}, c1, c0, 0",
						"isb",
						hmair0 = in(reg) reg::HMAIR0,
						hmair1 = in(reg) reg::HMAIR1,
						htcr = in(reg) reg::HTCR,
						lo = in(reg) httbr as u32,
						hi = in(reg) (httbr >> 32) as u32,
						zero = in(reg) 0_u32,
						hsctlr = in(reg) reg::sctlr_enabled(hsctlr),
						options(nostack),
					);
				}
			}
		}
	}

	unsafe fn enter_kernel(entry: usize, args: &EntryArgs, _core: CoreIdentity) -> ! {
		let [a0, a1, a2, a3, a4, a5] = args.words();

		// AAPCS: the fifth and sixth words go on the stack.
		// SAFETY: The caller guarantees `entry` is executable. The kernel
		// SAFETY: never returns.
		unsafe {
			asm!(
				"sub sp, sp, #8",
				"str {a4}, [sp]",
				"str {a5}, [sp, #4]",
				"bx {entry}",
				entry = in(reg) entry,
				a4 = in(reg) a4,
				a5 = in(reg) a5,
				in("r0") a0,
				in("r1") a1,
				in("r2") a2,
				in("r3") a3,
				options(noreturn),
			);
		}
	}

	unsafe fn set_logical_core_id(id: usize) {
		// SAFETY: `TPIDRPRW` is not used by the loader for anything else.
		unsafe {
			asm!("mcr p15, 0, {}, c13, c0, 4", in(reg) id, options(nomem, nostack, preserves_flags));
		}
	}

	fn hardware_core_id() -> usize {
		let mpidr: u32;
		// SAFETY: Reading `MPIDR` has no side effects.
		unsafe {
			asm!("mrc p15, 0, {}, c0, c0, 5", out(reg) mpidr, options(nomem, nostack, preserves_flags));
		}
		reg::mpidr_affinity(mpidr) as usize
	}

	fn publish_secondary_stack(sp: usize) {
		RELAY_SECONDARY_SP.store(sp);
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
