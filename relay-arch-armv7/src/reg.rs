//! CP15 register values programmed before translation is enabled.
//!
//! See B4 of the ARMv7-A/R Architecture Reference Manual (ARM DDI 0406C).

/// `CPSR.M` mask.
pub const MODE_MASK: u32 = 0x1F;
/// Supervisor mode.
pub const MODE_SVC: u32 = 0x13;
/// Hyp mode.
pub const MODE_HYP: u32 = 0x1A;
/// `SPSR_hyp` for an exception return to Supervisor mode with A, I and F masked.
pub const SPSR_HYP_TO_SVC: u32 = MODE_SVC | (1 << 6) | (1 << 7) | (1 << 8);

/// `DACR` with every domain set to "client" (permission checked).
pub const DACR_ALL_CLIENT: u32 = 0x5555_5555;

/// `TTBR0` walk attributes: inner and outer write-back write-allocate,
/// shareable (multiprocessing extensions encoding).
pub const TTBR_WALK_ATTRS: u32 = (1 << 6) | (0b01 << 3) | (1 << 1);

/// `SCTLR.M`, the translation enable bit.
pub const SCTLR_M: u32 = 1 << 0;
/// `SCTLR.C`, the data cache enable bit.
pub const SCTLR_C: u32 = 1 << 2;
/// `SCTLR.I`, the instruction cache enable bit.
pub const SCTLR_I: u32 = 1 << 12;
/// `SCTLR.TRE`, TEX remap enable.
pub const SCTLR_TRE: u32 = 1 << 28;
/// `SCTLR.AFE`, access flag enable.
pub const SCTLR_AFE: u32 = 1 << 29;

/// `HMAIR0`: attribute index 0 is Device-nGnRnE (strongly ordered).
pub const HMAIR0: u32 = 0x0000_0000;
/// `HMAIR1`: attribute index 4 is normal write-back write-allocate.
pub const HMAIR1: u32 = 0x0000_00FF;

/// `HTCR`: 32-bit input range (`T0SZ` = 0), cacheable inner-shareable walks.
pub const HTCR: u32 = (1 << 31) | (1 << 23) | (0b11 << 12) | (0b01 << 10) | (0b01 << 8);

/// `CNTHCTL` granting PL1 access to the physical counter and timer.
pub const CNTHCTL_PL1_ACCESS: u32 = 0b11;

/// Returns whether a `CPSR` value is in Hyp mode.
#[must_use]
pub const fn is_hyp(cpsr: u32) -> bool {
	cpsr & MODE_MASK == MODE_HYP
}

/// Returns the `SCTLR` value with translation and caches enabled.
#[must_use]
pub const fn sctlr_enabled(sctlr: u32) -> u32 {
	(sctlr | SCTLR_M | SCTLR_C | SCTLR_I) & !(SCTLR_TRE | SCTLR_AFE)
}

/// The smallest data cache line size reported by `CTR`, in bytes.
#[must_use]
pub const fn dcache_line_size(ctr: u32) -> usize {
	4 << ((ctr >> 16) & 0xF)
}

/// The affinity fields of `MPIDR`.
#[must_use]
pub const fn mpidr_affinity(mpidr: u32) -> u32 {
	mpidr & 0x00FF_FFFF
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hyp_mode_detection() {
		assert!(is_hyp(0x6000_01DA));
		assert!(!is_hyp(0x6000_01D3));
	}

	#[test]
	fn sctlr_enable_clears_remap() {
		let v = sctlr_enabled(0x00C5_0078 | SCTLR_TRE);
		assert_eq!(v & (SCTLR_M | SCTLR_C | SCTLR_I), SCTLR_M | SCTLR_C | SCTLR_I);
		assert_eq!(v & SCTLR_TRE, 0);
	}

	#[test]
	fn htcr_uses_the_whole_input_range() {
		assert_eq!(HTCR & 0b111, 0);
		assert_eq!(HTCR, 0x8080_3500);
	}

	#[test]
	fn svc_return_masks_interrupts() {
		assert_eq!(SPSR_HYP_TO_SVC, 0x1D3);
	}
}
