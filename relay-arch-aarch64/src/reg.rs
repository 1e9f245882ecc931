//! System register values programmed before translation is enabled.
//!
//! Check D17 of the ARMv8-A Architecture Reference Manual (ARM DDI 0487)
//! for the field layouts.

/// `MAIR_EL1` attribute index used for device memory (Device-nGnRnE).
pub const MAIR_DEVICE_INDEX: u64 = 0;
/// `MAIR_EL1` attribute index used for normal memory.
pub const MAIR_NORMAL_INDEX: u64 = 4;

/// The `MAIR_EL1` value: index 0 is `0x00`, index 4 is `0xFF`
/// (inner/outer write-back, read/write allocate).
pub const MAIR_EL1: u64 = (0x00 << (MAIR_DEVICE_INDEX * 8)) | (0xFF << (MAIR_NORMAL_INDEX * 8));

/// `SCTLR_EL1.M`, the translation enable bit.
pub const SCTLR_M: u64 = 1 << 0;
/// `SCTLR_EL1.C`, the data cache enable bit.
pub const SCTLR_C: u64 = 1 << 2;
/// `SCTLR_EL1.I`, the instruction cache enable bit.
pub const SCTLR_I: u64 = 1 << 12;
/// `SCTLR_EL1` with only its RES1 bits set: translation and caches off,
/// little endian.
pub const SCTLR_EL1_RESET: u64 = 0x30D0_0800;

/// `HCR_EL2.RW`: EL1 executes in AArch64.
pub const HCR_EL2_RW: u64 = 1 << 31;
/// `SPSR_EL2` for an exception return to EL1h with DAIF masked.
pub const SPSR_EL2_EL1H: u64 = 0x3C5;
/// `CNTHCTL_EL2` granting EL1 access to the physical counter and timer.
pub const CNTHCTL_EL2_EL1_ACCESS: u64 = 0b11;

/// The virtual address size of both halves, as a `TnSZ` value
/// (48-bit address spaces).
pub const TNSZ_48_BIT: u64 = 16;

/// `TCR_EL1` cacheability encoding for write-back, write-allocate.
const WBWA: u64 = 0b01;
/// `TCR_EL1` shareability encoding for inner shareable.
const INNER_SHAREABLE: u64 = 0b11;

/// Builds the `TCR_EL1` value.
///
/// Both halves use 48-bit address spaces with 4 KiB granules and
/// cacheable, inner-shareable walks. `pa_range` is
/// `ID_AA64MMFR0_EL1.PARange`, which `IPS` uses the same encoding for.
/// When `ttbr1` is `false`, walks through `TTBR1_EL1` are disabled.
#[must_use]
pub const fn tcr_el1(pa_range: u64, ttbr1: bool) -> u64 {
	let ips = if pa_range > 0b110 { 0b110 } else { pa_range };
	let epd1 = if ttbr1 { 0 } else { 1 << 23 };

	TNSZ_48_BIT
		| (WBWA << 8)
		| (WBWA << 10)
		| (INNER_SHAREABLE << 12)
		// TG0 = 4 KiB
		| (0b00 << 14)
		| (TNSZ_48_BIT << 16)
		| epd1
		| (WBWA << 24)
		| (WBWA << 26)
		| (INNER_SHAREABLE << 28)
		// TG1 = 4 KiB
		| (0b10 << 30)
		| (ips << 32)
}

/// Extracts `ID_AA64MMFR0_EL1.PARange`.
#[must_use]
pub const fn pa_range(id_aa64mmfr0: u64) -> u64 {
	id_aa64mmfr0 & 0xF
}

/// The affinity fields of `MPIDR_EL1` (`Aff3:Aff2:Aff1:Aff0`).
#[must_use]
pub const fn mpidr_affinity(mpidr: u64) -> u64 {
	mpidr & 0xFF_00FF_FFFF
}

/// The smallest data cache line size reported by `CTR_EL0`, in bytes.
#[must_use]
pub const fn dcache_line_size(ctr: u64) -> usize {
	4 << ((ctr >> 16) & 0xF)
}
