//! Start code, secondary entry stub and the parking trap vector.
//!
//! SBI enters the boot hart at `_start` in S-mode with `a0` holding the
//! hart ID and `a1` the device tree address. Harts started through
//! `sbi_hart_start` arrive at `_relay_secondary_start` with their hart ID
//! in `a0`; it moves to `tp` and `a0` carries the stack pointer onward.

use core::arch::global_asm;

global_asm!(
	r#"
	.section .text.start, "ax"
	.global _start
_start:
	mv tp, a0
	mv s1, a1

	la t0, relay_vectors
	csrw stvec, t0

	la sp, __relay_boot_stack_top

	la t0, __relay_bss_start
	la t1, __relay_bss_end
2:
	bgeu t0, t1, 3f
	sd zero, 0(t0)
	addi t0, t0, 8
	j 2b
3:
	mv a0, s1
	mv a1, tp
	call relay_main
	j relay_park

	.section .text, "ax"
	.global _relay_secondary_start
_relay_secondary_start:
	mv tp, a0

	la t0, relay_vectors
	csrw stvec, t0

	la t0, RELAY_SECONDARY_SP
	ld sp, 0(t0)
	mv a0, sp
	call relay_secondary_main
	j relay_park

	.global relay_park
relay_park:
	wfi
	j relay_park

	.balign 4
relay_vectors:
	j relay_park
"#
);
