//! Start code, secondary entry stub and the parking exception vectors.
//!
//! The boot core arrives at `_start` with the device tree address in
//! `x0`, translation and caches off, at EL2 or EL1. Secondary cores
//! arrive at `_relay_secondary_start` (from PSCI `CPU_ON` or a spin
//! table release) and pick up their stack from `RELAY_SECONDARY_SP`.
//!
//! Every exception that reaches the loader parks the core.

use core::arch::global_asm;

global_asm!(
	r"
	.section .text.start, #alloc, #execinstr
	.global _start
_start:
	mov x19, x0

	adrp x9, relay_vectors
	add x9, x9, :lo12:relay_vectors
	mrs x10, CurrentEL
	cmp x10, #(2 << 2)
	b.ne 1f
	msr vbar_el2, x9
1:
	msr vbar_el1, x9

	adrp x9, __relay_boot_stack_top
	add x9, x9, :lo12:__relay_boot_stack_top
	mov sp, x9

	adrp x9, __relay_bss_start
	add x9, x9, :lo12:__relay_bss_start
	adrp x10, __relay_bss_end
	add x10, x10, :lo12:__relay_bss_end
2:
	cmp x9, x10
	b.hs 3f
	str xzr, [x9], #8
	b 2b
3:
	mov x0, x19
	bl relay_main
	b relay_park

	.section .text, #alloc, #execinstr
	.global _relay_secondary_start
_relay_secondary_start:
	adrp x9, relay_vectors
	add x9, x9, :lo12:relay_vectors
	mrs x10, CurrentEL
	cmp x10, #(2 << 2)
	b.ne 1f
	msr vbar_el2, x9
1:
	msr vbar_el1, x9

	adrp x9, RELAY_SECONDARY_SP
	add x9, x9, :lo12:RELAY_SECONDARY_SP
	ldr x0, [x9]
	mov sp, x0
	bl relay_secondary_main
	b relay_park

	.global relay_park
relay_park:
	wfe
	b relay_park

	.balign 0x800
relay_vectors:
	.rept 16
	.balign 0x80
	b relay_park
	.endr
"
);
