//! Start code, secondary entry stub and the parking exception vectors.
//!
//! The boot core arrives at `_start` in A32 state with `r2` holding the
//! device tree address (the Linux boot protocol), translation and caches
//! off, in Hyp or Supervisor mode.

use core::arch::global_asm;

global_asm!(
	r#"
	.arm
	.section .text.start, "ax"
	.global _start
_start:
	mov r8, r2

	ldr r4, =relay_vectors
	mrs r5, cpsr
	and r5, r5, #0x1F
	cmp r5, #0x1A
	bne 1f
	mcr p15, 4, r4, c12, c0, 0
1:
	mcr p15, 0, r4, c12, c0, 0

	ldr sp, =__relay_boot_stack_top

	ldr r4, =__relay_bss_start
	ldr r5, =__relay_bss_end
	mov r6, #0
2:
	cmp r4, r5
	bhs 3f
	str r6, [r4], #4
	b 2b
3:
	mov r0, r8
	mov r1, #0
	bl relay_main
	b relay_park
	.ltorg

	.section .text, "ax"
	.global _relay_secondary_start
_relay_secondary_start:
	ldr r4, =relay_vectors
	mrs r5, cpsr
	and r5, r5, #0x1F
	cmp r5, #0x1A
	bne 1f
	mcr p15, 4, r4, c12, c0, 0
1:
	mcr p15, 0, r4, c12, c0, 0

	ldr r4, =RELAY_SECONDARY_SP
	ldr r0, [r4]
	mov sp, r0
	bl relay_secondary_main
	b relay_park
	.ltorg

	.global relay_park
relay_park:
	wfe
	b relay_park

	.balign 32
relay_vectors:
	.rept 8
	b relay_park
	.endr
"#
);
