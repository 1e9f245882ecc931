//! RISC-V 64-bit support for the Relay boot loader.
//!
//! The loader runs in S-mode under an SBI implementation. There is no
//! elevated mode to leave; translation uses Sv39.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(doc, feature(doc_cfg))]

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
mod arch;
pub mod reg;
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
mod start;
pub mod tables;

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub use self::arch::Riscv64;
pub use self::tables::Tables;
