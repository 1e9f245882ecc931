//! AArch64 support for the Relay boot loader.
//!
//! The table builder and register encodings are portable and tested on
//! the host; everything that touches system registers, along with the
//! start code, is only built for bare-metal AArch64 targets.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(doc, feature(doc_cfg))]

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
mod arch;
pub mod reg;
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
mod start;
pub mod tables;

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub use self::arch::Aarch64;
pub use self::tables::Tables;
