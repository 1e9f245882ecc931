//! ARMv7-A support for the Relay boot loader.
//!
//! Supervisor mode uses short-descriptor tables (1 MiB sections, 4 KiB
//! small pages). When entered in Hyp mode with a kernel that supports it,
//! LPAE long-descriptor tables are built for Hyp instead.
//!
//! Only the table builders and register encodings build on the host.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(doc, feature(doc_cfg))]

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod arch;
pub mod lpae;
pub mod reg;
pub mod short;
#[cfg(all(target_arch = "arm", target_os = "none"))]
mod start;
mod tables;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use self::arch::Armv7;
pub use self::tables::Tables;
