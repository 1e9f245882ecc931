//! Selects the [`Arch`](relay_arch_base::Arch) implementation for the
//! target being built.
//!
//! Only bare-metal targets are supported; hosted builds of the loader
//! logic use the per-family crates directly.
#![no_std]
#![cfg_attr(doc, feature(doc_cfg))]

#[cfg(not(all(
	target_os = "none",
	any(target_arch = "aarch64", target_arch = "arm", target_arch = "riscv64")
)))]
compile_error!("unsupported target selected for relay-arch");

pub use relay_arch_base::*;

/// The architecture the loader is being built for.
#[cfg(target_arch = "aarch64")]
pub type Target = relay_arch_aarch64::Aarch64;
/// The architecture the loader is being built for.
#[cfg(target_arch = "arm")]
pub type Target = relay_arch_armv7::Armv7;
/// The architecture the loader is being built for.
#[cfg(target_arch = "riscv64")]
pub type Target = relay_arch_riscv64::Riscv64;

/// The boot translation tables of [`Target`].
pub type TargetTables = <Target as Arch>::Tables;
