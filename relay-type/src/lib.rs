//! Simple primitive types and associated traits.
//!
//! This crate consists more or less of primitive type
//! wrappers used throughout the loader: forced-endianness
//! readers over byte slices, volatile MMIO cells, and
//! relaxed atomics for plain shared words.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(doc, feature(doc_cfg))]
#![expect(clippy::inline_always, reason = "tiny accessors in hot boot paths")]

mod endian;
mod relaxed;
mod volatile;

pub use self::{
	endian::{Be, ByteReader, Endian, Le},
	relaxed::RelaxedUsize,
	volatile::Volatile,
};
