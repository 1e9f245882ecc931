//! LPAE long descriptors, as used by the Hyp-mode stage 1 translation.
//!
//! With `HTCR.T0SZ` = 0 the walk starts at a 4-entry first-level table
//! (1 GiB per entry); below that are 512-entry tables of 2 MiB blocks
//! and 4 KiB pages. Output addresses are 40 bits wide.

use relay_arch_base::{
	MemAttr,
	radix::{Descriptor, Format},
};

/// Output address bits of a descriptor.
const ADDR_MASK: u64 = 0x0000_00FF_FFFF_F000;
/// Descriptor is valid.
const VALID: u64 = 1 << 0;
/// Table (first and second level) or page (third level).
const TABLE_OR_PAGE: u64 = 1 << 1;
/// `AttrIndx[2:0]` shift.
const ATTR_SHIFT: u64 = 2;
/// `AttrIndx[2:0]` mask.
const ATTR_MASK: u64 = 0b111 << ATTR_SHIFT;
/// `AP[1]`, which should be one for Hyp translations.
const AP_HYP: u64 = 1 << 6;
/// Inner shareable.
const SH_INNER: u64 = 0b11 << 8;
/// Access flag.
const AF: u64 = 1 << 10;

/// `HMAIR0` index 0.
const DEVICE_INDEX: u64 = 0;
/// `HMAIR1` index 0 (index 4 overall).
const NORMAL_INDEX: u64 = 4;

/// The LPAE descriptor format with a 32-bit input range.
pub struct Lpae;

impl Format for Lpae {
	const LEVELS: usize = 3;
	const PHYS_LIMIT: u64 = 1 << 40;
	const ROOT_ENTRIES: usize = 4;

	fn shift(level: usize) -> u32 {
		30 - 9 * level as u32
	}

	fn leaf_allowed(_level: usize) -> bool {
		true
	}

	fn encode_table(phys: u64) -> u64 {
		(phys & ADDR_MASK) | TABLE_OR_PAGE | VALID
	}

	fn encode_leaf(level: usize, phys: u64, attr: MemAttr) -> u64 {
		let attr = match attr {
			MemAttr::Device => DEVICE_INDEX << ATTR_SHIFT,
			MemAttr::Normal => (NORMAL_INDEX << ATTR_SHIFT) | SH_INNER,
		};

		let kind = if level == 2 { TABLE_OR_PAGE } else { 0 };

		(phys & ADDR_MASK) | AF | AP_HYP | attr | kind | VALID
	}

	fn decode(level: usize, raw: u64) -> Descriptor {
		if raw & VALID == 0 {
			return Descriptor::Invalid;
		}

		let attr = if (raw & ATTR_MASK) >> ATTR_SHIFT == DEVICE_INDEX {
			MemAttr::Device
		} else {
			MemAttr::Normal
		};

		match (level, raw & TABLE_OR_PAGE != 0) {
			(0 | 1, true) => Descriptor::Table(raw & ADDR_MASK),
			(0 | 1, false) | (2, true) => {
				Descriptor::Leaf {
					phys: raw & ADDR_MASK,
					attr,
				}
			}
			_ => Descriptor::Invalid,
		}
	}
}
