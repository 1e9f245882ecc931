//! Embedded image blob parsing and placement for the Relay boot loader.
//!
//! The loader carries one kernel image, an optional device tree and zero
//! or more companion images in a single `RLYB` blob linked next to itself.
//! Loading happens in two phases:
//!
//! 1. [`plan`] parses the blob, decides where every image goes and checks
//!    every placement constraint. Nothing in memory is touched.
//! 2. [`Plan::execute`] copies each image into place (memmove semantics)
//!    and zero-fills its uninitialized tail.
//!
//! Physical memory is reached through [`PhysMemory`] so that the whole
//! pipeline runs on the host against a byte vector.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(doc, feature(doc_cfg))]

#[cfg(any(test, feature = "builder"))]
extern crate alloc;

mod blob;
#[cfg(any(test, feature = "builder"))]
pub mod builder;
mod memory;
mod place;

use core::fmt;

pub use self::{
	blob::{AUTO, Blob, HEADER_SIZE, Kind, MAGIC, RECORD_SIZE, Record, VERSION},
	memory::{IdentityMemory, MAX_REGIONS, MemoryMap, MemoryRegion, PhysMemory, SliceMemory, carve},
	place::{LoadRequest, Loaded, LoadedImage, LoaderLayout, Plan, Policy, Step, load, plan},
};

/// Maximum number of records in a blob.
pub const MAX_IMAGES: usize = 8;

/// Length of an image name, in bytes.
pub const NAME_LEN: usize = 16;

/// A NUL-padded ASCII image name.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Name([u8; NAME_LEN]);

impl Name {
	/// The name given to a device tree supplied by firmware.
	pub const FIRMWARE_DTB: Self = Self::new("firmware-dtb");

	/// Creates a name, truncating it to [`NAME_LEN`] bytes.
	#[must_use]
	pub const fn new(name: &str) -> Self {
		let src = name.as_bytes();
		let mut bytes = [0; NAME_LEN];
		let mut i = 0;
		while i < src.len() && i < NAME_LEN {
			bytes[i] = src[i];
			i += 1;
		}
		Self(bytes)
	}

	/// Validates a raw name field: printable ASCII, then only NUL padding.
	#[must_use]
	pub fn from_raw(raw: [u8; NAME_LEN]) -> Option<Self> {
		let len = raw.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
		let (name, padding) = raw.split_at(len);

		if name.iter().all(u8::is_ascii_graphic) && padding.iter().all(|&b| b == 0) {
			Some(Self(raw))
		} else {
			None
		}
	}

	/// The name without its padding.
	#[must_use]
	pub fn as_str(&self) -> &str {
		let len = self.0.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
		core::str::from_utf8(&self.0[..len]).unwrap_or("?")
	}
}

impl fmt::Display for Name {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl fmt::Debug for Name {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}", self.as_str())
	}
}

/// An error that occurs while parsing the blob or placing its images.
///
/// Every variant is detected before the first byte is copied, except
/// [`LoadError::Unbacked`], which only a misconfigured memory view can
/// produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
	/// The blob does not start with [`MAGIC`].
	#[error("image blob magic mismatch")]
	BadMagic,
	/// The blob's format version is not [`VERSION`].
	#[error("unsupported image blob version {0}")]
	UnsupportedVersion(u32),
	/// The blob holds no records.
	#[error("image blob holds no images")]
	NoRecords,
	/// The blob holds more than [`MAX_IMAGES`] records.
	#[error("image blob holds {0} images (at most {max})", max = MAX_IMAGES)]
	TooManyRecords(u32),
	/// The header or record table runs past the end of the blob.
	#[error("image blob truncated")]
	Truncated,
	/// A record has an unknown kind.
	#[error("record {index} has unknown kind {kind}")]
	BadKind {
		/// Record index.
		index: usize,
		/// The kind field.
		kind:  u32,
	},
	/// A reserved field is not zero.
	#[error("record {0} has reserved bits set")]
	ReservedNonZero(usize),
	/// A name is not NUL-padded printable ASCII.
	#[error("record {0} has a malformed name")]
	BadName(usize),
	/// The first record is not the kernel.
	#[error("the first image must be the kernel")]
	KernelNotFirst,
	/// More than one kernel record.
	#[error("record {0} is a second kernel")]
	MultipleKernels(usize),
	/// A device tree record anywhere but second.
	#[error("record {0} is a device tree; only the second record may be one")]
	DeviceTreeOutOfOrder(usize),
	/// A record's content runs past the end of the blob.
	#[error("image {0} content lies outside the blob")]
	ContentOutOfBounds(Name),
	/// A record's content is larger than its virtual extent.
	#[error("image {0} content is larger than its linked range")]
	ContentTooLarge(Name),
	/// A record's linked range ends before it starts.
	#[error("image {0} has an inverted linked range")]
	InvertedRange(Name),
	/// A placement or link address is not page aligned.
	#[error("image {name} address {addr:#x} is not page aligned")]
	Unaligned {
		/// The image.
		name: Name,
		/// The offending address.
		addr: u64,
	},
	/// An address does not fit the machine word or overflows.
	#[error("address {0:#x} is out of range")]
	AddressOutOfRange(u64),
	/// The blob holds no companion image for the kernel to start.
	#[error("the blob carries no companion images")]
	NoCompanions,
	/// The kernel record asks for automatic placement.
	#[error("the kernel must declare its physical placement")]
	KernelAutoPlaced,
	/// The kernel's entry point lies outside its linked range.
	#[error("kernel entry {0:#x} lies outside its linked range")]
	EntryOutsideImage(usize),
	/// The device tree carried in the blob is malformed.
	#[error("embedded device tree: {0}")]
	DeviceTree(#[from] relay_dtb::ValidationError),
	/// No usable memory region is known.
	#[error("no usable memory regions")]
	NoMemory,
	/// Automatic placement ran out of room.
	#[error("no room to place image {0}")]
	NoRoom(Name),
	/// Two placement windows overlap.
	#[error("image {a} overlaps image {b}")]
	Overlap {
		/// The earlier image.
		a: Name,
		/// The later image.
		b: Name,
	},
	/// A window does not lie within one usable memory region.
	#[error("image {0} lies outside usable memory")]
	OutsideMemory(Name),
	/// A window overlaps the loader's own image.
	#[error("image {0} overlaps the loader")]
	OverlapsLoader(Name),
	/// A copy would overwrite the source of a later copy.
	#[error("placing {dst} would overwrite the source of {src}")]
	Clobbers {
		/// The image being copied.
		dst: Name,
		/// The image whose source would be destroyed.
		src: Name,
	},
	/// The memory view does not cover an accessed range.
	#[error("memory at {addr:#x} (+{len:#x}) is not accessible")]
	Unbacked {
		/// Start of the access.
		addr: usize,
		/// Length of the access.
		len:  usize,
	},
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn names_are_validated() {
		let mut raw = [0; NAME_LEN];
		raw[..6].copy_from_slice(b"kernel");
		assert_eq!(Name::from_raw(raw).map(|n| n.to_string()), Some("kernel".into()));

		raw[8] = b'x';
		assert!(Name::from_raw(raw).is_none());

		let mut raw = [0; NAME_LEN];
		raw[..3].copy_from_slice(b"a b");
		assert!(Name::from_raw(raw).is_none());

		assert!(Name::from_raw([b'k'; NAME_LEN]).is_some());
	}

	#[test]
	fn long_names_are_truncated() {
		assert_eq!(Name::new("a-very-long-image-name").as_str(), "a-very-long-imag");
	}
}
