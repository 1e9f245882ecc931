//! Forced-endianness wrappers and a bounds-checked byte reader.
//!
//! Both the device tree (big-endian) and the image blob
//! (little-endian) are parsed out of plain byte slices; nothing
//! here dereferences raw pointers.

use core::fmt;

/// An integer type that can be decoded from raw bytes.
pub trait Endian: Copy + Eq + fmt::Debug + Sized {
	/// Size of the encoded integer, in bytes.
	const SIZE: usize;

	/// Decodes the integer from exactly [`Self::SIZE`] native-endian bytes.
	fn from_ne(bytes: &[u8]) -> Option<Self>;

	/// Reverses the byte order of the integer.
	#[must_use]
	fn swap(self) -> Self;
}

#[doc(hidden)]
macro_rules! impl_endian {
	($($ty:ty),*) => {
		$(
			impl Endian for $ty {
				const SIZE: usize = size_of::<$ty>();

				#[inline(always)]
				fn from_ne(bytes: &[u8]) -> Option<Self> {
					Some(<$ty>::from_ne_bytes(bytes.try_into().ok()?))
				}

				#[inline(always)]
				fn swap(self) -> Self {
					self.swap_bytes()
				}
			}
		)*
	};
}

impl_endian!(u16, u32, u64);

/// A big-endian integer, stored exactly as it sits in memory.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Be<T: Endian>(T);

/// A little-endian integer, stored exactly as it sits in memory.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Le<T: Endian>(T);

impl<T: Endian> Be<T> {
	/// Wraps a native value, converting it to big-endian storage.
	#[inline(always)]
	#[must_use]
	pub fn new(value: T) -> Self {
		if cfg!(target_endian = "big") {
			Self(value)
		} else {
			Self(value.swap())
		}
	}

	/// Reads a big-endian value out of the first `T::SIZE` bytes.
	#[inline(always)]
	#[must_use]
	pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
		bytes.get(..T::SIZE).and_then(T::from_ne).map(Self)
	}

	/// Returns the value in native byte order.
	#[inline(always)]
	#[must_use]
	pub fn read(self) -> T {
		if cfg!(target_endian = "big") {
			self.0
		} else {
			self.0.swap()
		}
	}
}

impl<T: Endian> Le<T> {
	/// Wraps a native value, converting it to little-endian storage.
	#[inline(always)]
	#[must_use]
	pub fn new(value: T) -> Self {
		if cfg!(target_endian = "little") {
			Self(value)
		} else {
			Self(value.swap())
		}
	}

	/// Reads a little-endian value out of the first `T::SIZE` bytes.
	#[inline(always)]
	#[must_use]
	pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
		bytes.get(..T::SIZE).and_then(T::from_ne).map(Self)
	}

	/// Returns the value in native byte order.
	#[inline(always)]
	#[must_use]
	pub fn read(self) -> T {
		if cfg!(target_endian = "little") {
			self.0
		} else {
			self.0.swap()
		}
	}
}

impl<T: Endian> fmt::Debug for Be<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Be").field(&self.read()).finish()
	}
}

impl<T: Endian> fmt::Debug for Le<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Le").field(&self.read()).finish()
	}
}

/// A forward-only cursor over a byte slice.
///
/// Every read is bounds checked; running off the end yields `None`
/// and leaves the cursor where it was.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
	/// The underlying bytes.
	bytes:  &'a [u8],
	/// The current offset into `bytes`.
	offset: usize,
}

impl<'a> ByteReader<'a> {
	/// Creates a reader positioned at the start of `bytes`.
	#[must_use]
	pub const fn new(bytes: &'a [u8]) -> Self {
		Self { bytes, offset: 0 }
	}

	/// Returns the current offset.
	#[must_use]
	pub const fn offset(&self) -> usize {
		self.offset
	}

	/// Returns the number of bytes left to read.
	#[must_use]
	pub const fn remaining(&self) -> usize {
		self.bytes.len().saturating_sub(self.offset)
	}

	/// Takes the next `n` bytes.
	pub fn take(&mut self, n: usize) -> Option<&'a [u8]> {
		let end = self.offset.checked_add(n)?;
		let slice = self.bytes.get(self.offset..end)?;
		self.offset = end;
		Some(slice)
	}

	/// Skips forward to the next multiple of `align` (a power of two).
	pub fn align(&mut self, align: usize) -> Option<()> {
		debug_assert!(align.is_power_of_two());
		let aligned = self.offset.checked_add(align - 1)? & !(align - 1);
		if aligned > self.bytes.len() {
			return None;
		}
		self.offset = aligned;
		Some(())
	}

	/// Reads a big-endian integer.
	pub fn be<T: Endian>(&mut self) -> Option<T> {
		let bytes = self.take(T::SIZE)?;
		Be::<T>::from_bytes(bytes).map(Be::read)
	}

	/// Reads a little-endian integer.
	pub fn le<T: Endian>(&mut self) -> Option<T> {
		let bytes = self.take(T::SIZE)?;
		Le::<T>::from_bytes(bytes).map(Le::read)
	}
}
