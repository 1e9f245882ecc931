//! ARM PrimeCell UART (PL011), transmit only.
//!
//! The firmware has already programmed the baud rate and line format;
//! the loader only makes sure the transmitter is enabled.

use core::mem::offset_of;

use relay_arch_base::AddrRange;
use static_assertions::const_assert_eq;
use volatile_register::{RO, RW};

use crate::{Bound, ConsoleDriver, Device, DriverError, MatchData};

/// Flag register: transmit FIFO full.
const FR_TXFF: u32 = 1 << 5;
/// Control register: UART enable.
const CR_UARTEN: u32 = 1 << 0;
/// Control register: transmit enable.
const CR_TXE: u32 = 1 << 8;
/// Every interrupt source.
const IMSC_ALL: u32 = 0x7FF;

/// The PL011 register block.
#[repr(C)]
pub struct Registers {
	/// Data register.
	pub dr:     RW<u32>,
	/// Receive status / error clear.
	pub rsr:    RW<u32>,
	/// Reserved.
	_reserved0: [u32; 4],
	/// Flag register.
	pub fr:     RO<u32>,
	/// Reserved.
	_reserved1: u32,
	/// IrDA low-power counter.
	pub ilpr:   RW<u32>,
	/// Integer baud rate divisor.
	pub ibrd:   RW<u32>,
	/// Fractional baud rate divisor.
	pub fbrd:   RW<u32>,
	/// Line control.
	pub lcr_h:  RW<u32>,
	/// Control.
	pub cr:     RW<u32>,
	/// FIFO level select.
	pub ifls:   RW<u32>,
	/// Interrupt mask set/clear.
	pub imsc:   RW<u32>,
	/// Raw interrupt status.
	pub ris:    RO<u32>,
	/// Masked interrupt status.
	pub mis:    RO<u32>,
	/// Interrupt clear.
	pub icr:    RW<u32>,
	/// DMA control.
	pub dmacr:  RW<u32>,
}

const_assert_eq!(offset_of!(Registers, fr), 0x18);
const_assert_eq!(offset_of!(Registers, cr), 0x30);
const_assert_eq!(offset_of!(Registers, dmacr), 0x48);

/// Size of the register block.
pub const BLOCK_SIZE: usize = size_of::<Registers>();

/// A PL011 UART.
pub struct Pl011 {
	/// The register block.
	regs: &'static Registers,
}

impl core::fmt::Debug for Pl011 {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Pl011")
			.field("base", &core::ptr::from_ref(self.regs))
			.finish()
	}
}

impl Pl011 {
	/// Takes over the UART at `base` and enables transmission.
	///
	/// # Safety
	/// `base` must be the identity-mapped address of a PL011 register
	/// block that nothing else accesses for the rest of boot.
	#[must_use]
	pub unsafe fn new(base: usize) -> Self {
		// SAFETY: Guaranteed by the caller.
		let regs = unsafe { &*core::ptr::with_exposed_provenance::<Registers>(base) };

		// SAFETY: Masking interrupts and enabling the transmitter has no
		// SAFETY: effect beyond the UART itself.
		unsafe {
			regs.imsc.write(0);
			regs.icr.write(IMSC_ALL);
			regs.cr.modify(|cr| cr | CR_UARTEN | CR_TXE);
		}

		Self { regs }
	}

	/// The register block.
	#[must_use]
	pub fn window(&self) -> AddrRange {
		let base = core::ptr::from_ref(self.regs).expose_provenance();
		AddrRange::from_len(base, BLOCK_SIZE).unwrap_or(AddrRange::EMPTY)
	}

	/// Writes one byte, waiting for room in the FIFO.
	pub fn putc(&mut self, byte: u8) {
		while self.regs.fr.read() & FR_TXFF != 0 {
			core::hint::spin_loop();
		}

		// SAFETY: Writing the data register only queues a byte.
		unsafe {
			self.regs.dr.write(u32::from(byte));
		}
	}
}

/// Registry initializer.
pub fn init(device: &Device<'_>, _data: &MatchData) -> Result<Option<Bound>, DriverError> {
	let regs = device.first_regs(BLOCK_SIZE)?;
	// SAFETY: The device tree (or platform table) describes a PL011 here,
	// SAFETY: and the loader runs identity mapped.
	let uart = unsafe { Pl011::new(regs.base) };
	Ok(Some(Bound::Console(ConsoleDriver::Pl011(uart))))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn fake() -> (Box<[u32; BLOCK_SIZE / 4]>, usize) {
		let mut block = Box::new([0_u32; BLOCK_SIZE / 4]);
		let base = block.as_mut_ptr().expose_provenance();
		(block, base)
	}

	#[test]
	fn init_enables_the_transmitter() {
		let (block, base) = fake();
		let dev = Device::new("pl011@9000000", b"arm,pl011\0", &[crate::Regs { base, size: 0x1000 }], None);
		let bound = init(&dev, &MatchData::None).unwrap();
		assert!(matches!(bound, Some(Bound::Console(ConsoleDriver::Pl011(_)))));
		assert_eq!(block[0x30 / 4] & (CR_UARTEN | CR_TXE), CR_UARTEN | CR_TXE);
		assert_eq!(block[0x38 / 4], 0);
	}

	#[test]
	fn bytes_land_in_the_data_register() {
		let (block, base) = fake();
		// SAFETY: `block` outlives `uart`.
		let mut uart = unsafe { Pl011::new(base) };
		uart.putc(b'R');
		assert_eq!(block[0], u32::from(b'R'));
		assert_eq!(uart.window(), AddrRange::new(base, base + BLOCK_SIZE));
	}

	#[test]
	fn small_windows_are_rejected() {
		let dev = Device::new("pl011", b"arm,pl011\0", &[crate::Regs { base: 0x1000, size: 0x10 }], None);
		assert!(matches!(init(&dev, &MatchData::None), Err(DriverError::RegsTooSmall { .. })));
	}
}
