//! 16550-compatible UARTs, transmit only.
//!
//! Byte-stride UARTs go through [`uart_16550::MmioSerialPort`]. Some
//! SoCs space the registers four bytes apart (`reg-shift = <2>`), which
//! that crate cannot express, so those are driven directly.
//!
//! NOTE: The port is not re-initialized; whatever line settings the
//! firmware left are kept.

use relay_arch_base::AddrRange;
use relay_type::Volatile;
use uart_16550::MmioSerialPort;

use crate::{Bound, ConsoleDriver, Device, DriverError, MatchData};

/// Line status register index.
const LSR: usize = 5;
/// Line status: transmit holding register empty.
const LSR_THRE: u8 = 1 << 5;
/// Registers in the block.
const REGISTERS: usize = 8;

/// A 16550-compatible UART.
pub enum Ns16550 {
	/// Registers one byte apart.
	Mmio {
		/// The port.
		port: MmioSerialPort,
		/// Base of the register block.
		base: usize,
	},
	/// Registers `1 << shift` bytes apart.
	Strided {
		/// Base of the register block.
		base:  usize,
		/// Register stride, as a shift.
		shift: u8,
	},
}

impl core::fmt::Debug for Ns16550 {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		match self {
			Self::Mmio { base, .. } => {
				f.debug_struct("Ns16550::Mmio")
					.field("base", &format_args!("{base:#x}"))
					.finish()
			}
			Self::Strided { base, shift } => {
				f.debug_struct("Ns16550::Strided")
					.field("base", &format_args!("{base:#x}"))
					.field("shift", shift)
					.finish()
			}
		}
	}
}

impl Ns16550 {
	/// Takes over the UART at `base`.
	///
	/// # Safety
	/// `base` must be the identity-mapped address of a 16550 register
	/// block with the given stride that nothing else accesses for the
	/// rest of boot.
	#[must_use]
	pub unsafe fn new(base: usize, shift: u8) -> Self {
		if shift == 0 {
			// SAFETY: Guaranteed by the caller.
			let port = unsafe { MmioSerialPort::new(base) };
			Self::Mmio { port, base }
		} else {
			Self::Strided { base, shift }
		}
	}

	/// The register block.
	#[must_use]
	pub fn window(&self) -> AddrRange {
		let (base, shift) = match *self {
			Self::Mmio { base, .. } => (base, 0),
			Self::Strided { base, shift } => (base, shift),
		};
		AddrRange::from_len(base, REGISTERS << shift).unwrap_or(AddrRange::EMPTY)
	}

	/// The byte register at `index`.
	fn reg(base: usize, shift: u8, index: usize) -> Option<&'static Volatile<u8>> {
		// SAFETY: `new`'s contract covers every register in the block.
		unsafe { Volatile::<u8>::at(base + (index << shift)) }
	}

	/// Writes one byte, waiting for the transmitter.
	pub fn putc(&mut self, byte: u8) {
		match self {
			Self::Mmio { port, .. } => port.send(byte),
			Self::Strided { base, shift } => {
				let (Some(lsr), Some(thr)) = (Self::reg(*base, *shift, LSR), Self::reg(*base, *shift, 0)) else {
					return;
				};

				while lsr.get() & LSR_THRE == 0 {
					core::hint::spin_loop();
				}

				thr.set(byte);
			}
		}
	}
}

/// Registry initializer.
pub fn init(device: &Device<'_>, data: &MatchData) -> Result<Option<Bound>, DriverError> {
	let shift = match data {
		MatchData::None => 0,
		MatchData::Ns16550 { reg_shift } => *reg_shift,
		MatchData::SpinTable { .. } => return Err(DriverError::BadMatchData),
	};

	let regs = device.first_regs(REGISTERS << shift)?;
	// SAFETY: The device tree (or platform table) describes a 16550 with
	// SAFETY: this stride here, and the loader runs identity mapped.
	let uart = unsafe { Ns16550::new(regs.base, shift) };
	Ok(Some(Bound::Console(ConsoleDriver::Ns16550(uart))))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::Regs;

	#[test]
	fn strided_writes_wait_for_the_transmitter() {
		let mut block = Box::new([0_u8; REGISTERS << 2]);
		block[LSR << 2] = LSR_THRE;
		let base = block.as_mut_ptr().expose_provenance();

		let dev = Device::new("serial@70006000", b"nvidia,tegra20-uart\0", &[Regs { base, size: 0x40 }], None);
		let Some(Bound::Console(mut console)) = init(&dev, &MatchData::Ns16550 { reg_shift: 2 }).unwrap() else {
			panic!("16550 did not bind as a console");
		};

		relay_debug::Console::putc(&mut console, b'x');
		assert_eq!(block[0], b'x');
		assert!(matches!(console, ConsoleDriver::Ns16550(Ns16550::Strided { shift: 2, .. })));
		assert_eq!(console.window(), AddrRange::new(base, base + 32));
	}

	#[test]
	fn byte_stride_uses_the_mmio_port() {
		let mut block = Box::new([0_u8; REGISTERS]);
		block[LSR] = LSR_THRE;
		let base = block.as_mut_ptr().expose_provenance();

		// SAFETY: `block` outlives `uart`.
		let mut uart = unsafe { Ns16550::new(base, 0) };
		assert!(matches!(uart, Ns16550::Mmio { .. }));
		assert_eq!(uart.window(), AddrRange::new(base, base + REGISTERS));
		uart.putc(b'A');
		assert_eq!(block[0], b'A');
	}

	#[test]
	fn stride_sets_the_minimum_window() {
		let dev = Device::new("serial", b"ns16550a\0", &[Regs { base: 0x1000, size: 8 }], None);
		assert!(init(&dev, &MatchData::None).is_ok());
		assert_eq!(
			init(&dev, &MatchData::Ns16550 { reg_shift: 2 }).err(),
			Some(DriverError::RegsTooSmall { size: 8, need: 32 })
		);
	}
}
