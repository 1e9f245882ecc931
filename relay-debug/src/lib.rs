//! Console logging for the Relay boot loader.
//!
//! There is no global logger; every message is written to a console that
//! the caller passes in explicitly (usually the one held by the boot
//! context). When no console has been bound, output is silently dropped.
//!
//! **IMPORTANT:** Output is unbuffered and unsynchronized. Only the boot
//! core logs; secondaries must stay quiet.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(doc, feature(doc_cfg))]

use core::fmt::{self, Write};

/// A byte-oriented output device.
pub trait Console {
	/// Writes a single raw byte, blocking until the device accepts it.
	fn putc(&mut self, byte: u8);
}

/// The severity of a log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
	/// Informational output.
	Info,
	/// Something unexpected that boot can continue past.
	Warn,
	/// A fatal condition; always emitted.
	Error,
}

impl Level {
	/// The single-letter tag written in front of each message.
	#[must_use]
	pub const fn tag(self) -> char {
		match self {
			Self::Info => 'I',
			Self::Warn => 'W',
			Self::Error => 'E',
		}
	}
}

/// Adapts a [`Console`] to [`fmt::Write`], expanding `\n` to `\r\n`.
pub struct Writer<'a, C: Console + ?Sized>(pub &'a mut C);

impl<C: Console + ?Sized> Write for Writer<'_, C> {
	fn write_str(&mut self, s: &str) -> fmt::Result {
		for byte in s.bytes() {
			if byte == b'\n' {
				self.0.putc(b'\r');
			}

			self.0.putc(byte);
		}

		Ok(())
	}
}

/// Returns whether messages of the given level are emitted at all.
#[must_use]
pub const fn enabled(level: Level) -> bool {
	matches!(level, Level::Error) || cfg!(feature = "debug")
}

/// Logs a message to the console, if there is one.
///
/// Shouldn't be used directly; use the `dbg!` macros instead.
pub fn log(console: Option<&mut dyn Console>, level: Level, message: fmt::Arguments<'_>) {
	let Some(console) = console else {
		return;
	};

	if !enabled(level) {
		return;
	}

	// Writer never fails; nothing to report to if it did.
	let _ = writeln!(Writer(console), "{}:{message}", level.tag());
}

/// Sends a general debug message to the given console.
///
/// The first argument is an `Option<&mut dyn Console>`.
#[macro_export]
macro_rules! dbg {
	($console:expr, $($arg:tt)*) => {{
		$crate::log($console, $crate::Level::Info, format_args!("{}:{}: {}", ::core::file!(), ::core::line!(), format_args!($($arg)*)));
	}};
}

/// Sends a warning message to the given console.
#[macro_export]
macro_rules! dbg_warn {
	($console:expr, $($arg:tt)*) => {{
		$crate::log($console, $crate::Level::Warn, format_args!("{}:{}: {}", ::core::file!(), ::core::line!(), format_args!($($arg)*)));
	}};
}

/// Sends an error message to the given console.
#[macro_export]
macro_rules! dbg_err {
	($console:expr, $($arg:tt)*) => {{
		$crate::log($console, $crate::Level::Error, format_args!("{}:{}: {}", ::core::file!(), ::core::line!(), format_args!($($arg)*)));
	}};
}
