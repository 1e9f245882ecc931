//! Base traits and types for architecture abstraction in the Relay boot loader.
//!
//! Every processor family implements [`Arch`] (and with it [`Firmware`])
//! along with a [`BootTables`] type. The portable loader logic only ever
//! talks to these traits; all inline assembly and raw register access
//! lives in the per-family crates.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(doc, feature(doc_cfg))]

mod addr;
pub mod radix;

pub use self::{
	addr::{AddrRange, EntryArgs, ImageInfo, PAGE_SIZE, align_down, align_up},
	radix::Translation,
};

/// The mode the core was in when the loader was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
	/// The mode the kernel normally runs in (EL1, SVC, S-mode).
	Native,
	/// The hypervisor mode (EL2, HYP).
	Elevated,
}

/// Which of the two table sets translation is enabled with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationMode {
	/// The native-mode tables built by [`BootTables::build`].
	Native,
	/// The elevated-mode tables built by [`BootTables::build_elevated`].
	Elevated,
}

/// Memory attributes for a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemAttr {
	/// Device-nGnRnE (or the family's strongly-ordered equivalent).
	Device,
	/// Normal, write-back cacheable.
	Normal,
}

/// Identifies the core handing control to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreIdentity {
	/// The logical ID (`0` is the boot core).
	pub logical:  usize,
	/// The hardware ID (MPIDR affinity or hart ID).
	pub hardware: usize,
}

/// What the translation tables must make reachable.
#[derive(Debug, Clone, Copy)]
pub struct MapRequest {
	/// The image whose linked range must be mapped.
	pub kernel:      ImageInfo,
	/// The loader's own physical footprint, which must stay identity mapped.
	pub loader:      AddrRange,
	/// The bound console's register window, which must stay identity
	/// mapped too. Empty without a console.
	pub console:     AddrRange,
	/// The physical address of the table pool. The loader runs identity
	/// mapped, so on hardware this is simply the pool's own address.
	pub tables_phys: usize,
}

impl MapRequest {
	/// Checks that a kernel window sharing the identity tables, covering
	/// virtual `start..end`, leaves the loader and the console in place.
	pub fn check_window(&self, start: u64, end: u64) -> Result<(), BuildError> {
		let clamp = |addr: u64| usize::try_from(addr).unwrap_or(usize::MAX);
		let covered = AddrRange::new(clamp(start), clamp(end));

		if covered.overlaps(&self.loader) {
			return Err(BuildError::WindowOverlapsLoader { start, end });
		}

		if covered.overlaps(&self.console) {
			return Err(BuildError::WindowOverlapsConsole { start, end });
		}

		Ok(())
	}
}

/// An error that occurs while building boot translation tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
	/// The fixed pool of tables ran out.
	#[error("translation table pool exhausted")]
	OutOfTables,
	/// The kernel's window would replace the loader's identity mapping.
	#[error("kernel window {start:#x}..{end:#x} overlaps the loader")]
	WindowOverlapsLoader {
		/// Window start (virtual).
		start: u64,
		/// Window end (virtual, exclusive).
		end:   u64,
	},
	/// The kernel's window would replace the console's identity mapping.
	#[error("kernel window {start:#x}..{end:#x} overlaps the console")]
	WindowOverlapsConsole {
		/// Window start (virtual).
		start: u64,
		/// Window end (virtual, exclusive).
		end:   u64,
	},
	/// The address is not canonical for the translation regime.
	#[error("address {0:#x} is not canonical")]
	NonCanonical(u64),
	/// The address cannot be expressed by the translation regime.
	#[error("address {0:#x} is out of range")]
	AddressOutOfRange(u64),
	/// The address is not page aligned.
	#[error("address {0:#x} is not page aligned")]
	Unaligned(u64),
	/// The family has no elevated-mode translation.
	#[error("elevated-mode translation is not supported")]
	ElevatedUnsupported,
}

/// Statically allocated boot translation tables for one family.
pub trait BootTables: Sized + Send + Sync + 'static {
	/// An unbuilt set of tables, suitable for a `static` initializer.
	const EMPTY: Self;

	/// Builds the native-mode identity and kernel tables.
	///
	/// Discards anything built previously.
	fn build(&mut self, req: &MapRequest) -> Result<(), BuildError>;

	/// Builds the elevated-mode tables.
	///
	/// Families without elevated-mode translation return
	/// [`BuildError::ElevatedUnsupported`], which callers treat as the
	/// signal to stay untranslated (or drop to the native mode).
	fn build_elevated(&mut self, req: &MapRequest) -> Result<(), BuildError> {
		let _ = req;
		Err(BuildError::ElevatedUnsupported)
	}

	/// Follows the native-mode tables exactly as the hardware would.
	fn walk(&self, virt: usize) -> Option<Translation>;

	/// Follows the elevated-mode tables exactly as the hardware would.
	fn walk_elevated(&self, virt: usize) -> Option<Translation> {
		let _ = virt;
		None
	}

	/// The physical range occupied by the table pool, for cache maintenance.
	fn footprint(&self) -> AddrRange;
}

/// The SMC calling convention instruction used to reach firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conduit {
	/// `hvc #0`
	Hvc,
	/// `smc #0`
	Smc,
}

/// The return pair of an SBI call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbiRet {
	/// `a0`; zero on success.
	pub error: isize,
	/// `a1`
	pub value: isize,
}

/// Firmware call returned by families that have no such interface.
pub const NOT_SUPPORTED: isize = -1;

/// Calls into platform firmware.
///
/// Families implement the interfaces they have; the others return
/// [`NOT_SUPPORTED`].
pub trait Firmware {
	/// Issues an SMCCC call with up to three arguments.
	fn smccc(conduit: Conduit, fid: u32, args: [usize; 3]) -> isize {
		let _ = (conduit, fid, args);
		NOT_SUPPORTED
	}

	/// Issues an SBI call with up to three arguments.
	fn sbi(ext: usize, fid: usize, args: [usize; 3]) -> SbiRet {
		let _ = (ext, fid, args);
		SbiRet {
			error: NOT_SUPPORTED,
			value: 0,
		}
	}

	/// Wakes cores parked in a wait-for-event loop.
	fn wake_waiting_cores() {}
}

/// An architecture. All associated types / constants must be specified.
pub trait Arch: Firmware + 'static {
	/// The boot translation tables for this family.
	type Tables: BootTables;

	/// Human-readable family name.
	const NAME: &'static str;

	/// Returns the mode the calling core is executing in.
	fn execution_mode() -> ExecMode;

	/// Drops from the elevated mode to the native mode, continuing at the
	/// caller with the same stack.
	///
	/// # Safety
	/// Must only be called in the elevated mode, with translation disabled.
	unsafe fn leave_elevated_mode();

	/// Cleans (writes back) data cache lines covering the range to the
	/// point of coherency.
	///
	/// # Safety
	/// The range must be mapped (or translation must be disabled).
	unsafe fn clean_dcache_range(start: usize, len: usize);

	/// Programs the translation registers and enables translation.
	///
	/// Implementations halt if the tables have no root for `mode`.
	///
	/// # Safety
	/// The tables must have been built for `mode` and must identity map
	/// every address the calling core will touch until it enters the
	/// kernel. They must never be written again.
	unsafe fn enable_translation(tables: &Self::Tables, mode: TranslationMode);

	/// Branches to the kernel with the fixed argument convention.
	///
	/// # Safety
	/// `entry` must be executable in the current translation regime.
	unsafe fn enter_kernel(entry: usize, args: &EntryArgs, core: CoreIdentity) -> !;

	/// Records the core's logical ID in the family's per-core register.
	///
	/// # Safety
	/// Must be called by the core the ID belongs to, once.
	unsafe fn set_logical_core_id(id: usize);

	/// Returns the calling core's hardware ID.
	fn hardware_core_id() -> usize;

	/// Publishes the stack pointer the next secondary core starts on,
	/// for families whose secondary entry cannot receive it as an argument.
	fn publish_secondary_stack(sp: usize);

	/// The physical address secondary cores start executing at.
	fn secondary_entry() -> usize;

	/// Hints to the core that it is in a spin loop.
	fn spin_hint() {
		core::hint::spin_loop();
	}

	/// Parks the core forever.
	fn halt() -> !;
}

#[cfg(test)]
mod tests {
	use super::*;

	fn request(console: AddrRange) -> MapRequest {
		MapRequest {
			kernel: ImageInfo::new(0x4040_0000, 0x8000_0000, 0x8010_0000, 0x8000_0000).unwrap(),
			loader: AddrRange::new(0x4008_0000, 0x4020_0000),
			console,
			tables_phys: 0x4010_0000,
		}
	}

	#[test]
	fn windows_must_leave_the_loader_and_console_alone() {
		let req = request(AddrRange::new(0x0900_0000, 0x0900_1000));

		assert_eq!(req.check_window(0x8000_0000, 0x8020_0000), Ok(()));
		assert_eq!(
			req.check_window(0x4000_0000, 0x4020_0000),
			Err(BuildError::WindowOverlapsLoader {
				start: 0x4000_0000,
				end:   0x4020_0000,
			})
		);
		assert_eq!(
			req.check_window(0x0800_0000, 0x0A00_0000),
			Err(BuildError::WindowOverlapsConsole {
				start: 0x0800_0000,
				end:   0x0A00_0000,
			})
		);
		// Touching is not overlapping.
		assert_eq!(req.check_window(0x0900_1000, 0x0A00_0000), Ok(()));
	}

	#[test]
	fn no_console_means_nothing_to_avoid() {
		let req = request(AddrRange::EMPTY);
		assert_eq!(req.check_window(0, 0x4000_0000), Ok(()));
	}
}
