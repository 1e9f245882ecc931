//! The mode transition into the kernel.
//!
//! Each core walks the same four states, `PoweredOn → TablesBuilt →
//! TranslationEnabled → InKernel`, and each state is its own type, so no
//! step can be skipped or repeated. Only the boot core builds tables;
//! secondaries start from [`TablesBuilt::adopt`] with what the boot core
//! handed them.

use core::{fmt, marker::PhantomData};

use relay_arch_base::{Arch, BootTables, BuildError, CoreIdentity, EntryArgs, ExecMode, MapRequest, TranslationMode};

use crate::BootError;

/// How the kernel is entered, given the mode the loader was entered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
	/// Already in the native mode; enable native translation.
	Native,
	/// Leave the elevated mode, then enable native translation.
	DropToNative,
	/// Stay elevated and enable elevated translation.
	Elevated,
	/// Stay elevated with translation off; enter at the physical entry.
	ElevatedUntranslated,
}

impl Plan {
	/// Picks the plan.
	///
	/// `kernel_elevated` is whether the kernel was built to run in the
	/// elevated mode; `elevated_tables` is whether elevated tables could
	/// be built (ignored unless both of the others call for them).
	#[must_use]
	pub const fn resolve(entered: ExecMode, kernel_elevated: bool, elevated_tables: bool) -> Self {
		match (entered, kernel_elevated, elevated_tables) {
			(ExecMode::Native, ..) => Self::Native,
			(ExecMode::Elevated, false, _) => Self::DropToNative,
			(ExecMode::Elevated, true, true) => Self::Elevated,
			(ExecMode::Elevated, true, false) => Self::ElevatedUntranslated,
		}
	}

	/// The tables translation is enabled with, if any.
	#[must_use]
	pub const fn translation(self) -> Option<TranslationMode> {
		match self {
			Self::Native | Self::DropToNative => Some(TranslationMode::Native),
			Self::Elevated => Some(TranslationMode::Elevated),
			Self::ElevatedUntranslated => None,
		}
	}
}

/// Everything a core needs to enter the kernel. Handed from the boot core
/// to the secondaries on release.
pub struct Prepared<T: 'static> {
	/// The plan every core follows.
	plan:   Plan,
	/// The built tables; never written again.
	tables: &'static T,
	/// The address branched to (virtual, or physical when untranslated).
	entry:  usize,
	/// The kernel's argument record.
	args:   EntryArgs,
}

impl<T> Clone for Prepared<T> {
	fn clone(&self) -> Self {
		*self
	}
}

impl<T> Copy for Prepared<T> {}

impl<T> fmt::Debug for Prepared<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Prepared")
			.field("plan", &self.plan)
			.field("entry", &format_args!("{:#x}", self.entry))
			.field("args", &self.args)
			.finish_non_exhaustive()
	}
}

impl<T> Prepared<T> {
	/// The plan.
	#[must_use]
	pub fn plan(&self) -> Plan {
		self.plan
	}

	/// The branch target.
	#[must_use]
	pub fn entry(&self) -> usize {
		self.entry
	}

	/// The kernel's argument record.
	#[must_use]
	pub fn args(&self) -> &EntryArgs {
		&self.args
	}
}

/// Translation off, nothing built.
pub struct PoweredOn<A: Arch> {
	/// The mode the core is in.
	mode:  ExecMode,
	/// The architecture.
	_arch: PhantomData<fn() -> A>,
}

impl<A: Arch> PoweredOn<A> {
	/// Captures the calling core's current mode.
	#[must_use]
	pub fn new() -> Self {
		Self {
			mode:  A::execution_mode(),
			_arch: PhantomData,
		}
	}

	/// The mode the loader was entered in.
	#[must_use]
	pub fn mode(&self) -> ExecMode {
		self.mode
	}

	/// Builds the tables the plan needs, checks that they take the kernel's
	/// entry point where it was loaded, and cleans them to memory.
	///
	/// `req.kernel` is the image whose linked range is mapped and entered;
	/// `entry_args` is the record passed to it.
	pub fn build_tables(
		self,
		tables: &'static mut A::Tables,
		req: &MapRequest,
		entry_args: EntryArgs,
		kernel_elevated: bool,
	) -> Result<TablesBuilt<A>, BootError> {
		let MapRequest { kernel, loader, .. } = *req;

		let elevated_tables = if self.mode == ExecMode::Elevated && kernel_elevated {
			match tables.build_elevated(req) {
				Ok(()) => true,
				Err(BuildError::ElevatedUnsupported) => false,
				Err(err) => return Err(err.into()),
			}
		} else {
			tables.build(req)?;
			false
		};

		let plan = Plan::resolve(self.mode, kernel_elevated, elevated_tables);
		let tables: &'static A::Tables = tables;

		let entry = match plan.translation() {
			Some(mode) => {
				self_check(tables, mode, kernel.virt_entry, kernel.entry_phys())?;
				self_check(tables, mode, loader.start, loader.start)?;

				let fp = tables.footprint();
				// SAFETY: Translation is still off; the pool is plain RAM.
				unsafe {
					A::clean_dcache_range(fp.start, fp.len());
				}

				kernel.virt_entry
			}
			None => kernel.entry_phys(),
		};

		Ok(TablesBuilt {
			prepared: Prepared {
				plan,
				tables,
				entry,
				args: entry_args,
			},
			_arch:    PhantomData,
		})
	}
}

/// Fails unless `virt` walks to `expected`.
fn self_check<T: BootTables>(tables: &T, mode: TranslationMode, virt: usize, expected: usize) -> Result<(), BootError> {
	let found = match mode {
		TranslationMode::Native => tables.walk(virt),
		TranslationMode::Elevated => tables.walk_elevated(virt),
	};

	match found {
		Some(t) if t.phys as usize == expected => Ok(()),
		_ => {
			Err(BootError::SelfCheck {
				virt,
				expected,
				found: found.map(|t| t.phys as usize),
			})
		}
	}
}

/// Tables built (or adopted); translation still off.
pub struct TablesBuilt<A: Arch> {
	/// What the core enters the kernel with.
	prepared: Prepared<A::Tables>,
	/// The architecture.
	_arch:    PhantomData<fn() -> A>,
}

impl<A: Arch> TablesBuilt<A> {
	/// Continues from the state the boot core handed off.
	#[must_use]
	pub fn adopt(prepared: Prepared<A::Tables>) -> Self {
		Self {
			prepared,
			_arch: PhantomData,
		}
	}

	/// What every other core needs to follow this one.
	#[must_use]
	pub fn prepared(&self) -> Prepared<A::Tables> {
		self.prepared
	}

	/// Carries out the plan up to the point of entry: drops out of the
	/// elevated mode if needed and enables translation.
	///
	/// # Safety
	/// The calling core must be executing from the loader image, on a
	/// stack inside it, with translation off.
	#[must_use]
	pub unsafe fn enable_translation(self) -> TranslationEnabled<A> {
		let Prepared { plan, tables, .. } = self.prepared;

		if plan == Plan::DropToNative {
			// SAFETY: The plan is only chosen when entered elevated.
			unsafe {
				A::leave_elevated_mode();
			}
		}

		if let Some(mode) = plan.translation() {
			// SAFETY: The tables identity map the loader in `mode` (walked when
			// SAFETY: built), and are shared read-only from here on.
			unsafe {
				A::enable_translation(tables, mode);
			}
		}

		TranslationEnabled {
			prepared: self.prepared,
			_arch:    PhantomData,
		}
	}
}

/// Translation on (or deliberately off); only the branch remains.
pub struct TranslationEnabled<A: Arch> {
	/// What the core enters the kernel with.
	prepared: Prepared<A::Tables>,
	/// The architecture.
	_arch:    PhantomData<fn() -> A>,
}

impl<A: Arch> TranslationEnabled<A> {
	/// The address about to be branched to.
	#[must_use]
	pub fn entry(&self) -> usize {
		self.prepared.entry
	}

	/// The record about to be passed.
	#[must_use]
	pub fn args(&self) -> &EntryArgs {
		&self.prepared.args
	}

	/// Branches to the kernel. Never returns.
	///
	/// # Safety
	/// The entry must be that of the kernel the tables were built for,
	/// with its image in place.
	pub unsafe fn enter(self, core: CoreIdentity) -> ! {
		// SAFETY: Reachable per the self-check; image placement per the caller.
		unsafe { A::enter_kernel(self.prepared.entry, &self.prepared.args, core) }
	}
}

#[cfg(test)]
mod tests {
	use relay_arch_base::{AddrRange, ImageInfo, MemAttr, Translation};

	use super::*;
	use crate::fake::{A32, A64, Event, Fake, enter_in, events, leak};

	fn args_for(image: &ImageInfo) -> EntryArgs {
		EntryArgs::new(image, AddrRange::new(0x4800_0000, 0x4800_2000))
	}

	/// A request with the loader at `loader` and the tables just above it.
	fn request(kernel: ImageInfo, loader: AddrRange) -> MapRequest {
		MapRequest {
			kernel,
			loader,
			console: AddrRange::EMPTY,
			tables_phys: loader.end,
		}
	}

	#[test]
	fn plans_follow_the_mode_table() {
		use ExecMode::{Elevated, Native};

		for hyp in [false, true] {
			for built in [false, true] {
				assert_eq!(Plan::resolve(Native, hyp, built), Plan::Native);
			}
		}
		assert_eq!(Plan::resolve(Elevated, false, true), Plan::DropToNative);
		assert_eq!(Plan::resolve(Elevated, false, false), Plan::DropToNative);
		assert_eq!(Plan::resolve(Elevated, true, true), Plan::Elevated);
		assert_eq!(Plan::resolve(Elevated, true, false), Plan::ElevatedUntranslated);
		assert_eq!(Plan::ElevatedUntranslated.translation(), None);
	}

	#[test]
	fn native_entry_walks_to_the_loaded_kernel() {
		enter_in(ExecMode::Native);

		let kernel = ImageInfo::new(0x1000, 0x8000_0000, 0x8000_1000, 0x8000_0040).unwrap();
		let loader = AddrRange::new(0x4000_0000, 0x4010_0000);

		let built = PoweredOn::<A64>::new()
			.build_tables(leak(), &request(kernel, loader), args_for(&kernel), false)
			.unwrap();
		let prepared = built.prepared();
		assert_eq!(prepared.plan(), Plan::Native);
		assert_eq!(prepared.entry(), 0x8000_0040);
		assert_eq!(prepared.tables.walk(0x8000_0040).unwrap().phys, 0x1040);
		assert_eq!(events(), [Event::Clean]);

		// SAFETY: Fake architecture.
		let enabled = unsafe { built.enable_translation() };
		assert_eq!(events(), [Event::Enable(TranslationMode::Native)]);
		assert_eq!(enabled.entry(), 0x8000_0040);
		assert_eq!(enabled.args().phys_start, 0x1000);
		assert_eq!(enabled.args().dtb_size, 0x2000);
	}

	#[test]
	fn elevated_entry_without_hyp_support_drops_first() {
		enter_in(ExecMode::Elevated);

		let kernel = ImageInfo::new(0x4040_0000, 0xFFFF_FF80_0000_0000, 0xFFFF_FF80_0020_0000, 0xFFFF_FF80_0000_0000)
			.unwrap();
		let loader = AddrRange::new(0x4000_0000, 0x4010_0000);
		let built = PoweredOn::<A64>::new()
			.build_tables(leak(), &request(kernel, loader), args_for(&kernel), false)
			.unwrap();
		assert_eq!(built.prepared().plan(), Plan::DropToNative);
		events();

		// SAFETY: Fake architecture.
		let _ = unsafe { built.enable_translation() };
		assert_eq!(events(), [Event::Leave, Event::Enable(TranslationMode::Native)]);
	}

	#[test]
	fn unsupported_elevated_tables_enter_untranslated() {
		enter_in(ExecMode::Elevated);

		let kernel = ImageInfo::new(0x4040_0000, 0xFFFF_FF80_0000_0000, 0xFFFF_FF80_0020_0000, 0xFFFF_FF80_0000_0100)
			.unwrap();
		let loader = AddrRange::new(0x4000_0000, 0x4010_0000);
		let built = PoweredOn::<A64>::new()
			.build_tables(leak(), &request(kernel, loader), args_for(&kernel), true)
			.unwrap();
		assert_eq!(built.prepared().plan(), Plan::ElevatedUntranslated);
		assert_eq!(built.prepared().entry(), 0x4040_0100);

		// SAFETY: Fake architecture.
		let enabled = unsafe { built.enable_translation() };
		assert!(events().is_empty());
		assert_eq!(enabled.entry(), 0x4040_0100);
	}

	#[test]
	fn hyp_kernels_get_elevated_tables_where_supported() {
		enter_in(ExecMode::Elevated);

		let kernel = ImageInfo::new(0x0020_0000, 0xC000_0000, 0xC012_3000, 0xC000_8000).unwrap();
		let loader = AddrRange::new(0x0000_8000, 0x0010_0000);
		let built = PoweredOn::<A32>::new()
			.build_tables(leak(), &request(kernel, loader), args_for(&kernel), true)
			.unwrap();
		assert_eq!(built.prepared().plan(), Plan::Elevated);
		assert_eq!(built.prepared().entry(), 0xC000_8000);

		// Secondaries follow the same plan from the handoff.
		let secondary = TablesBuilt::<A32>::adopt(built.prepared());
		events();
		// SAFETY: Fake architecture.
		let _ = unsafe { secondary.enable_translation() };
		assert_eq!(events(), [Event::Enable(TranslationMode::Elevated)]);
	}

	/// Tables that build but map everything to zero.
	#[derive(Debug)]
	struct Broken;

	impl BootTables for Broken {
		const EMPTY: Self = Self;

		fn build(&mut self, _req: &MapRequest) -> Result<(), BuildError> {
			Ok(())
		}

		fn walk(&self, _virt: usize) -> Option<Translation> {
			Some(Translation {
				phys:       0,
				attr:       MemAttr::Normal,
				block_size: 4096,
			})
		}

		fn footprint(&self) -> AddrRange {
			AddrRange::EMPTY
		}
	}

	/// Tables whose elevated build reports success without a root.
	#[derive(Debug)]
	struct Rootless;

	impl BootTables for Rootless {
		const EMPTY: Self = Self;

		fn build(&mut self, _req: &MapRequest) -> Result<(), BuildError> {
			Ok(())
		}

		fn build_elevated(&mut self, _req: &MapRequest) -> Result<(), BuildError> {
			Ok(())
		}

		fn walk(&self, virt: usize) -> Option<Translation> {
			Some(Translation {
				phys:       virt as u64,
				attr:       MemAttr::Normal,
				block_size: 4096,
			})
		}

		fn footprint(&self) -> AddrRange {
			AddrRange::EMPTY
		}
	}

	#[test]
	fn missing_roots_never_reach_the_enable() {
		enter_in(ExecMode::Elevated);

		let kernel = ImageInfo::new(0x0020_0000, 0x0020_0000, 0x0030_0000, 0x0020_0000).unwrap();
		let loader = AddrRange::new(0x0000_8000, 0x0010_0000);
		let result =
			PoweredOn::<Fake<Rootless>>::new().build_tables(leak(), &request(kernel, loader), args_for(&kernel), true);

		assert!(matches!(
			result,
			Err(BootError::SelfCheck {
				virt:     0x0020_0000,
				expected: 0x0020_0000,
				found:    None,
			})
		));
		assert!(events().is_empty());
	}

	#[test]
	fn wrong_entry_mappings_are_caught_before_enabling() {
		enter_in(ExecMode::Native);

		let kernel = ImageInfo::new(0x1000, 0x8000_0000, 0x8000_1000, 0x8000_0040).unwrap();
		let loader = AddrRange::new(0x4000_0000, 0x4010_0000);
		let result =
			PoweredOn::<Fake<Broken>>::new().build_tables(leak(), &request(kernel, loader), args_for(&kernel), false);

		assert!(matches!(
			result,
			Err(BootError::SelfCheck {
				virt:     0x8000_0040,
				expected: 0x1040,
				found:    Some(0),
			})
		));
		assert!(events().is_empty());
	}
}
