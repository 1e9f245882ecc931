//! A host architecture that records what it is asked to do.

use std::{
	cell::{Cell, RefCell},
	marker::PhantomData,
};

use relay_arch_base::{Arch, BootTables, CoreIdentity, EntryArgs, ExecMode, Firmware, TranslationMode};

/// Something the architecture was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
	/// `leave_elevated_mode`
	Leave,
	/// `clean_dcache_range`
	Clean,
	/// `enable_translation`
	Enable(TranslationMode),
	/// `set_logical_core_id`
	CoreId(usize),
	/// `publish_secondary_stack`
	Stack(usize),
}

thread_local! {
	static MODE: Cell<ExecMode> = const { Cell::new(ExecMode::Native) };
	static EVENTS: RefCell<Vec<Event>> = const { RefCell::new(Vec::new()) };
}

/// Sets the mode the next [`Arch::execution_mode`] reports on this thread.
pub fn enter_in(mode: ExecMode) {
	MODE.set(mode);
	EVENTS.with_borrow_mut(Vec::clear);
}

/// Takes the events recorded on this thread so far.
pub fn events() -> Vec<Event> {
	EVENTS.with_borrow_mut(std::mem::take)
}

/// Records an event.
fn record(event: Event) {
	EVENTS.with_borrow_mut(|e| e.push(event));
}

/// The fake architecture, using `T` as its tables.
pub struct Fake<T>(PhantomData<T>);

impl<T: BootTables> Firmware for Fake<T> {}

impl<T: BootTables> Arch for Fake<T> {
	type Tables = T;

	const NAME: &'static str = "fake";

	fn execution_mode() -> ExecMode {
		MODE.get()
	}

	unsafe fn leave_elevated_mode() {
		record(Event::Leave);
	}

	unsafe fn clean_dcache_range(_start: usize, len: usize) {
		assert!(len > 0);
		record(Event::Clean);
	}

	unsafe fn enable_translation(_tables: &T, mode: TranslationMode) {
		record(Event::Enable(mode));
	}

	unsafe fn enter_kernel(entry: usize, _args: &EntryArgs, _core: CoreIdentity) -> ! {
		panic!("entered {entry:#x}");
	}

	unsafe fn set_logical_core_id(id: usize) {
		record(Event::CoreId(id));
	}

	fn hardware_core_id() -> usize {
		0
	}

	fn publish_secondary_stack(sp: usize) {
		record(Event::Stack(sp));
	}

	fn secondary_entry() -> usize {
		0x4000_0800
	}

	fn halt() -> ! {
		panic!("halted");
	}
}

/// AArch64 tables.
pub type A64 = Fake<relay_arch_aarch64::Tables>;
/// ARMv7 tables (with Hyp support).
pub type A32 = Fake<relay_arch_armv7::Tables>;

/// A fresh set of tables that lives for the rest of the test run.
pub fn leak<T: BootTables>() -> &'static mut T {
	Box::leak(Box::new(T::EMPTY))
}
