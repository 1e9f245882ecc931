//! The boot core's sequence, and the secondaries' path into the kernel.

use core::marker::PhantomData;

use relay_arch_base::{AddrRange, Arch, CoreIdentity, MapRequest};
use relay_debug::{Console, dbg, dbg_err, dbg_warn};
use relay_driver::{Activator, Bindings, ConsoleDriver, DRIVERS, match_devices};
use relay_dtb::{Fdt, ValidationError};
use relay_image::{IdentityMemory, LoadRequest, LoaderLayout, MAX_REGIONS, MemoryMap, PhysMemory, Policy, carve};
use relay_sync::BootCell;

use crate::{
	BootError, BringUpError, Platform,
	config::{CORE_STACK_SIZE, NUM_CORES, SECONDARY_STACK_BYTES},
	devices,
	platform::StaticDevice,
	smp::{Coordinator, StackLayout, Stacks},
	transition::{PoweredOn, Prepared, TablesBuilt},
};

/// Where automatically placed companions go.
const POLICY: Policy = if cfg!(feature = "companions-last") {
	Policy::TopOfMemory
} else {
	Policy::AfterKernel
};

/// Everything the loader keeps in `.bss`.
///
/// The loader binary declares exactly one of these, as a `static`.
pub struct BootStatics<A: Arch> {
	/// The boot translation tables.
	tables:      BootCell<A::Tables>,
	/// Bring-up and release state.
	coordinator: Coordinator<Prepared<A::Tables>, NUM_CORES>,
	/// Secondary stacks.
	stacks:      Stacks<SECONDARY_STACK_BYTES>,
	/// The architecture.
	_arch:       PhantomData<fn() -> A>,
}

impl<A: Arch> BootStatics<A> {
	/// Empty state, for a `static` initializer.
	#[must_use]
	pub const fn new() -> Self {
		Self {
			tables:      BootCell::new(<A::Tables as relay_arch_base::BootTables>::EMPTY),
			coordinator: Coordinator::new(),
			stacks:      Stacks::new(),
			_arch:       PhantomData,
		}
	}

	/// Where the secondary stacks are.
	fn stack_layout(&self) -> Option<StackLayout> {
		self.stacks.layout(CORE_STACK_SIZE, NUM_CORES)
	}
}

/// Reads the firmware's device tree at `addr`; zero means there is none.
fn firmware_fdt<M: PhysMemory>(mem: &M, addr: usize) -> Result<Option<Fdt<'_>>, ValidationError> {
	if addr == 0 {
		return Ok(None);
	}

	let unbacked = ValidationError::TooShort { len: 0 };
	let header = AddrRange::from_len(addr, relay_dtb::HEADER_SIZE)
		.and_then(|r| mem.bytes(r))
		.ok_or(unbacked)?;
	let size = relay_dtb::total_size(header)?;
	let bytes = AddrRange::from_len(addr, size)
		.and_then(|r| mem.bytes(r))
		.ok_or(unbacked)?;

	Fdt::new(bytes).map(Some)
}

/// Points a bound spin table at the release words the tree's `cpu` nodes
/// name. Returns how many did not fit.
fn use_release_addrs(fdt: &Fdt<'_>, bindings: &mut Bindings) -> usize {
	let Some(Activator::SpinTable(table)) = bindings.activator.as_mut() else {
		return 0;
	};

	devices::release_addrs(fdt)
		.filter(|&release| !table.set_release_addr(release))
		.count()
}

/// Runs the boot core's sequence up to (not including) the mode
/// transition.
///
/// Binds drivers, loads the images, builds and checks the tables, brings
/// up every configured secondary and releases them with the handoff. On
/// success the returned state is the boot core's own path into the kernel.
pub fn prepare<A, P, M>(
	statics: &'static BootStatics<A>,
	dtb_addr: usize,
	mem: &mut M,
	layout: LoaderLayout,
	bindings: &mut Bindings,
) -> Result<TablesBuilt<A>, BootError>
where
	A: Arch,
	P: Platform,
	M: PhysMemory,
{
	let (regions, firmware_dtb) = {
		let firmware = firmware_fdt(&*mem, dtb_addr);

		let (bound, dropped) = match &firmware {
			Ok(Some(fdt)) => {
				let bound = match_devices(DRIVERS, devices::devices(fdt), bindings);
				(bound, use_release_addrs(fdt, bindings))
			}
			_ => (match_devices(DRIVERS, P::DEVICES.iter().map(StaticDevice::device), bindings), 0),
		};

		dbg!(
			bindings.console(),
			"relay {} on {} ({})",
			env!("CARGO_PKG_VERSION"),
			P::NAME,
			A::NAME
		);
		dbg!(
			bindings.console(),
			"loader at {:#x}..{:#x}, blob at {:#x}..{:#x}",
			layout.image.start,
			layout.image.end,
			layout.blob.start,
			layout.blob.end
		);
		dbg!(bindings.console(), "{bound} drivers bound");
		if dropped > 0 {
			dbg_warn!(bindings.console(), "{dropped} spin-table release addresses ignored");
		}

		let fdt = match firmware {
			Ok(fdt) => fdt,
			Err(err) => {
				dbg_warn!(bindings.console(), "ignoring firmware device tree at {dtb_addr:#x}: {err}");
				None
			}
		};

		let mut regions: MemoryMap = fdt.as_ref().map(devices::memory_regions).unwrap_or_default();
		if regions.is_empty() {
			dbg!(bindings.console(), "no memory nodes; using the {} memory map", P::NAME);
			regions = P::MEMORY.iter().copied().take(MAX_REGIONS).collect();
		}

		for hole in fdt.iter().flat_map(devices::reserved_ranges) {
			dbg!(bindings.console(), "reserved {:#x}..{:#x}", hole.start, hole.end);
			if !carve(&mut regions, hole) {
				dbg_warn!(bindings.console(), "memory map full; dropped usable memory");
			}
		}

		for r in &regions {
			dbg!(bindings.console(), "memory {:#x}..{:#x}", r.base, r.range().end);
		}

		let firmware_dtb = fdt.and_then(|f| AddrRange::from_len(dtb_addr, f.total_size()));
		(regions, firmware_dtb)
	};

	let loaded = relay_image::load(mem, &LoadRequest {
		layout,
		regions: &regions,
		firmware_dtb,
		policy: POLICY,
	})?;

	for image in &loaded.images {
		let info = &image.info;
		dbg!(
			bindings.console(),
			"{} ({:?}): paddr {:#x}..{:#x} vaddr {:#x}..{:#x} entry {:#x}",
			image.name,
			image.kind,
			info.phys_region_start,
			info.phys_region_end,
			info.virt_region_start,
			info.virt_region_end,
			info.virt_entry
		);
	}

	if !loaded.dtb.is_empty() {
		dbg!(
			bindings.console(),
			"device tree at {:#x} ({} bytes)",
			loaded.dtb.start,
			loaded.dtb.len()
		);
	}

	// SAFETY: Only the boot core is running.
	let tables = unsafe { statics.tables.take() }.ok_or(BootError::TablesTaken)?;
	let req = MapRequest {
		kernel:      loaded.kernel().info,
		loader:      layout.image,
		console:     bindings.console.as_ref().map_or(AddrRange::EMPTY, ConsoleDriver::window),
		tables_phys: core::ptr::from_ref::<A::Tables>(tables).expose_provenance(),
	};

	let built = PoweredOn::<A>::new().build_tables(tables, &req, loaded.entry_args(), cfg!(feature = "hyp"))?;
	let prepared = built.prepared();
	dbg!(
		bindings.console(),
		"plan {:?}, entry {:#x}",
		prepared.plan(),
		prepared.entry()
	);

	let stacks = statics.stack_layout().ok_or(BringUpError::NoStack(1))?;
	let encoder = P::encoder(A::hardware_core_id());

	statics.coordinator.bring_up::<A, _, _>(
		NUM_CORES,
		P::MAX_CORES,
		bindings.activator.as_ref(),
		&encoder,
		&stacks,
		A::secondary_entry(),
		A::publish_secondary_stack,
		A::spin_hint,
		bindings.console.as_mut().map(|c| c as &mut dyn Console),
	)?;

	// SAFETY: The boot core releases once; every secondary is waiting.
	unsafe {
		statics.coordinator.release(prepared);
	}

	Ok(built)
}

/// The boot core's entry: prepares everything, then enters the kernel.
///
/// On failure the error is reported on the console (if one was bound)
/// and the core halts.
pub fn boot_primary<A: Arch, P: Platform>(statics: &'static BootStatics<A>, dtb_addr: usize, layout: LoaderLayout) -> ! {
	// SAFETY: Called once, on the boot core.
	unsafe {
		A::set_logical_core_id(0);
	}

	// SAFETY: Translation is off, and the loader only touches the ranges
	// SAFETY: the image planner hands out.
	let mut mem = unsafe { IdentityMemory::new() };
	let mut bindings = Bindings::new();

	match prepare::<A, P, _>(statics, dtb_addr, &mut mem, layout, &mut bindings) {
		Ok(built) => {
			dbg!(bindings.console(), "entering kernel");

			// SAFETY: Still running from the loader image on the boot stack.
			let enabled = unsafe { built.enable_translation() };
			let core = CoreIdentity {
				logical:  0,
				hardware: A::hardware_core_id(),
			};
			// SAFETY: The kernel was loaded by `prepare`.
			unsafe { enabled.enter(core) }
		}
		Err(err) => {
			dbg_err!(bindings.console(), "boot failed: {err}");
			A::halt()
		}
	}
}

/// A secondary core's entry, with the stack pointer it was started on.
///
/// Secondaries never log: the console belongs to the boot core.
pub fn boot_secondary<A: Arch>(statics: &'static BootStatics<A>, sp: usize) -> ! {
	let Some(id) = statics.stack_layout().and_then(|l| l.logical_id(sp)) else {
		A::halt();
	};

	// SAFETY: Called once, by the core `id` belongs to.
	unsafe {
		A::set_logical_core_id(id);
	}

	if statics.coordinator.announce(id).is_err() {
		A::halt();
	}

	let prepared = statics.coordinator.wait_release(A::spin_hint);

	// SAFETY: Running from the loader image, on this core's own stack.
	let enabled = unsafe { TablesBuilt::<A>::adopt(prepared).enable_translation() };
	let core = CoreIdentity {
		logical:  id,
		hardware: A::hardware_core_id(),
	};
	// SAFETY: The boot core loaded the kernel before releasing.
	unsafe { enabled.enter(core) }
}

#[cfg(test)]
mod tests {
	use relay_arch_base::{Conduit, ExecMode};
	use relay_dtb::builder::FdtBuilder;
	use relay_image::{LoadError, MemoryRegion, SliceMemory, builder::BlobBuilder};

	use super::*;
	use crate::{
		fake::{A64, Event, enter_in, events},
		platform::Flat,
		transition::Plan,
	};

	const RAM: usize = 0x4000_0000;
	const RAM_SIZE: usize = 0x20_0000;
	const BLOB: usize = RAM + 0x1_0000;
	const FIRMWARE_DTB: usize = RAM + 0x10_0000;

	const KERNEL_PHYS: u64 = 0x4008_0000;
	const KERNEL_VIRT: u64 = 0xFFFF_FF80_0000_0000;

	/// A board whose fallback activator uses SMC, to tell it apart from
	/// the device tree's HVC.
	struct Board;

	impl Platform for Board {
		type Encoder = Flat;

		const DEVICES: &'static [StaticDevice] =
			&[StaticDevice::firmware("psci", b"arm,psci-0.2\0", Some("smc"))];
		const MAX_CORES: usize = 4;
		const MEMORY: &'static [MemoryRegion] = &[MemoryRegion::new(RAM, RAM_SIZE)];
		const NAME: &'static str = "board";

		fn encoder(_: usize) -> Flat {
			Flat
		}
	}

	fn firmware_tree(memory_size: u32) -> Vec<u8> {
		FdtBuilder::new()
			.begin_node("")
			.prop_u32("#address-cells", 2)
			.prop_u32("#size-cells", 2)
			.begin_node("memory@40000000")
			.prop_str("device_type", "memory")
			.prop_cells("reg", &[0, RAM as u32, 0, memory_size])
			.end_node()
			.begin_node("psci")
			.prop_strs("compatible", &["arm,psci-0.2"])
			.prop_str("method", "hvc")
			.end_node()
			.end_node()
			.finish()
	}

	fn blob() -> Vec<u8> {
		BlobBuilder::new()
			.kernel("kernel", KERNEL_PHYS, KERNEL_VIRT..KERNEL_VIRT + 0x2800, KERNEL_VIRT + 0x40, &[0xAA; 0x1800])
			.companion("init", None, 0x0040_0000..0x0040_1000, 0x0040_0000, &[0xBB; 0x100])
			.finish()
	}

	/// RAM with the blob and, optionally, a firmware tree in place.
	fn ram(blob: &[u8], tree: Option<&[u8]>) -> Vec<u8> {
		let mut ram = vec![0x55; RAM_SIZE];
		ram[BLOB - RAM..BLOB - RAM + blob.len()].copy_from_slice(blob);
		if let Some(tree) = tree {
			ram[FIRMWARE_DTB - RAM..FIRMWARE_DTB - RAM + tree.len()].copy_from_slice(tree);
		}
		ram
	}

	fn layout(blob_len: usize) -> LoaderLayout {
		LoaderLayout {
			image: AddrRange::new(RAM, BLOB),
			blob:  AddrRange::new(BLOB, BLOB + blob_len),
		}
	}

	fn statics() -> &'static BootStatics<A64> {
		Box::leak(Box::new(BootStatics::new()))
	}

	#[test]
	fn boots_from_the_firmware_tree() {
		enter_in(ExecMode::Native);

		let blob = blob();
		let tree = firmware_tree(RAM_SIZE as u32);
		let mut backing = ram(&blob, Some(&tree));
		let mut mem = SliceMemory::new(RAM, &mut backing);
		let statics = statics();
		let mut bindings = Bindings::new();

		let built = prepare::<A64, Board, _>(statics, FIRMWARE_DTB, &mut mem, layout(blob.len()), &mut bindings)
			.unwrap();
		let prepared = built.prepared();

		// The tree's HVC conduit, not the board's SMC one.
		assert!(matches!(
			&bindings.activator,
			Some(Activator::Psci(p)) if p.conduit() == Conduit::Hvc
		));

		assert_eq!(prepared.plan(), Plan::Native);
		assert_eq!(prepared.entry(), KERNEL_VIRT as usize + 0x40);

		let args = prepared.args();
		// The companion follows the kernel and the tree.
		assert_eq!(args.phys_start, KERNEL_PHYS as usize + 0x4000);
		assert_eq!(args.virt_entry, 0x0040_0000);
		assert_eq!(args.dtb_addr, KERNEL_PHYS as usize + 0x3000);
		assert_eq!(args.dtb_size, tree.len());

		let kernel = AddrRange::from_len(KERNEL_PHYS as usize, 0x1800).unwrap();
		assert!(mem.bytes(kernel).unwrap().iter().all(|&b| b == 0xAA));
		let tree_copy = AddrRange::from_len(args.dtb_addr, tree.len()).unwrap();
		assert_eq!(mem.bytes(tree_copy).unwrap(), &tree[..]);

		// Single-core configuration: nothing to start, but the handoff is out.
		assert!(statics.coordinator.is_released());
		assert_eq!(statics.coordinator.wait_release(|| {}).entry(), prepared.entry());
		assert_eq!(events(), [Event::Clean]);
	}

	#[test]
	fn spin_tables_use_the_trees_release_words() {
		enter_in(ExecMode::Native);

		let blob = blob();
		let tree = FdtBuilder::new()
			.begin_node("")
			.prop_u32("#address-cells", 2)
			.prop_u32("#size-cells", 2)
			.begin_node("memory@40000000")
			.prop_str("device_type", "memory")
			.prop_cells("reg", &[0, RAM as u32, 0, RAM_SIZE as u32])
			.end_node()
			.begin_node("firmware")
			.prop_strs("compatible", &["raspberrypi,bcm2835-firmware"])
			.end_node()
			.begin_node("cpus")
			.prop_u32("#address-cells", 1)
			.prop_u32("#size-cells", 0)
			.begin_node("cpu@1")
			.prop_str("device_type", "cpu")
			.prop_cells("reg", &[1])
			.prop_str("enable-method", "spin-table")
			.prop_cells("cpu-release-addr", &[0, 0x4001_F000])
			.end_node()
			.end_node()
			.end_node()
			.finish();
		let mut backing = ram(&blob, Some(&tree));
		let mut mem = SliceMemory::new(RAM, &mut backing);
		let mut bindings = Bindings::new();

		prepare::<A64, Board, _>(statics(), FIRMWARE_DTB, &mut mem, layout(blob.len()), &mut bindings).unwrap();

		let Some(Activator::SpinTable(table)) = bindings.activator else {
			panic!("expected a spin table, got {:?}", bindings.activator);
		};
		assert_eq!(table.release_addr(1), Some(0x4001_F000));
		assert_eq!(table.release_addr(2), Some(0xE8));
	}

	#[test]
	fn falls_back_to_the_board_without_a_tree() {
		enter_in(ExecMode::Native);

		let blob = blob();
		let mut backing = ram(&blob, None);
		let mut mem = SliceMemory::new(RAM, &mut backing);
		let mut bindings = Bindings::new();

		let built = prepare::<A64, Board, _>(statics(), 0, &mut mem, layout(blob.len()), &mut bindings).unwrap();

		assert!(matches!(
			&bindings.activator,
			Some(Activator::Psci(p)) if p.conduit() == Conduit::Smc
		));
		assert_eq!(built.prepared().args().dtb_size, 0);
	}

	#[test]
	fn a_corrupt_tree_is_ignored() {
		enter_in(ExecMode::Native);

		let blob = blob();
		let mut tree = firmware_tree(RAM_SIZE as u32);
		tree[0] ^= 0xFF;
		let mut backing = ram(&blob, Some(&tree));
		let mut mem = SliceMemory::new(RAM, &mut backing);
		let mut bindings = Bindings::new();

		let built = prepare::<A64, Board, _>(statics(), FIRMWARE_DTB, &mut mem, layout(blob.len()), &mut bindings)
			.unwrap();
		assert_eq!(built.prepared().args().dtb_size, 0);
		assert!(matches!(
			&bindings.activator,
			Some(Activator::Psci(p)) if p.conduit() == Conduit::Smc
		));
	}

	#[test]
	fn tree_memory_is_authoritative() {
		enter_in(ExecMode::Native);

		// The tree only reports the first 256 KiB, below the kernel.
		let blob = blob();
		let tree = firmware_tree(0x4_0000);
		let mut backing = ram(&blob, Some(&tree));
		let mut mem = SliceMemory::new(RAM, &mut backing);
		let statics = statics();
		let mut bindings = Bindings::new();

		let result = prepare::<A64, Board, _>(statics, FIRMWARE_DTB, &mut mem, layout(blob.len()), &mut bindings);
		assert!(matches!(result, Err(BootError::Load(LoadError::OutsideMemory(_)))));
		assert!(!statics.coordinator.is_released());
		assert!(events().is_empty());
	}

	#[test]
	fn reserved_memory_is_not_loaded_over() {
		enter_in(ExecMode::Native);

		let blob = blob();
		let tree = FdtBuilder::new()
			.reserve(KERNEL_PHYS + 0x1000, 0x1000)
			.begin_node("")
			.prop_u32("#address-cells", 2)
			.prop_u32("#size-cells", 2)
			.begin_node("memory@40000000")
			.prop_str("device_type", "memory")
			.prop_cells("reg", &[0, RAM as u32, 0, RAM_SIZE as u32])
			.end_node()
			.end_node()
			.finish();
		let mut backing = ram(&blob, Some(&tree));
		let mut mem = SliceMemory::new(RAM, &mut backing);
		let statics = statics();

		let result = prepare::<A64, Board, _>(statics, FIRMWARE_DTB, &mut mem, layout(blob.len()), &mut Bindings::new());
		assert!(matches!(
			result,
			Err(BootError::Load(LoadError::OutsideMemory(name))) if name.as_str() == "kernel"
		));
		assert!(!statics.coordinator.is_released());
	}

	#[test]
	fn tables_are_only_handed_out_once() {
		enter_in(ExecMode::Native);

		let blob = blob();
		let statics = statics();

		let mut backing = ram(&blob, None);
		let mut mem = SliceMemory::new(RAM, &mut backing);
		// SAFETY: Single-threaded test.
		let _ = unsafe { statics.tables.take() };

		let result = prepare::<A64, Board, _>(statics, 0, &mut mem, layout(blob.len()), &mut Bindings::new());
		assert!(matches!(result, Err(BootError::TablesTaken)));
	}
}
