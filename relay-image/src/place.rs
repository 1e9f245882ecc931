//! Placement planning and copying.

use relay_arch_base::{AddrRange, EntryArgs, ImageInfo, PAGE_SIZE, align_down, align_up};
use relay_dtb::Fdt;

use crate::{Blob, Kind, LoadError, MAX_IMAGES, MemoryRegion, Name, PhysMemory, Record};

/// Where automatically placed companions go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
	/// Immediately after the kernel and the device tree, each page aligned.
	#[default]
	AfterKernel,
	/// Packed against the top of the first usable region, in record order
	/// from the top down.
	TopOfMemory,
}

/// The loader's own footprint and the blob's location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderLayout {
	/// The loader image (code, data, stacks and tables).
	pub image: AddrRange,
	/// The embedded blob.
	pub blob:  AddrRange,
}

/// Everything [`plan`] needs to know besides the blob itself.
#[derive(Debug, Clone, Copy)]
pub struct LoadRequest<'a> {
	/// Where the loader and blob sit.
	pub layout:       LoaderLayout,
	/// Usable RAM.
	pub regions:      &'a [MemoryRegion],
	/// A valid device tree supplied by firmware; preferred over the blob's.
	pub firmware_dtb: Option<AddrRange>,
	/// Automatic companion placement.
	pub policy:       Policy,
}

/// One copy, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
	/// The image being copied.
	pub name:      Name,
	/// Physical address of the content.
	pub src:       usize,
	/// Content length.
	pub file_size: usize,
	/// The destination window; bytes past `file_size` are zeroed.
	pub window:    AddrRange,
}

impl Step {
	/// The bytes this step reads.
	#[must_use]
	pub const fn source(&self) -> AddrRange {
		AddrRange::new(self.src, self.src + self.file_size)
	}
}

/// A placed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedImage {
	/// The image's name.
	pub name: Name,
	/// What it is.
	pub kind: Kind,
	/// Where it went.
	pub info: ImageInfo,
}

/// The result of loading: every image's record and the device tree.
#[derive(Debug, Clone)]
pub struct Loaded {
	/// Kernel first, then companions in blob order.
	pub images: heapless::Vec<LoadedImage, MAX_IMAGES>,
	/// The relocated device tree (empty if there is none).
	pub dtb:    AddrRange,
}

impl Loaded {
	/// The kernel.
	#[must_use]
	pub fn kernel(&self) -> &LoadedImage {
		// `plan` always places the kernel first.
		&self.images[0]
	}

	/// The companions, in blob order.
	pub fn companions(&self) -> impl Iterator<Item = &LoadedImage> {
		self.images.iter().skip(1)
	}

	/// The kernel argument record: the first companion plus the device
	/// tree.
	#[must_use]
	pub fn entry_args(&self) -> EntryArgs {
		// `Blob::parse` rejects blobs without a companion.
		EntryArgs::new(&self.images[1].info, self.dtb)
	}
}

/// A checked set of copies, ready to run.
#[derive(Debug, Clone)]
pub struct Plan {
	/// Copies, in execution order: device tree, kernel, companions.
	steps:  heapless::Vec<Step, MAX_IMAGES>,
	/// What the copies produce.
	loaded: Loaded,
}

/// Rounds a length up to whole pages.
fn page_len(len: usize) -> Result<usize, LoadError> {
	align_up(len, PAGE_SIZE).ok_or(LoadError::AddressOutOfRange(len as u64))
}

/// Creates a window, failing on overflow.
fn window(start: usize, len: usize) -> Result<AddrRange, LoadError> {
	AddrRange::from_len(start, len).ok_or(LoadError::AddressOutOfRange(start as u64))
}

/// Creates the record of an image placed at `phys`.
fn place(record: &Record, phys: usize) -> Result<ImageInfo, LoadError> {
	ImageInfo::new(phys, record.virt_start, record.virt_end, record.virt_entry)
		.ok_or(LoadError::AddressOutOfRange(phys as u64))
}

/// Decides where every image goes and checks the result.
///
/// Nothing is written; `mem` is only read to validate an embedded device
/// tree.
pub fn plan<M: PhysMemory>(blob: &Blob, blob_phys: usize, mem: &M, req: &LoadRequest<'_>) -> Result<Plan, LoadError> {
	let content = |r: &Record| window(blob_phys, r.offset).map(|w| w.end);

	let kernel = blob.kernel();
	let kernel_phys = kernel.phys_start.ok_or(LoadError::KernelAutoPlaced)?;
	let kernel_info = place(kernel, kernel_phys)?;

	let mut steps = heapless::Vec::<Step, MAX_IMAGES>::new();
	let mut images = heapless::Vec::<LoadedImage, MAX_IMAGES>::new();

	// Device tree: firmware's wins, else the blob's; always right after the kernel.
	let dtb_source = match (req.firmware_dtb, blob.device_tree()) {
		(Some(fw), _) => Some((Name::FIRMWARE_DTB, fw.start, fw.len())),
		(None, Some(record)) => {
			let src = content(record)?;
			let bytes = mem
				.bytes(window(src, record.file_size)?)
				.ok_or(LoadError::Unbacked {
					addr: src,
					len:  record.file_size,
				})?;
			let fdt = Fdt::new(bytes)?;
			Some((record.name, src, fdt.total_size()))
		}
		(None, None) => None,
	};

	let mut dtb = AddrRange::EMPTY;
	let mut cursor = kernel_info.phys_region_end;
	if let Some((name, src, size)) = dtb_source {
		let win = window(cursor, page_len(size)?)?;
		dtb = AddrRange::new(win.start, win.start + size);
		cursor = win.end;
		let _ = steps.push(Step {
			name,
			src,
			file_size: size,
			window: win,
		});
	}

	let _ = steps.push(Step {
		name:      kernel.name,
		src:       content(kernel)?,
		file_size: kernel.file_size,
		window:    kernel_info.phys(),
	});
	let _ = images.push(LoadedImage {
		name: kernel.name,
		kind: Kind::Kernel,
		info: kernel_info,
	});

	let mut top = match req.policy {
		Policy::AfterKernel => 0,
		Policy::TopOfMemory => {
			let first = req.regions.first().ok_or(LoadError::NoMemory)?;
			align_down(first.range().end, PAGE_SIZE)
		}
	};

	for record in blob.companions() {
		let size = page_len(record.virt_size())?;
		let phys = match (record.phys_start, req.policy) {
			(Some(phys), _) => phys,
			(None, Policy::AfterKernel) => {
				let phys = cursor;
				cursor = cursor.checked_add(size).ok_or(LoadError::NoRoom(record.name))?;
				phys
			}
			(None, Policy::TopOfMemory) => {
				top = top.checked_sub(size).ok_or(LoadError::NoRoom(record.name))?;
				top
			}
		};

		let info = place(record, phys)?;
		let _ = steps.push(Step {
			name:      record.name,
			src:       content(record)?,
			file_size: record.file_size,
			window:    info.phys(),
		});
		let _ = images.push(LoadedImage {
			name: record.name,
			kind: Kind::Companion,
			info,
		});
	}

	check(&steps, req)?;

	Ok(Plan {
		steps,
		loaded: Loaded { images, dtb },
	})
}

/// Checks every placement constraint across the planned steps.
fn check(steps: &[Step], req: &LoadRequest<'_>) -> Result<(), LoadError> {
	for (i, step) in steps.iter().enumerate() {
		if !req.regions.iter().any(|r| r.range().covers(&step.window)) {
			return Err(LoadError::OutsideMemory(step.name));
		}

		if step.window.overlaps(&req.layout.image) {
			return Err(LoadError::OverlapsLoader(step.name));
		}

		for later in &steps[i + 1..] {
			if step.window.overlaps(&later.window) {
				return Err(LoadError::Overlap {
					a: step.name,
					b: later.name,
				});
			}

			if step.window.overlaps(&later.source()) {
				return Err(LoadError::Clobbers {
					dst: step.name,
					src: later.name,
				});
			}
		}
	}

	Ok(())
}

impl Plan {
	/// The copies, in execution order.
	#[must_use]
	pub fn steps(&self) -> &[Step] {
		&self.steps
	}

	/// What executing the plan will produce.
	#[must_use]
	pub fn loaded(&self) -> &Loaded {
		&self.loaded
	}

	/// Runs every copy and zero-fills every tail.
	pub fn execute<M: PhysMemory>(self, mem: &mut M) -> Result<Loaded, LoadError> {
		for step in &self.steps {
			mem.copy(step.window.start, step.src, step.file_size)?;
			let tail = step.window.start + step.file_size;
			mem.fill(tail, step.window.end - tail, 0)?;
		}

		Ok(self.loaded)
	}
}

/// Parses the blob in `req.layout.blob`, plans and executes.
pub fn load<M: PhysMemory>(mem: &mut M, req: &LoadRequest<'_>) -> Result<Loaded, LoadError> {
	let blob = Blob::parse(mem.bytes(req.layout.blob).ok_or(LoadError::Unbacked {
		addr: req.layout.blob.start,
		len:  req.layout.blob.len(),
	})?)?;

	plan(&blob, req.layout.blob.start, mem, req)?.execute(mem)
}
