//! Device and memory discovery from the firmware's device tree.
//!
//! The structure block is walked once per query, front to back, with a
//! bounded stack of open nodes. A node is reported when it closes, which
//! is the first point at which all of its properties are known. Its `reg`
//! is decoded with the cell sizes of its parent, as the device tree
//! requires.

use core::ffi::CStr;

use relay_arch_base::AddrRange;
use relay_driver::{Device, MAX_REGS, Regs, spin_table::ReleaseAddr};
use relay_dtb::{CellReader, Fdt, FdtIter, FdtToken, strings, u32_value};
use relay_image::{MemoryMap, MemoryRegion};

/// Deepest nesting tracked. Nodes below it are skipped, along with their
/// children.
pub const MAX_DEPTH: usize = 16;

/// `#address-cells` when a node doesn't say.
const DEFAULT_ADDRESS_CELLS: u32 = 2;
/// `#size-cells` when a node doesn't say.
const DEFAULT_SIZE_CELLS: u32 = 1;

/// An open node.
#[derive(Debug, Clone, Copy)]
struct Frame<'a> {
	/// Node name, unit address included.
	name:          &'a str,
	/// Raw `compatible` value.
	compatible:    Option<&'a [u8]>,
	/// Raw `reg` value.
	reg:           Option<&'a [u8]>,
	/// `method`, without its terminator.
	method:        Option<&'a str>,
	/// Raw `device_type` value.
	device_type:   Option<&'a [u8]>,
	/// First `enable-method` entry.
	enable_method: Option<&'a [u8]>,
	/// `cpu-release-addr`, one or two cells.
	release_addr:  Option<u64>,
	/// `status` is absent, `okay` or `ok`.
	enabled:       bool,
	/// `#address-cells` for children.
	address_cells: u32,
	/// `#size-cells` for children.
	size_cells:    u32,
}

impl<'a> Frame<'a> {
	/// A node with no properties seen yet.
	fn open(name: &'a CStr) -> Self {
		Self {
			name:          name.to_str().unwrap_or("?"),
			compatible:    None,
			reg:           None,
			method:        None,
			device_type:   None,
			enable_method: None,
			release_addr:  None,
			enabled:       true,
			address_cells: DEFAULT_ADDRESS_CELLS,
			size_cells:    DEFAULT_SIZE_CELLS,
		}
	}

	/// Records a property.
	fn apply(&mut self, name: &CStr, value: &'a [u8]) {
		match name.to_bytes() {
			b"compatible" => self.compatible = Some(value),
			b"reg" => self.reg = Some(value),
			b"method" => self.method = str_value(value),
			b"device_type" => self.device_type = Some(value),
			b"enable-method" => self.enable_method = strings(value).next(),
			b"cpu-release-addr" if value.len() % 4 == 0 => {
				self.release_addr = CellReader::new(value).read((value.len() / 4) as u32);
			}
			b"status" => self.enabled = matches!(str_value(value), Some("okay" | "ok")),
			b"#address-cells" => {
				if let Some(cells) = u32_value(value) {
					self.address_cells = cells;
				}
			}
			b"#size-cells" => {
				if let Some(cells) = u32_value(value) {
					self.size_cells = cells;
				}
			}
			_ => {}
		}
	}
}

/// A string property's value, without its terminator.
fn str_value(value: &[u8]) -> Option<&str> {
	let value = value.strip_suffix(b"\0").unwrap_or(value);
	core::str::from_utf8(value).ok()
}

/// A closed node, with everything needed to interpret it.
#[derive(Debug, Clone, Copy)]
pub struct Node<'a> {
	/// The node's own properties.
	frame:         Frame<'a>,
	/// The parent's name; `None` for the root.
	parent:        Option<&'a str>,
	/// The parent's `#address-cells`.
	address_cells: u32,
	/// The parent's `#size-cells`.
	size_cells:    u32,
}

impl<'a> Node<'a> {
	/// Node name, unit address included.
	#[must_use]
	pub fn name(&self) -> &'a str {
		self.frame.name
	}

	/// The parent node's name, unit address included.
	#[must_use]
	pub fn parent_name(&self) -> Option<&'a str> {
		self.parent
	}

	/// Whether the node's `status` allows it to be used.
	#[must_use]
	pub fn is_enabled(&self) -> bool {
		self.frame.enabled
	}

	/// Whether the node describes RAM.
	#[must_use]
	pub fn is_memory(&self) -> bool {
		self.frame.device_type.and_then(str_value) == Some("memory")
	}

	/// Whether the node is a processor parked on a spin table.
	#[must_use]
	pub fn is_spin_table_cpu(&self) -> bool {
		self.frame.device_type.and_then(str_value) == Some("cpu")
			&& self.frame.enable_method == Some(b"spin-table".as_slice())
	}

	/// The `reg` windows that fit the address space.
	///
	/// Decoding stops at the first malformed entry; windows beyond the
	/// machine word are skipped.
	pub fn reg(&self) -> impl Iterator<Item = Regs> + use<'a> {
		let mut cells = CellReader::new(self.frame.reg.unwrap_or(&[]));
		let (ac, sc) = (self.address_cells, self.size_cells);

		core::iter::from_fn(move || cells.pair(ac, sc)).filter_map(|(base, size)| {
			Some(Regs {
				base: usize::try_from(base).ok()?,
				size: usize::try_from(size).ok()?,
			})
		})
	}

	/// The node as a matchable device, if it has a `compatible`.
	#[must_use]
	pub fn device(&self) -> Option<Device<'a>> {
		let compatible = self.frame.compatible?;

		let mut regs = heapless::Vec::<Regs, MAX_REGS>::new();
		for r in self.reg() {
			if regs.push(r).is_err() {
				break;
			}
		}

		Some(Device::new(self.frame.name, compatible, &regs, self.frame.method))
	}
}

/// Iterates over every node of a tree, children before parents.
#[derive(Debug, Clone)]
pub struct Nodes<'a> {
	/// The structure block.
	tokens:   FdtIter<'a>,
	/// Open nodes, root first.
	stack:    heapless::Vec<Frame<'a>, MAX_DEPTH>,
	/// Open nodes below [`MAX_DEPTH`].
	overflow: usize,
	/// Nodes skipped so far for being too deep.
	skipped:  usize,
}

impl<'a> Nodes<'a> {
	/// Starts a walk of `fdt`.
	#[must_use]
	pub fn new(fdt: &Fdt<'a>) -> Self {
		Self {
			tokens:   fdt.tokens(),
			stack:    heapless::Vec::new(),
			overflow: 0,
			skipped:  0,
		}
	}

	/// How many nodes were too deep to report so far.
	#[must_use]
	pub fn skipped(&self) -> usize {
		self.skipped
	}
}

impl<'a> Iterator for Nodes<'a> {
	type Item = Node<'a>;

	fn next(&mut self) -> Option<Self::Item> {
		loop {
			match self.tokens.next()? {
				FdtToken::Node { name } => {
					if self.overflow > 0 || self.stack.push(Frame::open(name)).is_err() {
						self.overflow += 1;
						self.skipped += 1;
					}
				}
				FdtToken::Property { name, value } => {
					if self.overflow == 0 {
						if let Some(frame) = self.stack.last_mut() {
							frame.apply(name, value);
						}
					}
				}
				FdtToken::EndNode => {
					if self.overflow > 0 {
						self.overflow -= 1;
						continue;
					}

					let frame = self.stack.pop()?;
					let parent = self.stack.last();
					let (address_cells, size_cells) = parent
						.map_or((DEFAULT_ADDRESS_CELLS, DEFAULT_SIZE_CELLS), |p| {
							(p.address_cells, p.size_cells)
						});

					return Some(Node {
						frame,
						parent: parent.map(|p| p.name),
						address_cells,
						size_cells,
					});
				}
				FdtToken::Nop => {}
				FdtToken::End => return None,
			}
		}
	}
}

/// The enabled devices in `fdt` that have a `compatible`, in tree order
/// (children first).
pub fn devices<'a>(fdt: &Fdt<'a>) -> impl Iterator<Item = Device<'a>> + use<'a> {
	Nodes::new(fdt)
		.filter(Node::is_enabled)
		.filter_map(|node| node.device())
}

/// The release words named by the enabled spin-table `cpu` nodes of
/// `fdt`, keyed by each node's first `reg` cell.
///
/// Nodes without a usable `cpu-release-addr` are left out, so their cores
/// keep the spin table's default layout.
pub fn release_addrs<'a>(fdt: &Fdt<'a>) -> impl Iterator<Item = ReleaseAddr> + use<'a> {
	Nodes::new(fdt)
		.filter(|n| n.is_enabled() && n.is_spin_table_cpu())
		.filter_map(|node| {
			Some(ReleaseAddr {
				target: node.reg().next()?.base,
				addr:   usize::try_from(node.frame.release_addr?).ok()?,
			})
		})
}

/// The RAM described by the `device_type = "memory"` nodes of `fdt`.
///
/// Empty windows are dropped; windows past the map's capacity are
/// ignored.
#[must_use]
pub fn memory_regions(fdt: &Fdt<'_>) -> MemoryMap {
	let mut map = MemoryMap::new();

	for node in Nodes::new(fdt).filter(|n| n.is_enabled() && n.is_memory()) {
		for r in node.reg().filter(|r| r.size > 0) {
			if map.push(MemoryRegion::new(r.base, r.size)).is_err() {
				return map;
			}
		}
	}

	map
}

/// The RAM `fdt` reserves: the memory reservation block's entries and the
/// `reg` windows of `/reserved-memory`'s enabled children.
///
/// Dynamically allocated reservations (`size` without `reg`) are not
/// placed yet and have nothing to report. Entries beyond the address space
/// are skipped; entries running past its end are clipped.
pub fn reserved_ranges<'a>(fdt: &Fdt<'a>) -> impl Iterator<Item = AddrRange> + use<'a> {
	let clipped = |base: usize, size: usize| AddrRange::new(base, base.saturating_add(size));

	let block = fdt.reservations().filter_map(move |r| {
		let base = usize::try_from(r.address).ok()?;
		Some(clipped(base, usize::try_from(r.size).unwrap_or(usize::MAX)))
	});

	let nodes = Nodes::new(fdt)
		.filter(|n| n.is_enabled() && n.parent_name() == Some("reserved-memory"))
		.flat_map(|n| n.reg())
		.map(move |r| clipped(r.base, r.size));

	block.chain(nodes)
}
