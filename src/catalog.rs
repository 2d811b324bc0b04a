//! Device configuration catalog.
//!
//! The catalog is an owned tree: a flat list of [`DeviceEntry`] values, each
//! owning its subdevices, each owning its ranges. The only shared piece is the
//! transport context, which several entries of the same backend point at.
//!
//! Logical numbers are the caller-visible addresses. They are assigned by
//! [`Catalog::enumerate`] or [`Catalog::continue_enumerate`] and are unique
//! among bound entries (`logical_no >= 0`).

use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::{debug, warn};

use crate::context::TransportContext;
use crate::error::{MeError, Result};

/// Logical or physical number meaning "not assigned".
pub const UNBOUND: i32 = -1;

/// How a device is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessKind {
    /// Local PCI board.
    Pci {
        /// PCI bus number.
        bus: i32,
        /// PCI device (slot) number.
        device: i32,
        /// PCI function number.
        function: i32,
    },
    /// Local USB board.
    Usb {
        /// Root hub the board hangs off.
        root_hub: u32,
    },
    /// Local USB oscilloscope-class board.
    UsbScope {
        /// Root hub the board hangs off.
        root_hub: u32,
    },
    /// Board exported by a remote peer.
    Network {
        /// Host name or address of the peer.
        host: String,
    },
}

impl AccessKind {
    /// Bus type code reported by the info query.
    pub fn bus_type(&self) -> i32 {
        match self {
            Self::Pci { .. } => crate::defs::ME_BUS_TYPE_PCI,
            Self::Usb { .. } | Self::UsbScope { .. } => crate::defs::ME_BUS_TYPE_USB,
            Self::Network { .. } => crate::defs::ME_BUS_TYPE_ANY,
        }
    }

    fn try_clone(&self) -> Result<Self> {
        Ok(match self {
            Self::Network { host } => Self::Network {
                host: try_clone_str(host)?,
            },
            other => other.clone(),
        })
    }
}

/// Plug state of a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlugState {
    /// Bound and present.
    Present,
    /// Bound but the board is not plugged in.
    Absent,
    /// Placeholder that must not be handed out.
    Blocked,
    /// Already bound to a discovered board and not reassignable.
    Used,
}

impl PlugState {
    /// Whether calls may be forwarded to the backend.
    pub fn is_reachable(self) -> bool {
        matches!(self, Self::Present | Self::Used)
    }
}

/// Multiplexer fitted to an analog input channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mux32 {
    pub kind: i32,
    pub timed: bool,
    pub ai_channel: u32,
    pub dio_device: u32,
    pub dio_subdevice: u32,
    pub timer_device: u32,
    pub timer_subdevice: u32,
    pub mux32s_count: u32,
}

/// Demultiplexer fitted to an analog output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Demux32 {
    pub kind: i32,
    pub timed: bool,
    pub ao_channel: u32,
    pub dio_device: u32,
    pub dio_subdevice: u32,
    pub timer_device: u32,
    pub timer_subdevice: u32,
}

/// Signal-routing extension attached to a subdevice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Extension {
    /// No extension.
    #[default]
    None,
    /// Input multiplexer.
    Mux32(Mux32),
    /// Output demultiplexer.
    Demux32(Demux32),
}

/// One measurement range of a subdevice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeEntry {
    /// Physical unit code.
    pub unit: i32,
    /// Lower bound in physical units.
    pub min: f64,
    /// Upper bound in physical units.
    pub max: f64,
    /// Largest raw code.
    pub max_data: i32,
}

/// One functional unit of a board.
#[derive(Debug, Clone, PartialEq)]
pub struct SubdeviceEntry {
    /// Type classification (analog in, digital I/O, ...).
    pub kind: i32,
    /// Subtype classification (single, streaming, ...).
    pub subtype: i32,
    /// Number of channels.
    pub channels: i32,
    /// Whether this subdevice is locked.
    pub locked: bool,
    /// Attached routing extension.
    pub extension: Extension,
    /// Ranges in backend order.
    pub ranges: Vec<RangeEntry>,
}

impl SubdeviceEntry {
    fn try_clone(&self) -> Result<Self> {
        let mut ranges = Vec::new();
        ranges
            .try_reserve_exact(self.ranges.len())
            .map_err(|_| MeError::OutOfMemory)?;
        ranges.extend_from_slice(&self.ranges);
        Ok(Self {
            kind: self.kind,
            subtype: self.subtype,
            channels: self.channels,
            locked: self.locked,
            extension: self.extension,
            ranges,
        })
    }
}

/// One board known to the runtime.
#[derive(Debug, Clone)]
pub struct DeviceEntry {
    /// Backend that serves this board.
    pub context: Arc<TransportContext>,
    /// Transport kind and its addressing payload.
    pub access: AccessKind,
    /// Caller-visible number, [`UNBOUND`] if unassigned.
    pub logical_no: i32,
    /// Backend-local index, [`UNBOUND`] if unplugged.
    pub physical_no: i32,
    /// Plug state.
    pub plug: PlugState,
    pub vendor_id: i32,
    pub device_id: i32,
    pub serial_no: i32,
    /// Board name.
    pub name: String,
    /// Board description.
    pub description: String,
    /// Subdevices in backend order.
    pub subdevices: Vec<SubdeviceEntry>,
}

impl DeviceEntry {
    /// Deep copy that reports allocation failure instead of aborting.
    pub fn try_clone(&self) -> Result<Self> {
        let mut subdevices = Vec::new();
        subdevices
            .try_reserve_exact(self.subdevices.len())
            .map_err(|_| MeError::OutOfMemory)?;
        for subdevice in &self.subdevices {
            subdevices.push(subdevice.try_clone()?);
        }
        Ok(Self {
            context: Arc::clone(&self.context),
            access: self.access.try_clone()?,
            logical_no: self.logical_no,
            physical_no: self.physical_no,
            plug: self.plug,
            vendor_id: self.vendor_id,
            device_id: self.device_id,
            serial_no: self.serial_no,
            name: try_clone_str(&self.name)?,
            description: try_clone_str(&self.description)?,
            subdevices,
        })
    }

    /// Whether this entry is the "no such device" sentinel.
    pub fn is_dummy(&self) -> bool {
        std::ptr::eq(self, dummy_entry())
    }
}

static DUMMY_ENTRY: Lazy<DeviceEntry> = Lazy::new(|| DeviceEntry {
    context: Arc::new(TransportContext::dummy()),
    access: AccessKind::Network {
        host: String::new(),
    },
    logical_no: UNBOUND,
    physical_no: UNBOUND,
    plug: PlugState::Blocked,
    vendor_id: 0,
    device_id: 0,
    serial_no: 0,
    name: String::new(),
    description: String::new(),
    subdevices: Vec::new(),
});

/// The immutable sentinel returned by failed resolutions.
pub fn dummy_entry() -> &'static DeviceEntry {
    &DUMMY_ENTRY
}

fn try_clone_str(source: &str) -> Result<String> {
    let mut copy = String::new();
    copy.try_reserve_exact(source.len())
        .map_err(|_| MeError::OutOfMemory)?;
    copy.push_str(source);
    Ok(copy)
}

/// Ordered collection of device entries.
#[derive(Debug, Default)]
pub struct Catalog {
    devices: Vec<DeviceEntry>,
}

impl Catalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries in storage order.
    pub fn devices(&self) -> &[DeviceEntry] {
        &self.devices
    }

    /// Mutable access to entries, for binding steps that edit plug states.
    pub fn devices_mut(&mut self) -> &mut [DeviceEntry] {
        &mut self.devices
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the catalog has no entries.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Append a deep copy of `entry`.
    ///
    /// On allocation failure nothing is linked into the catalog.
    pub fn append(&mut self, entry: &DeviceEntry) -> Result<()> {
        self.devices
            .try_reserve(1)
            .map_err(|_| MeError::OutOfMemory)?;
        let copy = entry.try_clone()?;
        self.devices.push(copy);
        Ok(())
    }

    /// New catalog holding copies of `a` followed by copies of `b`.
    pub fn join(a: &Catalog, b: &Catalog) -> Result<Catalog> {
        let mut joined = Catalog::new();
        joined
            .devices
            .try_reserve_exact(a.len() + b.len())
            .map_err(|_| MeError::OutOfMemory)?;
        for entry in a.devices.iter().chain(b.devices.iter()) {
            joined.append(entry)?;
        }
        Ok(joined)
    }

    /// Deep copy of the whole catalog.
    pub fn duplicate(&self) -> Result<Catalog> {
        Catalog::join(self, &Catalog::new())
    }

    /// Number every entry `start, start + 1, ...` in storage order.
    pub fn enumerate(&mut self, start: i32) {
        for (offset, entry) in self.devices.iter_mut().enumerate() {
            entry.logical_no = start + offset as i32;
        }
        debug!(start, count = self.devices.len(), "catalog enumerated");
    }

    /// Give every unbound entry the lowest free number `>= start`.
    ///
    /// Bound entries keep their numbers.
    pub fn continue_enumerate(&mut self, start: i32) {
        let mut taken: HashSet<i32> = self
            .devices
            .iter()
            .filter(|entry| entry.logical_no >= 0)
            .map(|entry| entry.logical_no)
            .collect();
        let mut candidate = start.max(0);
        for entry in self.devices.iter_mut().filter(|e| e.logical_no < 0) {
            while taken.contains(&candidate) {
                candidate += 1;
            }
            entry.logical_no = candidate;
            taken.insert(candidate);
            debug!(logical = candidate, "assigned free logical number");
        }
    }

    /// Unbind every entry.
    pub fn denumerate(&mut self) {
        for entry in &mut self.devices {
            entry.logical_no = UNBOUND;
        }
    }

    /// Check logical numbers and block entries pending a bind step.
    ///
    /// Entries without a physical number become blocked, and so does every
    /// entry that is not already in use.
    pub fn verify(&mut self) -> Result<()> {
        let mut seen = HashSet::new();
        for entry in self.devices.iter().filter(|e| e.logical_no >= 0) {
            if !seen.insert(entry.logical_no) {
                warn!(logical = entry.logical_no, "duplicate logical number");
                return Err(MeError::DuplicateLogicalNumber(entry.logical_no));
            }
        }
        for entry in &mut self.devices {
            if entry.physical_no < 0 || entry.plug != PlugState::Used {
                entry.plug = PlugState::Blocked;
            }
        }
        Ok(())
    }

    /// Highest logical number in use, `-1` when there is none.
    pub fn max_number(&self) -> i32 {
        self.devices
            .iter()
            .map(|entry| entry.logical_no)
            .max()
            .unwrap_or(UNBOUND)
            .max(UNBOUND)
    }

    /// Drop every entry. Safe to call repeatedly.
    pub fn clean(&mut self) {
        self.devices.clear();
        self.devices.shrink_to_fit();
    }
}
