//! Catalog discovery.
//!
//! [`probe`] walks everything a backend reports through metadata queries and
//! turns it into catalog entries with physical numbers `0..n`. Logical
//! numbers are left unbound for the caller to enumerate.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::catalog::{AccessKind, Catalog, DeviceEntry, Extension, PlugState, RangeEntry, SubdeviceEntry, UNBOUND};
use crate::context::{DriverCalls, TransportContext};
use crate::defs::{ME_BUS_TYPE_USB, ME_PLUGGED_IN, ME_UNIT_ANY};
use crate::error::Result;
use crate::types::DeviceInfo;

/// Build a catalog of every board served by `context`.
///
/// Boards reported as unplugged get a cached entry without subdevices and
/// physical number [`UNBOUND`].
pub fn probe(context: &Arc<TransportContext>) -> Result<Catalog> {
    let calls = context.calls();
    let count = calls.query_number_devices()?;
    let mut catalog = Catalog::new();

    for physical in 0..count {
        let info = calls.query_device_info(physical)?;
        let plugged = info.plugged == ME_PLUGGED_IN;
        let entry = DeviceEntry {
            context: Arc::clone(context),
            access: access_kind(context, &info),
            logical_no: UNBOUND,
            physical_no: if plugged { physical } else { UNBOUND },
            plug: if plugged { PlugState::Present } else { PlugState::Absent },
            vendor_id: info.vendor_id,
            device_id: info.device_id,
            serial_no: info.serial_no,
            name: calls.query_device_name(physical)?,
            description: calls.query_device_description(physical)?,
            subdevices: if plugged {
                probe_subdevices(calls, physical)?
            } else {
                warn!(context = %context.label(), physical, "board unplugged; cataloguing without subdevices");
                Vec::new()
            },
        };
        debug!(
            context = %context.label(),
            physical,
            name = %entry.name,
            subdevices = entry.subdevices.len(),
            "device discovered"
        );
        catalog.append(&entry)?;
    }

    info!(context = %context.label(), devices = catalog.len(), "discovery finished");
    Ok(catalog)
}

fn access_kind(context: &TransportContext, info: &DeviceInfo) -> AccessKind {
    match context {
        TransportContext::Remote(remote) => AccessKind::Network {
            host: remote.peer().to_string(),
        },
        _ if info.bus_type == ME_BUS_TYPE_USB => AccessKind::Usb {
            root_hub: u32::try_from(info.bus_no).unwrap_or(0),
        },
        _ => AccessKind::Pci {
            bus: info.bus_no,
            device: info.dev_no,
            function: info.func_no,
        },
    }
}

fn probe_subdevices(calls: &dyn DriverCalls, device: i32) -> Result<Vec<SubdeviceEntry>> {
    let count = calls.query_number_subdevices(device)?;
    let mut subdevices = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
    for subdevice in 0..count {
        let (kind, subtype) = calls.query_subdevice_type(device, subdevice)?;
        let channels = calls.query_number_channels(device, subdevice)?;
        let ranges = calls.query_number_ranges(device, subdevice, ME_UNIT_ANY)?;
        let ranges = (0..ranges)
            .map(|range| {
                calls
                    .query_range_info(device, subdevice, range)
                    .map(|info| RangeEntry {
                        unit: info.unit,
                        min: info.min,
                        max: info.max,
                        max_data: info.max_data,
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        subdevices.push(SubdeviceEntry {
            kind,
            subtype,
            channels,
            locked: false,
            extension: Extension::None,
            ranges,
        });
    }
    Ok(subdevices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::LocalContext;
    use crate::defs::{ME_SUBTYPE_STREAMING, ME_TYPE_AI};
    use crate::sim::{SimBoard, SimulatedDriver};
    use crate::trigger::ConvClassMapping;

    #[test]
    fn test_probe_builds_full_tree() {
        let sim = Arc::new(SimulatedDriver::new(vec![
            SimBoard::multifunction(100),
            SimBoard::digital(200),
        ]));
        sim.unplug(1);
        let context = Arc::new(TransportContext::Local(LocalContext::new(sim, ConvClassMapping::Straight)));

        let catalog = probe(&context).unwrap();
        assert_eq!(catalog.len(), 2);

        let board = &catalog.devices()[0];
        assert_eq!(board.physical_no, 0);
        assert_eq!(board.logical_no, UNBOUND);
        assert_eq!(board.plug, PlugState::Present);
        assert_eq!(board.serial_no, 100);
        assert!(matches!(board.access, AccessKind::Pci { .. }));
        let ai = &board.subdevices[0];
        assert_eq!((ai.kind, ai.subtype, ai.channels), (ME_TYPE_AI, ME_SUBTYPE_STREAMING, 16));
        assert_eq!(ai.ranges.len(), 4);
        assert_eq!(ai.ranges[1].max, 2.5);

        let pulled = &catalog.devices()[1];
        assert_eq!(pulled.physical_no, UNBOUND);
        assert_eq!(pulled.plug, PlugState::Absent);
        assert!(pulled.subdevices.is_empty());
        assert_eq!(pulled.name, "ME-1000");
    }
}
