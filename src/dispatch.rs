//! Logical-address dispatch.
//!
//! [`VirtualDispatcher`] is the public call surface of an open driver. Every
//! operation resolves the caller's logical device number, substitutes the
//! entry's physical number and forwards the call through the call table of
//! the entry's transport context. Resolution failures never reach a backend.
//!
//! List operations are split into runs of consecutive items served by the
//! same context; each run is one backend call and per-item results are
//! scattered back in caller order.

use std::sync::Arc;

use tracing::{debug, instrument, trace};

use crate::catalog::DeviceEntry;
use crate::context::{DriverCalls, LockFlags, LockOp, TransportContext};
use crate::defs::{ME_DIR_INPUT, ME_DIR_OUTPUT, ME_IO_SINGLE_NONBLOCKING, ME_PLUGGED_OUT};
use crate::error::{ErrorCode, ErrorReporter, MeError, Result};
use crate::notify::{IrqCallback, Listener, ListenerSet, ListenerTarget, StreamCallback};
use crate::resolver::{Lookup, Resolution};
use crate::trigger::{self, CompactConfigEntry, CompactTrigger, StreamConfigEntry, StreamTrigger};
use crate::types::{
    DeviceInfo, IrqWait, ListItem, RangeInfo, SingleEntry, StreamStartEntry, StreamStatus,
    StreamStopEntry, TimerInfo,
};

/// Callbacks of [`VirtualDispatcher::stream_set_callbacks`].
#[derive(Clone, Default)]
pub struct StreamCallbacks {
    /// Fired when the stream starts.
    pub start: Option<StreamCallback>,
    /// Fired when new values are available.
    pub new_values: Option<StreamCallback>,
    /// Fired when the stream stops.
    pub end: Option<StreamCallback>,
}

impl StreamCallbacks {
    fn is_empty(&self) -> bool {
        self.start.is_none() && self.new_values.is_none() && self.end.is_none()
    }
}

impl std::fmt::Debug for StreamCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCallbacks")
            .field("start", &self.start.is_some())
            .field("new_values", &self.new_values.is_some())
            .field("end", &self.end.is_some())
            .finish()
    }
}

/// Operation surface over logical device numbers.
///
/// Borrowed from a [`crate::driver::Driver`]; `L` is either the catalog
/// (linear lookup) or a shortcut table built from it.
pub struct VirtualDispatcher<'a, L: Lookup + ?Sized> {
    lookup: &'a L,
    reporter: &'a ErrorReporter,
}

impl<'a, L: Lookup + ?Sized> VirtualDispatcher<'a, L> {
    /// Dispatcher over `lookup`, recording failures in `reporter`.
    pub fn new(lookup: &'a L, reporter: &'a ErrorReporter) -> Self {
        Self { lookup, reporter }
    }

    fn resolve(&self, device: i32) -> Result<&'a DeviceEntry> {
        self.lookup.resolve(device).into_result()
    }

    /// Resolve `device` and run `call` on its backend with the physical
    /// number.
    fn forward<T>(
        &self,
        function: &str,
        device: i32,
        call: impl FnOnce(&dyn DriverCalls, i32) -> Result<T>,
    ) -> Result<T> {
        let result = self.resolve(device).and_then(|entry| {
            trace!(function, device, physical = entry.physical_no, "forwarding");
            call(entry.context.calls(), entry.physical_no)
        });
        self.reporter.report(function, result)
    }

    /// Serve a descriptive query, falling back to the cached entry when the
    /// board is unplugged.
    fn describe<T>(
        &self,
        function: &str,
        device: i32,
        call: impl FnOnce(&dyn DriverCalls, i32) -> Result<T>,
        cached: impl FnOnce(&DeviceEntry) -> T,
    ) -> Result<T> {
        let result = match self.lookup.resolve(device) {
            Resolution::Ready(entry) => call(entry.context.calls(), entry.physical_no),
            Resolution::Unplugged(entry) => {
                debug!(function, device, "serving unplugged device from catalog");
                Ok(cached(entry))
            }
            Resolution::Invalid(number) => Err(MeError::InvalidDevice(number)),
        };
        self.reporter.report(function, result)
    }

    // =========================================================================
    // Locks
    // =========================================================================

    /// Lock, release or check one device.
    pub fn lock_device(&self, device: i32, lock: LockOp, flags: LockFlags) -> Result<()> {
        self.forward("lock_device", device, |calls, physical| {
            calls.lock_device(physical, lock, flags)
        })
    }

    /// Lock, release or check one subdevice.
    pub fn lock_subdevice(&self, device: i32, subdevice: i32, lock: LockOp, flags: LockFlags) -> Result<()> {
        self.forward("lock_subdevice", device, |calls, physical| {
            calls.lock_subdevice(physical, subdevice, lock, flags)
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Version of the driver serving `device`.
    pub fn query_device_driver_version(&self, device: i32) -> Result<i32> {
        self.forward("query_device_driver_version", device, |calls, physical| {
            calls.query_device_driver_version(physical)
        })
    }

    /// Name of the driver serving `device`.
    pub fn query_device_driver_name(&self, device: i32) -> Result<String> {
        self.forward("query_device_driver_name", device, |calls, physical| {
            calls.query_device_driver_name(physical)
        })
    }

    /// Board name; served from the cached entry while the device is unplugged.
    pub fn query_device_name(&self, device: i32) -> Result<String> {
        self.describe(
            "query_device_name",
            device,
            |calls, physical| calls.query_device_name(physical),
            |entry| entry.name.clone(),
        )
    }

    /// Board description; served from the cached entry while the device is
    /// unplugged.
    pub fn query_device_description(&self, device: i32) -> Result<String> {
        self.describe(
            "query_device_description",
            device,
            |calls, physical| calls.query_device_description(physical),
            |entry| entry.description.clone(),
        )
    }

    /// Identification of a board. For an unplugged board the bus position
    /// is unknown and reported as `-1`.
    pub fn query_device_info(&self, device: i32) -> Result<DeviceInfo> {
        self.describe(
            "query_device_info",
            device,
            |calls, physical| calls.query_device_info(physical),
            |entry| DeviceInfo {
                vendor_id: entry.vendor_id,
                device_id: entry.device_id,
                serial_no: entry.serial_no,
                bus_type: entry.access.bus_type(),
                bus_no: -1,
                dev_no: -1,
                func_no: -1,
                plugged: ME_PLUGGED_OUT,
            },
        )
    }

    /// Number of subdevices on `device`.
    pub fn query_number_subdevices(&self, device: i32) -> Result<i32> {
        self.forward("query_number_subdevices", device, |calls, physical| {
            calls.query_number_subdevices(physical)
        })
    }

    /// Number of subdevices of `kind` and `subtype`.
    pub fn query_number_subdevices_by_type(&self, device: i32, kind: i32, subtype: i32) -> Result<i32> {
        self.forward("query_number_subdevices_by_type", device, |calls, physical| {
            calls.query_number_subdevices_by_type(physical, kind, subtype)
        })
    }

    /// Number of channels on a subdevice.
    pub fn query_number_channels(&self, device: i32, subdevice: i32) -> Result<i32> {
        self.forward("query_number_channels", device, |calls, physical| {
            calls.query_number_channels(physical, subdevice)
        })
    }

    /// Number of ranges in physical `unit` (`ME_UNIT_ANY` counts all).
    pub fn query_number_ranges(&self, device: i32, subdevice: i32, unit: i32) -> Result<i32> {
        self.forward("query_number_ranges", device, |calls, physical| {
            calls.query_number_ranges(physical, subdevice, unit)
        })
    }

    /// Unit, limits and resolution of one range.
    pub fn query_range_info(&self, device: i32, subdevice: i32, range: i32) -> Result<RangeInfo> {
        self.forward("query_range_info", device, |calls, physical| {
            calls.query_range_info(physical, subdevice, range)
        })
    }

    /// Best-fitting range covering `min..=max` in `unit`; returns its index
    /// and limits.
    pub fn query_range_by_min_max(
        &self,
        device: i32,
        subdevice: i32,
        unit: i32,
        min: f64,
        max: f64,
    ) -> Result<(i32, RangeInfo)> {
        self.forward("query_range_by_min_max", device, |calls, physical| {
            calls.query_range_by_min_max(physical, subdevice, unit, min, max)
        })
    }

    /// First subdevice at or after `start` matching `kind` and `subtype`.
    pub fn query_subdevice_by_type(&self, device: i32, start: i32, kind: i32, subtype: i32) -> Result<i32> {
        self.forward("query_subdevice_by_type", device, |calls, physical| {
            calls.query_subdevice_by_type(physical, start, kind, subtype)
        })
    }

    /// Type and subtype of a subdevice.
    pub fn query_subdevice_type(&self, device: i32, subdevice: i32) -> Result<(i32, i32)> {
        self.forward("query_subdevice_type", device, |calls, physical| {
            calls.query_subdevice_type(physical, subdevice)
        })
    }

    /// Capability bits of a subdevice.
    pub fn query_subdevice_caps(&self, device: i32, subdevice: i32) -> Result<i32> {
        self.forward("query_subdevice_caps", device, |calls, physical| {
            calls.query_subdevice_caps(physical, subdevice)
        })
    }

    /// Arguments of capability `cap`, written into `args`.
    pub fn query_subdevice_caps_args(&self, device: i32, subdevice: i32, cap: i32, args: &mut [i32]) -> Result<()> {
        self.forward("query_subdevice_caps_args", device, |calls, physical| {
            calls.query_subdevice_caps_args(physical, subdevice, cap, args)
        })
    }

    /// Limits of one subdevice timer.
    pub fn query_subdevice_timer(&self, device: i32, subdevice: i32, timer: i32) -> Result<TimerInfo> {
        self.forward("query_subdevice_timer", device, |calls, physical| {
            calls.query_subdevice_timer(physical, subdevice, timer)
        })
    }

    // =========================================================================
    // Interrupts and resets
    // =========================================================================

    /// Arm interrupt delivery on a subdevice.
    pub fn irq_start(
        &self,
        device: i32,
        subdevice: i32,
        channel: i32,
        source: i32,
        edge: i32,
        arg: i32,
        flags: i32,
    ) -> Result<()> {
        self.forward("irq_start", device, |calls, physical| {
            calls.irq_start(physical, subdevice, channel, source, edge, arg, flags)
        })
    }

    /// Block until an interrupt arrives or `time_out` milliseconds pass.
    pub fn irq_wait(&self, device: i32, subdevice: i32, channel: i32, time_out: i32, flags: i32) -> Result<IrqWait> {
        self.forward("irq_wait", device, |calls, physical| {
            calls.irq_wait(physical, subdevice, channel, time_out, flags)
        })
    }

    /// Disarm interrupt delivery.
    pub fn irq_stop(&self, device: i32, subdevice: i32, channel: i32, flags: i32) -> Result<()> {
        self.forward("irq_stop", device, |calls, physical| {
            calls.irq_stop(physical, subdevice, channel, flags)
        })
    }

    /// Poll for a pending interrupt without blocking.
    pub fn irq_test(&self, device: i32, subdevice: i32, channel: i32, flags: i32) -> Result<()> {
        self.forward("irq_test", device, |calls, physical| {
            calls.irq_test(physical, subdevice, channel, flags)
        })
    }

    /// Install an interrupt listener, or remove every listener of the
    /// subdevice when `callback` is `None`.
    ///
    /// The subdevice must pass the interrupt test before a listener starts.
    pub fn irq_set_callback(
        &self,
        device: i32,
        subdevice: i32,
        callback: Option<IrqCallback>,
        flags: i32,
    ) -> Result<()> {
        let result = self.resolve(device).and_then(|entry| {
            let context = &entry.context;
            let physical = entry.physical_no;
            match callback {
                Some(callback) => {
                    context.calls().irq_test(physical, subdevice, 0, flags)?;
                    ListenerSet::create(
                        context,
                        self.target(entry, subdevice),
                        Listener::Interrupt { flags, callback },
                    )
                }
                None => {
                    context.listeners().destroy(physical, subdevice);
                    Ok(())
                }
            }
        });
        self.reporter.report("irq_set_callback", result)
    }

    /// Reset a board; its listeners are torn down first.
    pub fn reset_device(&self, device: i32, flags: i32) -> Result<()> {
        let result = self.resolve(device).and_then(|entry| {
            let removed = entry.context.listeners().destroy(entry.physical_no, -1);
            debug!(device, removed, "listeners removed for reset");
            entry.context.calls().reset_device(entry.physical_no, flags)
        });
        self.reporter.report("reset_device", result)
    }

    /// Reset one subdevice; its listeners are torn down first.
    pub fn reset_subdevice(&self, device: i32, subdevice: i32, flags: i32) -> Result<()> {
        let result = self.resolve(device).and_then(|entry| {
            entry.context.listeners().destroy(entry.physical_no, subdevice);
            entry.context.calls().reset_subdevice(entry.physical_no, subdevice, flags)
        });
        self.reporter.report("reset_subdevice", result)
    }

    // =========================================================================
    // Single I/O
    // =========================================================================

    /// Configure a subdevice for single-value I/O.
    pub fn single_config(
        &self,
        device: i32,
        subdevice: i32,
        channel: i32,
        config: i32,
        reference: i32,
        trig_chain: i32,
        trig_type: i32,
        trig_edge: i32,
        flags: i32,
    ) -> Result<()> {
        self.forward("single_config", device, |calls, physical| {
            calls.single_config(
                physical, subdevice, channel, config, reference, trig_chain, trig_type, trig_edge, flags,
            )
        })
    }

    /// Execute a list of single reads and writes across any number of
    /// boards.
    ///
    /// With [`ME_IO_SINGLE_NONBLOCKING`] every item is attempted, failures
    /// are only recorded in the items and the call succeeds.
    #[instrument(skip(self, list), fields(count = list.len()))]
    pub fn single(&self, list: &mut [SingleEntry], flags: i32) -> Result<()> {
        let result = self.run_list(list, flags & ME_IO_SINGLE_NONBLOCKING != 0, |calls, run| {
            calls.single(run, flags)
        });
        self.reporter.report("single", result)
    }

    /// Read one channel.
    pub fn single_read(&self, device: i32, subdevice: i32, channel: i32, time_out: i32, flags: i32) -> Result<i32> {
        let mut entry = SingleEntry {
            device,
            subdevice,
            channel,
            dir: ME_DIR_INPUT,
            time_out,
            flags,
            ..Default::default()
        };
        self.single_one("single_read", &mut entry)?;
        Ok(entry.value)
    }

    /// Write one channel.
    pub fn single_write(
        &self,
        device: i32,
        subdevice: i32,
        channel: i32,
        value: i32,
        time_out: i32,
        flags: i32,
    ) -> Result<()> {
        let mut entry = SingleEntry {
            device,
            subdevice,
            channel,
            dir: ME_DIR_OUTPUT,
            value,
            time_out,
            flags,
            ..Default::default()
        };
        self.single_one("single_write", &mut entry)
    }

    fn single_one(&self, function: &str, entry: &mut SingleEntry) -> Result<()> {
        let result = self.resolve(entry.device).and_then(|resolved| {
            let mut item = SingleEntry {
                device: resolved.physical_no,
                ..*entry
            };
            let outcome = resolved
                .context
                .calls()
                .single(std::slice::from_mut(&mut item), 0);
            entry.take_results(&item);
            outcome?;
            ErrorCode::check(item.errno)
        });
        self.reporter.report(function, result)
    }

    // =========================================================================
    // Streaming
    // =========================================================================

    /// Configure a stream with rich trigger records.
    pub fn stream_config(
        &self,
        device: i32,
        subdevice: i32,
        list: &[StreamConfigEntry],
        trigger: &StreamTrigger,
        fifo_irq_threshold: i32,
        flags: i32,
    ) -> Result<()> {
        if list.is_empty() {
            return self
                .reporter
                .report("stream_config", Err(ErrorCode::InvalidConfigListCount.into()));
        }
        self.forward("stream_config", device, |calls, physical| {
            calls.stream_config(physical, subdevice, list, trigger, fifo_irq_threshold, flags)
        })
    }

    /// Configure a stream with the compact description.
    ///
    /// The compact shape is expanded to rich records first, so both local
    /// and remote backends serve it.
    pub fn stream_configure(
        &self,
        device: i32,
        subdevice: i32,
        list: &[CompactConfigEntry],
        trigger: &CompactTrigger,
        fifo_irq_threshold: i32,
        flags: i32,
    ) -> Result<()> {
        if list.is_empty() {
            return self
                .reporter
                .report("stream_configure", Err(ErrorCode::InvalidConfigListCount.into()));
        }
        let (rich_list, flags) = trigger::config_to_rich(list, flags);
        self.forward("stream_configure", device, |calls, physical| {
            let rich_trigger = trigger::to_rich(trigger)?;
            calls.stream_config(physical, subdevice, &rich_list, &rich_trigger, fifo_irq_threshold, flags)
        })
    }

    /// Wait until new values are available; returns how many.
    pub fn stream_new_values(&self, device: i32, subdevice: i32, time_out: i32, flags: i32) -> Result<i32> {
        self.forward("stream_new_values", device, |calls, physical| {
            calls.stream_new_values(physical, subdevice, time_out, flags)
        })
    }

    /// Read acquired values; returns how many of `values` were filled.
    pub fn stream_read(
        &self,
        device: i32,
        subdevice: i32,
        mode: i32,
        values: &mut [i32],
        time_out: i32,
        flags: i32,
    ) -> Result<usize> {
        self.forward("stream_read", device, |calls, physical| {
            calls.stream_read(physical, subdevice, mode, values, time_out, flags)
        })
    }

    /// Queue output values; returns how many were accepted.
    pub fn stream_write(
        &self,
        device: i32,
        subdevice: i32,
        mode: i32,
        values: &[i32],
        time_out: i32,
        flags: i32,
    ) -> Result<usize> {
        self.forward("stream_write", device, |calls, physical| {
            calls.stream_write(physical, subdevice, mode, values, time_out, flags)
        })
    }

    /// Start streams across any number of boards.
    pub fn stream_start(&self, list: &mut [StreamStartEntry], flags: i32) -> Result<()> {
        let result = self.run_list(list, flags & ME_IO_SINGLE_NONBLOCKING != 0, |calls, run| {
            calls.stream_start(run, flags)
        });
        self.reporter.report("stream_start", result)
    }

    /// Stop streams across any number of boards.
    pub fn stream_stop(&self, list: &mut [StreamStopEntry], flags: i32) -> Result<()> {
        let result = self.run_list(list, flags & ME_IO_SINGLE_NONBLOCKING != 0, |calls, run| {
            calls.stream_stop(run, flags)
        });
        self.reporter.report("stream_stop", result)
    }

    /// Stream state and value count.
    pub fn stream_status(&self, device: i32, subdevice: i32, wait: i32, flags: i32) -> Result<StreamStatus> {
        self.forward("stream_status", device, |calls, physical| {
            calls.stream_status(physical, subdevice, wait, flags)
        })
    }

    /// Convert a frequency to timer ticks for `timer`.
    ///
    /// Returns the frequency the board will actually run at.
    pub fn stream_frequency_to_ticks(
        &self,
        device: i32,
        subdevice: i32,
        timer: i32,
        frequency: f64,
        flags: i32,
    ) -> Result<(f64, u64)> {
        self.forward("stream_frequency_to_ticks", device, |calls, physical| {
            calls.stream_frequency_to_ticks(physical, subdevice, timer, frequency, flags)
        })
    }

    /// Convert a period in seconds to timer ticks for `timer`.
    pub fn stream_time_to_ticks(
        &self,
        device: i32,
        subdevice: i32,
        timer: i32,
        time: f64,
        flags: i32,
    ) -> Result<(f64, u64)> {
        self.forward("stream_time_to_ticks", device, |calls, physical| {
            calls.stream_time_to_ticks(physical, subdevice, timer, time, flags)
        })
    }

    /// Install stream listeners, or remove every listener of the subdevice
    /// when no callback is given.
    ///
    /// Listeners start in the order new-values, start, end. The first
    /// failure is returned after all installs were attempted.
    pub fn stream_set_callbacks(
        &self,
        device: i32,
        subdevice: i32,
        callbacks: StreamCallbacks,
        flags: i32,
    ) -> Result<()> {
        let result = self.resolve(device).and_then(|entry| {
            if flags != 0 {
                return Err(ErrorCode::InvalidFlags.into());
            }
            let context = &entry.context;
            if callbacks.is_empty() {
                context.listeners().destroy(entry.physical_no, subdevice);
                return Ok(());
            }
            let target = self.target(entry, subdevice);
            let listeners = [
                callbacks.new_values.map(Listener::StreamNewValues),
                callbacks.start.map(Listener::StreamStart),
                callbacks.end.map(Listener::StreamStop),
            ];
            listeners
                .into_iter()
                .flatten()
                .map(|listener| ListenerSet::create(context, target, listener))
                .fold(Ok(()), |first, next| first.and(next))
        });
        self.reporter.report("stream_set_callbacks", result)
    }

    // =========================================================================
    // Calibration and parameters
    // =========================================================================

    /// Apply a channel offset in volts; returns the offset actually set.
    pub fn set_offset(
        &self,
        device: i32,
        subdevice: i32,
        channel: i32,
        range: i32,
        offset: f64,
        flags: i32,
    ) -> Result<f64> {
        self.forward("set_offset", device, |calls, physical| {
            calls.set_offset(physical, subdevice, channel, range, offset, flags)
        })
    }

    /// Load a device parameter block.
    pub fn parameters_set(&self, device: i32, params: &[u8], flags: i32) -> Result<()> {
        self.forward("parameters_set", device, |calls, physical| {
            calls.parameters_set(physical, params, flags)
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn target(&self, entry: &DeviceEntry, subdevice: i32) -> ListenerTarget {
        ListenerTarget {
            physical: entry.physical_no,
            logical: entry.logical_no,
            subdevice,
        }
    }

    /// Resolve every item, call the backend once per run of items sharing a
    /// context and copy results back.
    ///
    /// Unless `nonblocking`, the first resolution or backend failure ends
    /// the call; items after it are left untouched.
    fn run_list<T: ListItem>(
        &self,
        list: &mut [T],
        nonblocking: bool,
        call: impl Fn(&dyn DriverCalls, &mut [T]) -> Result<()>,
    ) -> Result<()> {
        if list.is_empty() {
            return Err(ErrorCode::InvalidConfigListCount.into());
        }

        let mut routed: Vec<T> = list.to_vec();
        let mut owners: Vec<Option<&'a Arc<TransportContext>>> = Vec::with_capacity(list.len());
        let mut outcome = Ok(());
        for item in routed.iter_mut() {
            match self.resolve(item.device()) {
                Ok(entry) => {
                    item.set_device(entry.physical_no);
                    owners.push(Some(&entry.context));
                }
                Err(err) => {
                    item.set_errno(err.code());
                    owners.push(None);
                    if !nonblocking {
                        outcome = Err(err);
                        break;
                    }
                }
            }
        }

        if outcome.is_ok() {
            let mut start = 0;
            while start < owners.len() {
                let Some(context) = owners[start] else {
                    start += 1;
                    continue;
                };
                let end = owners[start..]
                    .iter()
                    .position(|owner| !owner.is_some_and(|other| Arc::ptr_eq(other, context)))
                    .map_or(owners.len(), |offset| start + offset);
                trace!(context = %context.label(), start, end, "list run");
                if let Err(err) = call(context.calls(), &mut routed[start..end]) {
                    debug!(context = %context.label(), %err, "list run failed");
                    if !nonblocking {
                        outcome = Err(err);
                        break;
                    }
                }
                start = end;
            }
        }

        for (item, result) in list.iter_mut().zip(&routed) {
            item.take_results(result);
        }
        if nonblocking {
            Ok(())
        } else {
            outcome
        }
    }
}

impl<L: Lookup + ?Sized> std::fmt::Debug for VirtualDispatcher<'_, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualDispatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{AccessKind, Catalog, PlugState};
    use crate::context::LocalContext;
    use crate::defs::*;
    use crate::sim::{SimBoard, SimulatedDriver};
    use crate::trigger::ConvClassMapping;

    fn catalog_with(sim: Arc<SimulatedDriver>, plug: PlugState) -> Catalog {
        let context = Arc::new(TransportContext::Local(LocalContext::new(sim, ConvClassMapping::Straight)));
        let mut catalog = Catalog::new();
        catalog
            .append(&DeviceEntry {
                context,
                access: AccessKind::Pci {
                    bus: 3,
                    device: 0,
                    function: 0,
                },
                logical_no: 5,
                physical_no: 0,
                plug,
                vendor_id: 0x1402,
                device_id: 0x4680,
                serial_no: 11,
                name: "ME-4680".into(),
                description: "Cached description".into(),
                subdevices: Vec::new(),
            })
            .unwrap();
        catalog
    }

    #[test]
    fn test_forward_uses_physical_number() {
        let sim = Arc::new(SimulatedDriver::new(vec![SimBoard::multifunction(11)]));
        let catalog = catalog_with(sim, PlugState::Present);
        let reporter = ErrorReporter::new();
        let dispatcher = VirtualDispatcher::new(&catalog, &reporter);

        assert_eq!(dispatcher.query_number_subdevices(5).unwrap(), 5);
        assert_eq!(
            dispatcher.query_number_subdevices(0).unwrap_err(),
            MeError::InvalidDevice(0)
        );
        assert_eq!(reporter.last_error(true), ErrorCode::InvalidDevice);
    }

    #[test]
    fn test_unplugged_info_comes_from_catalog() {
        let sim = Arc::new(SimulatedDriver::new(vec![SimBoard::multifunction(11)]));
        let catalog = catalog_with(sim, PlugState::Absent);
        let reporter = ErrorReporter::new();
        let dispatcher = VirtualDispatcher::new(&catalog, &reporter);

        let info = dispatcher.query_device_info(5).unwrap();
        assert_eq!(info.plugged, ME_PLUGGED_OUT);
        assert_eq!(info.bus_type, ME_BUS_TYPE_PCI);
        assert_eq!((info.bus_no, info.dev_no, info.func_no), (-1, -1, -1));
        assert_eq!(dispatcher.query_device_description(5).unwrap(), "Cached description");
        assert_eq!(
            dispatcher.query_number_subdevices(5).unwrap_err(),
            MeError::DeviceUnplugged(5)
        );
    }

    #[test]
    fn test_empty_list_is_rejected() {
        let sim = Arc::new(SimulatedDriver::new(vec![SimBoard::multifunction(11)]));
        let catalog = catalog_with(sim, PlugState::Present);
        let reporter = ErrorReporter::new();
        let dispatcher = VirtualDispatcher::new(&catalog, &reporter);
        assert_eq!(
            dispatcher.single(&mut [], 0).unwrap_err().code(),
            ErrorCode::InvalidConfigListCount
        );
    }

    #[test]
    fn test_single_write_then_read_back() {
        let sim = Arc::new(SimulatedDriver::new(vec![SimBoard::multifunction(11)]));
        let catalog = catalog_with(Arc::clone(&sim), PlugState::Present);
        let reporter = ErrorReporter::new();
        let dispatcher = VirtualDispatcher::new(&catalog, &reporter);

        dispatcher.single_write(5, 1, 2, 0x1234, 0, 0).unwrap();
        sim.set_input(0, 0, 3, 0x4321);
        assert_eq!(dispatcher.single_read(5, 0, 3, 0, 0).unwrap(), 0x4321);
        assert_eq!(
            dispatcher.single_read(5, 0, 99, 0, 0).unwrap_err().code(),
            ErrorCode::InvalidChannel
        );
    }
}
