//! Local backend over a kernel control channel.
//!
//! Rich stream triggers and configuration lists are translated to the compact
//! shape before submission. Both the channel result and the request's
//! `err_no` are checked on every call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, instrument, warn};

use crate::control::{self, ControlChannel, ControlRequest};
use crate::error::{ErrorCode, MeError, Result};
use crate::notify::ListenerSet;
use crate::trigger::{self, ConvClassMapping, StreamConfigEntry, StreamTrigger};
use crate::types::{
    DeviceInfo, IrqWait, RangeInfo, SingleEntry, StreamStartEntry, StreamStatus,
    StreamStopEntry, TimerInfo,
};

use super::{DriverCalls, LockFlags, LockOp};

/// Relative slack allowed when matching a requested span against a range.
const RANGE_TOLERANCE: f64 = 0.0001;

/// Backend that talks to the kernel driver through a control channel.
pub struct LocalContext {
    channel: Arc<dyn ControlChannel>,
    open: AtomicBool,
    mapping: ConvClassMapping,
    pub(crate) listeners: ListenerSet,
}

impl LocalContext {
    /// Open a context on `channel`.
    pub fn new(channel: Arc<dyn ControlChannel>, mapping: ConvClassMapping) -> Self {
        debug!(channel = channel.label(), "local context opened");
        Self {
            channel,
            open: AtomicBool::new(true),
            mapping,
            listeners: ListenerSet::new(),
        }
    }

    pub(crate) fn channel_label(&self) -> &str {
        self.channel.label()
    }

    /// Submit one request and fold the channel result and `err_no` into one.
    fn call(&self, mut request: ControlRequest<'_>) -> Result<()> {
        if !self.open.load(Ordering::Acquire) {
            return Err(ErrorCode::NotOpen.into());
        }
        let code = request.code();
        if let Err(err) = self.channel.submit(&mut request) {
            error!(code = code.number(), %err, "control call failed");
            return Err(MeError::Internal(format!("control call {code:?}: {err}")));
        }
        match request.err_no() {
            0 => Ok(()),
            raw => {
                warn!(code = code.number(), err_no = raw, "driver reported failure");
                ErrorCode::check(raw)
            }
        }
    }

    fn query_text(&self, device: i32, pick: fn(&mut control::QueryText) -> ControlRequest<'_>) -> Result<String> {
        let mut query = control::QueryText {
            device,
            ..Default::default()
        };
        self.call(pick(&mut query))?;
        Ok(query.text)
    }

    fn query_number(
        &self,
        query: control::QueryNumber,
        pick: fn(&mut control::QueryNumber) -> ControlRequest<'_>,
    ) -> Result<i32> {
        let mut query = query;
        self.call(pick(&mut query))?;
        Ok(query.number)
    }

    fn lock_request(&self, device: i32, subdevice: i32, lock: LockOp, flags: LockFlags) -> control::Lock {
        control::Lock {
            device,
            subdevice,
            lock: lock.as_raw(),
            flags: flags.bits(),
            err_no: 0,
        }
    }
}

impl DriverCalls for LocalContext {
    fn close(&self) -> Result<()> {
        self.listeners.destroy(-1, -1);
        if self.open.swap(false, Ordering::AcqRel) {
            debug!(channel = self.channel.label(), "local context closed");
        }
        Ok(())
    }

    fn lock_driver(&self, lock: LockOp, flags: LockFlags) -> Result<()> {
        let mut request = self.lock_request(0, 0, lock, flags);
        self.call(ControlRequest::LockDriver(&mut request))
    }

    fn lock_device(&self, device: i32, lock: LockOp, flags: LockFlags) -> Result<()> {
        let mut request = self.lock_request(device, 0, lock, flags);
        self.call(ControlRequest::LockDevice(&mut request))
    }

    fn lock_subdevice(&self, device: i32, subdevice: i32, lock: LockOp, flags: LockFlags) -> Result<()> {
        let mut request = self.lock_request(device, subdevice, lock, flags);
        self.call(ControlRequest::LockSubdevice(&mut request))
    }

    fn query_driver_version(&self) -> Result<i32> {
        let mut query = control::QueryVersion::default();
        self.call(ControlRequest::QueryVersionMainDriver(&mut query))?;
        Ok(query.version)
    }

    fn query_driver_name(&self) -> Result<String> {
        self.query_text(0, |q| ControlRequest::QueryNameMainDriver(q))
    }

    fn query_device_driver_version(&self, device: i32) -> Result<i32> {
        let mut query = control::QueryVersion {
            device,
            ..Default::default()
        };
        self.call(ControlRequest::QueryVersionDeviceDriver(&mut query))?;
        Ok(query.version)
    }

    fn query_device_driver_name(&self, device: i32) -> Result<String> {
        self.query_text(device, |q| ControlRequest::QueryNameDeviceDriver(q))
    }

    fn query_device_name(&self, device: i32) -> Result<String> {
        self.query_text(device, |q| ControlRequest::QueryNameDevice(q))
    }

    fn query_device_description(&self, device: i32) -> Result<String> {
        self.query_text(device, |q| ControlRequest::QueryDescriptionDevice(q))
    }

    fn query_device_info(&self, device: i32) -> Result<DeviceInfo> {
        let mut query = control::QueryInfo {
            device,
            ..Default::default()
        };
        self.call(ControlRequest::QueryInfoDevice(&mut query))?;
        Ok(DeviceInfo {
            vendor_id: query.vendor_id,
            device_id: query.device_id,
            serial_no: query.serial_no,
            bus_type: query.bus_type,
            bus_no: query.bus_no,
            dev_no: query.dev_no,
            func_no: query.func_no,
            plugged: query.plugged,
        })
    }

    fn query_number_devices(&self) -> Result<i32> {
        self.query_number(Default::default(), |q| ControlRequest::QueryNumberDevices(q))
    }

    fn query_number_subdevices(&self, device: i32) -> Result<i32> {
        let query = control::QueryNumber {
            device,
            ..Default::default()
        };
        self.query_number(query, |q| ControlRequest::QueryNumberSubdevices(q))
    }

    fn query_number_subdevices_by_type(&self, device: i32, kind: i32, subtype: i32) -> Result<i32> {
        let query = control::QueryNumber {
            device,
            kind,
            subtype,
            ..Default::default()
        };
        self.query_number(query, |q| ControlRequest::QueryNumberSubdevicesByType(q))
    }

    fn query_number_channels(&self, device: i32, subdevice: i32) -> Result<i32> {
        let query = control::QueryNumber {
            device,
            subdevice,
            ..Default::default()
        };
        self.query_number(query, |q| ControlRequest::QueryNumberChannels(q))
    }

    fn query_number_ranges(&self, device: i32, subdevice: i32, unit: i32) -> Result<i32> {
        let query = control::QueryNumber {
            device,
            subdevice,
            unit,
            ..Default::default()
        };
        self.query_number(query, |q| ControlRequest::QueryNumberRanges(q))
    }

    fn query_range_info(&self, device: i32, subdevice: i32, range: i32) -> Result<RangeInfo> {
        let mut query = control::QueryRangeInfo {
            device,
            subdevice,
            range,
            ..Default::default()
        };
        self.call(ControlRequest::QueryRangeInfo(&mut query))?;
        Ok(RangeInfo {
            unit: query.unit,
            min: f64::from(query.min) / 1e6,
            max: f64::from(query.max) / 1e6,
            max_data: query.max_data,
        })
    }

    fn query_range_by_min_max(
        &self,
        device: i32,
        subdevice: i32,
        unit: i32,
        min: f64,
        max: f64,
    ) -> Result<(i32, RangeInfo)> {
        if max < min {
            return Err(ErrorCode::InvalidMinMax.into());
        }
        let count = self.query_number_ranges(device, subdevice, unit)?;
        let mut ranges = Vec::new();
        for index in 0..count {
            ranges.push((index, self.query_range_info(device, subdevice, index)?));
        }
        best_range(&ranges, min, max).ok_or(MeError::Code(ErrorCode::NoRange))
    }

    fn query_subdevice_by_type(&self, device: i32, start: i32, kind: i32, subtype: i32) -> Result<i32> {
        let mut query = control::QuerySubdeviceByType {
            device,
            start_subdevice: start,
            kind,
            subtype,
            ..Default::default()
        };
        self.call(ControlRequest::QuerySubdeviceByType(&mut query))?;
        Ok(query.subdevice)
    }

    fn query_subdevice_type(&self, device: i32, subdevice: i32) -> Result<(i32, i32)> {
        let mut query = control::QuerySubdeviceType {
            device,
            subdevice,
            ..Default::default()
        };
        self.call(ControlRequest::QuerySubdeviceType(&mut query))?;
        Ok((query.kind, query.subtype))
    }

    fn query_subdevice_caps(&self, device: i32, subdevice: i32) -> Result<i32> {
        let mut query = control::QueryCaps {
            device,
            subdevice,
            ..Default::default()
        };
        self.call(ControlRequest::QuerySubdeviceCaps(&mut query))?;
        Ok(query.caps)
    }

    fn query_subdevice_caps_args(&self, device: i32, subdevice: i32, cap: i32, args: &mut [i32]) -> Result<()> {
        let mut query = control::QueryCapsArgs {
            device,
            subdevice,
            cap,
            args: vec![0; args.len()],
            err_no: 0,
        };
        self.call(ControlRequest::QuerySubdeviceCapsArgs(&mut query))?;
        let filled = query.args.len().min(args.len());
        args[..filled].copy_from_slice(&query.args[..filled]);
        Ok(())
    }

    fn query_subdevice_timer(&self, device: i32, subdevice: i32, timer: i32) -> Result<TimerInfo> {
        let mut query = control::QueryTimer {
            device,
            subdevice,
            timer,
            ..Default::default()
        };
        self.call(ControlRequest::QuerySubdeviceTimer(&mut query))?;
        Ok(TimerInfo {
            base_frequency: query.base_frequency,
            min_ticks: query.min_ticks,
            max_ticks: query.max_ticks,
        })
    }

    fn irq_start(
        &self,
        device: i32,
        subdevice: i32,
        channel: i32,
        source: i32,
        edge: i32,
        arg: i32,
        flags: i32,
    ) -> Result<()> {
        let mut request = control::IrqStart {
            device,
            subdevice,
            channel,
            irq_source: source,
            irq_edge: edge,
            irq_arg: arg,
            flags,
            err_no: 0,
        };
        self.call(ControlRequest::IrqEnable(&mut request))
    }

    fn irq_wait(&self, device: i32, subdevice: i32, channel: i32, time_out: i32, flags: i32) -> Result<IrqWait> {
        let mut request = control::IrqWait {
            device,
            subdevice,
            channel,
            time_out,
            flags,
            ..Default::default()
        };
        self.call(ControlRequest::IrqWait(&mut request))?;
        Ok(IrqWait {
            irq_count: request.irq_count,
            value: request.value,
        })
    }

    fn irq_stop(&self, device: i32, subdevice: i32, channel: i32, flags: i32) -> Result<()> {
        let mut request = control::IrqStop {
            device,
            subdevice,
            channel,
            flags,
            err_no: 0,
        };
        self.call(ControlRequest::IrqDisable(&mut request))
    }

    fn irq_test(&self, device: i32, subdevice: i32, channel: i32, flags: i32) -> Result<()> {
        let mut request = control::IrqStop {
            device,
            subdevice,
            channel,
            flags,
            err_no: 0,
        };
        self.call(ControlRequest::IrqCheck(&mut request))
    }

    fn reset_device(&self, device: i32, flags: i32) -> Result<()> {
        let mut request = control::ResetDevice {
            device,
            flags,
            err_no: 0,
        };
        self.call(ControlRequest::ResetDevice(&mut request))
    }

    fn reset_subdevice(&self, device: i32, subdevice: i32, flags: i32) -> Result<()> {
        let mut request = control::ResetSubdevice {
            device,
            subdevice,
            flags,
            err_no: 0,
        };
        self.call(ControlRequest::ResetSubdevice(&mut request))
    }

    fn single_config(
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
        let mut request = control::SingleConfig {
            device,
            subdevice,
            channel,
            single_config: config,
            reference,
            trig_chain,
            trig_type,
            trig_edge,
            flags,
            err_no: 0,
        };
        self.call(ControlRequest::SingleConfig(&mut request))
    }

    #[instrument(skip(self, list), fields(count = list.len()))]
    fn single(&self, list: &mut [SingleEntry], flags: i32) -> Result<()> {
        if list.is_empty() {
            return Ok(());
        }
        let mut request = control::Single {
            list: list.to_vec(),
            flags,
            err_no: 0,
        };
        let result = self.call(ControlRequest::Single(&mut request));
        if request.list.len() == list.len() {
            list.copy_from_slice(&request.list);
        }
        result
    }

    fn stream_config(
        &self,
        device: i32,
        subdevice: i32,
        list: &[StreamConfigEntry],
        trigger: &StreamTrigger,
        fifo_irq_threshold: i32,
        flags: i32,
    ) -> Result<()> {
        let compact = trigger::to_compact(trigger, self.mapping)?;
        let (config_list, flags) = trigger::config_to_compact(list, flags)?;
        let mut request = control::StreamConfig {
            device,
            subdevice,
            config_list,
            trigger: compact,
            fifo_irq_threshold,
            flags,
            err_no: 0,
        };
        self.call(ControlRequest::StreamConfig(&mut request))
    }

    fn stream_new_values(&self, device: i32, subdevice: i32, time_out: i32, flags: i32) -> Result<i32> {
        let mut request = control::StreamNewValues {
            device,
            subdevice,
            time_out,
            flags,
            ..Default::default()
        };
        self.call(ControlRequest::StreamNewValues(&mut request))?;
        Ok(request.count)
    }

    fn stream_read(
        &self,
        device: i32,
        subdevice: i32,
        mode: i32,
        values: &mut [i32],
        time_out: i32,
        flags: i32,
    ) -> Result<usize> {
        let mut request = control::StreamTransfer {
            device,
            subdevice,
            mode,
            values: vec![0; values.len()],
            count: i32::try_from(values.len()).map_err(|_| ErrorCode::InvalidValueCount)?,
            time_out,
            flags,
            err_no: 0,
        };
        let result = self.call(ControlRequest::StreamRead(&mut request));
        let count = usize::try_from(request.count).unwrap_or(0).min(values.len());
        values[..count].copy_from_slice(&request.values[..count]);
        result.map(|()| count)
    }

    fn stream_write(
        &self,
        device: i32,
        subdevice: i32,
        mode: i32,
        values: &[i32],
        time_out: i32,
        flags: i32,
    ) -> Result<usize> {
        let mut request = control::StreamTransfer {
            device,
            subdevice,
            mode,
            values: values.to_vec(),
            count: i32::try_from(values.len()).map_err(|_| ErrorCode::InvalidValueCount)?,
            time_out,
            flags,
            err_no: 0,
        };
        self.call(ControlRequest::StreamWrite(&mut request))?;
        Ok(usize::try_from(request.count).unwrap_or(0))
    }

    fn stream_start(&self, list: &mut [StreamStartEntry], flags: i32) -> Result<()> {
        if list.is_empty() {
            return Ok(());
        }
        let mut request = control::StreamStart {
            list: list.to_vec(),
            flags,
            err_no: 0,
        };
        let result = self.call(ControlRequest::StreamStart(&mut request));
        if request.list.len() == list.len() {
            list.copy_from_slice(&request.list);
        }
        result
    }

    fn stream_stop(&self, list: &mut [StreamStopEntry], flags: i32) -> Result<()> {
        if list.is_empty() {
            return Ok(());
        }
        let mut request = control::StreamStop {
            list: list.to_vec(),
            flags,
            err_no: 0,
        };
        let result = self.call(ControlRequest::StreamStop(&mut request));
        if request.list.len() == list.len() {
            list.copy_from_slice(&request.list);
        }
        result
    }

    fn stream_status(&self, device: i32, subdevice: i32, wait: i32, flags: i32) -> Result<StreamStatus> {
        let mut request = control::StreamStatus {
            device,
            subdevice,
            wait,
            flags,
            ..Default::default()
        };
        self.call(ControlRequest::StreamStatus(&mut request))?;
        Ok(StreamStatus {
            status: request.status,
            count: request.count,
        })
    }

    fn stream_frequency_to_ticks(
        &self,
        device: i32,
        subdevice: i32,
        timer: i32,
        frequency: f64,
        _flags: i32,
    ) -> Result<(f64, u64)> {
        let limits = self.query_subdevice_timer(device, subdevice, timer)?;
        Ok(limits.frequency_to_ticks(frequency))
    }

    fn stream_time_to_ticks(
        &self,
        device: i32,
        subdevice: i32,
        timer: i32,
        time: f64,
        _flags: i32,
    ) -> Result<(f64, u64)> {
        let limits = self.query_subdevice_timer(device, subdevice, timer)?;
        Ok(limits.time_to_ticks(time))
    }

    fn set_offset(
        &self,
        device: i32,
        subdevice: i32,
        channel: i32,
        range: i32,
        offset: f64,
        flags: i32,
    ) -> Result<f64> {
        let mut request = control::SetOffset {
            device,
            subdevice,
            channel,
            range,
            offset: (offset * 1e6) as i32,
            flags,
            err_no: 0,
        };
        self.call(ControlRequest::SetOffset(&mut request))?;
        Ok(f64::from(request.offset) / 1e6)
    }

    fn parameters_set(&self, device: i32, params: &[u8], flags: i32) -> Result<()> {
        let mut request = control::ConfigLoad {
            device,
            params: params.to_vec(),
            flags,
            err_no: 0,
        };
        self.call(ControlRequest::ConfigLoad(&mut request))
    }
}

/// Index and limits of the tightest range enclosing `min..=max`.
fn best_range(ranges: &[(i32, RangeInfo)], min: f64, max: f64) -> Option<(i32, RangeInfo)> {
    let mut best: Option<(f64, i32, RangeInfo)> = None;
    for &(index, info) in ranges {
        let slack = (info.max - info.min) * RANGE_TOLERANCE;
        if info.min - slack > min || info.max + slack < max {
            continue;
        }
        let distance = (info.max - max).powi(2) + (info.min - min).powi(2);
        if best.map_or(true, |(current, _, _)| distance < current) {
            best = Some((distance, index, info));
        }
        if distance == 0.0 {
            break;
        }
    }
    best.map(|(_, index, info)| (index, info))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volt(min: f64, max: f64) -> RangeInfo {
        RangeInfo {
            unit: crate::defs::ME_UNIT_VOLT,
            min,
            max,
            max_data: 0xFFFF,
        }
    }

    #[test]
    fn test_best_range_prefers_tightest_fit() {
        let ranges = [(0, volt(-10.0, 10.0)), (1, volt(0.0, 10.0)), (2, volt(-2.5, 2.5))];
        assert_eq!(best_range(&ranges, -1.0, 1.0).map(|(i, _)| i), Some(2));
        assert_eq!(best_range(&ranges, 0.0, 9.0).map(|(i, _)| i), Some(1));
        assert_eq!(best_range(&ranges, -10.0, 10.0).map(|(i, _)| i), Some(0));
        assert!(best_range(&ranges, -20.0, 0.0).is_none());
    }
}
