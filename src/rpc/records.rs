//! Parameter and result records of every remote procedure.
//!
//! Field order is the wire order. Procedures whose result is a bare status
//! reply with an `i32`; procedures that take only a device number take an
//! `i32` argument.
#![allow(missing_docs)]

use super::xdr::xdr_record;
use crate::trigger::{StreamConfigEntry, StreamTrigger, TRIGGER_ARGS};
use crate::types::{
    DeviceInfo, IrqWait, RangeInfo, SingleEntry, StreamStartEntry, StreamStatus,
    StreamStopEntry,
};

/// Split a tick count into the low and high wire words.
pub fn split_ticks(ticks: u64) -> (i32, i32) {
    (ticks as u32 as i32, (ticks >> 32) as u32 as i32)
}

/// Join the low and high wire words of a tick count.
pub fn join_ticks(low: i32, high: i32) -> u64 {
    (u64::from(high as u32) << 32) | u64::from(low as u32)
}

fn args_array(args: &[i32]) -> [i32; TRIGGER_ARGS] {
    let mut out = [0; TRIGGER_ARGS];
    for (slot, value) in out.iter_mut().zip(args) {
        *slot = *value;
    }
    out
}

xdr_record! {
    pub struct LockDriverParams {
        pub lock: i32,
        pub flags: i32,
    }

    pub struct LockDeviceParams {
        pub device: i32,
        pub lock: i32,
        pub flags: i32,
    }

    pub struct LockSubdeviceParams {
        pub device: i32,
        pub subdevice: i32,
        pub lock: i32,
        pub flags: i32,
    }

    pub struct IrqStartParams {
        pub device: i32,
        pub subdevice: i32,
        pub channel: i32,
        pub irq_source: i32,
        pub irq_edge: i32,
        pub irq_arg: i32,
        pub flags: i32,
    }

    pub struct IrqStopParams {
        pub device: i32,
        pub subdevice: i32,
        pub channel: i32,
        pub flags: i32,
    }

    pub struct IrqWaitParams {
        pub device: i32,
        pub subdevice: i32,
        pub channel: i32,
        pub time_out: i32,
        pub flags: i32,
    }

    pub struct IrqWaitReply {
        pub error: i32,
        pub irq_count: i32,
        pub value: i32,
    }

    pub struct ResetDeviceParams {
        pub device: i32,
        pub flags: i32,
    }

    pub struct ResetSubdeviceParams {
        pub device: i32,
        pub subdevice: i32,
        pub flags: i32,
    }

    pub struct SingleConfigParams {
        pub device: i32,
        pub subdevice: i32,
        pub channel: i32,
        pub single_config: i32,
        pub reference: i32,
        pub trig_chain: i32,
        pub trig_type: i32,
        pub trig_edge: i32,
        pub flags: i32,
    }

    pub struct SingleItem {
        pub device: i32,
        pub subdevice: i32,
        pub channel: i32,
        pub dir: i32,
        pub value: i32,
        pub time_out: i32,
        pub flags: i32,
        pub error: i32,
    }

    pub struct SingleParams {
        pub list: Vec<SingleItem>,
        pub flags: i32,
    }

    pub struct SingleResult {
        pub value: i32,
        pub error: i32,
    }

    pub struct SingleReply {
        pub error: i32,
        pub list: Vec<SingleResult>,
    }

    pub struct ConfigItem {
        pub channel: i32,
        pub stream_config: i32,
        pub reference: i32,
        pub flags: i32,
    }

    pub struct TriggerRecord {
        pub acq_start_trig_type: i32,
        pub acq_start_trig_edge: i32,
        pub acq_start_trig_chain: i32,
        pub acq_start_ticks_low: i32,
        pub acq_start_ticks_high: i32,
        pub acq_start_args: Vec<i32>,
        pub scan_start_trig_type: i32,
        pub scan_start_ticks_low: i32,
        pub scan_start_ticks_high: i32,
        pub scan_start_args: Vec<i32>,
        pub conv_start_trig_type: i32,
        pub conv_start_ticks_low: i32,
        pub conv_start_ticks_high: i32,
        pub conv_start_args: Vec<i32>,
        pub scan_stop_trig_type: i32,
        pub scan_stop_count: i32,
        pub scan_stop_args: Vec<i32>,
        pub acq_stop_trig_type: i32,
        pub acq_stop_count: i32,
        pub acq_stop_args: Vec<i32>,
        pub flags: i32,
    }

    pub struct StreamConfigParams {
        pub device: i32,
        pub subdevice: i32,
        pub config_list: Vec<ConfigItem>,
        pub trigger: TriggerRecord,
        pub fifo_irq_threshold: i32,
        pub flags: i32,
    }

    pub struct NewValuesParams {
        pub device: i32,
        pub subdevice: i32,
        pub time_out: i32,
        pub flags: i32,
    }

    pub struct CountReply {
        pub error: i32,
        pub count: i32,
    }

    pub struct StreamReadParams {
        pub device: i32,
        pub subdevice: i32,
        pub read_mode: i32,
        pub count: i32,
        pub flags: i32,
    }

    pub struct StreamReadReply {
        pub error: i32,
        pub values: Vec<i32>,
    }

    pub struct StreamWriteParams {
        pub device: i32,
        pub subdevice: i32,
        pub write_mode: i32,
        pub values: Vec<i32>,
        pub flags: i32,
    }

    pub struct StartItem {
        pub device: i32,
        pub subdevice: i32,
        pub start_mode: i32,
        pub time_out: i32,
        pub flags: i32,
        pub error: i32,
    }

    pub struct StreamStartParams {
        pub list: Vec<StartItem>,
        pub flags: i32,
    }

    pub struct StopItem {
        pub device: i32,
        pub subdevice: i32,
        pub stop_mode: i32,
        pub flags: i32,
        pub error: i32,
    }

    pub struct StreamStopParams {
        pub list: Vec<StopItem>,
        pub flags: i32,
    }

    /// Reply of the start and stop list procedures: one code per item.
    pub struct ListReply {
        pub error: i32,
        pub list: Vec<i32>,
    }

    pub struct StreamStatusParams {
        pub device: i32,
        pub subdevice: i32,
        pub wait: i32,
        pub flags: i32,
    }

    pub struct StreamStatusReply {
        pub error: i32,
        pub status: i32,
        pub count: i32,
    }

    /// Parameters of both tick conversions; `value` is a frequency or a time.
    pub struct TicksParams {
        pub device: i32,
        pub subdevice: i32,
        pub timer: i32,
        pub value: f64,
        pub flags: i32,
    }

    pub struct TicksReply {
        pub error: i32,
        pub value: f64,
        pub ticks_low: i32,
        pub ticks_high: i32,
    }

    pub struct TextReply {
        pub error: i32,
        pub text: String,
    }

    pub struct InfoReply {
        pub error: i32,
        pub vendor_id: i32,
        pub device_id: i32,
        pub serial_no: i32,
        pub bus_type: i32,
        pub bus_no: i32,
        pub dev_no: i32,
        pub func_no: i32,
        pub plugged: i32,
    }

    /// Reply of the number and version queries.
    pub struct NumberReply {
        pub error: i32,
        pub number: i32,
    }

    pub struct SubdeviceParams {
        pub device: i32,
        pub subdevice: i32,
    }

    pub struct RangesParams {
        pub device: i32,
        pub subdevice: i32,
        pub unit: i32,
    }

    pub struct RangeByMinMaxParams {
        pub device: i32,
        pub subdevice: i32,
        pub unit: i32,
        pub min: f64,
        pub max: f64,
    }

    pub struct RangeByMinMaxReply {
        pub error: i32,
        pub min: f64,
        pub max: f64,
        pub max_data: i32,
        pub range: i32,
    }

    pub struct RangeInfoParams {
        pub device: i32,
        pub subdevice: i32,
        pub range: i32,
    }

    pub struct RangeInfoReply {
        pub error: i32,
        pub unit: i32,
        pub min: f64,
        pub max: f64,
        pub max_data: i32,
    }

    pub struct SubdeviceByTypeParams {
        pub device: i32,
        pub start_subdevice: i32,
        pub kind: i32,
        pub subtype: i32,
    }

    pub struct SubdeviceByTypeReply {
        pub error: i32,
        pub subdevice: i32,
    }

    pub struct SubdeviceTypeReply {
        pub error: i32,
        pub kind: i32,
        pub subtype: i32,
    }

    pub struct CapsReply {
        pub error: i32,
        pub caps: i32,
    }

    pub struct CapsArgsParams {
        pub device: i32,
        pub subdevice: i32,
        pub cap: i32,
        pub count: i32,
    }

    pub struct CapsArgsReply {
        pub error: i32,
        pub args: Vec<i32>,
    }
}

// =============================================================================
// Conversions to and from the library's value types
// =============================================================================

impl From<&SingleEntry> for SingleItem {
    fn from(entry: &SingleEntry) -> Self {
        Self {
            device: entry.device,
            subdevice: entry.subdevice,
            channel: entry.channel,
            dir: entry.dir,
            value: entry.value,
            time_out: entry.time_out,
            flags: entry.flags,
            error: 0,
        }
    }
}

impl From<&SingleItem> for SingleEntry {
    fn from(item: &SingleItem) -> Self {
        Self {
            device: item.device,
            subdevice: item.subdevice,
            channel: item.channel,
            dir: item.dir,
            value: item.value,
            time_out: item.time_out,
            flags: item.flags,
            errno: item.error,
        }
    }
}

impl From<&StreamStartEntry> for StartItem {
    fn from(entry: &StreamStartEntry) -> Self {
        Self {
            device: entry.device,
            subdevice: entry.subdevice,
            start_mode: entry.start_mode,
            time_out: entry.time_out,
            flags: entry.flags,
            error: 0,
        }
    }
}

impl From<&StartItem> for StreamStartEntry {
    fn from(item: &StartItem) -> Self {
        Self {
            device: item.device,
            subdevice: item.subdevice,
            start_mode: item.start_mode,
            time_out: item.time_out,
            flags: item.flags,
            errno: item.error,
        }
    }
}

impl From<&StreamStopEntry> for StopItem {
    fn from(entry: &StreamStopEntry) -> Self {
        Self {
            device: entry.device,
            subdevice: entry.subdevice,
            stop_mode: entry.stop_mode,
            flags: entry.flags,
            error: 0,
        }
    }
}

impl From<&StopItem> for StreamStopEntry {
    fn from(item: &StopItem) -> Self {
        Self {
            device: item.device,
            subdevice: item.subdevice,
            stop_mode: item.stop_mode,
            flags: item.flags,
            errno: item.error,
        }
    }
}

impl From<&StreamConfigEntry> for ConfigItem {
    fn from(entry: &StreamConfigEntry) -> Self {
        Self {
            channel: entry.channel,
            stream_config: entry.stream_config,
            reference: entry.reference,
            flags: entry.flags,
        }
    }
}

impl From<&ConfigItem> for StreamConfigEntry {
    fn from(item: &ConfigItem) -> Self {
        Self {
            channel: item.channel,
            stream_config: item.stream_config,
            reference: item.reference,
            flags: item.flags,
        }
    }
}

impl From<&StreamTrigger> for TriggerRecord {
    fn from(trigger: &StreamTrigger) -> Self {
        let (acq_low, acq_high) = split_ticks(trigger.acq_start_ticks);
        let (scan_low, scan_high) = split_ticks(trigger.scan_start_ticks);
        let (conv_low, conv_high) = split_ticks(trigger.conv_start_ticks);
        Self {
            acq_start_trig_type: trigger.acq_start_type,
            acq_start_trig_edge: trigger.acq_start_edge,
            acq_start_trig_chain: trigger.acq_start_chan,
            acq_start_ticks_low: acq_low,
            acq_start_ticks_high: acq_high,
            acq_start_args: trigger.acq_start_args.to_vec(),
            scan_start_trig_type: trigger.scan_start_type,
            scan_start_ticks_low: scan_low,
            scan_start_ticks_high: scan_high,
            scan_start_args: trigger.scan_start_args.to_vec(),
            conv_start_trig_type: trigger.conv_start_type,
            conv_start_ticks_low: conv_low,
            conv_start_ticks_high: conv_high,
            conv_start_args: trigger.conv_start_args.to_vec(),
            scan_stop_trig_type: trigger.scan_stop_type,
            scan_stop_count: trigger.scan_stop_count,
            scan_stop_args: trigger.scan_stop_args.to_vec(),
            acq_stop_trig_type: trigger.acq_stop_type,
            acq_stop_count: trigger.acq_stop_count,
            acq_stop_args: trigger.acq_stop_args.to_vec(),
            flags: trigger.flags,
        }
    }
}

impl From<&TriggerRecord> for StreamTrigger {
    fn from(record: &TriggerRecord) -> Self {
        Self {
            acq_start_type: record.acq_start_trig_type,
            acq_start_edge: record.acq_start_trig_edge,
            acq_start_chan: record.acq_start_trig_chain,
            acq_start_ticks: join_ticks(record.acq_start_ticks_low, record.acq_start_ticks_high),
            acq_start_args: args_array(&record.acq_start_args),
            scan_start_type: record.scan_start_trig_type,
            scan_start_ticks: join_ticks(record.scan_start_ticks_low, record.scan_start_ticks_high),
            scan_start_args: args_array(&record.scan_start_args),
            conv_start_type: record.conv_start_trig_type,
            conv_start_ticks: join_ticks(record.conv_start_ticks_low, record.conv_start_ticks_high),
            conv_start_args: args_array(&record.conv_start_args),
            scan_stop_type: record.scan_stop_trig_type,
            scan_stop_count: record.scan_stop_count,
            scan_stop_args: args_array(&record.scan_stop_args),
            acq_stop_type: record.acq_stop_trig_type,
            acq_stop_count: record.acq_stop_count,
            acq_stop_args: args_array(&record.acq_stop_args),
            flags: record.flags,
        }
    }
}

impl From<&InfoReply> for DeviceInfo {
    fn from(reply: &InfoReply) -> Self {
        Self {
            vendor_id: reply.vendor_id,
            device_id: reply.device_id,
            serial_no: reply.serial_no,
            bus_type: reply.bus_type,
            bus_no: reply.bus_no,
            dev_no: reply.dev_no,
            func_no: reply.func_no,
            plugged: reply.plugged,
        }
    }
}

impl InfoReply {
    /// Successful reply carrying `info`.
    pub fn ok(info: &DeviceInfo) -> Self {
        Self {
            error: 0,
            vendor_id: info.vendor_id,
            device_id: info.device_id,
            serial_no: info.serial_no,
            bus_type: info.bus_type,
            bus_no: info.bus_no,
            dev_no: info.dev_no,
            func_no: info.func_no,
            plugged: info.plugged,
        }
    }
}

impl From<&RangeInfoReply> for RangeInfo {
    fn from(reply: &RangeInfoReply) -> Self {
        Self {
            unit: reply.unit,
            min: reply.min,
            max: reply.max,
            max_data: reply.max_data,
        }
    }
}

impl From<&IrqWaitReply> for IrqWait {
    fn from(reply: &IrqWaitReply) -> Self {
        Self {
            irq_count: reply.irq_count,
            value: reply.value,
        }
    }
}

impl From<&StreamStatusReply> for StreamStatus {
    fn from(reply: &StreamStatusReply) -> Self {
        Self {
            status: reply.status,
            count: reply.count,
        }
    }
}
