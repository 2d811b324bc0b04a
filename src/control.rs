//! Typed control channel to the kernel driver.
//!
//! Every operation is identified by a [`ControlCode`] and carries a
//! request/response structure. The channel call itself can fail (the
//! `io::Result`), and independently the driver reports the outcome of the
//! operation in the structure's `err_no` field. Callers must check both.

use std::io;

use crate::trigger::{CompactConfigEntry, CompactTrigger};
use crate::types::{SingleEntry, StreamStartEntry, StreamStopEntry};

/// Magic byte of the driver's control codes.
pub const CONTROL_MAGIC: u8 = b'y';

/// Control operation numbers as fixed by the kernel interface.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlCode {
    IrqEnable = 1,
    IrqDisable = 2,
    IrqWait = 3,
    ResetDevice = 4,
    ResetSubdevice = 5,
    SingleConfig = 6,
    Single = 7,
    StreamConfig = 9,
    StreamRead = 11,
    StreamWrite = 13,
    StreamNewValues = 14,
    StreamStart = 15,
    StreamStop = 17,
    StreamStatus = 19,
    LockDriver = 20,
    LockDevice = 21,
    LockSubdevice = 22,
    QueryDescriptionDevice = 23,
    QueryInfoDevice = 24,
    QueryNameDevice = 25,
    QueryNameDeviceDriver = 26,
    QueryNumberDevices = 27,
    QueryNumberSubdevices = 28,
    QueryNumberChannels = 29,
    QueryNumberRanges = 30,
    QueryRangeInfo = 32,
    QuerySubdeviceByType = 33,
    QuerySubdeviceType = 34,
    QuerySubdeviceCaps = 35,
    QuerySubdeviceCapsArgs = 36,
    QuerySubdeviceTimer = 37,
    QueryVersionDeviceDriver = 38,
    QueryVersionMainDriver = 39,
    QueryNameMainDriver = 40,
    QueryNumberSubdevicesByType = 44,
    SetOffset = 45,
    ConfigLoad = 63,
}

impl ControlCode {
    /// Operation number within the driver's magic.
    pub fn number(self) -> u8 {
        self as u8
    }
}

#[allow(missing_docs)]
mod structs {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct IrqStart {
        pub device: i32,
        pub subdevice: i32,
        pub channel: i32,
        pub irq_source: i32,
        pub irq_edge: i32,
        pub irq_arg: i32,
        pub flags: i32,
        pub err_no: i32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct IrqWait {
        pub device: i32,
        pub subdevice: i32,
        pub channel: i32,
        pub irq_count: i32,
        pub value: i32,
        pub time_out: i32,
        pub flags: i32,
        pub err_no: i32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct IrqStop {
        pub device: i32,
        pub subdevice: i32,
        pub channel: i32,
        pub flags: i32,
        pub err_no: i32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct ResetDevice {
        pub device: i32,
        pub flags: i32,
        pub err_no: i32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct ResetSubdevice {
        pub device: i32,
        pub subdevice: i32,
        pub flags: i32,
        pub err_no: i32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct SingleConfig {
        pub device: i32,
        pub subdevice: i32,
        pub channel: i32,
        pub single_config: i32,
        pub reference: i32,
        pub trig_chain: i32,
        pub trig_type: i32,
        pub trig_edge: i32,
        pub flags: i32,
        pub err_no: i32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct Single {
        pub list: Vec<SingleEntry>,
        pub flags: i32,
        pub err_no: i32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct StreamConfig {
        pub device: i32,
        pub subdevice: i32,
        pub config_list: Vec<CompactConfigEntry>,
        pub trigger: CompactTrigger,
        pub fifo_irq_threshold: i32,
        pub flags: i32,
        pub err_no: i32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct StreamNewValues {
        pub device: i32,
        pub subdevice: i32,
        pub time_out: i32,
        pub count: i32,
        pub flags: i32,
        pub err_no: i32,
    }

    /// Read or write buffer transfer with timeout. `count` is the number of
    /// values moved.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct StreamTransfer {
        pub device: i32,
        pub subdevice: i32,
        pub mode: i32,
        pub values: Vec<i32>,
        pub count: i32,
        pub time_out: i32,
        pub flags: i32,
        pub err_no: i32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct StreamStart {
        pub list: Vec<StreamStartEntry>,
        pub flags: i32,
        pub err_no: i32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct StreamStop {
        pub list: Vec<StreamStopEntry>,
        pub flags: i32,
        pub err_no: i32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct StreamStatus {
        pub device: i32,
        pub subdevice: i32,
        pub wait: i32,
        pub status: i32,
        pub count: i32,
        pub flags: i32,
        pub err_no: i32,
    }

    /// Lock request. `device` and `subdevice` are ignored where the scope
    /// does not use them.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct Lock {
        pub device: i32,
        pub subdevice: i32,
        pub lock: i32,
        pub flags: i32,
        pub err_no: i32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct QueryText {
        pub device: i32,
        pub text: String,
        pub err_no: i32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct QueryInfo {
        pub device: i32,
        pub vendor_id: i32,
        pub device_id: i32,
        pub serial_no: i32,
        pub bus_type: i32,
        pub bus_no: i32,
        pub dev_no: i32,
        pub func_no: i32,
        pub plugged: i32,
        pub err_no: i32,
    }

    /// Version query; `device` is only read for the device driver version.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct QueryVersion {
        pub device: i32,
        pub version: i32,
        pub err_no: i32,
    }

    /// Count query shared by the number-of queries.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct QueryNumber {
        pub device: i32,
        pub subdevice: i32,
        pub kind: i32,
        pub subtype: i32,
        pub unit: i32,
        pub number: i32,
        pub err_no: i32,
    }

    /// Range limits in millionths of the physical unit.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct QueryRangeInfo {
        pub device: i32,
        pub subdevice: i32,
        pub range: i32,
        pub unit: i32,
        pub min: i32,
        pub max: i32,
        pub max_data: i32,
        pub err_no: i32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct QuerySubdeviceByType {
        pub device: i32,
        pub start_subdevice: i32,
        pub kind: i32,
        pub subtype: i32,
        pub subdevice: i32,
        pub err_no: i32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct QuerySubdeviceType {
        pub device: i32,
        pub subdevice: i32,
        pub kind: i32,
        pub subtype: i32,
        pub err_no: i32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct QueryCaps {
        pub device: i32,
        pub subdevice: i32,
        pub caps: i32,
        pub err_no: i32,
    }

    /// Capability arguments; the driver fills at most `args.len()` values.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct QueryCapsArgs {
        pub device: i32,
        pub subdevice: i32,
        pub cap: i32,
        pub args: Vec<i32>,
        pub err_no: i32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct QueryTimer {
        pub device: i32,
        pub subdevice: i32,
        pub timer: i32,
        pub base_frequency: i32,
        pub min_ticks: u64,
        pub max_ticks: u64,
        pub err_no: i32,
    }

    /// Offset in millionths of a volt.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct SetOffset {
        pub device: i32,
        pub subdevice: i32,
        pub channel: i32,
        pub range: i32,
        pub offset: i32,
        pub flags: i32,
        pub err_no: i32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct ConfigLoad {
        pub device: i32,
        pub params: Vec<u8>,
        pub flags: i32,
        pub err_no: i32,
    }
}

pub use structs::*;

/// One control operation with its request/response structure.
#[allow(missing_docs)]
#[derive(Debug)]
pub enum ControlRequest<'a> {
    IrqEnable(&'a mut IrqStart),
    IrqWait(&'a mut IrqWait),
    IrqDisable(&'a mut IrqStop),
    IrqCheck(&'a mut IrqStop),
    ResetDevice(&'a mut ResetDevice),
    ResetSubdevice(&'a mut ResetSubdevice),
    SingleConfig(&'a mut SingleConfig),
    Single(&'a mut Single),
    StreamConfig(&'a mut StreamConfig),
    StreamNewValues(&'a mut StreamNewValues),
    StreamRead(&'a mut StreamTransfer),
    StreamWrite(&'a mut StreamTransfer),
    StreamStart(&'a mut StreamStart),
    StreamStop(&'a mut StreamStop),
    StreamStatus(&'a mut StreamStatus),
    LockDriver(&'a mut Lock),
    LockDevice(&'a mut Lock),
    LockSubdevice(&'a mut Lock),
    QueryDescriptionDevice(&'a mut QueryText),
    QueryInfoDevice(&'a mut QueryInfo),
    QueryNameDevice(&'a mut QueryText),
    QueryNameDeviceDriver(&'a mut QueryText),
    QueryNameMainDriver(&'a mut QueryText),
    QueryVersionMainDriver(&'a mut QueryVersion),
    QueryVersionDeviceDriver(&'a mut QueryVersion),
    QueryNumberDevices(&'a mut QueryNumber),
    QueryNumberSubdevices(&'a mut QueryNumber),
    QueryNumberSubdevicesByType(&'a mut QueryNumber),
    QueryNumberChannels(&'a mut QueryNumber),
    QueryNumberRanges(&'a mut QueryNumber),
    QueryRangeInfo(&'a mut QueryRangeInfo),
    QuerySubdeviceByType(&'a mut QuerySubdeviceByType),
    QuerySubdeviceType(&'a mut QuerySubdeviceType),
    QuerySubdeviceCaps(&'a mut QueryCaps),
    QuerySubdeviceCapsArgs(&'a mut QueryCapsArgs),
    QuerySubdeviceTimer(&'a mut QueryTimer),
    SetOffset(&'a mut SetOffset),
    ConfigLoad(&'a mut ConfigLoad),
}

impl ControlRequest<'_> {
    /// Operation code of this request.
    pub fn code(&self) -> ControlCode {
        match self {
            Self::IrqEnable(_) => ControlCode::IrqEnable,
            Self::IrqWait(_) => ControlCode::IrqWait,
            Self::IrqDisable(_) => ControlCode::IrqDisable,
            // The check shares the wait number with a different structure.
            Self::IrqCheck(_) => ControlCode::IrqWait,
            Self::ResetDevice(_) => ControlCode::ResetDevice,
            Self::ResetSubdevice(_) => ControlCode::ResetSubdevice,
            Self::SingleConfig(_) => ControlCode::SingleConfig,
            Self::Single(_) => ControlCode::Single,
            Self::StreamConfig(_) => ControlCode::StreamConfig,
            Self::StreamNewValues(_) => ControlCode::StreamNewValues,
            Self::StreamRead(_) => ControlCode::StreamRead,
            Self::StreamWrite(_) => ControlCode::StreamWrite,
            Self::StreamStart(_) => ControlCode::StreamStart,
            Self::StreamStop(_) => ControlCode::StreamStop,
            Self::StreamStatus(_) => ControlCode::StreamStatus,
            Self::LockDriver(_) => ControlCode::LockDriver,
            Self::LockDevice(_) => ControlCode::LockDevice,
            Self::LockSubdevice(_) => ControlCode::LockSubdevice,
            Self::QueryDescriptionDevice(_) => ControlCode::QueryDescriptionDevice,
            Self::QueryInfoDevice(_) => ControlCode::QueryInfoDevice,
            Self::QueryNameDevice(_) => ControlCode::QueryNameDevice,
            Self::QueryNameDeviceDriver(_) => ControlCode::QueryNameDeviceDriver,
            Self::QueryNameMainDriver(_) => ControlCode::QueryNameMainDriver,
            Self::QueryVersionMainDriver(_) => ControlCode::QueryVersionMainDriver,
            Self::QueryVersionDeviceDriver(_) => ControlCode::QueryVersionDeviceDriver,
            Self::QueryNumberDevices(_) => ControlCode::QueryNumberDevices,
            Self::QueryNumberSubdevices(_) => ControlCode::QueryNumberSubdevices,
            Self::QueryNumberSubdevicesByType(_) => ControlCode::QueryNumberSubdevicesByType,
            Self::QueryNumberChannels(_) => ControlCode::QueryNumberChannels,
            Self::QueryNumberRanges(_) => ControlCode::QueryNumberRanges,
            Self::QueryRangeInfo(_) => ControlCode::QueryRangeInfo,
            Self::QuerySubdeviceByType(_) => ControlCode::QuerySubdeviceByType,
            Self::QuerySubdeviceType(_) => ControlCode::QuerySubdeviceType,
            Self::QuerySubdeviceCaps(_) => ControlCode::QuerySubdeviceCaps,
            Self::QuerySubdeviceCapsArgs(_) => ControlCode::QuerySubdeviceCapsArgs,
            Self::QuerySubdeviceTimer(_) => ControlCode::QuerySubdeviceTimer,
            Self::SetOffset(_) => ControlCode::SetOffset,
            Self::ConfigLoad(_) => ControlCode::ConfigLoad,
        }
    }

    /// The `err_no` field of the carried structure.
    pub fn err_no(&self) -> i32 {
        match self {
            Self::IrqEnable(s) => s.err_no,
            Self::IrqWait(s) => s.err_no,
            Self::IrqDisable(s) | Self::IrqCheck(s) => s.err_no,
            Self::ResetDevice(s) => s.err_no,
            Self::ResetSubdevice(s) => s.err_no,
            Self::SingleConfig(s) => s.err_no,
            Self::Single(s) => s.err_no,
            Self::StreamConfig(s) => s.err_no,
            Self::StreamNewValues(s) => s.err_no,
            Self::StreamRead(s) | Self::StreamWrite(s) => s.err_no,
            Self::StreamStart(s) => s.err_no,
            Self::StreamStop(s) => s.err_no,
            Self::StreamStatus(s) => s.err_no,
            Self::LockDriver(s) | Self::LockDevice(s) | Self::LockSubdevice(s) => s.err_no,
            Self::QueryDescriptionDevice(s)
            | Self::QueryNameDevice(s)
            | Self::QueryNameDeviceDriver(s)
            | Self::QueryNameMainDriver(s) => s.err_no,
            Self::QueryInfoDevice(s) => s.err_no,
            Self::QueryVersionMainDriver(s) | Self::QueryVersionDeviceDriver(s) => s.err_no,
            Self::QueryNumberDevices(s)
            | Self::QueryNumberSubdevices(s)
            | Self::QueryNumberSubdevicesByType(s)
            | Self::QueryNumberChannels(s)
            | Self::QueryNumberRanges(s) => s.err_no,
            Self::QueryRangeInfo(s) => s.err_no,
            Self::QuerySubdeviceByType(s) => s.err_no,
            Self::QuerySubdeviceType(s) => s.err_no,
            Self::QuerySubdeviceCaps(s) => s.err_no,
            Self::QuerySubdeviceCapsArgs(s) => s.err_no,
            Self::QuerySubdeviceTimer(s) => s.err_no,
            Self::SetOffset(s) => s.err_no,
            Self::ConfigLoad(s) => s.err_no,
        }
    }
}

/// A channel that executes control operations against a driver.
pub trait ControlChannel: Send + Sync {
    /// Execute `request`, filling its response fields and `err_no`.
    fn submit(&self, request: &mut ControlRequest<'_>) -> io::Result<()>;

    /// Short label for logs.
    fn label(&self) -> &str {
        "control"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_codes() {
        let mut lock = Lock::default();
        assert_eq!(ControlRequest::LockDevice(&mut lock).code().number(), 21);
        let mut timer = QueryTimer {
            err_no: 56,
            ..Default::default()
        };
        let request = ControlRequest::QuerySubdeviceTimer(&mut timer);
        assert_eq!(request.code(), ControlCode::QuerySubdeviceTimer);
        assert_eq!(request.err_no(), 56);
    }
}
