//! Remote-procedure protocol used between a client runtime and a board
//! server.
//!
//! Calls are ONC-RPC version 2 messages with record marking over TCP. The
//! program and procedure numbers are fixed so that existing peers
//! interoperate:
//!
//! - [`xdr`]: big-endian item codec and the `xdr_record!` helper
//! - [`records`]: parameter and result records of every procedure
//! - [`message`]: call and reply headers, record marking
//! - [`RpcClient`]: blocking client used by the remote context
//! - [`server`]: tokio server dispatching into a [`crate::driver::Driver`]

mod client;
pub mod message;
pub mod records;
pub mod server;
pub mod xdr;

pub use client::RpcClient;

/// Program number of the board service.
pub const PROGRAM: u32 = 0x2000_0001;

/// Program version.
pub const VERSION: u32 = 1;

/// Port the server binds and clients dial when none is configured.
pub const DEFAULT_PORT: u16 = 10_001;

/// Procedure numbers of the board service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
#[allow(missing_docs)]
pub enum Procedure {
    Close = 1,
    Open = 2,
    LockDriver = 3,
    LockDevice = 4,
    LockSubdevice = 5,
    IrqStart = 6,
    IrqStop = 7,
    IrqWait = 8,
    ResetDevice = 9,
    ResetSubdevice = 10,
    SingleConfig = 11,
    Single = 12,
    StreamConfig = 13,
    StreamRead = 14,
    StreamWrite = 15,
    StreamStart = 16,
    StreamStop = 17,
    StreamStatus = 18,
    StreamFrequencyToTicks = 19,
    StreamTimeToTicks = 20,
    StreamNewValues = 21,
    QueryDescriptionDevice = 22,
    QueryInfoDevice = 23,
    QueryNameDevice = 24,
    QueryNameDeviceDriver = 25,
    QueryNumberDevices = 26,
    QueryNumberSubdevices = 27,
    QueryNumberChannels = 28,
    QueryNumberRanges = 29,
    QueryRangeByMinMax = 30,
    QueryRangeInfo = 31,
    QuerySubdeviceByType = 32,
    QuerySubdeviceType = 33,
    QuerySubdeviceCaps = 34,
    QuerySubdeviceCapsArgs = 35,
    QueryVersionLibrary = 36,
    QueryVersionMainDriver = 37,
    QueryVersionDeviceDriver = 38,
}

impl Procedure {
    const ALL: [Procedure; 38] = [
        Self::Close,
        Self::Open,
        Self::LockDriver,
        Self::LockDevice,
        Self::LockSubdevice,
        Self::IrqStart,
        Self::IrqStop,
        Self::IrqWait,
        Self::ResetDevice,
        Self::ResetSubdevice,
        Self::SingleConfig,
        Self::Single,
        Self::StreamConfig,
        Self::StreamRead,
        Self::StreamWrite,
        Self::StreamStart,
        Self::StreamStop,
        Self::StreamStatus,
        Self::StreamFrequencyToTicks,
        Self::StreamTimeToTicks,
        Self::StreamNewValues,
        Self::QueryDescriptionDevice,
        Self::QueryInfoDevice,
        Self::QueryNameDevice,
        Self::QueryNameDeviceDriver,
        Self::QueryNumberDevices,
        Self::QueryNumberSubdevices,
        Self::QueryNumberChannels,
        Self::QueryNumberRanges,
        Self::QueryRangeByMinMax,
        Self::QueryRangeInfo,
        Self::QuerySubdeviceByType,
        Self::QuerySubdeviceType,
        Self::QuerySubdeviceCaps,
        Self::QuerySubdeviceCapsArgs,
        Self::QueryVersionLibrary,
        Self::QueryVersionMainDriver,
        Self::QueryVersionDeviceDriver,
    ];

    /// Wire number of this procedure.
    pub fn number(self) -> u32 {
        self as u32
    }

    /// Look up a procedure by wire number. `0` (the null procedure) is not
    /// part of the board service table.
    pub fn from_number(number: u32) -> Option<Self> {
        let index = usize::try_from(number).ok()?.checked_sub(1)?;
        Self::ALL.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_procedure_table_is_dense() {
        for (index, procedure) in Procedure::ALL.iter().enumerate() {
            assert_eq!(procedure.number() as usize, index + 1);
            assert_eq!(Procedure::from_number(procedure.number()), Some(*procedure));
        }
        assert_eq!(Procedure::from_number(0), None);
        assert_eq!(Procedure::from_number(39), None);
    }
}
