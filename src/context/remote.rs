//! Remote backend forwarding calls to a board server.
//!
//! Operations the service has no procedure for answer `NotSupported`, with a
//! few composed locally from other procedures (driver name, subdevice timer,
//! interrupt test).

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{ErrorCode, MeError, Result};
use crate::notify::ListenerSet;
use crate::rpc::records::*;
use crate::rpc::xdr::Xdr;
use crate::rpc::{Procedure, RpcClient};
use crate::trigger::{StreamConfigEntry, StreamTrigger};
use crate::types::{
    DeviceInfo, IrqWait, ListItem, RangeInfo, SingleEntry, StreamStartEntry, StreamStatus,
    StreamStopEntry, TimerInfo,
};

use super::{DriverCalls, LockFlags, LockOp};

/// Name reported for the driver behind a remote context.
const REMOTE_DRIVER_NAME: &str = "MEiDS RPC";

/// Connection state of a remote context.
enum Session {
    Connected(RpcClient),
    /// A transport failure left the stream mid-record; the next call
    /// reconnects.
    Broken,
    Closed,
}

/// Backend that forwards every call to a board server.
///
/// One request is in flight at a time. Transport failures surface as
/// [`MeError::Communication`] and are never retried; the failed call drops
/// its connection and the following call opens a fresh session.
pub struct RemoteContext {
    addr: String,
    timeout: Duration,
    session: Mutex<Session>,
    pid: AtomicU32,
    pub(crate) listeners: ListenerSet,
}

impl RemoteContext {
    /// Connect to the server at `addr` and open a session.
    pub fn open(addr: &str, timeout: Duration) -> Result<Self> {
        let client = connect_session(addr, timeout)?;
        info!(peer = addr, "remote context opened");
        Ok(Self {
            addr: addr.to_string(),
            timeout,
            session: Mutex::new(Session::Connected(client)),
            pid: AtomicU32::new(std::process::id()),
            listeners: ListenerSet::new(),
        })
    }

    /// Address of the server.
    pub fn peer(&self) -> &str {
        &self.addr
    }

    fn call<A: Xdr, R: Xdr>(&self, procedure: Procedure, args: &A) -> Result<R> {
        self.call_waiting(procedure, args, 0)
    }

    fn call_waiting<A: Xdr, R: Xdr>(&self, procedure: Procedure, args: &A, wait_ms: i32) -> Result<R> {
        let mut session = self.session.lock();
        let pid = std::process::id();
        let reconnect = match &*session {
            Session::Closed => return Err(ErrorCode::NotOpen.into()),
            Session::Broken => true,
            Session::Connected(_) => self.pid.load(Ordering::Acquire) != pid,
        };
        if reconnect {
            debug!(peer = %self.addr, "reconnecting");
            *session = Session::Broken;
            let client = connect_session(&self.addr, self.timeout).map_err(|e| MeError::Communication {
                peer: self.addr.clone(),
                message: e.to_string(),
            })?;
            *session = Session::Connected(client);
            self.pid.store(pid, Ordering::Release);
        }

        let Session::Connected(client) = &mut *session else {
            return Err(ErrorCode::NotOpen.into());
        };
        match client.call(procedure, args, wait_ms) {
            Ok(reply) => Ok(reply),
            Err(err) => {
                warn!(peer = %self.addr, ?procedure, error = %err, "remote call failed");
                if err.is_transport() {
                    *session = Session::Broken;
                }
                Err(err)
            }
        }
    }

    /// Call a procedure whose result is a bare status.
    fn status<A: Xdr>(&self, procedure: Procedure, args: &A) -> Result<()> {
        let status: i32 = self.call(procedure, args)?;
        reply_status(procedure, status)
    }

    fn number(&self, procedure: Procedure, args: &impl Xdr) -> Result<i32> {
        let reply: NumberReply = self.call(procedure, args)?;
        reply_status(procedure, reply.error)?;
        Ok(reply.number)
    }

    fn text(&self, procedure: Procedure, device: i32) -> Result<String> {
        let reply: TextReply = self.call(procedure, &device)?;
        reply_status(procedure, reply.error)?;
        Ok(reply.text)
    }

    fn ticks(&self, procedure: Procedure, params: TicksParams) -> Result<(f64, u64)> {
        let reply: TicksReply = self.call(procedure, &params)?;
        reply_status(procedure, reply.error)?;
        Ok((reply.value, join_ticks(reply.ticks_low, reply.ticks_high)))
    }
}

fn connect_session(addr: &str, timeout: Duration) -> Result<RpcClient> {
    let mut client = RpcClient::connect(addr, timeout)?;
    let status: i32 = client.call(Procedure::Open, &0i32, 0)?;
    ErrorCode::check(status)?;
    Ok(client)
}

fn reply_status(procedure: Procedure, raw: i32) -> Result<()> {
    if raw != 0 {
        debug!(?procedure, err_no = raw, "server reported failure");
    }
    ErrorCode::check(raw)
}

/// Copy per-item codes of a list reply into `list`; a length mismatch is an
/// internal error.
fn scatter_codes<T>(list: &mut [T], codes: &[i32], mut store: impl FnMut(&mut T, i32)) -> Result<()> {
    if codes.len() != list.len() {
        return Err(MeError::Internal(format!(
            "reply carries {} results for {} items",
            codes.len(),
            list.len()
        )));
    }
    for (item, code) in list.iter_mut().zip(codes) {
        store(item, *code);
    }
    Ok(())
}

impl DriverCalls for RemoteContext {
    fn close(&self) -> Result<()> {
        self.listeners.destroy(-1, -1);
        let session = std::mem::replace(&mut *self.session.lock(), Session::Closed);
        let Session::Connected(mut client) = session else {
            return Ok(());
        };
        let status: i32 = client.call(Procedure::Close, &0i32, 0)?;
        debug!(peer = %self.addr, "remote context closed");
        ErrorCode::check(status)
    }

    // =========================================================================
    // Locks
    // =========================================================================

    fn lock_driver(&self, lock: LockOp, flags: LockFlags) -> Result<()> {
        self.status(
            Procedure::LockDriver,
            &LockDriverParams {
                lock: lock.as_raw(),
                flags: flags.bits(),
            },
        )
    }

    fn lock_device(&self, device: i32, lock: LockOp, flags: LockFlags) -> Result<()> {
        self.status(
            Procedure::LockDevice,
            &LockDeviceParams {
                device,
                lock: lock.as_raw(),
                flags: flags.bits(),
            },
        )
    }

    fn lock_subdevice(&self, device: i32, subdevice: i32, lock: LockOp, flags: LockFlags) -> Result<()> {
        self.status(
            Procedure::LockSubdevice,
            &LockSubdeviceParams {
                device,
                subdevice,
                lock: lock.as_raw(),
                flags: flags.bits(),
            },
        )
    }

    // =========================================================================
    // Queries
    // =========================================================================

    fn query_driver_version(&self) -> Result<i32> {
        self.number(Procedure::QueryVersionMainDriver, &())
    }

    fn query_driver_name(&self) -> Result<String> {
        Ok(REMOTE_DRIVER_NAME.to_string())
    }

    fn query_device_driver_version(&self, device: i32) -> Result<i32> {
        self.number(Procedure::QueryVersionDeviceDriver, &device)
    }

    fn query_device_driver_name(&self, device: i32) -> Result<String> {
        self.text(Procedure::QueryNameDeviceDriver, device)
    }

    fn query_device_name(&self, device: i32) -> Result<String> {
        self.text(Procedure::QueryNameDevice, device)
    }

    fn query_device_description(&self, device: i32) -> Result<String> {
        self.text(Procedure::QueryDescriptionDevice, device)
    }

    fn query_device_info(&self, device: i32) -> Result<DeviceInfo> {
        let reply: InfoReply = self.call(Procedure::QueryInfoDevice, &device)?;
        reply_status(Procedure::QueryInfoDevice, reply.error)?;
        Ok(DeviceInfo::from(&reply))
    }

    fn query_number_devices(&self) -> Result<i32> {
        self.number(Procedure::QueryNumberDevices, &())
    }

    fn query_number_subdevices(&self, device: i32) -> Result<i32> {
        self.number(Procedure::QueryNumberSubdevices, &device)
    }

    fn query_number_channels(&self, device: i32, subdevice: i32) -> Result<i32> {
        self.number(Procedure::QueryNumberChannels, &SubdeviceParams { device, subdevice })
    }

    fn query_number_ranges(&self, device: i32, subdevice: i32, unit: i32) -> Result<i32> {
        self.number(
            Procedure::QueryNumberRanges,
            &RangesParams {
                device,
                subdevice,
                unit,
            },
        )
    }

    fn query_range_info(&self, device: i32, subdevice: i32, range: i32) -> Result<RangeInfo> {
        let reply: RangeInfoReply = self.call(
            Procedure::QueryRangeInfo,
            &RangeInfoParams {
                device,
                subdevice,
                range,
            },
        )?;
        reply_status(Procedure::QueryRangeInfo, reply.error)?;
        Ok(RangeInfo::from(&reply))
    }

    fn query_range_by_min_max(
        &self,
        device: i32,
        subdevice: i32,
        unit: i32,
        min: f64,
        max: f64,
    ) -> Result<(i32, RangeInfo)> {
        let reply: RangeByMinMaxReply = self.call(
            Procedure::QueryRangeByMinMax,
            &RangeByMinMaxParams {
                device,
                subdevice,
                unit,
                min,
                max,
            },
        )?;
        reply_status(Procedure::QueryRangeByMinMax, reply.error)?;
        Ok((
            reply.range,
            RangeInfo {
                unit,
                min: reply.min,
                max: reply.max,
                max_data: reply.max_data,
            },
        ))
    }

    fn query_subdevice_by_type(&self, device: i32, start: i32, kind: i32, subtype: i32) -> Result<i32> {
        let reply: SubdeviceByTypeReply = self.call(
            Procedure::QuerySubdeviceByType,
            &SubdeviceByTypeParams {
                device,
                start_subdevice: start,
                kind,
                subtype,
            },
        )?;
        reply_status(Procedure::QuerySubdeviceByType, reply.error)?;
        Ok(reply.subdevice)
    }

    fn query_subdevice_type(&self, device: i32, subdevice: i32) -> Result<(i32, i32)> {
        let reply: SubdeviceTypeReply =
            self.call(Procedure::QuerySubdeviceType, &SubdeviceParams { device, subdevice })?;
        reply_status(Procedure::QuerySubdeviceType, reply.error)?;
        Ok((reply.kind, reply.subtype))
    }

    fn query_subdevice_caps(&self, device: i32, subdevice: i32) -> Result<i32> {
        let reply: CapsReply =
            self.call(Procedure::QuerySubdeviceCaps, &SubdeviceParams { device, subdevice })?;
        reply_status(Procedure::QuerySubdeviceCaps, reply.error)?;
        Ok(reply.caps)
    }

    fn query_subdevice_caps_args(&self, device: i32, subdevice: i32, cap: i32, args: &mut [i32]) -> Result<()> {
        let reply: CapsArgsReply = self.call(
            Procedure::QuerySubdeviceCapsArgs,
            &CapsArgsParams {
                device,
                subdevice,
                cap,
                count: i32::try_from(args.len()).map_err(|_| ErrorCode::InvalidCapArgCount)?,
            },
        )?;
        reply_status(Procedure::QuerySubdeviceCapsArgs, reply.error)?;
        for (slot, value) in args.iter_mut().zip(&reply.args) {
            *slot = *value;
        }
        Ok(())
    }

    /// Composed from three tick conversions: the shortest and longest
    /// period give the tick limits, one hertz gives the base frequency.
    fn query_subdevice_timer(&self, device: i32, subdevice: i32, timer: i32) -> Result<TimerInfo> {
        let params = |value| TicksParams {
            device,
            subdevice,
            timer,
            value,
            flags: 0,
        };
        let (_, min_ticks) = self.ticks(Procedure::StreamTimeToTicks, params(f64::NEG_INFINITY))?;
        let (_, max_ticks) = self.ticks(Procedure::StreamTimeToTicks, params(f64::INFINITY))?;
        let (_, base) = self.ticks(Procedure::StreamFrequencyToTicks, params(1.0))?;
        Ok(TimerInfo {
            base_frequency: base as u32 as i32,
            min_ticks,
            max_ticks,
        })
    }

    // =========================================================================
    // Interrupts and resets
    // =========================================================================

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
        self.status(
            Procedure::IrqStart,
            &IrqStartParams {
                device,
                subdevice,
                channel,
                irq_source: source,
                irq_edge: edge,
                irq_arg: arg,
                flags,
            },
        )
    }

    fn irq_wait(&self, device: i32, subdevice: i32, channel: i32, time_out: i32, flags: i32) -> Result<IrqWait> {
        let reply: IrqWaitReply = self.call_waiting(
            Procedure::IrqWait,
            &IrqWaitParams {
                device,
                subdevice,
                channel,
                time_out,
                flags,
            },
            time_out,
        )?;
        reply_status(Procedure::IrqWait, reply.error)?;
        Ok(IrqWait::from(&reply))
    }

    fn irq_stop(&self, device: i32, subdevice: i32, channel: i32, flags: i32) -> Result<()> {
        self.status(
            Procedure::IrqStop,
            &IrqStopParams {
                device,
                subdevice,
                channel,
                flags,
            },
        )
    }

    /// An interrupt wait with the shortest timeout; timing out is success.
    fn irq_test(&self, device: i32, subdevice: i32, channel: i32, flags: i32) -> Result<()> {
        match self.irq_wait(device, subdevice, channel, 1, flags) {
            Ok(_) => Ok(()),
            Err(err) if err.is_timeout() => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn reset_device(&self, device: i32, flags: i32) -> Result<()> {
        self.status(Procedure::ResetDevice, &ResetDeviceParams { device, flags })
    }

    fn reset_subdevice(&self, device: i32, subdevice: i32, flags: i32) -> Result<()> {
        self.status(
            Procedure::ResetSubdevice,
            &ResetSubdeviceParams {
                device,
                subdevice,
                flags,
            },
        )
    }

    // =========================================================================
    // Single I/O
    // =========================================================================

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
        self.status(
            Procedure::SingleConfig,
            &SingleConfigParams {
                device,
                subdevice,
                channel,
                single_config: config,
                reference,
                trig_chain,
                trig_type,
                trig_edge,
                flags,
            },
        )
    }

    #[instrument(skip(self, list), fields(peer = %self.addr, count = list.len()))]
    fn single(&self, list: &mut [SingleEntry], flags: i32) -> Result<()> {
        if list.is_empty() {
            return Ok(());
        }
        let params = SingleParams {
            list: list.iter().map(SingleItem::from).collect(),
            flags,
        };
        let wait = list.iter().map(|entry| entry.time_out).max().unwrap_or(0);
        let reply: SingleReply = match self.call_waiting(Procedure::Single, &params, wait) {
            Ok(reply) => reply,
            Err(err) => {
                for entry in list.iter_mut() {
                    entry.value = 0;
                    entry.set_errno(err.code());
                }
                return Err(err);
            }
        };
        if reply.list.len() != list.len() {
            return Err(MeError::Internal(format!(
                "single reply carries {} results for {} items",
                reply.list.len(),
                list.len()
            )));
        }
        for (entry, result) in list.iter_mut().zip(&reply.list) {
            entry.value = result.value;
            entry.errno = result.error;
        }
        reply_status(Procedure::Single, reply.error)
    }

    // =========================================================================
    // Streaming
    // =========================================================================

    fn stream_config(
        &self,
        device: i32,
        subdevice: i32,
        list: &[StreamConfigEntry],
        trigger: &StreamTrigger,
        fifo_irq_threshold: i32,
        flags: i32,
    ) -> Result<()> {
        self.status(
            Procedure::StreamConfig,
            &StreamConfigParams {
                device,
                subdevice,
                config_list: list.iter().map(ConfigItem::from).collect(),
                trigger: TriggerRecord::from(trigger),
                fifo_irq_threshold,
                flags,
            },
        )
    }

    fn stream_new_values(&self, device: i32, subdevice: i32, time_out: i32, flags: i32) -> Result<i32> {
        let reply: CountReply = self.call_waiting(
            Procedure::StreamNewValues,
            &NewValuesParams {
                device,
                subdevice,
                time_out,
                flags,
            },
            time_out,
        )?;
        reply_status(Procedure::StreamNewValues, reply.error)?;
        Ok(reply.count)
    }

    /// The wire read carries no timeout; the server applies its own.
    fn stream_read(
        &self,
        device: i32,
        subdevice: i32,
        mode: i32,
        values: &mut [i32],
        time_out: i32,
        flags: i32,
    ) -> Result<usize> {
        let reply: StreamReadReply = self.call_waiting(
            Procedure::StreamRead,
            &StreamReadParams {
                device,
                subdevice,
                read_mode: mode,
                count: i32::try_from(values.len()).map_err(|_| ErrorCode::InvalidValueCount)?,
                flags,
            },
            time_out,
        )?;
        let count = reply.values.len().min(values.len());
        values[..count].copy_from_slice(&reply.values[..count]);
        reply_status(Procedure::StreamRead, reply.error).map(|()| count)
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
        let reply: CountReply = self.call_waiting(
            Procedure::StreamWrite,
            &StreamWriteParams {
                device,
                subdevice,
                write_mode: mode,
                values: values.to_vec(),
                flags,
            },
            time_out,
        )?;
        reply_status(Procedure::StreamWrite, reply.error)?;
        Ok(usize::try_from(reply.count).unwrap_or(0))
    }

    fn stream_start(&self, list: &mut [StreamStartEntry], flags: i32) -> Result<()> {
        if list.is_empty() {
            return Ok(());
        }
        let params = StreamStartParams {
            list: list.iter().map(StartItem::from).collect(),
            flags,
        };
        let wait = list.iter().map(|entry| entry.time_out).max().unwrap_or(0);
        let reply: ListReply = match self.call_waiting(Procedure::StreamStart, &params, wait) {
            Ok(reply) => reply,
            Err(err) => {
                list.iter_mut().for_each(|entry| entry.set_errno(err.code()));
                return Err(err);
            }
        };
        scatter_codes(list, &reply.list, |entry, code| entry.errno = code)?;
        reply_status(Procedure::StreamStart, reply.error)
    }

    fn stream_stop(&self, list: &mut [StreamStopEntry], flags: i32) -> Result<()> {
        if list.is_empty() {
            return Ok(());
        }
        let params = StreamStopParams {
            list: list.iter().map(StopItem::from).collect(),
            flags,
        };
        let reply: ListReply = match self.call(Procedure::StreamStop, &params) {
            Ok(reply) => reply,
            Err(err) => {
                list.iter_mut().for_each(|entry| entry.set_errno(err.code()));
                return Err(err);
            }
        };
        scatter_codes(list, &reply.list, |entry, code| entry.errno = code)?;
        reply_status(Procedure::StreamStop, reply.error)
    }

    fn stream_status(&self, device: i32, subdevice: i32, wait: i32, flags: i32) -> Result<StreamStatus> {
        let reply: StreamStatusReply = self.call(
            Procedure::StreamStatus,
            &StreamStatusParams {
                device,
                subdevice,
                wait,
                flags,
            },
        )?;
        reply_status(Procedure::StreamStatus, reply.error)?;
        Ok(StreamStatus::from(&reply))
    }

    fn stream_frequency_to_ticks(
        &self,
        device: i32,
        subdevice: i32,
        timer: i32,
        frequency: f64,
        flags: i32,
    ) -> Result<(f64, u64)> {
        self.ticks(
            Procedure::StreamFrequencyToTicks,
            TicksParams {
                device,
                subdevice,
                timer,
                value: frequency,
                flags,
            },
        )
    }

    fn stream_time_to_ticks(
        &self,
        device: i32,
        subdevice: i32,
        timer: i32,
        time: f64,
        flags: i32,
    ) -> Result<(f64, u64)> {
        self.ticks(
            Procedure::StreamTimeToTicks,
            TicksParams {
                device,
                subdevice,
                timer,
                value: time,
                flags,
            },
        )
    }
}
