//! Board server.
//!
//! [`serve`] accepts connections on a tokio listener and answers every call
//! by running the matching operation of a [`Driver`]. Each connection gets
//! its own task; calls on one connection are answered in order, and the
//! driver work itself runs on the blocking pool because backend calls may
//! wait on hardware.
//!
//! The device numbers a client sends are the server's logical numbers.

use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, trace, warn};

use super::message::{self, AcceptStat, CallHeader, MessageError, MAX_RECORD_LEN};
use super::records::*;
use super::xdr::{Xdr, XdrError, MAX_ARRAY_LEN};
use super::{Procedure, PROGRAM, VERSION};
use crate::context::{LockFlags, LockOp};
use crate::defs::ME_VERSION_LIBRARY;
use crate::driver::Driver;
use crate::error::Result;
use crate::trigger::{StreamConfigEntry, StreamTrigger};
use crate::types::{SingleEntry, StreamStartEntry, StreamStopEntry};

/// Accept connections until the listener fails.
pub async fn serve(listener: TcpListener, driver: Arc<Driver>) -> io::Result<()> {
    info!(addr = ?listener.local_addr().ok(), "board server listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let driver = Arc::clone(&driver);
        tokio::spawn(async move {
            info!(%peer, "client connected");
            match handle_connection(stream, driver).await {
                Ok(()) => info!(%peer, "client disconnected"),
                Err(e) => warn!(%peer, error = %e, "connection closed with error"),
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, driver: Arc<Driver>) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();

    loop {
        let record = match read_record(&mut reader).await {
            Ok(record) => record,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        };

        let driver = Arc::clone(&driver);
        let reply = tokio::task::spawn_blocking(move || handle_call(&driver, record))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let frame = message::frame_record(&reply)?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
    }
}

/// Read one record, joining fragments.
async fn read_record<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Bytes> {
    let mut record = BytesMut::new();
    loop {
        let (len, last) = message::parse_mark(reader.read_u32().await?);
        if record.len() + len > MAX_RECORD_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "record too large"));
        }
        let start = record.len();
        record.resize(start + len, 0);
        reader.read_exact(&mut record[start..]).await?;
        if last {
            return Ok(record.freeze());
        }
    }
}

/// Decode one call record and build the reply payload.
///
/// A record without a readable call header cannot be answered and is an
/// error; everything after the header is answered with a reply status.
pub fn handle_call(driver: &Driver, mut record: Bytes) -> std::result::Result<BytesMut, MessageError> {
    let header = CallHeader::decode(&mut record)?;
    let mut reply = BytesMut::new();

    if header.program != PROGRAM {
        debug!(program = header.program, "call for unknown program");
        message::encode_reply(header.xid, AcceptStat::ProgUnavail, &mut reply);
        return Ok(reply);
    }
    if header.version != VERSION {
        debug!(version = header.version, "call for unsupported version");
        message::encode_reply(header.xid, AcceptStat::ProgMismatch, &mut reply);
        return Ok(reply);
    }
    // The null procedure answers with an empty result.
    if header.procedure == 0 {
        message::encode_reply(header.xid, AcceptStat::Success, &mut reply);
        return Ok(reply);
    }
    let Some(procedure) = Procedure::from_number(header.procedure) else {
        debug!(procedure = header.procedure, "call for unknown procedure");
        message::encode_reply(header.xid, AcceptStat::ProcUnavail, &mut reply);
        return Ok(reply);
    };

    trace!(?procedure, xid = header.xid, "serving call");
    match serve_procedure(driver, procedure, &mut record) {
        Ok(body) => {
            message::encode_reply(header.xid, AcceptStat::Success, &mut reply);
            reply.extend_from_slice(&body);
        }
        Err(e) => {
            warn!(?procedure, error = %e, "undecodable arguments");
            message::encode_reply(header.xid, AcceptStat::GarbageArgs, &mut reply);
        }
    }
    Ok(reply)
}

fn status<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.code().as_raw(),
    }
}

fn encode<T: Xdr>(value: &T) -> BytesMut {
    let mut buf = BytesMut::new();
    value.encode(&mut buf);
    buf
}

fn length(count: i32) -> usize {
    usize::try_from(count).unwrap_or(0).min(MAX_ARRAY_LEN)
}

fn count_reply(result: Result<usize>) -> CountReply {
    CountReply {
        error: status(&result),
        count: result.map_or(0, |n| i32::try_from(n).unwrap_or(i32::MAX)),
    }
}

fn number_reply(result: Result<i32>) -> NumberReply {
    NumberReply {
        error: status(&result),
        number: result.unwrap_or(0),
    }
}

fn text_reply(result: Result<String>) -> TextReply {
    TextReply {
        error: status(&result),
        text: result.unwrap_or_default(),
    }
}

fn ticks_reply(result: Result<(f64, u64)>) -> TicksReply {
    let error = status(&result);
    let (value, ticks) = result.unwrap_or((0.0, 0));
    let (ticks_low, ticks_high) = split_ticks(ticks);
    TicksReply {
        error,
        value,
        ticks_low,
        ticks_high,
    }
}

fn lock_args(lock: i32, flags: i32) -> Result<(LockOp, LockFlags)> {
    Ok((LockOp::from_raw(lock)?, LockFlags::from_raw(flags)?))
}

fn serve_procedure(
    driver: &Driver,
    procedure: Procedure,
    args: &mut Bytes,
) -> std::result::Result<BytesMut, XdrError> {
    let dispatch = driver.dispatch();

    let body = match procedure {
        // Sessions carry no server state.
        Procedure::Open | Procedure::Close => {
            let _ = i32::decode(args)?;
            encode(&0i32)
        }

        // =====================================================================
        // Locks
        // =====================================================================
        Procedure::LockDriver => {
            let p = LockDriverParams::decode(args)?;
            let result = lock_args(p.lock, p.flags).and_then(|(lock, flags)| driver.lock_driver(lock, flags));
            encode(&status(&result))
        }
        Procedure::LockDevice => {
            let p = LockDeviceParams::decode(args)?;
            let result = lock_args(p.lock, p.flags)
                .and_then(|(lock, flags)| dispatch.lock_device(p.device, lock, flags));
            encode(&status(&result))
        }
        Procedure::LockSubdevice => {
            let p = LockSubdeviceParams::decode(args)?;
            let result = lock_args(p.lock, p.flags)
                .and_then(|(lock, flags)| dispatch.lock_subdevice(p.device, p.subdevice, lock, flags));
            encode(&status(&result))
        }

        // =====================================================================
        // Interrupts and resets
        // =====================================================================
        Procedure::IrqStart => {
            let p = IrqStartParams::decode(args)?;
            let result = dispatch.irq_start(
                p.device,
                p.subdevice,
                p.channel,
                p.irq_source,
                p.irq_edge,
                p.irq_arg,
                p.flags,
            );
            encode(&status(&result))
        }
        Procedure::IrqStop => {
            let p = IrqStopParams::decode(args)?;
            encode(&status(&dispatch.irq_stop(p.device, p.subdevice, p.channel, p.flags)))
        }
        Procedure::IrqWait => {
            let p = IrqWaitParams::decode(args)?;
            let result = dispatch.irq_wait(p.device, p.subdevice, p.channel, p.time_out, p.flags);
            let error = status(&result);
            let wait = result.unwrap_or_default();
            encode(&IrqWaitReply {
                error,
                irq_count: wait.irq_count,
                value: wait.value,
            })
        }
        Procedure::ResetDevice => {
            let p = ResetDeviceParams::decode(args)?;
            encode(&status(&dispatch.reset_device(p.device, p.flags)))
        }
        Procedure::ResetSubdevice => {
            let p = ResetSubdeviceParams::decode(args)?;
            encode(&status(&dispatch.reset_subdevice(p.device, p.subdevice, p.flags)))
        }

        // =====================================================================
        // Single I/O
        // =====================================================================
        Procedure::SingleConfig => {
            let p = SingleConfigParams::decode(args)?;
            let result = dispatch.single_config(
                p.device,
                p.subdevice,
                p.channel,
                p.single_config,
                p.reference,
                p.trig_chain,
                p.trig_type,
                p.trig_edge,
                p.flags,
            );
            encode(&status(&result))
        }
        Procedure::Single => {
            let p = SingleParams::decode(args)?;
            let mut list: Vec<SingleEntry> = p.list.iter().map(SingleEntry::from).collect();
            let result = dispatch.single(&mut list, p.flags);
            encode(&SingleReply {
                error: status(&result),
                list: list
                    .iter()
                    .map(|entry| SingleResult {
                        value: entry.value,
                        error: entry.errno,
                    })
                    .collect(),
            })
        }

        // =====================================================================
        // Streaming
        // =====================================================================
        Procedure::StreamConfig => {
            let p = StreamConfigParams::decode(args)?;
            let list: Vec<StreamConfigEntry> = p.config_list.iter().map(StreamConfigEntry::from).collect();
            let trigger = StreamTrigger::from(&p.trigger);
            let result =
                dispatch.stream_config(p.device, p.subdevice, &list, &trigger, p.fifo_irq_threshold, p.flags);
            encode(&status(&result))
        }
        Procedure::StreamRead => {
            let p = StreamReadParams::decode(args)?;
            let mut values = vec![0; length(p.count)];
            let result = dispatch.stream_read(p.device, p.subdevice, p.read_mode, &mut values, 0, p.flags);
            values.truncate(*result.as_ref().unwrap_or(&0));
            encode(&StreamReadReply {
                error: status(&result),
                values,
            })
        }
        Procedure::StreamWrite => {
            let p = StreamWriteParams::decode(args)?;
            let result = dispatch.stream_write(p.device, p.subdevice, p.write_mode, &p.values, 0, p.flags);
            encode(&count_reply(result))
        }
        Procedure::StreamStart => {
            let p = StreamStartParams::decode(args)?;
            let mut list: Vec<StreamStartEntry> = p.list.iter().map(StreamStartEntry::from).collect();
            let result = dispatch.stream_start(&mut list, p.flags);
            encode(&ListReply {
                error: status(&result),
                list: list.iter().map(|entry| entry.errno).collect(),
            })
        }
        Procedure::StreamStop => {
            let p = StreamStopParams::decode(args)?;
            let mut list: Vec<StreamStopEntry> = p.list.iter().map(StreamStopEntry::from).collect();
            let result = dispatch.stream_stop(&mut list, p.flags);
            encode(&ListReply {
                error: status(&result),
                list: list.iter().map(|entry| entry.errno).collect(),
            })
        }
        Procedure::StreamStatus => {
            let p = StreamStatusParams::decode(args)?;
            let result = dispatch.stream_status(p.device, p.subdevice, p.wait, p.flags);
            let error = status(&result);
            let state = result.unwrap_or_default();
            encode(&StreamStatusReply {
                error,
                status: state.status,
                count: state.count,
            })
        }
        Procedure::StreamFrequencyToTicks => {
            let p = TicksParams::decode(args)?;
            encode(&ticks_reply(
                dispatch.stream_frequency_to_ticks(p.device, p.subdevice, p.timer, p.value, p.flags),
            ))
        }
        Procedure::StreamTimeToTicks => {
            let p = TicksParams::decode(args)?;
            encode(&ticks_reply(
                dispatch.stream_time_to_ticks(p.device, p.subdevice, p.timer, p.value, p.flags),
            ))
        }
        Procedure::StreamNewValues => {
            let p = NewValuesParams::decode(args)?;
            let result = dispatch.stream_new_values(p.device, p.subdevice, p.time_out, p.flags);
            encode(&CountReply {
                error: status(&result),
                count: result.unwrap_or(0),
            })
        }

        // =====================================================================
        // Queries
        // =====================================================================
        Procedure::QueryDescriptionDevice => {
            let device = i32::decode(args)?;
            encode(&text_reply(dispatch.query_device_description(device)))
        }
        Procedure::QueryInfoDevice => {
            let device = i32::decode(args)?;
            match dispatch.query_device_info(device) {
                Ok(info) => encode(&InfoReply::ok(&info)),
                Err(e) => encode(&InfoReply {
                    error: e.code().as_raw(),
                    ..Default::default()
                }),
            }
        }
        Procedure::QueryNameDevice => {
            let device = i32::decode(args)?;
            encode(&text_reply(dispatch.query_device_name(device)))
        }
        Procedure::QueryNameDeviceDriver => {
            let device = i32::decode(args)?;
            encode(&text_reply(dispatch.query_device_driver_name(device)))
        }
        Procedure::QueryNumberDevices => encode(&number_reply(Ok(driver.query_number_devices()))),
        Procedure::QueryNumberSubdevices => {
            let device = i32::decode(args)?;
            encode(&number_reply(dispatch.query_number_subdevices(device)))
        }
        Procedure::QueryNumberChannels => {
            let p = SubdeviceParams::decode(args)?;
            encode(&number_reply(dispatch.query_number_channels(p.device, p.subdevice)))
        }
        Procedure::QueryNumberRanges => {
            let p = RangesParams::decode(args)?;
            encode(&number_reply(dispatch.query_number_ranges(p.device, p.subdevice, p.unit)))
        }
        Procedure::QueryRangeByMinMax => {
            let p = RangeByMinMaxParams::decode(args)?;
            let result = dispatch.query_range_by_min_max(p.device, p.subdevice, p.unit, p.min, p.max);
            let error = status(&result);
            let (range, info) = result.unwrap_or_default();
            encode(&RangeByMinMaxReply {
                error,
                min: info.min,
                max: info.max,
                max_data: info.max_data,
                range,
            })
        }
        Procedure::QueryRangeInfo => {
            let p = RangeInfoParams::decode(args)?;
            let result = dispatch.query_range_info(p.device, p.subdevice, p.range);
            let error = status(&result);
            let info = result.unwrap_or_default();
            encode(&RangeInfoReply {
                error,
                unit: info.unit,
                min: info.min,
                max: info.max,
                max_data: info.max_data,
            })
        }
        Procedure::QuerySubdeviceByType => {
            let p = SubdeviceByTypeParams::decode(args)?;
            let result = dispatch.query_subdevice_by_type(p.device, p.start_subdevice, p.kind, p.subtype);
            encode(&SubdeviceByTypeReply {
                error: status(&result),
                subdevice: result.unwrap_or(0),
            })
        }
        Procedure::QuerySubdeviceType => {
            let p = SubdeviceParams::decode(args)?;
            let result = dispatch.query_subdevice_type(p.device, p.subdevice);
            let error = status(&result);
            let (kind, subtype) = result.unwrap_or_default();
            encode(&SubdeviceTypeReply { error, kind, subtype })
        }
        Procedure::QuerySubdeviceCaps => {
            let p = SubdeviceParams::decode(args)?;
            let result = dispatch.query_subdevice_caps(p.device, p.subdevice);
            encode(&CapsReply {
                error: status(&result),
                caps: result.unwrap_or(0),
            })
        }
        Procedure::QuerySubdeviceCapsArgs => {
            let p = CapsArgsParams::decode(args)?;
            let mut caps_args = vec![0; length(p.count)];
            let result = dispatch.query_subdevice_caps_args(p.device, p.subdevice, p.cap, &mut caps_args);
            encode(&CapsArgsReply {
                error: status(&result),
                args: caps_args,
            })
        }
        Procedure::QueryVersionLibrary => encode(&number_reply(Ok(ME_VERSION_LIBRARY))),
        Procedure::QueryVersionMainDriver => encode(&number_reply(driver.query_driver_version())),
        Procedure::QueryVersionDeviceDriver => {
            let device = i32::decode(args)?;
            encode(&number_reply(dispatch.query_device_driver_version(device)))
        }
    };
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::message::{decode_reply, ReplyStatus};
    use crate::sim::{SimBoard, SimulatedDriver};

    fn driver() -> Driver {
        Driver::open_local(Arc::new(SimulatedDriver::new(vec![SimBoard::multifunction(3)]))).unwrap()
    }

    fn call(driver: &Driver, program: u32, version: u32, procedure: u32, args: &[u8]) -> (ReplyStatus, Bytes) {
        let mut buf = BytesMut::new();
        CallHeader {
            xid: 42,
            program,
            version,
            procedure,
        }
        .encode(&mut buf);
        buf.extend_from_slice(args);
        let mut reply = handle_call(driver, buf.freeze()).unwrap().freeze();
        let (xid, status) = decode_reply(&mut reply).unwrap();
        assert_eq!(xid, 42);
        (status, reply)
    }

    #[test]
    fn test_rejects_unknown_program_version_and_procedure() {
        let driver = driver();
        let (status, _) = call(&driver, PROGRAM + 1, VERSION, 26, &[]);
        assert_eq!(status, ReplyStatus::Accepted(AcceptStat::ProgUnavail));
        let (status, _) = call(&driver, PROGRAM, VERSION + 1, 26, &[]);
        assert_eq!(status, ReplyStatus::Accepted(AcceptStat::ProgMismatch));
        let (status, _) = call(&driver, PROGRAM, VERSION, 99, &[]);
        assert_eq!(status, ReplyStatus::Accepted(AcceptStat::ProcUnavail));
    }

    #[test]
    fn test_truncated_arguments_are_garbage() {
        let driver = driver();
        let (status, _) = call(&driver, PROGRAM, VERSION, Procedure::QueryNumberChannels.number(), &[0, 0]);
        assert_eq!(status, ReplyStatus::Accepted(AcceptStat::GarbageArgs));
    }

    #[test]
    fn test_query_reaches_driver() {
        let driver = driver();
        let args = super::super::xdr::to_bytes(&SubdeviceParams {
            device: 0,
            subdevice: 0,
        });
        let (status, mut body) = call(&driver, PROGRAM, VERSION, Procedure::QueryNumberChannels.number(), &args);
        assert_eq!(status, ReplyStatus::Accepted(AcceptStat::Success));
        let reply = NumberReply::decode(&mut body).unwrap();
        assert_eq!((reply.error, reply.number), (0, 16));
    }

    #[test]
    fn test_invalid_device_is_a_status_not_a_fault() {
        let driver = driver();
        let args = super::super::xdr::to_bytes(&7i32);
        let (status, mut body) = call(&driver, PROGRAM, VERSION, Procedure::QueryNameDevice.number(), &args);
        assert_eq!(status, ReplyStatus::Accepted(AcceptStat::Success));
        let reply = TextReply::decode(&mut body).unwrap();
        assert_eq!(reply.error, crate::error::ErrorCode::InvalidDevice.as_raw());
        assert!(reply.text.is_empty());
    }
}
