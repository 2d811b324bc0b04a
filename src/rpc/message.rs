//! Call and reply headers and TCP record marking.

use std::io::{self, Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::xdr::{Xdr, XdrError};

/// High bit of a record mark: this fragment ends the record.
pub const LAST_FRAGMENT: u32 = 0x8000_0000;

/// Largest record accepted from a peer.
pub const MAX_RECORD_LEN: usize = 16 << 20;

const RPC_VERSION: u32 = 2;
const MSG_CALL: u32 = 0;
const MSG_REPLY: u32 = 1;
const MSG_ACCEPTED: u32 = 0;
const MSG_DENIED: u32 = 1;
const AUTH_NONE: u32 = 0;
const MAX_AUTH_BODY: usize = 400;

/// Header parsing failures.
#[derive(Debug, Error)]
pub enum MessageError {
    /// An item could not be decoded.
    #[error(transparent)]
    Xdr(#[from] XdrError),

    /// A reply arrived where a call was expected.
    #[error("expected a call message, got type {0}")]
    NotACall(u32),

    /// A call arrived where a reply was expected.
    #[error("expected a reply message, got type {0}")]
    NotAReply(u32),

    /// The peer speaks another protocol version.
    #[error("unsupported RPC version {0}")]
    RpcVersion(u32),

    /// Credentials exceed the protocol limit.
    #[error("authentication body of {0} bytes is too large")]
    AuthTooLarge(usize),

    /// A status word outside the protocol.
    #[error("unknown reply status {0}")]
    UnknownStatus(u32),
}

/// Outcome of an accepted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AcceptStat {
    /// Results follow.
    Success = 0,
    /// The program is not served.
    ProgUnavail = 1,
    /// The program version is not served.
    ProgMismatch = 2,
    /// The procedure is not served.
    ProcUnavail = 3,
    /// The arguments could not be decoded.
    GarbageArgs = 4,
    /// The server failed internally.
    SystemErr = 5,
}

impl AcceptStat {
    fn from_raw(raw: u32) -> Result<Self, MessageError> {
        Ok(match raw {
            0 => Self::Success,
            1 => Self::ProgUnavail,
            2 => Self::ProgMismatch,
            3 => Self::ProcUnavail,
            4 => Self::GarbageArgs,
            5 => Self::SystemErr,
            other => return Err(MessageError::UnknownStatus(other)),
        })
    }
}

/// Reply status as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    /// The call was accepted with the given outcome.
    Accepted(AcceptStat),
    /// The call was rejected before dispatch.
    Denied(u32),
}

/// Header of a call message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallHeader {
    /// Transaction id echoed in the reply.
    pub xid: u32,
    pub program: u32,
    pub version: u32,
    pub procedure: u32,
}

impl CallHeader {
    /// Append the header with null credentials.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.xid);
        buf.put_u32(MSG_CALL);
        buf.put_u32(RPC_VERSION);
        buf.put_u32(self.program);
        buf.put_u32(self.version);
        buf.put_u32(self.procedure);
        encode_null_auth(buf);
        encode_null_auth(buf);
    }

    /// Consume a call header; credentials and verifier are skipped.
    pub fn decode(buf: &mut Bytes) -> Result<Self, MessageError> {
        let xid = u32::decode(buf)?;
        let kind = u32::decode(buf)?;
        if kind != MSG_CALL {
            return Err(MessageError::NotACall(kind));
        }
        let rpc_version = u32::decode(buf)?;
        if rpc_version != RPC_VERSION {
            return Err(MessageError::RpcVersion(rpc_version));
        }
        let program = u32::decode(buf)?;
        let version = u32::decode(buf)?;
        let procedure = u32::decode(buf)?;
        skip_auth(buf)?;
        skip_auth(buf)?;
        Ok(Self {
            xid,
            program,
            version,
            procedure,
        })
    }
}

fn encode_null_auth(buf: &mut BytesMut) {
    buf.put_u32(AUTH_NONE);
    buf.put_u32(0);
}

fn skip_auth(buf: &mut Bytes) -> Result<(), MessageError> {
    let _flavor = u32::decode(buf)?;
    let len = u32::decode(buf)? as usize;
    if len > MAX_AUTH_BODY {
        return Err(MessageError::AuthTooLarge(len));
    }
    let padded = len + (4 - len % 4) % 4;
    if buf.remaining() < padded {
        return Err(XdrError::Truncated {
            needed: padded,
            remaining: buf.remaining(),
        }
        .into());
    }
    buf.advance(padded);
    Ok(())
}

/// Append an accepted reply header. A version mismatch also carries the
/// supported version range.
pub fn encode_reply(xid: u32, status: AcceptStat, buf: &mut BytesMut) {
    buf.put_u32(xid);
    buf.put_u32(MSG_REPLY);
    buf.put_u32(MSG_ACCEPTED);
    encode_null_auth(buf);
    buf.put_u32(status as u32);
    if status == AcceptStat::ProgMismatch {
        buf.put_u32(super::VERSION);
        buf.put_u32(super::VERSION);
    }
}

/// Consume a reply header, returning its transaction id and status.
pub fn decode_reply(buf: &mut Bytes) -> Result<(u32, ReplyStatus), MessageError> {
    let xid = u32::decode(buf)?;
    let kind = u32::decode(buf)?;
    if kind != MSG_REPLY {
        return Err(MessageError::NotAReply(kind));
    }
    match u32::decode(buf)? {
        MSG_ACCEPTED => {
            skip_auth(buf)?;
            let status = AcceptStat::from_raw(u32::decode(buf)?)?;
            Ok((xid, ReplyStatus::Accepted(status)))
        }
        MSG_DENIED => Ok((xid, ReplyStatus::Denied(u32::decode(buf)?))),
        other => Err(MessageError::UnknownStatus(other)),
    }
}

/// Frame `payload` as one record and write it.
pub fn write_record<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let frame = frame_record(payload)?;
    writer.write_all(&frame)?;
    writer.flush()
}

/// Prefix `payload` with a last-fragment record mark.
pub fn frame_record(payload: &[u8]) -> io::Result<BytesMut> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| (*len as usize) <= MAX_RECORD_LEN)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "record too large"))?;
    let mut frame = BytesMut::with_capacity(4 + payload.len());
    frame.put_u32(LAST_FRAGMENT | len);
    frame.put_slice(payload);
    Ok(frame)
}

/// Split a record mark into fragment length and last-fragment bit.
pub fn parse_mark(mark: u32) -> (usize, bool) {
    ((mark & !LAST_FRAGMENT) as usize, mark & LAST_FRAGMENT != 0)
}

/// Read one complete record, joining fragments.
pub fn read_record<R: Read>(reader: &mut R) -> io::Result<Bytes> {
    let mut record = BytesMut::new();
    loop {
        let mut mark = [0u8; 4];
        reader.read_exact(&mut mark)?;
        let (len, last) = parse_mark(u32::from_be_bytes(mark));
        if record.len() + len > MAX_RECORD_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "record too large"));
        }
        let start = record.len();
        record.resize(start + len, 0);
        reader.read_exact(&mut record[start..])?;
        if last {
            return Ok(record.freeze());
        }
    }
}
