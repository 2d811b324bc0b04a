//! Blocking client side of the board service.

use std::io::{self, BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::BytesMut;
use tracing::{debug, trace};

use super::message::{self, AcceptStat, CallHeader, ReplyStatus};
use super::xdr::Xdr;
use super::{Procedure, PROGRAM, VERSION};
use crate::error::{MeError, Result};

/// Blocking client for one board server connection.
///
/// Calls are strictly sequential; the owner serialises access. Replies with
/// a stale transaction id (left over from a call that timed out) are
/// discarded.
pub struct RpcClient {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    peer: String,
    timeout: Duration,
    xid: u32,
}

impl RpcClient {
    /// Connect to `addr` (`host:port`), waiting at most `timeout` for the
    /// connection and for every reply.
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let connect_err = |message: String| MeError::ConnectRemote {
            peer: addr.to_string(),
            message,
        };
        let candidates: Vec<SocketAddr> = addr
            .to_socket_addrs()
            .map_err(|e| connect_err(e.to_string()))?
            .collect();

        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing");
        for candidate in candidates {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(stream) => {
                    return Self::from_stream(stream, addr, timeout)
                        .map_err(|e| connect_err(e.to_string()));
                }
                Err(e) => {
                    debug!(peer = %candidate, error = %e, "connect attempt failed");
                    last_err = e;
                }
            }
        }
        Err(connect_err(last_err.to_string()))
    }

    fn from_stream(stream: TcpStream, peer: &str, timeout: Duration) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            reader,
            writer: BufWriter::new(stream),
            peer: peer.to_string(),
            timeout,
            xid: std::process::id().rotate_left(16),
        })
    }

    /// Address this client was connected to.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Invoke `procedure` and decode its result.
    ///
    /// `wait_ms` is the time the server may block inside the call (an
    /// operation timeout); it extends the reply deadline.
    pub fn call<A: Xdr, R: Xdr>(&mut self, procedure: Procedure, args: &A, wait_ms: i32) -> Result<R> {
        self.xid = self.xid.wrapping_add(1);
        let xid = self.xid;

        let mut payload = BytesMut::new();
        CallHeader {
            xid,
            program: PROGRAM,
            version: VERSION,
            procedure: procedure.number(),
        }
        .encode(&mut payload);
        args.encode(&mut payload);

        let deadline = self.timeout + Duration::from_millis(u64::try_from(wait_ms).unwrap_or(0));
        self.reader
            .get_ref()
            .set_read_timeout(Some(deadline))
            .map_err(|e| self.transport(procedure, e))?;

        trace!(peer = %self.peer, ?procedure, xid, "rpc call");
        message::write_record(&mut self.writer, &payload).map_err(|e| self.transport(procedure, e))?;

        loop {
            let mut record =
                message::read_record(&mut self.reader).map_err(|e| self.transport(procedure, e))?;
            let (reply_xid, status) =
                message::decode_reply(&mut record).map_err(|e| self.transport(procedure, e))?;
            if reply_xid != xid {
                debug!(peer = %self.peer, expected = xid, got = reply_xid, "discarding stale reply");
                continue;
            }
            return match status {
                ReplyStatus::Accepted(AcceptStat::Success) => {
                    R::decode(&mut record).map_err(|e| self.transport(procedure, e))
                }
                ReplyStatus::Accepted(other) => Err(self.transport(procedure, format!("call not served: {other:?}"))),
                ReplyStatus::Denied(reason) => Err(self.transport(procedure, format!("call denied ({reason})"))),
            };
        }
    }

    fn transport(&self, procedure: Procedure, err: impl ToString) -> MeError {
        MeError::Communication {
            peer: self.peer.clone(),
            message: format!("{procedure:?}: {}", err.to_string()),
        }
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("peer", &self.peer)
            .field("timeout", &self.timeout)
            .finish()
    }
}
