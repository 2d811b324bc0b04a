//! Driver handle.
//!
//! A [`Driver`] owns the catalog, every opened transport context and the
//! error reporter. It is created by one of the `open` constructors and passed
//! (usually behind an `Arc`) to everything that issues calls.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::catalog::Catalog;
use crate::config::MeidsConfig;
use crate::context::{LocalContext, LockFlags, LockOp, RemoteContext, TransportContext};
use crate::control::ControlChannel;
use crate::defs::ME_VERSION_LIBRARY;
use crate::discovery;
use crate::dispatch::VirtualDispatcher;
use crate::error::{self, ErrorCode, ErrorHandler, ErrorReporter, Result};
use crate::resolver::ShortcutTable;
use crate::sim::SimulatedDriver;
use crate::trigger::ConvClassMapping;

/// An open set of backends and the catalog built from them.
#[derive(Debug)]
pub struct Driver {
    catalog: Catalog,
    contexts: Vec<Arc<TransportContext>>,
    reporter: ErrorReporter,
}

impl Driver {
    /// Open a single local context on `channel`.
    pub fn open_local(channel: Arc<dyn ControlChannel>) -> Result<Self> {
        Self::open_local_with(channel, ConvClassMapping::default())
    }

    /// Open a single local context with an explicit trigger mapping.
    pub fn open_local_with(channel: Arc<dyn ControlChannel>, mapping: ConvClassMapping) -> Result<Self> {
        let context = Arc::new(TransportContext::Local(LocalContext::new(channel, mapping)));
        Self::open_contexts(vec![context])
    }

    /// Open a single remote context on the server at `addr`.
    pub fn open_remote(addr: &str, timeout: Duration) -> Result<Self> {
        let context = Arc::new(TransportContext::Remote(RemoteContext::open(addr, timeout)?));
        Self::open_contexts(vec![context])
    }

    /// Open everything `config` names.
    ///
    /// Remote hosts that cannot be reached or probed are skipped with a
    /// warning; the handle serves whatever did open.
    #[instrument(skip_all)]
    pub fn open(config: &MeidsConfig) -> Result<Self> {
        let mut contexts = Vec::new();

        if config.local.enabled {
            let boards = config.local.boards.iter().map(|b| b.to_board()).collect();
            let channel: Arc<dyn ControlChannel> = Arc::new(SimulatedDriver::new(boards));
            contexts.push(Arc::new(TransportContext::Local(LocalContext::new(
                channel,
                config.trigger.mapping,
            ))));
        }

        let timeout = Duration::from_millis(config.remote.timeout_ms);
        for addr in config.remote.addresses() {
            match RemoteContext::open(&addr, timeout) {
                Ok(remote) => contexts.push(Arc::new(TransportContext::Remote(remote))),
                Err(err) => warn!(peer = %addr, error = %err, "skipping unreachable remote host"),
            }
        }

        Self::open_contexts(contexts)
    }

    /// Probe every context, join the catalogs in order and number the result
    /// from zero.
    ///
    /// A remote context whose discovery fails is closed and left out. A
    /// failing local context closes everything opened so far.
    pub fn open_contexts(contexts: Vec<Arc<TransportContext>>) -> Result<Self> {
        let mut catalog = Catalog::new();
        let mut opened = Vec::with_capacity(contexts.len());

        for context in contexts {
            match discovery::probe(&context) {
                Ok(found) => {
                    catalog = Catalog::join(&catalog, &found)?;
                    opened.push(context);
                }
                Err(err) if matches!(&*context, TransportContext::Remote(_)) => {
                    warn!(context = %context.label(), error = %err, "discovery failed; dropping context");
                    close_context(&context);
                }
                Err(err) => {
                    for context in opened.iter().chain(std::iter::once(&context)) {
                        close_context(context);
                    }
                    return Err(err);
                }
            }
        }

        catalog.enumerate(0);
        info!(contexts = opened.len(), devices = catalog.len(), "driver opened");
        Ok(Self {
            catalog,
            contexts: opened,
            reporter: ErrorReporter::new(),
        })
    }

    /// Tear down listeners, close every context and drop the catalog.
    ///
    /// Calling it again is a no-op.
    pub fn close(&mut self) {
        if self.contexts.is_empty() && self.catalog.is_empty() {
            return;
        }
        for context in self.contexts.drain(..) {
            close_context(&context);
        }
        self.catalog.clean();
        info!("driver closed");
    }

    /// The catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Open contexts in catalog order.
    pub fn contexts(&self) -> &[Arc<TransportContext>] {
        &self.contexts
    }

    /// Error reporter of this handle.
    pub fn reporter(&self) -> &ErrorReporter {
        &self.reporter
    }

    /// Dispatcher resolving against the catalog.
    pub fn dispatch(&self) -> VirtualDispatcher<'_, Catalog> {
        VirtualDispatcher::new(&self.catalog, &self.reporter)
    }

    /// Dense lookup table over the catalog.
    pub fn shortcut(&self) -> ShortcutTable<'_> {
        self.catalog.shortcut()
    }

    // =========================================================================
    // Driver-wide operations
    // =========================================================================

    /// Lock, release or check the whole driver across every context.
    ///
    /// Unless `FORCE` is given, a `Set` or `Release` first checks that every
    /// context reports the lock as available. The lock is then applied in
    /// context order; if a `Set` fails at one context, the contexts already
    /// locked are released again with `PRESERVE` before the failure is
    /// returned.
    #[instrument(skip(self))]
    pub fn lock_driver(&self, lock: LockOp, flags: LockFlags) -> Result<()> {
        let result = self.lock_all(lock, flags);
        self.reporter.report("lock_driver", result)
    }

    fn lock_all(&self, lock: LockOp, flags: LockFlags) -> Result<()> {
        if self.contexts.is_empty() {
            return Err(ErrorCode::NotOpen.into());
        }

        if !flags.contains(LockFlags::FORCE) && lock != LockOp::Check {
            for context in &self.contexts {
                context.calls().lock_driver(LockOp::Check, flags)?;
            }
        }

        for (applied, context) in self.contexts.iter().enumerate() {
            if let Err(err) = context.calls().lock_driver(lock, flags) {
                warn!(context = %context.label(), error = %err, "driver lock failed");
                if lock == LockOp::Set {
                    for done in &self.contexts[..applied] {
                        if let Err(undo) = done.calls().lock_driver(LockOp::Release, LockFlags::PRESERVE) {
                            warn!(context = %done.label(), error = %undo, "lock rollback failed");
                        }
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Version of this library.
    pub fn query_library_version(&self) -> i32 {
        ME_VERSION_LIBRARY
    }

    /// Driver version reported by the first context.
    pub fn query_driver_version(&self) -> Result<i32> {
        let result = self.first_context().and_then(|c| c.calls().query_driver_version());
        self.reporter.report("query_driver_version", result)
    }

    /// Driver name reported by the first context.
    pub fn query_driver_name(&self) -> Result<String> {
        let result = self.first_context().and_then(|c| c.calls().query_driver_name());
        self.reporter.report("query_driver_name", result)
    }

    /// Number of logical device slots (highest logical number plus one).
    pub fn query_number_devices(&self) -> i32 {
        self.catalog.max_number() + 1
    }

    fn first_context(&self) -> Result<&Arc<TransportContext>> {
        self.contexts.first().ok_or_else(|| ErrorCode::NotOpen.into())
    }

    // =========================================================================
    // Error reporting
    // =========================================================================

    /// Last recorded error; `clear` resets it.
    pub fn last_error(&self, clear: bool) -> ErrorCode {
        self.reporter.last_error(clear)
    }

    /// Install or remove the user error handler.
    pub fn set_error_handler(&self, handler: Option<ErrorHandler>) {
        self.reporter.set_user_handler(handler);
    }

    /// Toggle the handler that logs every failure.
    pub fn set_default_error_handler(&self, enabled: bool) {
        self.reporter.set_default_handler(enabled);
    }

    /// Message text for a raw error code.
    pub fn error_message(&self, raw: i32) -> Result<&'static str> {
        let result = error::error_message(raw);
        self.reporter.report("error_message", result)
    }
}

fn close_context(context: &TransportContext) {
    if let Err(err) = context.calls().close() {
        warn!(context = %context.label(), error = %err, "context close failed");
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PlugState;
    use crate::config::{BoardDefinition, BoardModel};
    use crate::sim::{LockScope, SimBoard};

    fn sim_driver(boards: Vec<SimBoard>) -> (Arc<SimulatedDriver>, Driver) {
        let sim = Arc::new(SimulatedDriver::new(boards));
        let driver = Driver::open_local(sim.clone()).unwrap();
        (sim, driver)
    }

    #[test]
    fn test_open_enumerates_from_zero() {
        let (_sim, driver) = sim_driver(vec![SimBoard::multifunction(1), SimBoard::digital(2)]);
        let numbers: Vec<i32> = driver.catalog().devices().iter().map(|d| d.logical_no).collect();
        assert_eq!(numbers, vec![0, 1]);
        assert_eq!(driver.query_number_devices(), 2);
        assert_eq!(driver.query_driver_name().unwrap(), crate::sim::DRIVER_NAME);
    }

    #[test]
    fn test_open_from_config() {
        let mut config = MeidsConfig::default();
        config.local.boards = vec![
            BoardDefinition {
                model: BoardModel::Digital,
                serial: 10,
            },
            BoardDefinition {
                model: BoardModel::Multifunction,
                serial: 11,
            },
        ];
        let driver = Driver::open(&config).unwrap();
        assert_eq!(driver.contexts().len(), 1);
        assert_eq!(driver.catalog().devices()[1].serial_no, 11);
        assert!(driver.catalog().devices().iter().all(|d| d.plug == PlugState::Present));
    }

    #[test]
    fn test_lock_driver_checks_first() {
        let (sim, driver) = sim_driver(vec![SimBoard::digital(1)]);
        sim.foreign_lock(LockScope::Driver);

        let err = driver.lock_driver(LockOp::Set, LockFlags::empty()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Locked);
        assert_eq!(driver.last_error(true), ErrorCode::Locked);

        sim.release_foreign(LockScope::Driver);
        driver.lock_driver(LockOp::Set, LockFlags::empty()).unwrap();
        assert!(sim.holds_lock(LockScope::Driver));
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_open_drops_remote_that_fails_discovery() {
        use crate::rpc::message::{self, AcceptStat, CallHeader};
        use crate::rpc::xdr::Xdr;
        use std::net::TcpListener;

        // Accepts the session, then hangs up on the first query.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut record = message::read_record(&mut stream).unwrap();
            let header = CallHeader::decode(&mut record).unwrap();
            let mut reply = bytes::BytesMut::new();
            message::encode_reply(header.xid, AcceptStat::Success, &mut reply);
            0i32.encode(&mut reply);
            message::write_record(&mut stream, &reply).unwrap();
            let _ = message::read_record(&mut stream);
        });

        let remote = RemoteContext::open(&addr, Duration::from_millis(500)).unwrap();
        let sim = Arc::new(SimulatedDriver::new(vec![SimBoard::digital(1)]));
        let contexts = vec![
            Arc::new(TransportContext::Local(LocalContext::new(sim, ConvClassMapping::default()))),
            Arc::new(TransportContext::Remote(remote)),
        ];

        let driver = Driver::open_contexts(contexts).unwrap();
        assert_eq!(driver.contexts().len(), 1);
        assert_eq!(driver.query_number_devices(), 1);
        assert!(logs_contain("discovery failed; dropping context"));
        assert!(!logs_contain("context close failed"));
    }

    #[test]
    fn test_close_is_idempotent() {
        let (_sim, mut driver) = sim_driver(vec![SimBoard::digital(1)]);
        driver.close();
        driver.close();
        assert!(driver.catalog().is_empty());
        let err = driver.lock_driver(LockOp::Check, LockFlags::empty()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotOpen);
    }
}
