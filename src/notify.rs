//! Background notification listeners.
//!
//! Each listener is a detached OS thread bound to one (device, subdevice)
//! slot of a transport context. It loops on a short blocking wait and
//! delivers every non-timeout outcome to a user callback. Deliveries of one
//! context are serialized by the context's listener mutex, which is
//! reentrant so that a callback may tear down listeners (its own included)
//! without deadlocking.
//!
//! Cancellation is cooperative: [`ListenerSet::destroy`] detaches the slot
//! and raises its cancel flag; the thread observes the flag after its
//! current wait returns, which is bounded by [`WAIT_SLICE_MS`].

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::ReentrantMutex;
use tracing::{debug, trace, warn};

use crate::context::TransportContext;
use crate::defs::{
    ME_IO_STREAM_NEW_VALUES_ERROR_REPORT_FLAG, ME_IO_STREAM_NEW_VALUES_SCREEN_FLAG,
    ME_STOP_MODE_IMMEDIATE, ME_WAIT_START, ME_WAIT_STOP,
};
use crate::error::{ErrorCode, MeError, Result};
use crate::types::StreamStopEntry;

/// Upper bound of one listener wait in milliseconds.
pub const WAIT_SLICE_MS: i32 = 100;

/// What a callback asks the listener to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    /// Keep the hardware running.
    Continue,
    /// Stop the interrupt or stream that triggered the event.
    Stop,
}

/// Interrupt delivered to an interrupt callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqEvent {
    /// Logical device number.
    pub device: i32,
    pub subdevice: i32,
    pub channel: i32,
    pub irq_count: i32,
    pub value: i32,
    /// Failure reported by the wait, if any.
    pub error: Option<ErrorCode>,
}

/// Stream state change delivered to a stream callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamEvent {
    /// Logical device number.
    pub device: i32,
    pub subdevice: i32,
    /// Value count reported by the wait.
    pub value: i32,
    /// Failure reported by the wait, if any.
    pub error: Option<ErrorCode>,
}

/// Interrupt callback.
pub type IrqCallback = Arc<dyn Fn(&IrqEvent) -> CallbackAction + Send + Sync>;

/// Stream callback.
pub type StreamCallback = Arc<dyn Fn(&StreamEvent) -> CallbackAction + Send + Sync>;

/// Kind of a listener slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    Interrupt,
    StreamStart,
    StreamStop,
    StreamNewValues,
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Interrupt => "irq",
            Self::StreamStart => "start",
            Self::StreamStop => "stop",
            Self::StreamNewValues => "values",
        })
    }
}

/// A listener to install.
#[derive(Clone)]
pub enum Listener {
    /// Wait for interrupts; `flags` are passed to every wait.
    Interrupt { flags: i32, callback: IrqCallback },
    /// Wait for stream starts.
    StreamStart(StreamCallback),
    /// Wait for stream stops.
    StreamStop(StreamCallback),
    /// Wait for new stream values.
    StreamNewValues(StreamCallback),
}

impl Listener {
    /// Slot kind of this listener.
    pub fn kind(&self) -> ListenerKind {
        match self {
            Self::Interrupt { .. } => ListenerKind::Interrupt,
            Self::StreamStart(_) => ListenerKind::StreamStart,
            Self::StreamStop(_) => ListenerKind::StreamStop,
            Self::StreamNewValues(_) => ListenerKind::StreamNewValues,
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Listener").field(&self.kind()).finish()
    }
}

/// Addressing of a listener slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerTarget {
    /// Backend-local device number used for waits.
    pub physical: i32,
    /// Caller-visible device number reported to callbacks.
    pub logical: i32,
    pub subdevice: i32,
}

struct Slot {
    id: u64,
    device: i32,
    subdevice: i32,
    kind: ListenerKind,
    cancel: Arc<AtomicBool>,
    thread: ThreadId,
}

/// Listener threads of one transport context.
#[derive(Default)]
pub struct ListenerSet {
    slots: ReentrantMutex<RefCell<Vec<Slot>>>,
    next_id: AtomicU64,
}

impl fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("active", &self.len())
            .finish()
    }
}

impl ListenerSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a listener on `context` and insert it at the head of the set.
    pub fn create(context: &Arc<TransportContext>, target: ListenerTarget, listener: Listener) -> Result<()> {
        let set = context.listeners();
        let kind = listener.kind();
        let guard = set.slots.lock();
        let id = set.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            id,
            context: Arc::clone(context),
            target,
            listener,
            cancel: Arc::clone(&cancel),
        };
        let handle = thread::Builder::new()
            .name(format!("me-{kind}-{}.{}", target.physical, target.subdevice))
            .spawn(move || worker.run())
            .map_err(|err| {
                warn!(%err, %kind, "cannot start listener thread");
                MeError::Code(ErrorCode::StartThread)
            })?;
        guard.borrow_mut().insert(
            0,
            Slot {
                id,
                device: target.physical,
                subdevice: target.subdevice,
                kind,
                cancel,
                thread: handle.thread().id(),
            },
        );
        debug!(
            device = target.physical,
            subdevice = target.subdevice,
            %kind,
            "listener started"
        );
        Ok(())
    }

    /// Cancel and detach every matching slot; returns how many were removed.
    ///
    /// `device < 0` matches all devices, `subdevice < 0` all subdevices of
    /// `device`. Safe to call from inside a callback, including for the
    /// calling listener itself.
    pub fn destroy(&self, device: i32, subdevice: i32) -> usize {
        let me = thread::current().id();
        let guard = self.slots.lock();
        let mut slots = guard.borrow_mut();
        let before = slots.len();
        slots.retain(|slot| {
            let hit = device < 0
                || (slot.device == device && (subdevice < 0 || slot.subdevice == subdevice));
            if hit {
                slot.cancel.store(true, Ordering::Release);
                trace!(
                    device = slot.device,
                    subdevice = slot.subdevice,
                    kind = %slot.kind,
                    own = slot.thread == me,
                    "listener cancelled"
                );
            }
            !hit
        });
        before - slots.len()
    }

    /// Number of active slots.
    pub fn len(&self) -> usize {
        self.slots.lock().borrow().len()
    }

    /// Whether no listener is active.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of active slots for one device.
    pub fn count_for(&self, device: i32) -> usize {
        self.slots
            .lock()
            .borrow()
            .iter()
            .filter(|slot| slot.device == device)
            .count()
    }

    fn forget(&self, id: u64) {
        let guard = self.slots.lock();
        guard.borrow_mut().retain(|slot| slot.id != id);
    }
}

/// Outcome of one wait.
enum Wake {
    /// Nothing to deliver; check for cancellation and wait again.
    Idle,
    /// Deliver to the callback.
    Event {
        irq_count: i32,
        value: i32,
        error: Option<ErrorCode>,
    },
}

struct Worker {
    id: u64,
    context: Arc<TransportContext>,
    target: ListenerTarget,
    listener: Listener,
    cancel: Arc<AtomicBool>,
}

impl Worker {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn run(self) {
        let mut last_error = Some(ErrorCode::InvalidErrorNumber);
        while !self.cancelled() {
            let wake = self.wait(&mut last_error);
            if self.cancelled() {
                break;
            }
            let Wake::Event {
                irq_count,
                value,
                error,
            } = wake
            else {
                continue;
            };

            let set = self.context.listeners();
            let _delivery = set.slots.lock();
            if self.cancelled() {
                break;
            }
            self.deliver(irq_count, value, error);
        }
        self.context.listeners().forget(self.id);
        trace!(
            device = self.target.physical,
            subdevice = self.target.subdevice,
            kind = %self.listener.kind(),
            "listener exited"
        );
    }

    fn wait(&self, last_error: &mut Option<ErrorCode>) -> Wake {
        let calls = self.context.calls();
        let ListenerTarget {
            physical,
            subdevice,
            ..
        } = self.target;
        match &self.listener {
            Listener::Interrupt { flags, .. } => {
                match calls.irq_wait(physical, subdevice, 0, WAIT_SLICE_MS, *flags) {
                    Ok(wait) => Wake::Event {
                        irq_count: wait.irq_count,
                        value: wait.value,
                        error: None,
                    },
                    Err(err) if err.is_timeout() => Wake::Idle,
                    Err(err) => Wake::Event {
                        irq_count: 0,
                        value: 0,
                        error: Some(err.code()),
                    },
                }
            }
            Listener::StreamStart(_) | Listener::StreamStop(_) => {
                let wait = if matches!(self.listener, Listener::StreamStart(_)) {
                    ME_WAIT_START
                } else {
                    ME_WAIT_STOP
                };
                match calls.stream_status(physical, subdevice, wait, 0) {
                    Err(err) if err.is_timeout() => Wake::Idle,
                    result => {
                        let (value, error) = match result {
                            Ok(status) => (status.count, None),
                            Err(err) => (0, Some(err.code())),
                        };
                        // Identical consecutive failures are reported once.
                        if error.is_some() && error == *last_error {
                            return Wake::Idle;
                        }
                        *last_error = error;
                        Wake::Event {
                            irq_count: 0,
                            value,
                            error,
                        }
                    }
                }
            }
            Listener::StreamNewValues(_) => {
                let mut flags = ME_IO_STREAM_NEW_VALUES_SCREEN_FLAG;
                if matches!(last_error, Some(code) if *code != ErrorCode::Timeout && *code != ErrorCode::InvalidErrorNumber)
                {
                    flags |= ME_IO_STREAM_NEW_VALUES_ERROR_REPORT_FLAG;
                }
                let result = calls.stream_new_values(physical, subdevice, WAIT_SLICE_MS, flags);
                *last_error = result.as_ref().err().map(MeError::code);
                match result {
                    Ok(0) => Wake::Idle,
                    Ok(count) => Wake::Event {
                        irq_count: 0,
                        value: count,
                        error: None,
                    },
                    Err(err) if err.is_timeout() => Wake::Idle,
                    Err(err) => Wake::Event {
                        irq_count: 0,
                        value: 0,
                        error: Some(err.code()),
                    },
                }
            }
        }
    }

    fn deliver(&self, irq_count: i32, value: i32, error: Option<ErrorCode>) {
        let ListenerTarget {
            physical,
            logical,
            subdevice,
        } = self.target;
        let calls = self.context.calls();
        let stream_event = StreamEvent {
            device: logical,
            subdevice,
            value,
            error,
        };
        match &self.listener {
            Listener::Interrupt { callback, .. } => {
                let event = IrqEvent {
                    device: logical,
                    subdevice,
                    channel: 0,
                    irq_count,
                    value,
                    error,
                };
                if callback(&event) == CallbackAction::Stop && error.is_none() && !self.cancelled() {
                    if let Err(err) = calls.irq_stop(physical, subdevice, 0, 0) {
                        warn!(device = physical, subdevice, %err, "irq stop after callback failed");
                    }
                }
            }
            Listener::StreamStart(callback) => {
                if callback(&stream_event) == CallbackAction::Stop && error.is_none() && !self.cancelled() {
                    self.stop_stream();
                }
            }
            Listener::StreamStop(callback) => {
                let _ = callback(&stream_event);
            }
            Listener::StreamNewValues(callback) => {
                if callback(&stream_event) == CallbackAction::Stop && !self.cancelled() {
                    self.stop_stream();
                }
            }
        }
    }

    fn stop_stream(&self) {
        let mut entry = [StreamStopEntry {
            device: self.target.physical,
            subdevice: self.target.subdevice,
            stop_mode: ME_STOP_MODE_IMMEDIATE,
            flags: 0,
            errno: 0,
        }];
        if let Err(err) = self.context.calls().stream_stop(&mut entry, 0) {
            warn!(
                device = self.target.physical,
                subdevice = self.target.subdevice,
                %err,
                "stream stop after callback failed"
            );
        }
    }
}
