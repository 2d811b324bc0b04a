//! In-memory simulation of the kernel driver.
//!
//! [`SimulatedDriver`] implements [`ControlChannel`] over a model of a few
//! board types. It keeps lock ownership, interrupt and stream state per
//! subdevice and honours the blocking waits of the control interface, with
//! every wait bounded so that callers without a timeout cannot hang.
//!
//! Test hooks play the part of the outside world: another process holding
//! a lock, an interrupt line firing, samples arriving in a FIFO, a USB board
//! being pulled.

use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::control::{self, ControlChannel, ControlRequest};
use crate::defs::*;
use crate::error::ErrorCode;
use crate::types::SingleEntry;

/// Longest a blocking call without its own timeout is held.
pub const WAIT_CAP_MS: i32 = 100;

const VENDOR_ID: i32 = 0x1402;
/// Driver name reported by the simulated channel.
pub const DRIVER_NAME: &str = "meids-sim";
const DRIVER_VERSION: i32 = 0x0001_0200;
const TIMER_BASE: i32 = 33_000_000;
const TIMER_MIN_TICKS: u64 = 66;
const TIMER_MAX_TICKS: u64 = u32::MAX as u64;
const MID_SCALE: i32 = 0x8000;

type SimResult<T = ()> = std::result::Result<T, ErrorCode>;

// =============================================================================
// Board descriptions
// =============================================================================

/// One range of a simulated subdevice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimRange {
    pub unit: i32,
    pub min: f64,
    pub max: f64,
    pub max_data: i32,
}

impl SimRange {
    /// A voltage range with 16-bit resolution.
    pub fn volts(min: f64, max: f64) -> Self {
        Self {
            unit: ME_UNIT_VOLT,
            min,
            max,
            max_data: 0xFFFF,
        }
    }
}

/// One simulated subdevice.
#[derive(Debug, Clone, PartialEq)]
pub struct SimSubdevice {
    pub kind: i32,
    pub subtype: i32,
    pub channels: i32,
    pub ranges: Vec<SimRange>,
    pub caps: i32,
}

impl SimSubdevice {
    fn streaming(&self) -> bool {
        self.subtype == ME_SUBTYPE_STREAMING
    }

    fn analog(&self) -> bool {
        self.kind == ME_TYPE_AI || self.kind == ME_TYPE_AO
    }

    fn interrupts(&self) -> bool {
        self.kind == ME_TYPE_DIO || self.kind == ME_TYPE_CTR
    }
}

/// One simulated board.
#[derive(Debug, Clone, PartialEq)]
pub struct SimBoard {
    pub name: String,
    pub description: String,
    pub device_id: i32,
    pub serial_no: i32,
    pub bus_type: i32,
    pub subdevices: Vec<SimSubdevice>,
}

impl SimBoard {
    /// PCI multifunction board: streaming AI (16 channels, four ranges),
    /// streaming AO (4 channels), two 8-bit DIO ports and a counter.
    pub fn multifunction(serial_no: i32) -> Self {
        Self {
            name: "ME-4680".to_string(),
            description: "Simulated multifunction board".to_string(),
            device_id: 0x4680,
            serial_no,
            bus_type: ME_BUS_TYPE_PCI,
            subdevices: vec![
                SimSubdevice {
                    kind: ME_TYPE_AI,
                    subtype: ME_SUBTYPE_STREAMING,
                    channels: 16,
                    ranges: vec![
                        SimRange::volts(-10.0, 10.0),
                        SimRange::volts(-2.5, 2.5),
                        SimRange::volts(0.0, 10.0),
                        SimRange::volts(0.0, 2.5),
                    ],
                    caps: 0,
                },
                SimSubdevice {
                    kind: ME_TYPE_AO,
                    subtype: ME_SUBTYPE_STREAMING,
                    channels: 4,
                    ranges: vec![SimRange::volts(-10.0, 10.0)],
                    caps: 0,
                },
                SimSubdevice {
                    kind: ME_TYPE_DIO,
                    subtype: ME_SUBTYPE_SINGLE,
                    channels: 8,
                    ranges: Vec::new(),
                    caps: 0,
                },
                SimSubdevice {
                    kind: ME_TYPE_DIO,
                    subtype: ME_SUBTYPE_SINGLE,
                    channels: 8,
                    ranges: Vec::new(),
                    caps: 0,
                },
                SimSubdevice {
                    kind: ME_TYPE_CTR,
                    subtype: ME_SUBTYPE_CTR_8254,
                    channels: 1,
                    ranges: Vec::new(),
                    caps: 0,
                },
            ],
        }
    }

    /// USB digital board with four 8-bit ports.
    pub fn digital(serial_no: i32) -> Self {
        let port = SimSubdevice {
            kind: ME_TYPE_DIO,
            subtype: ME_SUBTYPE_SINGLE,
            channels: 8,
            ranges: Vec::new(),
            caps: 0,
        };
        Self {
            name: "ME-1000".to_string(),
            description: "Simulated digital I/O board".to_string(),
            device_id: 0x1000,
            serial_no,
            bus_type: ME_BUS_TYPE_USB,
            subdevices: vec![port; 4],
        }
    }
}

/// Scope of a lock held by another process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    Driver,
    Device(i32),
    Subdevice(i32, i32),
}

// =============================================================================
// Runtime state
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Holder {
    #[default]
    Free,
    Own,
    Foreign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Unconfigured,
    Configured,
    Running,
}

#[derive(Debug, Default)]
struct IrqState {
    enabled: bool,
    count: i32,
    pending: u32,
    value: i32,
}

#[derive(Debug, Default)]
struct StreamState {
    phase: Phase,
    fifo: VecDeque<i32>,
    unannounced: i32,
    started: bool,
    stopped: bool,
    stop_type: i32,
    stop_count: i32,
    list_len: i32,
    acquired: i32,
    written: Vec<i32>,
}

impl StreamState {
    fn running(&self) -> bool {
        self.phase == Phase::Running
    }

    fn halt(&mut self) {
        if self.running() {
            self.phase = Phase::Configured;
            self.stopped = true;
        }
    }
}

#[derive(Debug)]
struct SubState {
    layout: SimSubdevice,
    lock: Holder,
    values: Vec<i32>,
    output: bool,
    offset: i32,
    irq: IrqState,
    stream: StreamState,
}

impl SubState {
    fn new(layout: SimSubdevice) -> Self {
        let fill = if layout.kind == ME_TYPE_AI { MID_SCALE } else { 0 };
        let values = vec![fill; usize::try_from(layout.channels).unwrap_or(0)];
        Self {
            layout,
            lock: Holder::Free,
            values,
            output: false,
            offset: 0,
            irq: IrqState::default(),
            stream: StreamState::default(),
        }
    }

    fn reset(&mut self) {
        let layout = self.layout.clone();
        let lock = self.lock;
        *self = Self::new(layout);
        self.lock = lock;
    }

    fn channel(&self, channel: i32) -> SimResult<usize> {
        usize::try_from(channel)
            .ok()
            .filter(|&index| index < self.values.len())
            .ok_or(ErrorCode::InvalidChannel)
    }
}

#[derive(Debug)]
struct BoardState {
    layout: SimBoard,
    plugged: bool,
    lock: Holder,
    subs: Vec<SubState>,
}

#[derive(Debug, Default)]
struct SimState {
    boards: Vec<BoardState>,
    driver_lock: Holder,
    conflict_on_set: bool,
    loaded: Vec<(i32, Vec<u8>)>,
}

impl SimState {
    /// A board, plugged or not.
    fn any_board(&self, device: i32) -> SimResult<&BoardState> {
        usize::try_from(device)
            .ok()
            .and_then(|index| self.boards.get(index))
            .ok_or(ErrorCode::InvalidDevice)
    }

    fn board(&mut self, device: i32) -> SimResult<&mut BoardState> {
        let board = usize::try_from(device)
            .ok()
            .and_then(|index| self.boards.get_mut(index))
            .ok_or(ErrorCode::InvalidDevice)?;
        if !board.plugged {
            return Err(ErrorCode::DeviceUnplugged);
        }
        Ok(board)
    }

    fn sub(&mut self, device: i32, subdevice: i32) -> SimResult<&mut SubState> {
        let board = self.board(device)?;
        usize::try_from(subdevice)
            .ok()
            .and_then(|index| board.subs.get_mut(index))
            .ok_or(ErrorCode::InvalidSubdevice)
    }

    /// A subdevice not locked by another process.
    fn usable(&mut self, device: i32, subdevice: i32) -> SimResult<&mut SubState> {
        let driver_foreign = self.driver_lock == Holder::Foreign;
        let board = self.board(device)?;
        let board_foreign = board.lock == Holder::Foreign;
        let sub = usize::try_from(subdevice)
            .ok()
            .and_then(|index| board.subs.get_mut(index))
            .ok_or(ErrorCode::InvalidSubdevice)?;
        if driver_foreign || board_foreign || sub.lock == Holder::Foreign {
            return Err(ErrorCode::Locked);
        }
        Ok(sub)
    }

    fn take_conflict(&mut self, lock: i32) -> SimResult {
        if lock == ME_LOCK_SET && self.conflict_on_set {
            self.conflict_on_set = false;
            return Err(ErrorCode::Locked);
        }
        Ok(())
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Simulated driver serving a fixed set of boards.
pub struct SimulatedDriver {
    label: String,
    state: Mutex<SimState>,
    wake: Condvar,
}

impl std::fmt::Debug for SimulatedDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedDriver")
            .field("label", &self.label)
            .field("boards", &self.state.lock().boards.len())
            .finish()
    }
}

impl SimulatedDriver {
    /// Driver serving `boards` as devices `0..n`.
    pub fn new(boards: Vec<SimBoard>) -> Self {
        Self::with_label("sim", boards)
    }

    /// Same as [`SimulatedDriver::new`] with a log label.
    pub fn with_label(label: &str, boards: Vec<SimBoard>) -> Self {
        let boards = boards
            .into_iter()
            .map(|layout| BoardState {
                subs: layout.subdevices.iter().cloned().map(SubState::new).collect(),
                layout,
                plugged: true,
                lock: Holder::Free,
            })
            .collect();
        Self {
            label: label.to_string(),
            state: Mutex::new(SimState {
                boards,
                ..Default::default()
            }),
            wake: Condvar::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Hooks
    // -------------------------------------------------------------------------

    /// Mark `scope` as locked by another process.
    pub fn foreign_lock(&self, scope: LockScope) {
        self.set_holder(scope, Holder::Foreign);
    }

    /// Drop a lock held by another process.
    pub fn release_foreign(&self, scope: LockScope) {
        self.set_holder(scope, Holder::Free);
    }

    /// Whether this process holds the lock of `scope`.
    pub fn holds_lock(&self, scope: LockScope) -> bool {
        let state = self.state.lock();
        let holder = match scope {
            LockScope::Driver => Some(state.driver_lock),
            LockScope::Device(device) => state.any_board(device).ok().map(|b| b.lock),
            LockScope::Subdevice(device, subdevice) => state
                .any_board(device)
                .ok()
                .and_then(|b| usize::try_from(subdevice).ok().and_then(|i| b.subs.get(i)))
                .map(|s| s.lock),
        };
        holder == Some(Holder::Own)
    }

    /// Make the next lock-set request fail with [`ErrorCode::Locked`] even
    /// though a check would pass.
    pub fn inject_lock_conflict_on_set(&self) {
        self.state.lock().conflict_on_set = true;
    }

    /// Fire the interrupt line of a subdevice.
    pub fn raise_irq(&self, device: i32, subdevice: i32, value: i32) {
        let mut state = self.state.lock();
        if let Ok(sub) = state.sub(device, subdevice) {
            if sub.irq.enabled {
                sub.irq.pending += 1;
                sub.irq.value = value;
                self.wake.notify_all();
            }
        }
    }

    /// Feed acquired samples into a running input stream.
    pub fn push_values(&self, device: i32, subdevice: i32, values: &[i32]) {
        let mut state = self.state.lock();
        if let Ok(sub) = state.sub(device, subdevice) {
            let stream = &mut sub.stream;
            if !stream.running() {
                return;
            }
            for &value in values {
                stream.fifo.push_back(value);
                stream.unannounced += 1;
                stream.acquired += 1;
                let done = match stream.stop_type {
                    ME_STREAM_STOP_TYPE_SCAN_VALUE => stream.acquired >= stream.stop_count,
                    ME_STREAM_STOP_TYPE_ACQ_LIST => {
                        stream.acquired >= stream.stop_count.saturating_mul(stream.list_len)
                    }
                    _ => false,
                };
                if done && stream.stop_count > 0 {
                    stream.halt();
                    break;
                }
            }
            self.wake.notify_all();
        }
    }

    /// Set the value the next single read of an input channel returns.
    pub fn set_input(&self, device: i32, subdevice: i32, channel: i32, value: i32) {
        let mut state = self.state.lock();
        if let Ok(sub) = state.sub(device, subdevice) {
            if let Ok(index) = sub.channel(channel) {
                sub.values[index] = value;
            }
        }
    }

    /// Values written to an output stream so far.
    pub fn written(&self, device: i32, subdevice: i32) -> Vec<i32> {
        let mut state = self.state.lock();
        state
            .sub(device, subdevice)
            .map(|sub| sub.stream.written.clone())
            .unwrap_or_default()
    }

    /// Whether a subdevice is streaming.
    pub fn is_running(&self, device: i32, subdevice: i32) -> bool {
        let mut state = self.state.lock();
        state
            .sub(device, subdevice)
            .map(|sub| sub.stream.running())
            .unwrap_or(false)
    }

    /// Parameter blocks loaded so far, by device.
    pub fn loaded_parameters(&self) -> Vec<(i32, Vec<u8>)> {
        self.state.lock().loaded.clone()
    }

    /// Pull a board. Its streams stop and waits on it fail.
    pub fn unplug(&self, device: i32) {
        let mut state = self.state.lock();
        if let Some(board) = usize::try_from(device).ok().and_then(|i| state.boards.get_mut(i)) {
            board.plugged = false;
            for sub in &mut board.subs {
                sub.stream.halt();
                sub.irq.enabled = false;
            }
            debug!(sim = %self.label, device, "board unplugged");
        }
        self.wake.notify_all();
    }

    /// Plug a pulled board back in.
    pub fn replug(&self, device: i32) {
        let mut state = self.state.lock();
        if let Some(board) = usize::try_from(device).ok().and_then(|i| state.boards.get_mut(i)) {
            board.plugged = true;
        }
    }

    fn set_holder(&self, scope: LockScope, holder: Holder) {
        let mut state = self.state.lock();
        match scope {
            LockScope::Driver => state.driver_lock = holder,
            LockScope::Device(device) => {
                if let Ok(board) = state.board(device) {
                    board.lock = holder;
                }
            }
            LockScope::Subdevice(device, subdevice) => {
                if let Ok(sub) = state.sub(device, subdevice) {
                    sub.lock = holder;
                }
            }
        }
    }

    /// Wait until `ready` yields an outcome or the timeout passes.
    ///
    /// A non-positive timeout waits at most [`WAIT_CAP_MS`].
    fn wait_for<T>(
        &self,
        state: &mut MutexGuard<'_, SimState>,
        time_out: i32,
        mut ready: impl FnMut(&mut SimState) -> Option<SimResult<T>>,
    ) -> SimResult<T> {
        let limit = if time_out > 0 { time_out } else { WAIT_CAP_MS };
        let deadline = Instant::now() + Duration::from_millis(u64::try_from(limit).unwrap_or(0));
        loop {
            if let Some(outcome) = ready(&mut **state) {
                return outcome;
            }
            if self.wake.wait_until(state, deadline).timed_out() {
                return ready(&mut **state).unwrap_or(Err(ErrorCode::Timeout));
            }
        }
    }
}

fn raw(result: SimResult) -> i32 {
    result.err().map_or(0, ErrorCode::as_raw)
}

impl ControlChannel for SimulatedDriver {
    fn submit(&self, request: &mut ControlRequest<'_>) -> io::Result<()> {
        trace!(sim = %self.label, code = ?request.code(), "control request");
        let mut state = self.state.lock();
        let state = &mut state;
        match request {
            ControlRequest::LockDriver(r) => r.err_no = raw(lock_driver(state, r)),
            ControlRequest::LockDevice(r) => r.err_no = raw(lock_device(state, r)),
            ControlRequest::LockSubdevice(r) => r.err_no = raw(lock_subdevice(state, r)),
            ControlRequest::QueryNameMainDriver(r) => r.text = DRIVER_NAME.to_string(),
            ControlRequest::QueryVersionMainDriver(r) => r.version = DRIVER_VERSION,
            ControlRequest::QueryVersionDeviceDriver(r) => {
                r.err_no = raw(state.any_board(r.device).map(|_| r.version = DRIVER_VERSION));
            }
            ControlRequest::QueryNameDeviceDriver(r) => {
                let result = state
                    .any_board(r.device)
                    .map(|board| format!("{}-sim", board.layout.name.to_lowercase()));
                r.err_no = raw(result.map(|text| r.text = text));
            }
            ControlRequest::QueryNameDevice(r) => {
                let result = state.any_board(r.device).map(|board| board.layout.name.clone());
                r.err_no = raw(result.map(|text| r.text = text));
            }
            ControlRequest::QueryDescriptionDevice(r) => {
                let result = state.any_board(r.device).map(|board| board.layout.description.clone());
                r.err_no = raw(result.map(|text| r.text = text));
            }
            ControlRequest::QueryInfoDevice(r) => r.err_no = raw(query_info(state, r)),
            ControlRequest::QueryNumberDevices(r) => {
                r.number = i32::try_from(state.boards.len()).unwrap_or(i32::MAX);
            }
            ControlRequest::QueryNumberSubdevices(r) => {
                let result = state.board(r.device).map(|board| board.subs.len());
                r.err_no = raw(result.map(|n| r.number = i32::try_from(n).unwrap_or(i32::MAX)));
            }
            ControlRequest::QueryNumberSubdevicesByType(r) => {
                let (kind, subtype) = (r.kind, r.subtype);
                let result = state.board(r.device).map(|board| {
                    board
                        .subs
                        .iter()
                        .filter(|s| type_matches(&s.layout, kind, subtype))
                        .count()
                });
                r.err_no = raw(result.map(|n| r.number = i32::try_from(n).unwrap_or(i32::MAX)));
            }
            ControlRequest::QueryNumberChannels(r) => {
                let result = state.sub(r.device, r.subdevice).map(|sub| sub.layout.channels);
                r.err_no = raw(result.map(|n| r.number = n));
            }
            ControlRequest::QueryNumberRanges(r) => {
                let unit = r.unit;
                let result = state.sub(r.device, r.subdevice).map(|sub| {
                    sub.layout
                        .ranges
                        .iter()
                        .filter(|range| unit == ME_UNIT_ANY || range.unit == unit)
                        .count()
                });
                r.err_no = raw(result.map(|n| r.number = i32::try_from(n).unwrap_or(i32::MAX)));
            }
            ControlRequest::QueryRangeInfo(r) => r.err_no = raw(query_range_info(state, r)),
            ControlRequest::QuerySubdeviceByType(r) => r.err_no = raw(query_by_type(state, r)),
            ControlRequest::QuerySubdeviceType(r) => {
                let result = state.sub(r.device, r.subdevice).map(|sub| (sub.layout.kind, sub.layout.subtype));
                r.err_no = raw(result.map(|(kind, subtype)| {
                    r.kind = kind;
                    r.subtype = subtype;
                }));
            }
            ControlRequest::QuerySubdeviceCaps(r) => {
                let result = state.sub(r.device, r.subdevice).map(|sub| sub.layout.caps);
                r.err_no = raw(result.map(|caps| r.caps = caps));
            }
            ControlRequest::QuerySubdeviceCapsArgs(r) => {
                // No simulated subdevice advertises argument-carrying caps.
                let result = state.sub(r.device, r.subdevice).and_then(|_| Err(ErrorCode::InvalidCap));
                r.err_no = raw(result);
            }
            ControlRequest::QuerySubdeviceTimer(r) => r.err_no = raw(query_timer(state, r)),
            ControlRequest::IrqEnable(r) => r.err_no = raw(irq_enable(state, r)),
            ControlRequest::IrqWait(r) => r.err_no = raw(self.irq_wait(state, r)),
            ControlRequest::IrqDisable(r) => {
                r.err_no = raw(irq_disable(state, r));
                self.wake.notify_all();
            }
            ControlRequest::IrqCheck(r) => {
                let result = state.usable(r.device, r.subdevice).and_then(|sub| {
                    if sub.layout.interrupts() {
                        Ok(())
                    } else {
                        Err(ErrorCode::NotSupported)
                    }
                });
                r.err_no = raw(result);
            }
            ControlRequest::ResetDevice(r) => {
                r.err_no = raw(reset_device(state, r.device));
                self.wake.notify_all();
            }
            ControlRequest::ResetSubdevice(r) => {
                let result = state.usable(r.device, r.subdevice).map(SubState::reset);
                r.err_no = raw(result);
                self.wake.notify_all();
            }
            ControlRequest::SingleConfig(r) => r.err_no = raw(single_config(state, r)),
            ControlRequest::Single(r) => r.err_no = raw(single(state, &mut r.list)),
            ControlRequest::StreamConfig(r) => r.err_no = raw(stream_config(state, r)),
            ControlRequest::StreamStart(r) => {
                r.err_no = raw(stream_start(state, r));
                self.wake.notify_all();
            }
            ControlRequest::StreamStop(r) => {
                r.err_no = raw(stream_stop(state, r));
                self.wake.notify_all();
            }
            ControlRequest::StreamStatus(r) => r.err_no = raw(self.stream_status(state, r)),
            ControlRequest::StreamNewValues(r) => r.err_no = raw(self.stream_new_values(state, r)),
            ControlRequest::StreamRead(r) => r.err_no = raw(self.stream_read(state, r)),
            ControlRequest::StreamWrite(r) => r.err_no = raw(stream_write(state, r)),
            ControlRequest::SetOffset(r) => {
                let (channel, range, offset) = (r.channel, r.range, r.offset);
                let result = state.usable(r.device, r.subdevice).and_then(|sub| {
                    if !sub.layout.analog() {
                        return Err(ErrorCode::NotSupported);
                    }
                    sub.channel(channel)?;
                    if usize::try_from(range).map_or(true, |i| i >= sub.layout.ranges.len()) {
                        return Err(ErrorCode::InvalidRange);
                    }
                    sub.offset = offset;
                    Ok(())
                });
                r.err_no = raw(result);
            }
            ControlRequest::ConfigLoad(r) => {
                let result = state.board(r.device).map(|_| ()).and_then(|()| {
                    if r.params.is_empty() {
                        Err(ErrorCode::ConfigLoadFailed)
                    } else {
                        Ok(())
                    }
                });
                if result.is_ok() {
                    state.loaded.push((r.device, r.params.clone()));
                }
                r.err_no = raw(result);
            }
        }
        Ok(())
    }

    fn label(&self) -> &str {
        &self.label
    }
}

// =============================================================================
// Locks
// =============================================================================

fn lock_driver(state: &mut SimState, r: &control::Lock) -> SimResult {
    let force = r.flags & ME_LOCK_FORCE != 0;
    let foreign = state.driver_lock == Holder::Foreign
        || state.boards.iter().any(|b| {
            b.lock == Holder::Foreign || b.subs.iter().any(|s| s.lock == Holder::Foreign)
        });
    let busy = state
        .boards
        .iter()
        .any(|b| b.subs.iter().any(|s| s.stream.running()));
    match r.lock {
        ME_LOCK_CHECK => {
            if foreign {
                return Err(ErrorCode::Locked);
            }
            Ok(())
        }
        ME_LOCK_SET => {
            state.take_conflict(r.lock)?;
            if foreign && !force {
                return Err(ErrorCode::Locked);
            }
            if busy && !force {
                return Err(ErrorCode::SubdeviceBusy);
            }
            state.driver_lock = Holder::Own;
            Ok(())
        }
        ME_LOCK_RELEASE => {
            if state.driver_lock == Holder::Own {
                state.driver_lock = Holder::Free;
            }
            if r.flags & ME_LOCK_PRESERVE == 0 {
                for board in &mut state.boards {
                    if board.lock == Holder::Own {
                        board.lock = Holder::Free;
                    }
                    for sub in &mut board.subs {
                        if sub.lock == Holder::Own {
                            sub.lock = Holder::Free;
                        }
                    }
                }
            }
            Ok(())
        }
        _ => Err(ErrorCode::InvalidLock),
    }
}

fn lock_device(state: &mut SimState, r: &control::Lock) -> SimResult {
    let driver_foreign = state.driver_lock == Holder::Foreign;
    state.take_conflict(r.lock)?;
    let board = state.board(r.device)?;
    let foreign = driver_foreign
        || board.lock == Holder::Foreign
        || board.subs.iter().any(|s| s.lock == Holder::Foreign);
    match r.lock {
        ME_LOCK_CHECK if foreign => Err(ErrorCode::Locked),
        ME_LOCK_CHECK => Ok(()),
        ME_LOCK_SET => {
            if foreign && r.flags & ME_LOCK_FORCE == 0 {
                return Err(ErrorCode::Locked);
            }
            if board.subs.iter().any(|s| s.stream.running()) {
                return Err(ErrorCode::SubdeviceBusy);
            }
            board.lock = Holder::Own;
            Ok(())
        }
        ME_LOCK_RELEASE => {
            if board.lock == Holder::Own {
                board.lock = Holder::Free;
            }
            if r.flags & ME_LOCK_PRESERVE == 0 {
                for sub in &mut board.subs {
                    if sub.lock == Holder::Own {
                        sub.lock = Holder::Free;
                    }
                }
            }
            Ok(())
        }
        _ => Err(ErrorCode::InvalidLock),
    }
}

fn lock_subdevice(state: &mut SimState, r: &control::Lock) -> SimResult {
    let driver_foreign = state.driver_lock == Holder::Foreign;
    state.take_conflict(r.lock)?;
    let board = state.board(r.device)?;
    let board_foreign = board.lock == Holder::Foreign;
    let sub = usize::try_from(r.subdevice)
        .ok()
        .and_then(|index| board.subs.get_mut(index))
        .ok_or(ErrorCode::InvalidSubdevice)?;
    let foreign = driver_foreign || board_foreign || sub.lock == Holder::Foreign;
    match r.lock {
        ME_LOCK_CHECK if foreign => Err(ErrorCode::Locked),
        ME_LOCK_CHECK => Ok(()),
        ME_LOCK_SET => {
            if foreign && r.flags & ME_LOCK_FORCE == 0 {
                return Err(ErrorCode::Locked);
            }
            if sub.stream.running() {
                return Err(ErrorCode::SubdeviceBusy);
            }
            sub.lock = Holder::Own;
            Ok(())
        }
        ME_LOCK_RELEASE => {
            if sub.lock == Holder::Own {
                sub.lock = Holder::Free;
            }
            Ok(())
        }
        _ => Err(ErrorCode::InvalidLock),
    }
}

// =============================================================================
// Queries
// =============================================================================

fn type_matches(layout: &SimSubdevice, kind: i32, subtype: i32) -> bool {
    layout.kind == kind && (subtype == ME_SUBTYPE_ANY || layout.subtype == subtype)
}

fn query_info(state: &SimState, r: &mut control::QueryInfo) -> SimResult {
    let board = state.any_board(r.device)?;
    r.vendor_id = VENDOR_ID;
    r.device_id = board.layout.device_id;
    r.serial_no = board.layout.serial_no;
    r.bus_type = board.layout.bus_type;
    r.bus_no = 0;
    r.dev_no = r.device;
    r.func_no = 0;
    r.plugged = if board.plugged { ME_PLUGGED_IN } else { ME_PLUGGED_OUT };
    Ok(())
}

fn query_range_info(state: &mut SimState, r: &mut control::QueryRangeInfo) -> SimResult {
    let sub = state.sub(r.device, r.subdevice)?;
    let range = usize::try_from(r.range)
        .ok()
        .and_then(|index| sub.layout.ranges.get(index))
        .ok_or(ErrorCode::InvalidRange)?;
    r.unit = range.unit;
    r.min = (range.min * 1e6).round() as i32;
    r.max = (range.max * 1e6).round() as i32;
    r.max_data = range.max_data;
    Ok(())
}

fn query_by_type(state: &mut SimState, r: &mut control::QuerySubdeviceByType) -> SimResult {
    let board = state.board(r.device)?;
    let start = usize::try_from(r.start_subdevice)
        .ok()
        .filter(|&start| start < board.subs.len())
        .ok_or(ErrorCode::InvalidSubdevice)?;
    let found = board.subs[start..]
        .iter()
        .position(|sub| type_matches(&sub.layout, r.kind, r.subtype))
        .ok_or(ErrorCode::NomoreSubdeviceType)?;
    r.subdevice = i32::try_from(start + found).map_err(|_| ErrorCode::Internal)?;
    Ok(())
}

fn query_timer(state: &mut SimState, r: &mut control::QueryTimer) -> SimResult {
    let sub = state.sub(r.device, r.subdevice)?;
    if !sub.layout.streaming() {
        return Err(ErrorCode::NotSupported);
    }
    if !matches!(r.timer, ME_TIMER_ACQ_START | ME_TIMER_SCAN_START | ME_TIMER_CONV_START) {
        return Err(ErrorCode::InvalidTimer);
    }
    r.base_frequency = TIMER_BASE;
    r.min_ticks = TIMER_MIN_TICKS;
    r.max_ticks = TIMER_MAX_TICKS;
    Ok(())
}

// =============================================================================
// Interrupts and resets
// =============================================================================

fn irq_enable(state: &mut SimState, r: &control::IrqStart) -> SimResult {
    let sub = state.usable(r.device, r.subdevice)?;
    if !sub.layout.interrupts() {
        return Err(ErrorCode::NotSupported);
    }
    sub.channel(r.channel)?;
    if !matches!(
        r.irq_edge,
        ME_IRQ_EDGE_NOT_USED | ME_IRQ_EDGE_RISING | ME_IRQ_EDGE_FALLING | ME_IRQ_EDGE_ANY
    ) {
        return Err(ErrorCode::InvalidIrqEdge);
    }
    sub.irq = IrqState {
        enabled: true,
        ..IrqState::default()
    };
    Ok(())
}

fn irq_disable(state: &mut SimState, r: &control::IrqStop) -> SimResult {
    let sub = state.usable(r.device, r.subdevice)?;
    if !sub.layout.interrupts() {
        return Err(ErrorCode::NotSupported);
    }
    sub.irq.enabled = false;
    sub.irq.pending = 0;
    Ok(())
}

fn reset_device(state: &mut SimState, device: i32) -> SimResult {
    let driver_foreign = state.driver_lock == Holder::Foreign;
    let board = state.board(device)?;
    if driver_foreign || board.lock == Holder::Foreign || board.subs.iter().any(|s| s.lock == Holder::Foreign) {
        return Err(ErrorCode::Locked);
    }
    board.subs.iter_mut().for_each(SubState::reset);
    Ok(())
}

impl SimulatedDriver {
    fn irq_wait(&self, state: &mut MutexGuard<'_, SimState>, r: &mut control::IrqWait) -> SimResult {
        let (device, subdevice) = (r.device, r.subdevice);
        let armed = {
            let sub = state.usable(device, subdevice)?;
            if !sub.layout.interrupts() {
                return Err(ErrorCode::NotSupported);
            }
            sub.irq.enabled
        };
        let (count, value) = self.wait_for(state, r.time_out, |state| {
            let sub = match state.sub(device, subdevice) {
                Ok(sub) => sub,
                Err(err) => return Some(Err(err)),
            };
            if sub.irq.pending > 0 {
                sub.irq.pending -= 1;
                sub.irq.count += 1;
                return Some(Ok((sub.irq.count, sub.irq.value)));
            }
            if armed && !sub.irq.enabled {
                return Some(Err(ErrorCode::Cancelled));
            }
            None
        })?;
        r.irq_count = count;
        r.value = value;
        Ok(())
    }
}

// =============================================================================
// Single I/O
// =============================================================================

fn single_config(state: &mut SimState, r: &control::SingleConfig) -> SimResult {
    let sub = state.usable(r.device, r.subdevice)?;
    sub.channel(r.channel)?;
    if sub.stream.running() {
        return Err(ErrorCode::SubdeviceBusy);
    }
    match sub.layout.kind {
        ME_TYPE_DIO => match r.single_config {
            ME_SINGLE_CONFIG_DIO_INPUT => sub.output = false,
            ME_SINGLE_CONFIG_DIO_OUTPUT => sub.output = true,
            _ => return Err(ErrorCode::InvalidSingleConfig),
        },
        ME_TYPE_AI | ME_TYPE_AO => {
            if usize::try_from(r.single_config).map_or(true, |i| i >= sub.layout.ranges.len()) {
                return Err(ErrorCode::InvalidSingleConfig);
            }
        }
        _ => {}
    }
    Ok(())
}

fn single_entry(state: &mut SimState, entry: &mut SingleEntry) -> SimResult {
    let sub = state.usable(entry.device, entry.subdevice)?;
    let index = sub.channel(entry.channel)?;
    if sub.stream.running() {
        return Err(ErrorCode::SubdeviceBusy);
    }
    match entry.dir {
        ME_DIR_INPUT => {
            if sub.layout.kind == ME_TYPE_AO {
                return Err(ErrorCode::InvalidDir);
            }
            entry.value = sub.values[index];
            Ok(())
        }
        ME_DIR_OUTPUT => {
            let writable = match sub.layout.kind {
                ME_TYPE_AO | ME_TYPE_CTR => true,
                ME_TYPE_DIO => sub.output,
                _ => false,
            };
            if !writable {
                return Err(ErrorCode::InvalidDir);
            }
            if !(0..=0xFFFF).contains(&entry.value) {
                return Err(ErrorCode::ValueOutOfRange);
            }
            sub.values[index] = entry.value;
            Ok(())
        }
        _ => Err(ErrorCode::InvalidDir),
    }
}

/// Execute every entry, recording per-entry codes; the overall code is the
/// first failure.
fn single(state: &mut SimState, list: &mut [SingleEntry]) -> SimResult {
    let mut first = Ok(());
    for entry in list.iter_mut() {
        let result = single_entry(state, entry);
        entry.errno = raw(result);
        if first.is_ok() {
            first = result;
        }
    }
    first
}

// =============================================================================
// Streaming
// =============================================================================

fn stream_config(state: &mut SimState, r: &control::StreamConfig) -> SimResult {
    let sub = state.usable(r.device, r.subdevice)?;
    if !sub.layout.streaming() {
        return Err(ErrorCode::NotSupported);
    }
    if sub.stream.running() {
        return Err(ErrorCode::SubdeviceBusy);
    }
    if r.config_list.is_empty() {
        return Err(ErrorCode::InvalidConfigListCount);
    }
    for entry in &r.config_list {
        sub.channel(entry.channel)?;
        let range = entry.range & !ME_AI_EXTRA_RANGE;
        if usize::try_from(range).map_or(true, |i| i >= sub.layout.ranges.len()) {
            return Err(ErrorCode::InvalidStreamConfig);
        }
    }
    let trigger = &r.trigger;
    if !matches!(
        trigger.trigger_type,
        ME_TRIGGER_TYPE_SOFTWARE
            | ME_TRIGGER_TYPE_ACQ_DIGITAL
            | ME_TRIGGER_TYPE_ACQ_ANALOG
            | ME_TRIGGER_TYPE_LIST_DIGITAL
            | ME_TRIGGER_TYPE_LIST_ANALOG
            | ME_TRIGGER_TYPE_CONV_DIGITAL
            | ME_TRIGGER_TYPE_CONV_ANALOG
    ) {
        return Err(ErrorCode::InvalidAcqStartTrigType);
    }
    if trigger.conv_ticks != 0 && trigger.conv_ticks < TIMER_MIN_TICKS {
        return Err(ErrorCode::InvalidConvStartArg);
    }
    if !matches!(
        trigger.stop_type,
        ME_STREAM_STOP_TYPE_MANUAL | ME_STREAM_STOP_TYPE_ACQ_LIST | ME_STREAM_STOP_TYPE_SCAN_VALUE
    ) {
        return Err(ErrorCode::InvalidAcqStopTrigType);
    }
    if r.fifo_irq_threshold < 0 {
        return Err(ErrorCode::InvalidFifoIrqThreshold);
    }
    let stream = &mut sub.stream;
    stream.phase = Phase::Configured;
    stream.fifo.clear();
    stream.unannounced = 0;
    stream.stop_type = trigger.stop_type;
    stream.stop_count = trigger.stop_count;
    stream.list_len = i32::try_from(r.config_list.len()).unwrap_or(i32::MAX);
    Ok(())
}

fn stream_start(state: &mut SimState, r: &mut control::StreamStart) -> SimResult {
    let mut first = Ok(());
    for entry in r.list.iter_mut() {
        let result = state.usable(entry.device, entry.subdevice).and_then(|sub| {
            if !matches!(entry.start_mode, ME_START_MODE_BLOCKING | ME_START_MODE_NONBLOCKING) {
                return Err(ErrorCode::InvalidStartMode);
            }
            match sub.stream.phase {
                Phase::Unconfigured => Err(ErrorCode::PreviousConfig),
                Phase::Running => Err(ErrorCode::SubdeviceBusy),
                Phase::Configured => {
                    let stream = &mut sub.stream;
                    stream.phase = Phase::Running;
                    stream.started = true;
                    stream.stopped = false;
                    stream.acquired = 0;
                    Ok(())
                }
            }
        });
        entry.errno = raw(result);
        if first.is_ok() {
            first = result;
        }
    }
    first
}

fn stream_stop(state: &mut SimState, r: &mut control::StreamStop) -> SimResult {
    let mut first = Ok(());
    for entry in r.list.iter_mut() {
        let result = state.usable(entry.device, entry.subdevice).and_then(|sub| {
            if !sub.layout.streaming() {
                return Err(ErrorCode::NotSupported);
            }
            if !matches!(entry.stop_mode, ME_STOP_MODE_IMMEDIATE | ME_STOP_MODE_LAST_VALUE) {
                return Err(ErrorCode::InvalidStopMode);
            }
            sub.stream.halt();
            Ok(())
        });
        entry.errno = raw(result);
        if first.is_ok() {
            first = result;
        }
    }
    first
}

fn stream_write(state: &mut SimState, r: &mut control::StreamTransfer) -> SimResult {
    let sub = state.usable(r.device, r.subdevice)?;
    if sub.layout.kind != ME_TYPE_AO || !sub.layout.streaming() {
        return Err(ErrorCode::NotSupported);
    }
    if !matches!(r.mode, ME_WRITE_MODE_BLOCKING | ME_WRITE_MODE_NONBLOCKING) {
        return Err(ErrorCode::InvalidWriteMode);
    }
    if sub.stream.phase == Phase::Unconfigured {
        return Err(ErrorCode::PreviousConfig);
    }
    sub.stream.written.extend_from_slice(&r.values);
    r.count = i32::try_from(r.values.len()).unwrap_or(i32::MAX);
    Ok(())
}

impl SimulatedDriver {
    fn stream_status(&self, state: &mut MutexGuard<'_, SimState>, r: &mut control::StreamStatus) -> SimResult {
        let (device, subdevice, wait) = (r.device, r.subdevice, r.wait);
        {
            let sub = state.usable(device, subdevice)?;
            if !sub.layout.streaming() {
                return Err(ErrorCode::NotSupported);
            }
        }
        if !matches!(wait, ME_WAIT_NONE | ME_WAIT_IDLE | ME_WAIT_BUSY | ME_WAIT_START | ME_WAIT_STOP) {
            return Err(ErrorCode::InvalidWait);
        }
        let time_out = if wait == ME_WAIT_NONE { 1 } else { WAIT_CAP_MS };
        let (status, count) = self.wait_for(state, time_out, |state| {
            let stream = match state.sub(device, subdevice) {
                Ok(sub) => &mut sub.stream,
                Err(err) => return Some(Err(err)),
            };
            let ready = match wait {
                ME_WAIT_START => std::mem::take(&mut stream.started),
                ME_WAIT_STOP => std::mem::take(&mut stream.stopped),
                ME_WAIT_IDLE => !stream.running(),
                ME_WAIT_BUSY => stream.running(),
                _ => true,
            };
            ready.then(|| {
                let status = if stream.running() { ME_STATUS_BUSY } else { ME_STATUS_IDLE };
                Ok((status, i32::try_from(stream.fifo.len()).unwrap_or(i32::MAX)))
            })
        })?;
        r.status = status;
        r.count = count;
        Ok(())
    }

    fn stream_new_values(
        &self,
        state: &mut MutexGuard<'_, SimState>,
        r: &mut control::StreamNewValues,
    ) -> SimResult {
        let (device, subdevice, flags) = (r.device, r.subdevice, r.flags);
        {
            let sub = state.usable(device, subdevice)?;
            if !sub.layout.streaming() {
                return Err(ErrorCode::NotSupported);
            }
        }
        let screen = flags & ME_IO_STREAM_NEW_VALUES_SCREEN_FLAG != 0;
        let report = flags & ME_IO_STREAM_NEW_VALUES_ERROR_REPORT_FLAG != 0;
        r.count = self.wait_for(state, r.time_out, |state| {
            let stream = match state.sub(device, subdevice) {
                Ok(sub) => &mut sub.stream,
                Err(err) => return Some(Err(err)),
            };
            if stream.unannounced > 0 {
                return Some(Ok(std::mem::take(&mut stream.unannounced)));
            }
            if !stream.running() && (!screen || report) {
                return Some(Err(ErrorCode::SubdeviceNotRunning));
            }
            None
        })?;
        Ok(())
    }

    fn stream_read(&self, state: &mut MutexGuard<'_, SimState>, r: &mut control::StreamTransfer) -> SimResult {
        let (device, subdevice) = (r.device, r.subdevice);
        {
            let sub = state.usable(device, subdevice)?;
            if sub.layout.kind != ME_TYPE_AI || !sub.layout.streaming() {
                return Err(ErrorCode::NotSupported);
            }
            if sub.stream.phase == Phase::Unconfigured {
                return Err(ErrorCode::PreviousConfig);
            }
        }
        let wanted = usize::try_from(r.count).map_err(|_| ErrorCode::InvalidValueCount)?;
        let outcome = match r.mode {
            ME_READ_MODE_NONBLOCKING => Ok(()),
            ME_READ_MODE_BLOCKING => self.wait_for(state, r.time_out, |state| {
                let stream = match state.sub(device, subdevice) {
                    Ok(sub) => &sub.stream,
                    Err(err) => return Some(Err(err)),
                };
                (stream.fifo.len() >= wanted || !stream.running()).then_some(Ok(()))
            }),
            _ => return Err(ErrorCode::InvalidReadMode),
        };
        let stream = &mut state.sub(device, subdevice)?.stream;
        let take = wanted.min(stream.fifo.len()).min(r.values.len());
        for (slot, value) in r.values.iter_mut().zip(stream.fifo.drain(..take)) {
            *slot = value;
        }
        r.count = i32::try_from(take).unwrap_or(i32::MAX);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::{CompactConfigEntry, CompactTrigger};
    use crate::types::{StreamStartEntry, StreamStopEntry};

    fn sim() -> SimulatedDriver {
        SimulatedDriver::new(vec![SimBoard::multifunction(1), SimBoard::digital(2)])
    }

    fn lock(sim: &SimulatedDriver, lock: i32, flags: i32) -> i32 {
        let mut request = control::Lock {
            lock,
            flags,
            ..Default::default()
        };
        sim.submit(&mut ControlRequest::LockDriver(&mut request)).unwrap();
        request.err_no
    }

    fn configure(sim: &SimulatedDriver, stop_type: i32, stop_count: i32) {
        let mut request = control::StreamConfig {
            device: 0,
            subdevice: 0,
            config_list: vec![CompactConfigEntry { channel: 0, range: 0 }],
            trigger: CompactTrigger {
                trigger_type: ME_TRIGGER_TYPE_SOFTWARE,
                conv_ticks: 330,
                stop_type,
                stop_count,
                ..Default::default()
            },
            ..Default::default()
        };
        sim.submit(&mut ControlRequest::StreamConfig(&mut request)).unwrap();
        assert_eq!(request.err_no, 0);
    }

    fn start(sim: &SimulatedDriver) -> i32 {
        let mut request = control::StreamStart {
            list: vec![StreamStartEntry {
                device: 0,
                subdevice: 0,
                start_mode: ME_START_MODE_NONBLOCKING,
                ..Default::default()
            }],
            ..Default::default()
        };
        sim.submit(&mut ControlRequest::StreamStart(&mut request)).unwrap();
        request.err_no
    }

    #[test]
    fn test_foreign_lock_blocks_driver_lock() {
        let sim = sim();
        sim.foreign_lock(LockScope::Subdevice(1, 2));
        assert_eq!(lock(&sim, ME_LOCK_CHECK, 0), ErrorCode::Locked.as_raw());
        assert_eq!(lock(&sim, ME_LOCK_SET, 0), ErrorCode::Locked.as_raw());
        assert_eq!(lock(&sim, ME_LOCK_SET, ME_LOCK_FORCE), 0);
        assert!(sim.holds_lock(LockScope::Driver));
        assert_eq!(lock(&sim, ME_LOCK_RELEASE, 0), 0);
        assert!(!sim.holds_lock(LockScope::Driver));
    }

    #[test]
    fn test_injected_conflict_hits_set_once() {
        let sim = sim();
        sim.inject_lock_conflict_on_set();
        assert_eq!(lock(&sim, ME_LOCK_CHECK, 0), 0);
        assert_eq!(lock(&sim, ME_LOCK_SET, 0), ErrorCode::Locked.as_raw());
        assert_eq!(lock(&sim, ME_LOCK_SET, 0), 0);
    }

    #[test]
    fn test_stream_needs_configuration_before_start() {
        let sim = sim();
        assert_eq!(start(&sim), ErrorCode::PreviousConfig.as_raw());
        configure(&sim, ME_STREAM_STOP_TYPE_MANUAL, 0);
        assert_eq!(start(&sim), 0);
        assert!(sim.is_running(0, 0));
        assert_eq!(start(&sim), ErrorCode::SubdeviceBusy.as_raw());
    }

    #[test]
    fn test_scan_value_stop_halts_stream() {
        let sim = sim();
        configure(&sim, ME_STREAM_STOP_TYPE_SCAN_VALUE, 4);
        assert_eq!(start(&sim), 0);
        sim.push_values(0, 0, &[1, 2, 3, 4, 5, 6]);
        assert!(!sim.is_running(0, 0));

        let mut read = control::StreamTransfer {
            device: 0,
            subdevice: 0,
            mode: ME_READ_MODE_NONBLOCKING,
            values: vec![0; 10],
            count: 10,
            ..Default::default()
        };
        sim.submit(&mut ControlRequest::StreamRead(&mut read)).unwrap();
        assert_eq!(read.err_no, 0);
        assert_eq!(read.count, 4);
        assert_eq!(&read.values[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_stop_latch_is_consumed_by_one_wait() {
        let sim = sim();
        configure(&sim, ME_STREAM_STOP_TYPE_MANUAL, 0);
        assert_eq!(start(&sim), 0);
        let mut stop = control::StreamStop {
            list: vec![StreamStopEntry {
                device: 0,
                subdevice: 0,
                stop_mode: ME_STOP_MODE_IMMEDIATE,
                ..Default::default()
            }],
            ..Default::default()
        };
        sim.submit(&mut ControlRequest::StreamStop(&mut stop)).unwrap();

        let mut status = control::StreamStatus {
            device: 0,
            subdevice: 0,
            wait: ME_WAIT_STOP,
            ..Default::default()
        };
        sim.submit(&mut ControlRequest::StreamStatus(&mut status)).unwrap();
        assert_eq!(status.err_no, 0);
        assert_eq!(status.status, ME_STATUS_IDLE);

        sim.submit(&mut ControlRequest::StreamStatus(&mut status)).unwrap();
        assert_eq!(status.err_no, ErrorCode::Timeout.as_raw());
    }

    #[test]
    fn test_unplugged_board_reports_plug_state() {
        let sim = sim();
        sim.unplug(1);
        let mut info = control::QueryInfo {
            device: 1,
            ..Default::default()
        };
        sim.submit(&mut ControlRequest::QueryInfoDevice(&mut info)).unwrap();
        assert_eq!(info.err_no, 0);
        assert_eq!(info.plugged, ME_PLUGGED_OUT);

        let mut number = control::QueryNumber {
            device: 1,
            ..Default::default()
        };
        sim.submit(&mut ControlRequest::QueryNumberSubdevices(&mut number)).unwrap();
        assert_eq!(number.err_no, ErrorCode::DeviceUnplugged.as_raw());
    }

    #[test]
    fn test_irq_wait_delivers_raised_interrupt() {
        let sim = sim();
        let mut enable = control::IrqStart {
            device: 1,
            subdevice: 0,
            ..Default::default()
        };
        sim.submit(&mut ControlRequest::IrqEnable(&mut enable)).unwrap();
        assert_eq!(enable.err_no, 0);
        sim.raise_irq(1, 0, 0x5a);

        let mut wait = control::IrqWait {
            device: 1,
            subdevice: 0,
            time_out: 50,
            ..Default::default()
        };
        sim.submit(&mut ControlRequest::IrqWait(&mut wait)).unwrap();
        assert_eq!(wait.err_no, 0);
        assert_eq!((wait.irq_count, wait.value), (1, 0x5a));

        sim.submit(&mut ControlRequest::IrqWait(&mut wait)).unwrap();
        assert_eq!(wait.err_no, ErrorCode::Timeout.as_raw());
    }
}
