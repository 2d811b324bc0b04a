//! Error types for the ME runtime.
//!
//! Every public operation ultimately reports a single integer code
//! ([`ErrorCode`]) so that local and remote backends, the remote-procedure
//! wire format and callers all agree on one numbering. Inside the crate the
//! richer [`MeError`] is used so that addressing, transport and internal
//! failures keep their context until they are flattened.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

/// Result type alias for ME operations.
pub type Result<T> = std::result::Result<T, MeError>;

macro_rules! error_codes {
    ($($name:ident = $value:literal => $message:literal,)+) => {
        /// Stable integer error codes shared with drivers and remote peers.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(i32)]
        pub enum ErrorCode {
            $(
                #[doc = $message]
                $name = $value,
            )+
        }

        impl ErrorCode {
            /// Convert a raw code received from a backend.
            ///
            /// Unknown values map to [`ErrorCode::InvalidErrorNumber`].
            pub fn from_raw(raw: i32) -> Self {
                match raw {
                    $($value => Self::$name,)+
                    _ => Self::InvalidErrorNumber,
                }
            }

            /// Human-readable description of the code.
            pub fn message(self) -> &'static str {
                match self {
                    $(Self::$name => $message,)+
                }
            }
        }
    };
}

error_codes! {
    Success = 0 => "Success.",
    InvalidDevice = 1 => "Invalid device number specified.",
    InvalidSubdevice = 2 => "Invalid subdevice number specified.",
    InvalidChannel = 3 => "Invalid channel number specified.",
    InvalidSingleConfig = 4 => "Invalid single configuration specified.",
    InvalidRef = 5 => "Invalid reference specified.",
    InvalidTrigChan = 6 => "Invalid trigger channel specified.",
    InvalidTrigType = 7 => "Invalid trigger type specified.",
    InvalidTrigEdge = 8 => "Invalid trigger edge specified.",
    InvalidTimeout = 9 => "Invalid timeout specified.",
    InvalidFlags = 10 => "Invalid flags specified.",
    Open = 11 => "Can't open driver system.",
    Close = 12 => "Can't close driver system.",
    NotOpen = 13 => "Driver system was not opened by user process.",
    InvalidDir = 14 => "Invalid single direction specified.",
    PreviousConfig = 15 => "Device was not configured for this function.",
    NotSupported = 16 => "Function not supported by device.",
    SubdeviceType = 17 => "No such subdevice type available on this device.",
    UserBufferSize = 18 => "User buffer size is to small to hold name.",
    Locked = 19 => "The Resource or parts of it is locked by another process.",
    NomoreSubdeviceType = 20 => "No more subdevice of this type available.",
    Timeout = 21 => "Operation timed out.",
    Signal = 22 => "Operation aborted by signal.",
    InvalidIrqSource = 23 => "Invalid irq source specified.",
    ThreadRunning = 24 => "There is a background thread running on this subdevice.",
    StartThread = 25 => "Cannot start background thread.",
    CancelThread = 26 => "Cannot cancel background thread.",
    NoCallback = 27 => "No callback function for notification on irq or new values specified.",
    Used = 28 => "The Resource or parts of it is currently used by another process.",
    InvalidUnit = 29 => "Invalid physical unit specified.",
    InvalidMinMax = 30 => "Invalid minimum and maximum values specified.",
    NoRange = 31 => "No matching range found.",
    InvalidRange = 32 => "Invalid range specified.",
    SubdeviceBusy = 33 => "Subdevice is busy.",
    InvalidLock = 34 => "Invalid lock specified.",
    InvalidSwitch = 35 => "Invalid switch specified.",
    InvalidErrorMsgCount = 36 => "Error message string is to small.",
    InvalidStreamConfig = 37 => "Invalid stream configuration specified.",
    InvalidConfigListCount = 38 => "Invalid stream configuration list count specified.",
    InvalidAcqStartTrigType = 39 => "Invalid acquisition start trigger type specified.",
    InvalidAcqStartTrigEdge = 40 => "Invalid acquisition start trigger edge specified.",
    InvalidAcqStartTrigChan = 41 => "Invalid acquisition start trigger channel specified.",
    InvalidAcqStartTimeout = 42 => "Invalid acquisition start time out specified.",
    InvalidAcqStartArg = 43 => "Invalid acquisition start argument specified.",
    InvalidScanStartTrigType = 44 => "Invalid scan start trigger type specified.",
    InvalidScanStartArg = 45 => "Invalid scan start argument specified.",
    InvalidConvStartTrigType = 46 => "Invalid conversion start trigger type specified.",
    InvalidConvStartArg = 47 => "Invalid conversion start argument specified.",
    InvalidScanStopTrigType = 48 => "Invalid scan stop trigger type specified.",
    InvalidScanStopArg = 49 => "Invalid scan stop argument specified.",
    InvalidAcqStopTrigType = 50 => "Invalid acquisition stop trigger type specified.",
    InvalidAcqStopArg = 51 => "Invalid acquisition stop argument specified.",
    SubdeviceNotRunning = 52 => "Subdevice is not running.",
    InvalidReadMode = 53 => "Invalid read mode specified.",
    InvalidValueCount = 54 => "Invalid value count specified.",
    InvalidWriteMode = 55 => "Invalid write mode specified.",
    InvalidTimer = 56 => "Invalid timer specified.",
    DeviceUnplugged = 57 => "Device was unplugged.",
    UsedInternal = 58 => "Subdevice is reserved for internal usage.",
    InvalidDutyCycle = 59 => "Invalid duty cycle specified.",
    InvalidWait = 60 => "Invalid wait argument specified.",
    ConnectRemote = 61 => "Cannot connect to remote host.",
    Communication = 62 => "Communication error.",
    InvalidSingleList = 63 => "Invalid single list specified.",
    InvalidModuleType = 64 => "Invalid module type specified.",
    InvalidStartMode = 65 => "Invalid start mode specified.",
    InvalidStopMode = 66 => "Invalid stop mode specified.",
    InvalidFifoIrqThreshold = 67 => "Invalid fifo irq threshold specified.",
    InvalidPointer = 68 => "Invalid pointer passed.",
    CreateEvent = 69 => "Unable to create event.",
    LackOfResources = 70 => "Insufficient resources.",
    Cancelled = 71 => "Operation cancelled.",
    RingBufferOverflow = 72 => "Software buffer overflow.",
    RingBufferUnderflow = 73 => "Software buffer underflow.",
    InvalidIrqEdge = 74 => "Invalid irq edge specified.",
    InvalidIrqArg = 75 => "Invalid irq arg specified.",
    InvalidCap = 76 => "Invalid capability specified.",
    InvalidCapArgCount = 77 => "Invalid capability argument count specified.",
    Internal = 78 => "Internal error occured.",
    ValueOutOfRange = 79 => "Value out of range.",
    HardwareBufferOverflow = 80 => "Hardware buffer overflow.",
    HardwareBufferUnderflow = 81 => "Hardware buffer underflow.",
    ConfigLoadFailed = 82 => "Loading config to device failed.",
    InvalidErrorNumber = 83 => "Invalid error number specified.",
}

impl ErrorCode {
    /// Raw integer value.
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// Convert a raw status into a `Result`, treating `0` as success.
    pub fn check(raw: i32) -> Result<()> {
        match Self::from_raw(raw) {
            Self::Success => Ok(()),
            code => Err(MeError::Code(code)),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.as_raw())
    }
}

/// Broad class of an error, used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid or unplugged device, duplicate logical number.
    Addressing,
    /// The call itself was malformed; fix the arguments.
    Validation,
    /// Allocation failure, lock conflict, busy resource.
    Resource,
    /// Connection or communication failure; the call may succeed on a new connection.
    Transport,
    /// Broken internal invariant.
    Internal,
}

/// Errors produced by the runtime.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeError {
    /// Logical device number out of range or not bound.
    #[error("invalid device {0}")]
    InvalidDevice(i32),

    /// The device is known but currently unplugged.
    #[error("device {0} is unplugged")]
    DeviceUnplugged(i32),

    /// Two bound catalog entries share a logical number.
    #[error("logical device number {0} is assigned more than once")]
    DuplicateLogicalNumber(i32),

    /// Catalog storage could not grow.
    #[error("out of memory while growing the device catalog")]
    OutOfMemory,

    /// I/O failure on an established remote connection.
    #[error("communication with {peer} failed: {message}")]
    Communication { peer: String, message: String },

    /// Remote peer could not be reached.
    #[error("cannot connect to {peer}: {message}")]
    ConnectRemote { peer: String, message: String },

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),

    /// Error reported by a backend or detected by validation.
    #[error("{0}")]
    Code(ErrorCode),
}

impl MeError {
    /// The integer code this error is reported as.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidDevice(_) => ErrorCode::InvalidDevice,
            Self::DeviceUnplugged(_) => ErrorCode::DeviceUnplugged,
            Self::DuplicateLogicalNumber(_) => ErrorCode::Internal,
            Self::OutOfMemory => ErrorCode::LackOfResources,
            Self::Communication { .. } => ErrorCode::Communication,
            Self::ConnectRemote { .. } => ErrorCode::ConnectRemote,
            Self::Internal(_) => ErrorCode::Internal,
            Self::Code(code) => *code,
        }
    }

    /// Taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self.code() {
            ErrorCode::InvalidDevice | ErrorCode::DeviceUnplugged => ErrorKind::Addressing,
            _ if matches!(self, Self::DuplicateLogicalNumber(_)) => ErrorKind::Addressing,
            ErrorCode::Communication | ErrorCode::ConnectRemote => ErrorKind::Transport,
            ErrorCode::LackOfResources
            | ErrorCode::Locked
            | ErrorCode::Used
            | ErrorCode::UsedInternal
            | ErrorCode::SubdeviceBusy
            | ErrorCode::ThreadRunning
            | ErrorCode::StartThread
            | ErrorCode::Timeout => ErrorKind::Resource,
            ErrorCode::Internal => ErrorKind::Internal,
            _ => ErrorKind::Validation,
        }
    }

    /// Check if this error came from the transport rather than the call.
    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// Check if this is a plain wait timeout.
    pub fn is_timeout(&self) -> bool {
        self.code() == ErrorCode::Timeout
    }
}

impl From<ErrorCode> for MeError {
    fn from(code: ErrorCode) -> Self {
        MeError::Code(code)
    }
}

/// Handler invoked with the failing function name and error code.
pub type ErrorHandler = Arc<dyn Fn(&str, ErrorCode) + Send + Sync>;

/// Records the last error of a driver handle and forwards failures to handlers.
///
/// Successful results never overwrite the recorded code.
pub struct ErrorReporter {
    last: AtomicI32,
    print_default: AtomicBool,
    user: RwLock<Option<ErrorHandler>>,
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorReporter")
            .field("last", &self.last.load(Ordering::Relaxed))
            .field("print_default", &self.print_default.load(Ordering::Relaxed))
            .field("user", &self.user.read().is_some())
            .finish()
    }
}

impl ErrorReporter {
    /// Create a reporter with no handlers installed.
    pub fn new() -> Self {
        Self {
            last: AtomicI32::new(ErrorCode::Success.as_raw()),
            print_default: AtomicBool::new(false),
            user: RwLock::new(None),
        }
    }

    /// Record the outcome of `function` and pass the result through.
    pub fn report<T>(&self, function: &str, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.record(function, err.code());
        }
        result
    }

    /// Record a failure code for `function`.
    pub fn record(&self, function: &str, code: ErrorCode) {
        if code == ErrorCode::Success {
            return;
        }
        tracing::debug!(function, code = code.as_raw(), "call failed");
        if self.print_default.load(Ordering::Relaxed) {
            tracing::error!("In function {}: {}", function, code);
        }
        if let Some(handler) = self.user.read().clone() {
            handler(function, code);
        }
        self.last.store(code.as_raw(), Ordering::Relaxed);
    }

    /// Last recorded code; `clear` resets it to success.
    pub fn last_error(&self, clear: bool) -> ErrorCode {
        let raw = if clear {
            self.last.swap(ErrorCode::Success.as_raw(), Ordering::Relaxed)
        } else {
            self.last.load(Ordering::Relaxed)
        };
        ErrorCode::from_raw(raw)
    }

    /// Enable or disable the default handler that logs every failure.
    pub fn set_default_handler(&self, enabled: bool) {
        self.print_default.store(enabled, Ordering::Relaxed);
    }

    /// Install or remove the user handler.
    pub fn set_user_handler(&self, handler: Option<ErrorHandler>) {
        *self.user.write() = handler;
    }
}

/// Message for a raw code; unknown codes report `InvalidErrorNumber`.
pub fn error_message(raw: i32) -> Result<&'static str> {
    match ErrorCode::from_raw(raw) {
        ErrorCode::InvalidErrorNumber if raw != ErrorCode::InvalidErrorNumber.as_raw() => {
            Err(MeError::Code(ErrorCode::InvalidErrorNumber))
        }
        code => Ok(code.message()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_raw_codes_round_trip() {
        for raw in 0..=83 {
            assert_eq!(ErrorCode::from_raw(raw).as_raw(), raw);
        }
        assert_eq!(ErrorCode::from_raw(500), ErrorCode::InvalidErrorNumber);
        assert_eq!(ErrorCode::from_raw(-1), ErrorCode::InvalidErrorNumber);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(MeError::InvalidDevice(3).kind(), ErrorKind::Addressing);
        assert_eq!(MeError::DuplicateLogicalNumber(1).kind(), ErrorKind::Addressing);
        assert_eq!(MeError::OutOfMemory.kind(), ErrorKind::Resource);
        assert!(MeError::ConnectRemote {
            peer: "host".into(),
            message: "refused".into()
        }
        .is_transport());
        assert_eq!(
            MeError::Code(ErrorCode::InvalidAcqStartTrigType).kind(),
            ErrorKind::Validation
        );
        assert_eq!(MeError::Code(ErrorCode::Locked).kind(), ErrorKind::Resource);
    }

    #[test]
    fn test_reporter_keeps_last_failure() {
        let reporter = ErrorReporter::new();
        let _ = reporter.report::<()>("lock_device", Err(MeError::Code(ErrorCode::Locked)));
        let _ = reporter.report("query_name", Ok(()));
        assert_eq!(reporter.last_error(false), ErrorCode::Locked);
        assert_eq!(reporter.last_error(true), ErrorCode::Locked);
        assert_eq!(reporter.last_error(false), ErrorCode::Success);
    }

    #[test]
    fn test_user_handler_called_on_failure_only() {
        let reporter = ErrorReporter::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        reporter.set_user_handler(Some(Arc::new(move |function, code| {
            assert_eq!(function, "single");
            assert_eq!(code, ErrorCode::Timeout);
            seen.fetch_add(1, Ordering::SeqCst);
        })));
        let _ = reporter.report("single", Ok(1));
        let _ = reporter.report::<()>("single", Err(ErrorCode::Timeout.into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_error_message_lookup() {
        assert_eq!(error_message(21).ok(), Some("Operation timed out."));
        assert_eq!(
            error_message(1000),
            Err(MeError::Code(ErrorCode::InvalidErrorNumber))
        );
    }
}
