//! Transport contexts and the operation set they implement.
//!
//! A [`TransportContext`] is one open backend: the local control channel, a
//! remote peer or the inert dummy. Each variant implements [`DriverCalls`],
//! so the dispatcher picks the variant's call table once and never branches
//! on the tag again. Device numbers passed to [`DriverCalls`] are always
//! *physical* numbers of that backend.

use std::fmt;

use bitflags::bitflags;

use crate::defs::{ME_LOCK_CHECK, ME_LOCK_FORCE, ME_LOCK_PRESERVE, ME_LOCK_RELEASE, ME_LOCK_SET};
use crate::error::{ErrorCode, MeError, Result};
use crate::notify::ListenerSet;
use crate::trigger::{StreamConfigEntry, StreamTrigger};
use crate::types::{
    DeviceInfo, IrqWait, RangeInfo, SingleEntry, StreamStartEntry, StreamStatus,
    StreamStopEntry, TimerInfo,
};

mod dummy;
mod local;
mod remote;

pub use dummy::DummyContext;
pub use local::LocalContext;
pub use remote::RemoteContext;

/// Lock operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOp {
    /// Release the lock.
    Release,
    /// Take the lock.
    Set,
    /// Report whether the lock could be taken.
    Check,
}

impl LockOp {
    /// Raw lock code.
    pub fn as_raw(self) -> i32 {
        match self {
            Self::Release => ME_LOCK_RELEASE,
            Self::Set => ME_LOCK_SET,
            Self::Check => ME_LOCK_CHECK,
        }
    }

    /// Parse a raw lock code.
    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            ME_LOCK_RELEASE => Ok(Self::Release),
            ME_LOCK_SET => Ok(Self::Set),
            ME_LOCK_CHECK => Ok(Self::Check),
            _ => Err(ErrorCode::InvalidLock.into()),
        }
    }
}

bitflags! {
    /// Modifiers of a lock operation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LockFlags: i32 {
        /// On release, keep locks held at narrower scopes.
        const PRESERVE = ME_LOCK_PRESERVE;
        /// Skip the availability check before setting.
        const FORCE = ME_LOCK_FORCE;
    }
}

impl LockFlags {
    /// Parse raw flags, rejecting unknown bits.
    pub fn from_raw(raw: i32) -> Result<Self> {
        Self::from_bits(raw).ok_or(MeError::Code(ErrorCode::InvalidFlags))
    }
}

/// The full operation set of a backend.
///
/// Every method has a default that fails with [`DriverCalls::fallback`], so
/// backends implement only what they can serve.
#[allow(unused_variables, missing_docs)]
pub trait DriverCalls: Send + Sync {
    /// Error returned by operations this backend does not provide.
    fn fallback(&self) -> MeError {
        ErrorCode::NotSupported.into()
    }

    /// Release backend resources. Further calls fail.
    fn close(&self) -> Result<()> {
        Ok(())
    }

    // =========================================================================
    // Locks
    // =========================================================================

    fn lock_driver(&self, lock: LockOp, flags: LockFlags) -> Result<()> {
        Err(self.fallback())
    }

    fn lock_device(&self, device: i32, lock: LockOp, flags: LockFlags) -> Result<()> {
        Err(self.fallback())
    }

    fn lock_subdevice(
        &self,
        device: i32,
        subdevice: i32,
        lock: LockOp,
        flags: LockFlags,
    ) -> Result<()> {
        Err(self.fallback())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    fn query_driver_version(&self) -> Result<i32> {
        Err(self.fallback())
    }

    fn query_driver_name(&self) -> Result<String> {
        Err(self.fallback())
    }

    fn query_device_driver_version(&self, device: i32) -> Result<i32> {
        Err(self.fallback())
    }

    fn query_device_driver_name(&self, device: i32) -> Result<String> {
        Err(self.fallback())
    }

    fn query_device_name(&self, device: i32) -> Result<String> {
        Err(self.fallback())
    }

    fn query_device_description(&self, device: i32) -> Result<String> {
        Err(self.fallback())
    }

    fn query_device_info(&self, device: i32) -> Result<DeviceInfo> {
        Err(self.fallback())
    }

    fn query_number_devices(&self) -> Result<i32> {
        Err(self.fallback())
    }

    fn query_number_subdevices(&self, device: i32) -> Result<i32> {
        Err(self.fallback())
    }

    fn query_number_subdevices_by_type(&self, device: i32, kind: i32, subtype: i32) -> Result<i32> {
        Err(self.fallback())
    }

    fn query_number_channels(&self, device: i32, subdevice: i32) -> Result<i32> {
        Err(self.fallback())
    }

    fn query_number_ranges(&self, device: i32, subdevice: i32, unit: i32) -> Result<i32> {
        Err(self.fallback())
    }

    fn query_range_info(&self, device: i32, subdevice: i32, range: i32) -> Result<RangeInfo> {
        Err(self.fallback())
    }

    /// Best-fitting range covering `min..=max`; returns its index and limits.
    fn query_range_by_min_max(
        &self,
        device: i32,
        subdevice: i32,
        unit: i32,
        min: f64,
        max: f64,
    ) -> Result<(i32, RangeInfo)> {
        Err(self.fallback())
    }

    /// Next subdevice at or after `start` with the given type and subtype.
    fn query_subdevice_by_type(
        &self,
        device: i32,
        start: i32,
        kind: i32,
        subtype: i32,
    ) -> Result<i32> {
        Err(self.fallback())
    }

    /// Type and subtype of a subdevice.
    fn query_subdevice_type(&self, device: i32, subdevice: i32) -> Result<(i32, i32)> {
        Err(self.fallback())
    }

    fn query_subdevice_caps(&self, device: i32, subdevice: i32) -> Result<i32> {
        Err(self.fallback())
    }

    fn query_subdevice_caps_args(
        &self,
        device: i32,
        subdevice: i32,
        cap: i32,
        args: &mut [i32],
    ) -> Result<()> {
        Err(self.fallback())
    }

    fn query_subdevice_timer(&self, device: i32, subdevice: i32, timer: i32) -> Result<TimerInfo> {
        Err(self.fallback())
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
        Err(self.fallback())
    }

    fn irq_wait(
        &self,
        device: i32,
        subdevice: i32,
        channel: i32,
        time_out: i32,
        flags: i32,
    ) -> Result<IrqWait> {
        Err(self.fallback())
    }

    fn irq_stop(&self, device: i32, subdevice: i32, channel: i32, flags: i32) -> Result<()> {
        Err(self.fallback())
    }

    /// Poll for a pending interrupt without blocking.
    fn irq_test(&self, device: i32, subdevice: i32, channel: i32, flags: i32) -> Result<()> {
        Err(self.fallback())
    }

    fn reset_device(&self, device: i32, flags: i32) -> Result<()> {
        Err(self.fallback())
    }

    fn reset_subdevice(&self, device: i32, subdevice: i32, flags: i32) -> Result<()> {
        Err(self.fallback())
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
        Err(self.fallback())
    }

    /// Execute a batch of single reads and writes in place.
    fn single(&self, list: &mut [SingleEntry], flags: i32) -> Result<()> {
        Err(self.fallback())
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
        Err(self.fallback())
    }

    /// Wait for new values; returns the number available.
    fn stream_new_values(&self, device: i32, subdevice: i32, time_out: i32, flags: i32) -> Result<i32> {
        Err(self.fallback())
    }

    /// Read into `values`; returns the number of values read.
    fn stream_read(
        &self,
        device: i32,
        subdevice: i32,
        mode: i32,
        values: &mut [i32],
        time_out: i32,
        flags: i32,
    ) -> Result<usize> {
        Err(self.fallback())
    }

    /// Write from `values`; returns the number of values written.
    fn stream_write(
        &self,
        device: i32,
        subdevice: i32,
        mode: i32,
        values: &[i32],
        time_out: i32,
        flags: i32,
    ) -> Result<usize> {
        Err(self.fallback())
    }

    fn stream_start(&self, list: &mut [StreamStartEntry], flags: i32) -> Result<()> {
        Err(self.fallback())
    }

    fn stream_stop(&self, list: &mut [StreamStopEntry], flags: i32) -> Result<()> {
        Err(self.fallback())
    }

    fn stream_status(&self, device: i32, subdevice: i32, wait: i32, flags: i32) -> Result<StreamStatus> {
        Err(self.fallback())
    }

    /// Achieved frequency and tick count for `frequency` hertz.
    fn stream_frequency_to_ticks(
        &self,
        device: i32,
        subdevice: i32,
        timer: i32,
        frequency: f64,
        flags: i32,
    ) -> Result<(f64, u64)> {
        Err(self.fallback())
    }

    /// Achieved period and tick count for `time` seconds.
    fn stream_time_to_ticks(
        &self,
        device: i32,
        subdevice: i32,
        timer: i32,
        time: f64,
        flags: i32,
    ) -> Result<(f64, u64)> {
        Err(self.fallback())
    }

    // =========================================================================
    // Calibration and parameters
    // =========================================================================

    /// Apply a channel offset in volts; returns the offset actually set.
    fn set_offset(
        &self,
        device: i32,
        subdevice: i32,
        channel: i32,
        range: i32,
        offset: f64,
        flags: i32,
    ) -> Result<f64> {
        Err(self.fallback())
    }

    /// Load an opaque parameter block into a device.
    fn parameters_set(&self, device: i32, params: &[u8], flags: i32) -> Result<()> {
        Err(self.fallback())
    }
}

/// One open backend.
pub enum TransportContext {
    /// Kernel control channel.
    Local(LocalContext),
    /// Remote peer reached over the network protocol.
    Remote(RemoteContext),
    /// Sentinel that serves nothing.
    Dummy(DummyContext),
}

impl TransportContext {
    /// A fresh dummy context.
    pub fn dummy() -> Self {
        Self::Dummy(DummyContext::new())
    }

    /// The call table of this context.
    pub fn calls(&self) -> &dyn DriverCalls {
        match self {
            Self::Local(context) => context,
            Self::Remote(context) => context,
            Self::Dummy(context) => context,
        }
    }

    /// Notification listeners bound to this context.
    pub fn listeners(&self) -> &ListenerSet {
        match self {
            Self::Local(context) => &context.listeners,
            Self::Remote(context) => &context.listeners,
            Self::Dummy(context) => &context.listeners,
        }
    }

    /// Short description for logs.
    pub fn label(&self) -> String {
        match self {
            Self::Local(context) => format!("local:{}", context.channel_label()),
            Self::Remote(context) => format!("remote:{}", context.peer()),
            Self::Dummy(_) => "dummy".to_string(),
        }
    }
}

impl fmt::Debug for TransportContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TransportContext").field(&self.label()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_codes_round_trip() {
        for op in [LockOp::Release, LockOp::Set, LockOp::Check] {
            assert_eq!(LockOp::from_raw(op.as_raw()).unwrap(), op);
        }
        assert_eq!(
            LockOp::from_raw(7),
            Err(MeError::Code(ErrorCode::InvalidLock))
        );
        assert_eq!(
            LockFlags::from_raw(0x11).unwrap(),
            LockFlags::PRESERVE | LockFlags::FORCE
        );
        assert!(LockFlags::from_raw(0x2).is_err());
    }

    #[test]
    fn test_dummy_rejects_everything() {
        let context = TransportContext::dummy();
        assert_eq!(
            context.calls().query_number_devices().unwrap_err().code(),
            ErrorCode::InvalidDevice
        );
        assert_eq!(context.label(), "dummy");
    }
}
