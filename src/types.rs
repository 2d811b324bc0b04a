//! Value types passed through the call surface.

use crate::error::ErrorCode;

/// One item of a single-value I/O list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SingleEntry {
    pub device: i32,
    pub subdevice: i32,
    pub channel: i32,
    /// Input or output direction.
    pub dir: i32,
    /// Value read or to write.
    pub value: i32,
    /// Timeout in milliseconds, `0` for none.
    pub time_out: i32,
    pub flags: i32,
    /// Per-item result code.
    pub errno: i32,
}

/// One item of a stream start list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamStartEntry {
    pub device: i32,
    pub subdevice: i32,
    pub start_mode: i32,
    pub time_out: i32,
    pub flags: i32,
    pub errno: i32,
}

/// One item of a stream stop list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamStopEntry {
    pub device: i32,
    pub subdevice: i32,
    pub stop_mode: i32,
    pub flags: i32,
    pub errno: i32,
}

/// Items of list operations that carry a device address and a result slot.
pub trait ListItem: Copy {
    /// Addressed device number.
    fn device(&self) -> i32;
    /// Replace the addressed device number.
    fn set_device(&mut self, device: i32);
    /// Per-item result code.
    fn errno(&self) -> i32;
    /// Store the per-item result code.
    fn set_errno(&mut self, code: ErrorCode);
    /// Copy backend results from `other` into `self`, keeping the address.
    fn take_results(&mut self, other: &Self);
}

macro_rules! impl_list_item {
    ($ty:ty, |$dst:ident, $src:ident| $copy:block) => {
        impl ListItem for $ty {
            fn device(&self) -> i32 {
                self.device
            }

            fn set_device(&mut self, device: i32) {
                self.device = device;
            }

            fn errno(&self) -> i32 {
                self.errno
            }

            fn set_errno(&mut self, code: ErrorCode) {
                self.errno = code.as_raw();
            }

            fn take_results(&mut self, other: &Self) {
                let $dst = self;
                let $src = other;
                $copy
            }
        }
    };
}

impl_list_item!(SingleEntry, |dst, src| {
    dst.value = src.value;
    dst.errno = src.errno;
});
impl_list_item!(StreamStartEntry, |dst, src| {
    dst.errno = src.errno;
});
impl_list_item!(StreamStopEntry, |dst, src| {
    dst.errno = src.errno;
});

/// Hardware identification of a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceInfo {
    pub vendor_id: i32,
    pub device_id: i32,
    pub serial_no: i32,
    pub bus_type: i32,
    pub bus_no: i32,
    pub dev_no: i32,
    pub func_no: i32,
    /// Plugged state code.
    pub plugged: i32,
}

/// Description of one range.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RangeInfo {
    pub unit: i32,
    pub min: f64,
    pub max: f64,
    pub max_data: i32,
}

/// Timer limits of a streaming subdevice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimerInfo {
    /// Timer base frequency in hertz.
    pub base_frequency: i32,
    pub min_ticks: u64,
    pub max_ticks: u64,
}

impl TimerInfo {
    fn usable(&self) -> bool {
        self.base_frequency != 0 && self.min_ticks != 0 && self.max_ticks != 0
    }

    /// Ticks for a period of `time` seconds, clamped to the timer limits.
    ///
    /// Returns the period actually achieved and the tick count.
    pub fn time_to_ticks(&self, time: f64) -> (f64, u64) {
        if !self.usable() {
            return (f64::INFINITY, 0);
        }
        let base = f64::from(self.base_frequency);
        let (min, max) = (self.min_ticks as f64, self.max_ticks as f64);
        if time < min / base {
            (min / base, self.min_ticks)
        } else if time > max / base {
            (max / base, self.max_ticks)
        } else {
            let ticks = (time * base + 0.5) as u64;
            (ticks as f64 / base, ticks)
        }
    }

    /// Ticks for a rate of `frequency` hertz, clamped to the timer limits.
    ///
    /// A zero frequency selects the fastest rate.
    pub fn frequency_to_ticks(&self, frequency: f64) -> (f64, u64) {
        if !self.usable() {
            return (f64::INFINITY, 0);
        }
        let base = f64::from(self.base_frequency);
        let (min, max) = (self.min_ticks as f64, self.max_ticks as f64);
        if frequency == 0.0 || frequency > base / min {
            (base / min, self.min_ticks)
        } else if frequency < base / max {
            (base / max, self.max_ticks)
        } else {
            let ticks = (base / frequency + 0.5) as u64;
            (base / ticks as f64, ticks)
        }
    }
}

/// Result of an interrupt wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IrqWait {
    pub irq_count: i32,
    pub value: i32,
}

/// Result of a stream status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamStatus {
    pub status: i32,
    pub count: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_clamped_to_timer_limits() {
        let timer = TimerInfo {
            base_frequency: 33_000_000,
            min_ticks: 66,
            max_ticks: u64::from(u32::MAX),
        };
        let (time, ticks) = timer.time_to_ticks(0.0);
        assert_eq!(ticks, 66);
        assert!((time - 66.0 / 33e6).abs() < 1e-12);

        let (_, ticks) = timer.time_to_ticks(f64::INFINITY);
        assert_eq!(ticks, u64::from(u32::MAX));

        let (frequency, ticks) = timer.frequency_to_ticks(1000.0);
        assert_eq!(ticks, 33_000);
        assert!((frequency - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_unusable_timer_reports_infinity() {
        let (time, ticks) = TimerInfo::default().time_to_ticks(1.0);
        assert!(time.is_infinite());
        assert_eq!(ticks, 0);
    }
}
