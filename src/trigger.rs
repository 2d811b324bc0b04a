//! Stream trigger and stream configuration translation.
//!
//! Streaming acquisitions are described in two shapes:
//!
//! - [`StreamTrigger`]: one trigger type, edge, channel, tick count and
//!   argument block per phase (acquisition start, scan start, conversion
//!   start, scan stop, acquisition stop). Remote peers and the public API use
//!   this shape.
//! - [`CompactTrigger`]: a single trigger-type enumerant, three 64-bit tick
//!   counts and a stop-type enumerant. The local control channel uses this.
//!
//! # Supported start combinations
//!
//! | acquisition | scan            | conversion | compact type |
//! |-------------|-----------------|------------|--------------|
//! | SW          | TIMER / FOLLOW  | TIMER      | SOFTWARE     |
//! | EXT_x       | TIMER / FOLLOW  | TIMER      | ACQ_x        |
//! | EXT_x       | EXT_x           | TIMER      | LIST_x       |
//! | EXT_x       | EXT_x / TIMER / FOLLOW | EXT_x | CONV_x     |
//!
//! `x` is DIGITAL or ANALOG and must match across the stages that use it.
//! A timer-driven scan needs a nonzero scan tick count, every other scan
//! drive needs zero.
//!
//! The compact shape cannot tell a FOLLOW scan from an EXT scan on the
//! conversion class, so `compact -> rich` yields EXT there.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::defs::*;
use crate::error::{ErrorCode, MeError, Result};

/// Number of argument slots per trigger phase.
pub const TRIGGER_ARGS: usize = 10;

/// Per-phase trigger description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamTrigger {
    pub acq_start_type: i32,
    pub acq_start_edge: i32,
    pub acq_start_chan: i32,
    pub acq_start_ticks: u64,
    pub acq_start_args: [i32; TRIGGER_ARGS],
    pub scan_start_type: i32,
    pub scan_start_ticks: u64,
    pub scan_start_args: [i32; TRIGGER_ARGS],
    pub conv_start_type: i32,
    pub conv_start_ticks: u64,
    pub conv_start_args: [i32; TRIGGER_ARGS],
    pub scan_stop_type: i32,
    pub scan_stop_count: i32,
    pub scan_stop_args: [i32; TRIGGER_ARGS],
    pub acq_stop_type: i32,
    pub acq_stop_count: i32,
    pub acq_stop_args: [i32; TRIGGER_ARGS],
    pub flags: i32,
}

/// Single-enumerant trigger description used by the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompactTrigger {
    pub trigger_type: i32,
    pub edge: i32,
    pub level_lower: i32,
    pub level_upper: i32,
    pub trigger_point: i32,
    pub acq_ticks: u64,
    pub scan_ticks: u64,
    pub conv_ticks: u64,
    pub synchro: i32,
    pub stop_type: i32,
    pub stop_count: i32,
}

/// One channel of a stream configuration list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamConfigEntry {
    pub channel: i32,
    /// Range index.
    pub stream_config: i32,
    /// Ground or differential reference.
    pub reference: i32,
    pub flags: i32,
}

/// One channel of a compact stream configuration list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompactConfigEntry {
    pub channel: i32,
    /// Range index, with the extra-range bit for shunted inputs.
    pub range: i32,
}

/// How external conversion-class triggers map to compact enumerants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConvClassMapping {
    /// EXT_DIGITAL maps to CONV_DIGITAL and EXT_ANALOG to CONV_ANALOG.
    ///
    /// Older driver releases swap the two classes in the rich -> compact
    /// direction only. This variant does not, so a conversion trigger
    /// reaches the board as the class the caller named. Every such
    /// translation is logged at debug level; select [`Self::Legacy`] for
    /// firmware that expects the swapped assignment.
    #[default]
    Straight,
    /// EXT_DIGITAL maps to CONV_ANALOG and EXT_ANALOG to CONV_DIGITAL.
    ///
    /// Matches boards whose firmware expects the swapped assignment. The
    /// reverse translation stays straight, so round trips do not hold.
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Digital,
    Analog,
}

impl Signal {
    fn from_external(trig_type: i32) -> Option<Self> {
        match trig_type {
            ME_TRIG_TYPE_EXT_DIGITAL => Some(Self::Digital),
            ME_TRIG_TYPE_EXT_ANALOG => Some(Self::Analog),
            _ => None,
        }
    }

    fn external(self) -> i32 {
        match self {
            Self::Digital => ME_TRIG_TYPE_EXT_DIGITAL,
            Self::Analog => ME_TRIG_TYPE_EXT_ANALOG,
        }
    }

    fn class_bit(self) -> i32 {
        match self {
            Self::Digital => ME_TRIGGER_TYPE_DIGITAL,
            Self::Analog => ME_TRIGGER_TYPE_ANALOG,
        }
    }

    fn swapped(self) -> Self {
        match self {
            Self::Digital => Self::Analog,
            Self::Analog => Self::Digital,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartClass {
    Software,
    Acq(Signal),
    List(Signal),
    Conv(Signal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanDrive {
    Timer,
    Follow,
    External,
}

fn classify_start(trigger: &StreamTrigger) -> Result<(StartClass, ScanDrive)> {
    let acq = trigger.acq_start_type;
    let scan = trigger.scan_start_type;
    let conv = trigger.conv_start_type;

    let class = match (acq, scan, conv) {
        (ME_TRIG_TYPE_SW, ME_TRIG_TYPE_TIMER, ME_TRIG_TYPE_TIMER) => {
            (StartClass::Software, ScanDrive::Timer)
        }
        (ME_TRIG_TYPE_SW, ME_TRIG_TYPE_FOLLOW, ME_TRIG_TYPE_TIMER) => {
            (StartClass::Software, ScanDrive::Follow)
        }
        _ => match (Signal::from_external(acq), scan, conv) {
            (Some(sig), ME_TRIG_TYPE_TIMER, ME_TRIG_TYPE_TIMER) => {
                (StartClass::Acq(sig), ScanDrive::Timer)
            }
            (Some(sig), ME_TRIG_TYPE_FOLLOW, ME_TRIG_TYPE_TIMER) => {
                (StartClass::Acq(sig), ScanDrive::Follow)
            }
            (Some(sig), s, ME_TRIG_TYPE_TIMER) if s == acq => {
                (StartClass::List(sig), ScanDrive::External)
            }
            (Some(sig), s, c) if s == acq && c == acq => {
                (StartClass::Conv(sig), ScanDrive::External)
            }
            (Some(sig), ME_TRIG_TYPE_TIMER, c) if c == acq => {
                (StartClass::Conv(sig), ScanDrive::Timer)
            }
            (Some(sig), ME_TRIG_TYPE_FOLLOW, c) if c == acq => {
                (StartClass::Conv(sig), ScanDrive::Follow)
            }
            _ => {
                return Err(MeError::Code(ErrorCode::InvalidAcqStartTrigType));
            }
        },
    };
    Ok(class)
}

fn check_stop(trigger: &StreamTrigger) -> Result<(i32, i32, i32)> {
    match trigger.scan_stop_type {
        ME_TRIG_TYPE_NONE => {}
        ME_TRIG_TYPE_COUNT if trigger.scan_stop_count <= 0 => {
            return Err(ErrorCode::InvalidScanStopArg.into());
        }
        ME_TRIG_TYPE_COUNT => {}
        _ => return Err(ErrorCode::InvalidScanStopTrigType.into()),
    }

    match (trigger.scan_stop_type, trigger.acq_stop_type) {
        (ME_TRIG_TYPE_NONE, ME_TRIG_TYPE_NONE) => Ok((ME_STREAM_STOP_TYPE_MANUAL, 0, 0)),
        (ME_TRIG_TYPE_NONE, ME_TRIG_TYPE_COUNT) => {
            if trigger.acq_stop_count <= 0 {
                return Err(ErrorCode::InvalidAcqStopArg.into());
            }
            Ok((
                ME_STREAM_STOP_TYPE_ACQ_LIST,
                trigger.acq_stop_count,
                trigger.acq_stop_args[0],
            ))
        }
        (ME_TRIG_TYPE_COUNT, ME_TRIG_TYPE_FOLLOW) => Ok((
            ME_STREAM_STOP_TYPE_SCAN_VALUE,
            trigger.scan_stop_count,
            trigger.scan_stop_args[0],
        )),
        _ => Err(ErrorCode::InvalidAcqStopTrigType.into()),
    }
}

/// Translate the per-phase description into the compact one.
///
/// Validation happens before anything is produced, so a failure leaves the
/// caller's output untouched.
pub fn to_compact(trigger: &StreamTrigger, mapping: ConvClassMapping) -> Result<CompactTrigger> {
    let (class, drive) = classify_start(trigger)?;

    let ticks_ok = match drive {
        ScanDrive::Timer => trigger.scan_start_ticks != 0,
        ScanDrive::Follow | ScanDrive::External => trigger.scan_start_ticks == 0,
    };
    if !ticks_ok {
        return Err(ErrorCode::InvalidScanStartArg.into());
    }

    if trigger.flags != 0 {
        return Err(ErrorCode::InvalidFlags.into());
    }

    let (stop_type, stop_count, trigger_point) = check_stop(trigger)?;

    let trigger_type = match class {
        StartClass::Software => ME_TRIGGER_TYPE_SOFTWARE,
        StartClass::Acq(sig) => ME_TRIGGER_TYPE_ACQ | sig.class_bit(),
        StartClass::List(sig) => ME_TRIGGER_TYPE_LIST | sig.class_bit(),
        StartClass::Conv(sig) => match mapping {
            ConvClassMapping::Straight => {
                debug!(
                    signal = ?sig,
                    "straight conversion-class mapping; legacy drivers would send the other class"
                );
                ME_TRIGGER_TYPE_CONV | sig.class_bit()
            }
            ConvClassMapping::Legacy => {
                warn!(
                    signal = ?sig,
                    "legacy conversion-class mapping in use; digital and analog are swapped"
                );
                ME_TRIGGER_TYPE_CONV | sig.swapped().class_bit()
            }
        },
    };

    Ok(CompactTrigger {
        trigger_type,
        edge: trigger.acq_start_edge,
        level_upper: trigger.acq_start_args[0],
        level_lower: trigger.acq_start_args[1],
        trigger_point,
        acq_ticks: trigger.acq_start_ticks,
        scan_ticks: trigger.scan_start_ticks,
        conv_ticks: trigger.conv_start_ticks,
        synchro: trigger.acq_start_chan,
        stop_type,
        stop_count,
    })
}

/// Translate the compact description into the per-phase one.
pub fn to_rich(compact: &CompactTrigger) -> Result<StreamTrigger> {
    let timer_or = |fallback: i32| {
        if compact.scan_ticks != 0 {
            ME_TRIG_TYPE_TIMER
        } else {
            fallback
        }
    };
    let signal = if compact.trigger_type & ME_TRIGGER_TYPE_ANALOG != 0 {
        Signal::Analog
    } else {
        Signal::Digital
    };

    let (acq, scan, conv) = match compact.trigger_type {
        ME_TRIGGER_TYPE_SOFTWARE => (
            ME_TRIG_TYPE_SW,
            timer_or(ME_TRIG_TYPE_FOLLOW),
            ME_TRIG_TYPE_TIMER,
        ),
        ME_TRIGGER_TYPE_ACQ_DIGITAL | ME_TRIGGER_TYPE_ACQ_ANALOG => (
            signal.external(),
            timer_or(ME_TRIG_TYPE_FOLLOW),
            ME_TRIG_TYPE_TIMER,
        ),
        ME_TRIGGER_TYPE_LIST_DIGITAL | ME_TRIGGER_TYPE_LIST_ANALOG => {
            (signal.external(), signal.external(), ME_TRIG_TYPE_TIMER)
        }
        ME_TRIGGER_TYPE_CONV_DIGITAL | ME_TRIGGER_TYPE_CONV_ANALOG => (
            signal.external(),
            timer_or(signal.external()),
            signal.external(),
        ),
        _ => return Err(ErrorCode::InvalidAcqStartTrigType.into()),
    };

    let mut rich = StreamTrigger {
        acq_start_type: acq,
        acq_start_edge: compact.edge,
        acq_start_chan: compact.synchro,
        acq_start_ticks: compact.acq_ticks,
        scan_start_type: scan,
        scan_start_ticks: compact.scan_ticks,
        conv_start_type: conv,
        conv_start_ticks: compact.conv_ticks,
        ..StreamTrigger::default()
    };
    rich.acq_start_args[0] = compact.level_upper;
    rich.acq_start_args[1] = compact.level_lower;

    match compact.stop_type {
        ME_STREAM_STOP_TYPE_MANUAL => {
            rich.scan_stop_type = ME_TRIG_TYPE_NONE;
            rich.acq_stop_type = ME_TRIG_TYPE_NONE;
        }
        ME_STREAM_STOP_TYPE_ACQ_LIST => {
            rich.scan_stop_type = ME_TRIG_TYPE_NONE;
            rich.acq_stop_type = ME_TRIG_TYPE_COUNT;
            rich.acq_stop_count = compact.stop_count;
            rich.acq_stop_args[0] = compact.trigger_point;
        }
        ME_STREAM_STOP_TYPE_SCAN_VALUE => {
            rich.scan_stop_type = ME_TRIG_TYPE_COUNT;
            rich.acq_stop_type = ME_TRIG_TYPE_FOLLOW;
            rich.scan_stop_count = compact.stop_count;
            rich.scan_stop_args[0] = compact.trigger_point;
        }
        _ => return Err(ErrorCode::InvalidScanStopTrigType.into()),
    }
    Ok(rich)
}

fn is_differential(reference: i32) -> bool {
    matches!(
        reference,
        ME_REF_AIO_DIFFERENTIAL | ME_REF_AI_DIFFERENTIAL | ME_REF_AO_DIFFERENTIAL
    )
}

/// Translate a stream configuration list to the compact shape.
///
/// Returns the compact list and the stream flags with the differential bit
/// folded in.
pub fn config_to_compact(
    list: &[StreamConfigEntry],
    flags: i32,
) -> Result<(Vec<CompactConfigEntry>, i32)> {
    let Some(first) = list.first() else {
        return Ok((Vec::new(), flags));
    };

    for (position, entry) in list.iter().enumerate() {
        if !matches!(
            entry.reference,
            ME_REF_AIO_GROUND
                | ME_REF_AIO_DIFFERENTIAL
                | ME_REF_AI_GROUND
                | ME_REF_AI_DIFFERENTIAL
                | ME_REF_AO_GROUND
                | ME_REF_AO_DIFFERENTIAL
        ) {
            warn!(position, reference = entry.reference, "invalid stream reference");
            return Err(ErrorCode::InvalidRef.into());
        }
        if entry.reference != first.reference {
            warn!(position, "mixed references in stream configuration");
            return Err(ErrorCode::InvalidRef.into());
        }
        if entry.flags & !ME_IO_STREAM_CONFIG_TYPE_EXTRA_SHUNT != 0 {
            return Err(ErrorCode::InvalidFlags.into());
        }
    }

    let compact = list
        .iter()
        .map(|entry| CompactConfigEntry {
            channel: entry.channel,
            range: if entry.flags & ME_IO_STREAM_CONFIG_TYPE_EXTRA_SHUNT != 0 {
                entry.stream_config + ME_AI_EXTRA_RANGE
            } else {
                entry.stream_config
            },
        })
        .collect();

    let flags = if is_differential(first.reference) {
        flags | ME_STREAM_CONFIG_DIFFERENTIAL
    } else {
        flags
    };
    Ok((compact, flags))
}

/// Translate a compact stream configuration list back to the rich shape.
pub fn config_to_rich(list: &[CompactConfigEntry], flags: i32) -> (Vec<StreamConfigEntry>, i32) {
    let reference = if flags & ME_STREAM_CONFIG_DIFFERENTIAL != 0 {
        ME_REF_AIO_DIFFERENTIAL
    } else {
        ME_REF_AIO_GROUND
    };
    let rich = list
        .iter()
        .map(|entry| {
            let shunted = entry.range & ME_AI_EXTRA_RANGE != 0;
            StreamConfigEntry {
                channel: entry.channel,
                stream_config: entry.range & !ME_AI_EXTRA_RANGE,
                reference,
                flags: if shunted {
                    ME_IO_STREAM_CONFIG_TYPE_EXTRA_SHUNT
                } else {
                    ME_IO_STREAM_CONFIG_TYPE_NO_FLAGS
                },
            }
        })
        .collect();
    (rich, flags & !ME_STREAM_CONFIG_DIFFERENTIAL)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rich(acq: i32, scan: i32, conv: i32, scan_ticks: u64) -> StreamTrigger {
        StreamTrigger {
            acq_start_type: acq,
            scan_start_type: scan,
            conv_start_type: conv,
            acq_start_ticks: 66,
            scan_start_ticks: scan_ticks,
            conv_start_ticks: 33_000,
            ..StreamTrigger::default()
        }
    }

    #[test]
    fn test_software_timer_requires_scan_ticks() {
        let err = to_compact(
            &rich(ME_TRIG_TYPE_SW, ME_TRIG_TYPE_TIMER, ME_TRIG_TYPE_TIMER, 0),
            ConvClassMapping::Straight,
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidScanStartArg);
    }

    #[test]
    fn test_follow_rejects_scan_ticks() {
        let err = to_compact(
            &rich(ME_TRIG_TYPE_SW, ME_TRIG_TYPE_FOLLOW, ME_TRIG_TYPE_TIMER, 10),
            ConvClassMapping::Straight,
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidScanStartArg);
    }

    #[test]
    fn test_mixed_signal_classes_rejected() {
        let err = to_compact(
            &rich(
                ME_TRIG_TYPE_EXT_DIGITAL,
                ME_TRIG_TYPE_EXT_ANALOG,
                ME_TRIG_TYPE_TIMER,
                0,
            ),
            ConvClassMapping::Straight,
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidAcqStartTrigType);
    }

    #[test]
    fn test_trigger_flags_rejected() {
        let mut trigger = rich(ME_TRIG_TYPE_SW, ME_TRIG_TYPE_TIMER, ME_TRIG_TYPE_TIMER, 5);
        trigger.flags = 1;
        let err = to_compact(&trigger, ConvClassMapping::Straight).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidFlags);
    }

    #[test]
    fn test_stop_combinations() {
        let mut trigger = rich(ME_TRIG_TYPE_SW, ME_TRIG_TYPE_TIMER, ME_TRIG_TYPE_TIMER, 5);
        trigger.acq_stop_type = ME_TRIG_TYPE_FOLLOW;
        assert_eq!(
            to_compact(&trigger, ConvClassMapping::Straight)
                .unwrap_err()
                .code(),
            ErrorCode::InvalidAcqStopTrigType
        );

        trigger.acq_stop_type = ME_TRIG_TYPE_COUNT;
        trigger.acq_stop_count = 0;
        assert_eq!(
            to_compact(&trigger, ConvClassMapping::Straight)
                .unwrap_err()
                .code(),
            ErrorCode::InvalidAcqStopArg
        );

        trigger.scan_stop_type = ME_TRIG_TYPE_TIMER;
        assert_eq!(
            to_compact(&trigger, ConvClassMapping::Straight)
                .unwrap_err()
                .code(),
            ErrorCode::InvalidScanStopTrigType
        );

        trigger.scan_stop_type = ME_TRIG_TYPE_COUNT;
        trigger.scan_stop_count = 100;
        trigger.acq_stop_type = ME_TRIG_TYPE_FOLLOW;
        trigger.scan_stop_args[0] = 3;
        let compact = to_compact(&trigger, ConvClassMapping::Straight).unwrap();
        assert_eq!(compact.stop_type, ME_STREAM_STOP_TYPE_SCAN_VALUE);
        assert_eq!(compact.stop_count, 100);
        assert_eq!(compact.trigger_point, 3);
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_legacy_mapping_swaps_conversion_class() {
        let trigger = rich(
            ME_TRIG_TYPE_EXT_DIGITAL,
            ME_TRIG_TYPE_EXT_DIGITAL,
            ME_TRIG_TYPE_EXT_DIGITAL,
            0,
        );
        let straight = to_compact(&trigger, ConvClassMapping::Straight).unwrap();
        let legacy = to_compact(&trigger, ConvClassMapping::Legacy).unwrap();
        assert_eq!(straight.trigger_type, ME_TRIGGER_TYPE_CONV_DIGITAL);
        assert_eq!(legacy.trigger_type, ME_TRIGGER_TYPE_CONV_ANALOG);
        assert!(logs_contain("legacy conversion-class mapping in use"));
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_straight_mapping_is_logged() {
        let trigger = rich(
            ME_TRIG_TYPE_EXT_ANALOG,
            ME_TRIG_TYPE_EXT_ANALOG,
            ME_TRIG_TYPE_EXT_ANALOG,
            0,
        );
        let compact = to_compact(&trigger, ConvClassMapping::default()).unwrap();
        assert_eq!(compact.trigger_type, ME_TRIGGER_TYPE_CONV_ANALOG);
        assert!(logs_contain("straight conversion-class mapping"));
        assert!(!logs_contain("legacy conversion-class mapping in use"));
    }

    #[test]
    fn test_config_translation() {
        let list = [
            StreamConfigEntry {
                channel: 0,
                stream_config: 1,
                reference: ME_REF_AI_DIFFERENTIAL,
                flags: ME_IO_STREAM_CONFIG_TYPE_EXTRA_SHUNT,
            },
            StreamConfigEntry {
                channel: 3,
                stream_config: 0,
                reference: ME_REF_AI_DIFFERENTIAL,
                flags: 0,
            },
        ];
        let (compact, flags) = config_to_compact(&list, 0).unwrap();
        assert_eq!(compact[0].range, 1 + ME_AI_EXTRA_RANGE);
        assert_eq!(compact[1].range, 0);
        assert_eq!(flags, ME_STREAM_CONFIG_DIFFERENTIAL);

        let (back, flags) = config_to_rich(&compact, flags);
        assert_eq!(flags, 0);
        assert_eq!(back[0].stream_config, 1);
        assert_eq!(back[0].flags, ME_IO_STREAM_CONFIG_TYPE_EXTRA_SHUNT);
        assert_eq!(back[1].reference, ME_REF_AIO_DIFFERENTIAL);
    }

    #[test]
    fn test_config_rejects_mixed_references() {
        let list = [
            StreamConfigEntry {
                reference: ME_REF_AI_GROUND,
                ..Default::default()
            },
            StreamConfigEntry {
                reference: ME_REF_AI_DIFFERENTIAL,
                ..Default::default()
            },
        ];
        assert_eq!(
            config_to_compact(&list, 0).unwrap_err().code(),
            ErrorCode::InvalidRef
        );
    }
}
