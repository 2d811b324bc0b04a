//! Translation between per-phase and compact stream triggers.

use meids::defs::*;
use meids::trigger::{to_compact, to_rich, CompactTrigger, ConvClassMapping, StreamTrigger};
use meids::ErrorCode;

const EXT: [i32; 2] = [ME_TRIG_TYPE_EXT_DIGITAL, ME_TRIG_TYPE_EXT_ANALOG];

fn rich(acq: i32, scan: i32, conv: i32, scan_ticks: u64) -> StreamTrigger {
    StreamTrigger {
        acq_start_type: acq,
        acq_start_edge: ME_TRIG_EDGE_RISING,
        acq_start_chan: 2,
        acq_start_ticks: 66,
        scan_start_type: scan,
        scan_start_ticks: scan_ticks,
        conv_start_type: conv,
        conv_start_ticks: 33_000,
        ..StreamTrigger::default()
    }
}

/// Every start combination that survives `rich -> compact -> rich`.
fn round_trip_combinations() -> Vec<StreamTrigger> {
    let mut triggers = vec![
        rich(ME_TRIG_TYPE_SW, ME_TRIG_TYPE_TIMER, ME_TRIG_TYPE_TIMER, 1_000),
        rich(ME_TRIG_TYPE_SW, ME_TRIG_TYPE_FOLLOW, ME_TRIG_TYPE_TIMER, 0),
    ];
    for ext in EXT {
        triggers.push(rich(ext, ME_TRIG_TYPE_TIMER, ME_TRIG_TYPE_TIMER, 1_000));
        triggers.push(rich(ext, ME_TRIG_TYPE_FOLLOW, ME_TRIG_TYPE_TIMER, 0));
        triggers.push(rich(ext, ext, ME_TRIG_TYPE_TIMER, 0));
        triggers.push(rich(ext, ext, ext, 0));
        triggers.push(rich(ext, ME_TRIG_TYPE_TIMER, ext, 1_000));
    }
    triggers
}

#[test]
fn test_rich_round_trip() {
    let combinations = round_trip_combinations();
    assert_eq!(combinations.len(), 12);
    for trigger in combinations {
        let compact = to_compact(&trigger, ConvClassMapping::Straight).unwrap();
        let back = to_rich(&compact).unwrap();
        assert_eq!(back, trigger, "compact form {compact:?}");
    }
}

#[test]
fn test_compact_round_trip() {
    let mut compacts = Vec::new();
    for class in [ME_TRIGGER_TYPE_DIGITAL, ME_TRIGGER_TYPE_ANALOG] {
        for (kind, scan_ticks) in [
            (ME_TRIGGER_TYPE_ACQ, 0),
            (ME_TRIGGER_TYPE_ACQ, 5_000),
            (ME_TRIGGER_TYPE_LIST, 0),
            (ME_TRIGGER_TYPE_CONV, 0),
            (ME_TRIGGER_TYPE_CONV, 5_000),
        ] {
            compacts.push((kind | class, scan_ticks));
        }
    }
    compacts.push((ME_TRIGGER_TYPE_SOFTWARE, 0));
    compacts.push((ME_TRIGGER_TYPE_SOFTWARE, 5_000));

    for (trigger_type, scan_ticks) in compacts {
        let compact = CompactTrigger {
            trigger_type,
            edge: ME_TRIG_EDGE_FALLING,
            level_upper: 300,
            level_lower: -300,
            acq_ticks: 66,
            scan_ticks,
            conv_ticks: 1_000,
            synchro: 1,
            stop_type: ME_STREAM_STOP_TYPE_ACQ_LIST,
            stop_count: 4,
            trigger_point: 2,
        };
        let rich = to_rich(&compact).unwrap();
        assert_eq!(to_compact(&rich, ConvClassMapping::Straight).unwrap(), compact);
    }
}

#[test]
fn test_follow_scan_on_conversion_class_comes_back_external() {
    let trigger = rich(ME_TRIG_TYPE_EXT_ANALOG, ME_TRIG_TYPE_FOLLOW, ME_TRIG_TYPE_EXT_ANALOG, 0);
    let compact = to_compact(&trigger, ConvClassMapping::Straight).unwrap();
    assert_eq!(compact.trigger_type, ME_TRIGGER_TYPE_CONV_ANALOG);

    let back = to_rich(&compact).unwrap();
    assert_eq!(back.scan_start_type, ME_TRIG_TYPE_EXT_ANALOG);
}

#[test]
fn test_unsupported_start_combinations() {
    let rejected = [
        rich(ME_TRIG_TYPE_SW, ME_TRIG_TYPE_EXT_DIGITAL, ME_TRIG_TYPE_TIMER, 0),
        rich(ME_TRIG_TYPE_SW, ME_TRIG_TYPE_TIMER, ME_TRIG_TYPE_EXT_DIGITAL, 1_000),
        rich(ME_TRIG_TYPE_EXT_DIGITAL, ME_TRIG_TYPE_EXT_ANALOG, ME_TRIG_TYPE_TIMER, 0),
        rich(ME_TRIG_TYPE_EXT_ANALOG, ME_TRIG_TYPE_FOLLOW, ME_TRIG_TYPE_EXT_DIGITAL, 0),
        rich(ME_TRIG_TYPE_TIMER, ME_TRIG_TYPE_TIMER, ME_TRIG_TYPE_TIMER, 1_000),
        rich(ME_TRIG_TYPE_NONE, ME_TRIG_TYPE_NONE, ME_TRIG_TYPE_NONE, 0),
    ];
    for trigger in rejected {
        let err = to_compact(&trigger, ConvClassMapping::Straight).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidAcqStartTrigType, "{trigger:?}");
    }

    let unknown = CompactTrigger {
        trigger_type: 0x08,
        ..CompactTrigger::default()
    };
    assert_eq!(to_rich(&unknown).unwrap_err().code(), ErrorCode::InvalidAcqStartTrigType);
}

#[test]
fn test_invalid_acquisition_stop() {
    let mut trigger = rich(ME_TRIG_TYPE_SW, ME_TRIG_TYPE_FOLLOW, ME_TRIG_TYPE_TIMER, 0);
    trigger.acq_stop_type = ME_TRIG_TYPE_COUNT;
    trigger.acq_stop_count = 0;
    assert_eq!(
        to_compact(&trigger, ConvClassMapping::Straight).unwrap_err().code(),
        ErrorCode::InvalidAcqStopArg
    );

    trigger.acq_stop_type = ME_TRIG_TYPE_EDGE;
    assert_eq!(
        to_compact(&trigger, ConvClassMapping::Straight).unwrap_err().code(),
        ErrorCode::InvalidAcqStopTrigType
    );
}
