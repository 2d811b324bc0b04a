//! List operations spanning several backends.

mod common;

use meids::defs::*;
use meids::sim::SimBoard;
use meids::trigger::{CompactConfigEntry, CompactTrigger};
use meids::types::{SingleEntry, StreamStartEntry, StreamStopEntry};
use meids::{ErrorCode, MeError};

fn read(device: i32, subdevice: i32, channel: i32) -> SingleEntry {
    SingleEntry {
        device,
        subdevice,
        channel,
        dir: ME_DIR_INPUT,
        ..Default::default()
    }
}

#[test]
fn test_single_list_spans_two_backends() {
    // Logical 0 lives on the first backend, 1 on the second.
    let (sims, driver) = common::multi_driver(vec![
        vec![SimBoard::multifunction(1)],
        vec![SimBoard::digital(2)],
    ]);
    sims[1].set_input(0, 0, 2, 0x11);
    sims[0].set_input(0, 0, 3, 0x22);
    sims[0].set_input(0, 2, 1, 0x33);
    sims[1].set_input(0, 1, 0, 0x44);

    let mut list = [read(1, 0, 2), read(0, 0, 3), read(0, 2, 1), read(1, 1, 0)];
    driver.dispatch().single(&mut list, 0).unwrap();

    let values: Vec<i32> = list.iter().map(|e| e.value).collect();
    assert_eq!(values, vec![0x11, 0x22, 0x33, 0x44]);
    let devices: Vec<i32> = list.iter().map(|e| e.device).collect();
    assert_eq!(devices, vec![1, 0, 0, 1]);
    assert!(list.iter().all(|e| e.errno == 0));
}

#[test]
fn test_nonblocking_list_records_per_item_errors() {
    let (sims, driver) = common::multi_driver(vec![
        vec![SimBoard::multifunction(1)],
        vec![SimBoard::digital(2)],
    ]);
    sims[0].set_input(0, 0, 3, 7);
    sims[1].set_input(0, 0, 2, 9);

    let mut list = [read(0, 0, 3), read(7, 0, 0), read(1, 0, 99), read(1, 0, 2)];
    driver
        .dispatch()
        .single(&mut list, ME_IO_SINGLE_NONBLOCKING)
        .unwrap();

    assert_eq!((list[0].value, list[0].errno), (7, 0));
    assert_eq!(list[1].errno, ErrorCode::InvalidDevice.as_raw());
    assert_eq!(list[1].device, 7);
    assert_eq!(list[2].errno, ErrorCode::InvalidChannel.as_raw());
    assert_eq!((list[3].value, list[3].errno), (9, 0));
}

#[test]
fn test_blocking_list_stops_before_any_backend_on_bad_address() {
    let (sims, driver) = common::multi_driver(vec![vec![SimBoard::multifunction(1)]]);
    sims[0].set_input(0, 0, 3, 7);

    let mut list = [read(0, 0, 3), read(4, 0, 0), read(0, 0, 3)];
    let err = driver.dispatch().single(&mut list, 0).unwrap_err();

    assert_eq!(err, MeError::InvalidDevice(4));
    assert_eq!(list[0].value, 0);
    assert_eq!(list[1].errno, ErrorCode::InvalidDevice.as_raw());
    assert_eq!(list[2].errno, 0);
    assert_eq!(driver.last_error(false), ErrorCode::InvalidDevice);
}

#[test]
fn test_streams_start_and_stop_across_backends() {
    let (sims, driver) = common::multi_driver(vec![
        vec![SimBoard::multifunction(1)],
        vec![SimBoard::digital(2), SimBoard::multifunction(3)],
    ]);
    let dispatch = driver.dispatch();
    let trigger = CompactTrigger {
        trigger_type: ME_TRIGGER_TYPE_SOFTWARE,
        conv_ticks: 1_000,
        stop_type: ME_STREAM_STOP_TYPE_MANUAL,
        ..CompactTrigger::default()
    };
    let channels = [CompactConfigEntry { channel: 0, range: 0 }];
    for device in [0, 2] {
        dispatch.stream_configure(device, 0, &channels, &trigger, 0, 0).unwrap();
    }

    let mut start = [0, 2].map(|device| StreamStartEntry {
        device,
        subdevice: 0,
        start_mode: ME_START_MODE_NONBLOCKING,
        ..Default::default()
    });
    dispatch.stream_start(&mut start, 0).unwrap();
    assert!(sims[0].is_running(0, 0));
    assert!(sims[1].is_running(1, 0));
    assert_eq!(dispatch.stream_status(2, 0, ME_WAIT_NONE, 0).unwrap().status, ME_STATUS_BUSY);

    sims[1].push_values(1, 0, &[10, 20, 30]);
    let mut values = [0; 8];
    let read = dispatch
        .stream_read(2, 0, ME_READ_MODE_NONBLOCKING, &mut values, 0, 0)
        .unwrap();
    assert_eq!(&values[..read], &[10, 20, 30]);

    let mut stop = [2, 0].map(|device| StreamStopEntry {
        device,
        subdevice: 0,
        stop_mode: ME_STOP_MODE_IMMEDIATE,
        ..Default::default()
    });
    dispatch.stream_stop(&mut stop, 0).unwrap();
    assert!(!sims[0].is_running(0, 0));
    assert!(!sims[1].is_running(1, 0));
    assert_eq!(dispatch.stream_status(0, 0, ME_WAIT_NONE, 0).unwrap().status, ME_STATUS_IDLE);
}
