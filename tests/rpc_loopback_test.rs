//! Remote backend talking to an in-process board server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use meids::context::{LockFlags, LockOp};
use meids::defs::*;
use meids::rpc::server::serve;
use meids::sim::{LockScope, SimBoard, SimulatedDriver};
use meids::trigger::{CompactConfigEntry, CompactTrigger};
use meids::types::{StreamStartEntry, StreamStopEntry};
use meids::{Driver, ErrorCode, MeError};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

const TIMEOUT: Duration = Duration::from_secs(5);

struct Harness {
    sim: Arc<SimulatedDriver>,
    remote: Driver,
    runtime: Runtime,
}

impl Harness {
    fn start() -> Self {
        let (sim, context) = common::local("served", vec![SimBoard::multifunction(1), SimBoard::digital(2)]);
        let served = Driver::open_contexts(vec![context]).expect("Failed to open served driver");

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("Failed to build runtime");
        let listener = runtime
            .block_on(TcpListener::bind("127.0.0.1:0"))
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("no local address").to_string();
        runtime.spawn(serve(listener, Arc::new(served)));

        let remote = Driver::open_remote(&addr, TIMEOUT).expect("Failed to open remote driver");
        Self { sim, remote, runtime }
    }

    fn stop(self) {
        let Self { sim, mut remote, runtime } = self;
        remote.close();
        drop(sim);
        runtime.shutdown_timeout(Duration::from_secs(1));
    }
}

#[test]
fn test_remote_catalog_mirrors_served_boards() {
    let harness = Harness::start();
    let remote = &harness.remote;
    let dispatch = remote.dispatch();

    assert_eq!(remote.catalog().len(), 2);
    assert_eq!(remote.query_number_devices(), 2);
    assert_eq!(remote.query_driver_name().unwrap(), "MEiDS RPC");
    assert!(remote.query_driver_version().is_ok());

    assert_eq!(dispatch.query_device_name(0).unwrap(), "ME-4680");
    assert_eq!(dispatch.query_device_name(1).unwrap(), "ME-1000");
    assert_eq!(dispatch.query_number_subdevices(1).unwrap(), 4);
    assert_eq!(dispatch.query_number_channels(0, 0).unwrap(), 16);
    assert_eq!(dispatch.query_number_ranges(0, 0, ME_UNIT_ANY).unwrap(), 4);

    let range = dispatch.query_range_info(0, 0, 1).unwrap();
    assert_eq!((range.min, range.max), (-2.5, 2.5));
    assert_eq!(dispatch.query_subdevice_type(0, 4).unwrap().0, ME_TYPE_CTR);
    harness.stop();
}

#[test]
fn test_single_io_over_the_wire() {
    let harness = Harness::start();
    let dispatch = harness.remote.dispatch();

    harness.sim.set_input(0, 0, 5, 0x0123);
    assert_eq!(dispatch.single_read(0, 0, 5, 0, 0).unwrap(), 0x0123);

    dispatch
        .single_config(
            1,
            0,
            3,
            ME_SINGLE_CONFIG_DIO_OUTPUT,
            ME_REF_NONE,
            ME_TRIG_CHAN_DEFAULT,
            ME_TRIG_TYPE_SW,
            ME_TRIG_EDGE_NONE,
            0,
        )
        .unwrap();
    dispatch.single_write(1, 0, 3, 0xA5, 0, 0).unwrap();
    assert_eq!(dispatch.single_read(1, 0, 3, 0, 0).unwrap(), 0xA5);

    assert_eq!(
        dispatch.single_read(0, 0, 99, 0, 0).unwrap_err().code(),
        ErrorCode::InvalidChannel
    );
    harness.stop();
}

#[test]
fn test_invalid_device_is_reported_by_both_sides() {
    let harness = Harness::start();

    // Rejected by the local resolver without a round trip.
    assert_eq!(
        harness.remote.dispatch().query_number_subdevices(2).unwrap_err(),
        MeError::InvalidDevice(2)
    );

    // Rejected by the server's resolver.
    let err = harness.remote.contexts()[0]
        .calls()
        .query_number_subdevices(9)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidDevice);
    harness.stop();
}

#[test]
fn test_driver_lock_over_the_wire() {
    let harness = Harness::start();

    harness.remote.lock_driver(LockOp::Set, LockFlags::empty()).unwrap();
    assert!(harness.sim.holds_lock(LockScope::Driver));
    harness.remote.lock_driver(LockOp::Release, LockFlags::empty()).unwrap();
    assert!(!harness.sim.holds_lock(LockScope::Driver));

    harness.sim.foreign_lock(LockScope::Device(1));
    assert_eq!(
        harness
            .remote
            .lock_driver(LockOp::Set, LockFlags::empty())
            .unwrap_err()
            .code(),
        ErrorCode::Locked
    );
    assert!(!harness.sim.holds_lock(LockScope::Driver));
    harness.stop();
}

#[test]
fn test_stream_over_the_wire() {
    let harness = Harness::start();
    let dispatch = harness.remote.dispatch();
    let trigger = CompactTrigger {
        trigger_type: ME_TRIGGER_TYPE_SOFTWARE,
        conv_ticks: 1_000,
        stop_type: ME_STREAM_STOP_TYPE_SCAN_VALUE,
        stop_count: 4,
        ..CompactTrigger::default()
    };
    dispatch
        .stream_configure(0, 0, &[CompactConfigEntry { channel: 2, range: 1 }], &trigger, 0, 0)
        .unwrap();

    let mut start = [StreamStartEntry {
        device: 0,
        subdevice: 0,
        start_mode: ME_START_MODE_NONBLOCKING,
        ..Default::default()
    }];
    dispatch.stream_start(&mut start, 0).unwrap();
    assert!(harness.sim.is_running(0, 0));

    // The fourth value completes the acquisition.
    harness.sim.push_values(0, 0, &[4, 3, 2, 1, 0]);
    assert!(!harness.sim.is_running(0, 0));

    let mut values = [0; 16];
    let read = dispatch
        .stream_read(0, 0, ME_READ_MODE_NONBLOCKING, &mut values, 0, 0)
        .unwrap();
    assert_eq!(&values[..read], &[4, 3, 2, 1]);
    assert_eq!(dispatch.stream_status(0, 0, ME_WAIT_NONE, 0).unwrap().status, ME_STATUS_IDLE);

    let mut stop = [StreamStopEntry {
        device: 0,
        subdevice: 0,
        stop_mode: ME_STOP_MODE_IMMEDIATE,
        ..Default::default()
    }];
    dispatch.stream_stop(&mut stop, 0).unwrap();
    harness.stop();
}
