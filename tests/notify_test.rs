//! Interrupt and stream listeners.

mod common;

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use meids::defs::*;
use meids::dispatch::StreamCallbacks;
use meids::notify::{CallbackAction, IrqCallback, IrqEvent, StreamCallback, StreamEvent};
use meids::sim::SimBoard;
use meids::trigger::{CompactConfigEntry, CompactTrigger};
use meids::types::{StreamStartEntry, StreamStopEntry};
use parking_lot::Mutex;

const PATIENCE: Duration = Duration::from_secs(3);

/// Digital board reachable as logical device 1 on the second backend.
fn digital_on_second_backend() -> (Vec<Arc<meids::sim::SimulatedDriver>>, meids::Driver) {
    let (sims, driver) = common::multi_driver(vec![
        vec![SimBoard::multifunction(1)],
        vec![SimBoard::digital(2)],
    ]);
    driver
        .dispatch()
        .irq_start(1, 0, 0, ME_IRQ_SOURCE_DIO_DEFAULT, ME_IRQ_EDGE_NOT_USED, 0, 0)
        .unwrap();
    (sims, driver)
}

fn counting(count: &Arc<AtomicUsize>) -> IrqCallback {
    let count = Arc::clone(count);
    Arc::new(move |_event: &IrqEvent| {
        count.fetch_add(1, Ordering::SeqCst);
        CallbackAction::Continue
    })
}

#[test]
fn test_interrupts_reach_callback_with_logical_number() {
    let (sims, driver) = digital_on_second_backend();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: IrqCallback = Arc::new(move |event: &IrqEvent| {
        sink.lock().push(*event);
        CallbackAction::Continue
    });
    driver.dispatch().irq_set_callback(1, 0, Some(callback), 0).unwrap();
    assert_eq!(driver.contexts()[1].listeners().count_for(0), 1);

    sims[1].raise_irq(0, 0, 0x5a);
    sims[1].raise_irq(0, 0, 0x5b);
    assert!(common::wait_until(PATIENCE, || seen.lock().len() == 2));

    let events = seen.lock().clone();
    assert!(events.iter().all(|e| e.device == 1 && e.subdevice == 0 && e.error.is_none()));
    assert_eq!(events[0].irq_count, 1);
    assert_eq!(events[1].irq_count, 2);
    assert_eq!(events[1].value, 0x5b);
}

#[test]
fn test_no_callback_after_destroy() {
    let (sims, driver) = digital_on_second_backend();
    let count = Arc::new(AtomicUsize::new(0));
    driver
        .dispatch()
        .irq_set_callback(1, 0, Some(counting(&count)), 0)
        .unwrap();

    sims[1].raise_irq(0, 0, 1);
    assert!(common::wait_until(PATIENCE, || count.load(Ordering::SeqCst) == 1));

    assert_eq!(driver.contexts()[1].listeners().destroy(0, -1), 1);
    assert!(driver.contexts()[1].listeners().is_empty());

    sims[1].raise_irq(0, 0, 2);
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_destroy_by_device_removes_only_matching_slots() {
    let (sims, driver) = common::multi_driver(vec![vec![SimBoard::digital(1), SimBoard::digital(2)]]);
    let dispatch = driver.dispatch();
    let slots = [(0, 0), (0, 1), (1, 0)];
    let seen = Arc::new(Mutex::new(Vec::new()));
    for (device, subdevice) in slots {
        dispatch
            .irq_start(device, subdevice, 0, ME_IRQ_SOURCE_DIO_DEFAULT, ME_IRQ_EDGE_NOT_USED, 0, 0)
            .unwrap();
        let sink = Arc::clone(&seen);
        let callback: IrqCallback = Arc::new(move |event: &IrqEvent| {
            sink.lock().push((event.device, event.subdevice));
            CallbackAction::Continue
        });
        dispatch.irq_set_callback(device, subdevice, Some(callback), 0).unwrap();
    }
    let listeners = driver.contexts()[0].listeners();
    assert_eq!(listeners.len(), 3);

    for (device, subdevice) in slots {
        sims[0].raise_irq(device, subdevice, 1);
    }
    assert!(common::wait_until(PATIENCE, || seen.lock().len() == 3));

    assert_eq!(listeners.destroy(0, -1), 2);
    assert_eq!(listeners.len(), 1);
    assert_eq!(listeners.count_for(0), 0);
    assert_eq!(listeners.count_for(1), 1);
    seen.lock().clear();

    for (device, subdevice) in slots {
        sims[0].raise_irq(device, subdevice, 2);
    }
    assert!(common::wait_until(PATIENCE, || !seen.lock().is_empty()));
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(*seen.lock(), vec![(1, 0)]);
}

#[test]
fn test_removing_callbacks_through_dispatch() {
    let (sims, driver) = digital_on_second_backend();
    let count = Arc::new(AtomicUsize::new(0));
    let dispatch = driver.dispatch();
    dispatch.irq_set_callback(1, 0, Some(counting(&count)), 0).unwrap();
    dispatch.irq_set_callback(1, 0, None, 0).unwrap();
    assert!(driver.contexts()[1].listeners().is_empty());

    sims[1].raise_irq(0, 0, 2);
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn test_callback_may_destroy_its_own_listener() {
    let (sims, driver) = digital_on_second_backend();
    let count = Arc::new(AtomicUsize::new(0));
    let context = Arc::clone(&driver.contexts()[1]);
    let hits = Arc::clone(&count);
    let callback: IrqCallback = Arc::new(move |_event: &IrqEvent| {
        hits.fetch_add(1, Ordering::SeqCst);
        context.listeners().destroy(0, 0);
        CallbackAction::Continue
    });
    driver.dispatch().irq_set_callback(1, 0, Some(callback), 0).unwrap();

    sims[1].raise_irq(0, 0, 1);
    assert!(common::wait_until(PATIENCE, || count.load(Ordering::SeqCst) == 1));
    assert!(driver.contexts()[1].listeners().is_empty());

    sims[1].raise_irq(0, 0, 2);
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_irq_callback_rejected_on_subdevice_without_interrupts() {
    let (_sims, driver) = digital_on_second_backend();
    let count = Arc::new(AtomicUsize::new(0));
    let err = driver
        .dispatch()
        .irq_set_callback(0, 0, Some(counting(&count)), 0)
        .unwrap_err();
    assert_eq!(err.code(), meids::ErrorCode::NotSupported);
    assert!(driver.contexts()[0].listeners().is_empty());
}

#[test]
fn test_stream_callbacks_follow_acquisition() {
    let (sims, driver) = common::multi_driver(vec![vec![SimBoard::multifunction(1)]]);
    let dispatch = driver.dispatch();
    let trigger = CompactTrigger {
        trigger_type: ME_TRIGGER_TYPE_SOFTWARE,
        conv_ticks: 1_000,
        ..CompactTrigger::default()
    };
    dispatch
        .stream_configure(0, 0, &[CompactConfigEntry { channel: 1, range: 0 }], &trigger, 0, 0)
        .unwrap();

    let started = Arc::new(AtomicUsize::new(0));
    let stopped = Arc::new(AtomicUsize::new(0));
    let values = Arc::new(AtomicI32::new(0));
    let on_count = |counter: &Arc<AtomicUsize>| -> StreamCallback {
        let counter = Arc::clone(counter);
        Arc::new(move |_event: &StreamEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
            CallbackAction::Continue
        })
    };
    let total = Arc::clone(&values);
    let callbacks = StreamCallbacks {
        start: Some(on_count(&started)),
        new_values: Some(Arc::new(move |event: &StreamEvent| {
            total.fetch_add(event.value, Ordering::SeqCst);
            CallbackAction::Continue
        })),
        end: Some(on_count(&stopped)),
    };
    dispatch.stream_set_callbacks(0, 0, callbacks, 0).unwrap();
    assert_eq!(driver.contexts()[0].listeners().len(), 3);

    let mut start = [StreamStartEntry {
        device: 0,
        subdevice: 0,
        start_mode: ME_START_MODE_NONBLOCKING,
        ..Default::default()
    }];
    dispatch.stream_start(&mut start, 0).unwrap();
    assert!(common::wait_until(PATIENCE, || started.load(Ordering::SeqCst) == 1));

    sims[0].push_values(0, 0, &[1, 2, 3]);
    assert!(common::wait_until(PATIENCE, || values.load(Ordering::SeqCst) == 3));

    let mut stop = [StreamStopEntry {
        device: 0,
        subdevice: 0,
        stop_mode: ME_STOP_MODE_IMMEDIATE,
        ..Default::default()
    }];
    dispatch.stream_stop(&mut stop, 0).unwrap();
    assert!(common::wait_until(PATIENCE, || stopped.load(Ordering::SeqCst) == 1));

    dispatch
        .stream_set_callbacks(0, 0, StreamCallbacks::default(), 0)
        .unwrap();
    assert!(driver.contexts()[0].listeners().is_empty());
}
