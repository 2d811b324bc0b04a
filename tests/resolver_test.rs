//! Logical number resolution through the catalog scan and the shortcut table.

mod common;

use meids::catalog::PlugState;
use meids::dispatch::VirtualDispatcher;
use meids::resolver::Resolution;
use meids::sim::SimBoard;
use meids::{ErrorCode, MeError};

fn two_board_driver() -> meids::Driver {
    let (_sims, driver) = common::multi_driver(vec![vec![SimBoard::multifunction(1), SimBoard::digital(2)]]);
    driver
}

#[test]
fn test_out_of_range_numbers_are_invalid() {
    let driver = two_board_driver();
    let catalog = driver.catalog();
    let table = driver.shortcut();

    for number in [-1, 2, 100] {
        assert!(matches!(catalog.resolve(number), Resolution::Invalid(n) if n == number));
        assert!(matches!(table.resolve(number), Resolution::Invalid(n) if n == number));
        assert!(catalog.resolve(number).entry().is_dummy());
        assert_eq!(
            catalog.resolve(number).into_result().unwrap_err(),
            MeError::InvalidDevice(number)
        );
    }
}

#[test]
fn test_both_lookups_agree() {
    let driver = two_board_driver();
    let table = driver.shortcut();
    assert_eq!(table.len(), 2);

    for number in 0..2 {
        let scanned = driver.catalog().resolve(number).entry();
        let indexed = table.resolve(number).entry();
        assert!(std::ptr::eq(scanned, indexed));
        assert_eq!(scanned.logical_no, number);
    }
}

#[test]
fn test_unplugged_entry_is_reported_with_its_number() {
    let (sim, context) = common::local("pulled", vec![SimBoard::multifunction(1), SimBoard::digital(2)]);
    sim.unplug(1);
    let driver = meids::Driver::open_contexts(vec![context]).unwrap();

    let resolution = driver.catalog().resolve(1);
    assert!(matches!(resolution, Resolution::Unplugged(_)));
    assert_eq!(resolution.entry().plug, PlugState::Absent);
    assert_eq!(resolution.into_result().unwrap_err(), MeError::DeviceUnplugged(1));

    let table = driver.shortcut();
    assert!(matches!(table.resolve(1), Resolution::Unplugged(entry) if entry.serial_no == 2));

    // Forwarded calls fail, descriptive queries come from the catalog.
    let dispatch = driver.dispatch();
    assert_eq!(
        dispatch.query_number_subdevices(1).unwrap_err().code(),
        ErrorCode::DeviceUnplugged
    );
    assert_eq!(dispatch.query_device_name(1).unwrap(), "ME-1000");
    assert_eq!(driver.last_error(true), ErrorCode::DeviceUnplugged);
}

#[test]
fn test_dispatch_over_shortcut_table() {
    let driver = two_board_driver();
    let table = driver.shortcut();
    let dispatch = VirtualDispatcher::new(&table, driver.reporter());

    assert_eq!(dispatch.query_number_subdevices(0).unwrap(), 5);
    assert_eq!(dispatch.query_number_subdevices(1).unwrap(), 4);
    assert_eq!(
        dispatch.query_number_subdevices(2).unwrap_err(),
        MeError::InvalidDevice(2)
    );
}
