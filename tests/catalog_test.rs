//! Catalog numbering and merge behavior.

use std::collections::HashSet;
use std::sync::Arc;

use meids::catalog::{AccessKind, Catalog, DeviceEntry, PlugState, UNBOUND};
use meids::context::TransportContext;
use meids::MeError;

fn entry(serial_no: i32, logical_no: i32) -> DeviceEntry {
    DeviceEntry {
        context: Arc::new(TransportContext::dummy()),
        access: AccessKind::Network {
            host: format!("host-{serial_no}"),
        },
        logical_no,
        physical_no: 0,
        plug: PlugState::Present,
        vendor_id: 0x1402,
        device_id: 0x4680,
        serial_no,
        name: "ME-4680".into(),
        description: "Multi-IO board".into(),
        subdevices: Vec::new(),
    }
}

fn catalog(entries: &[DeviceEntry]) -> Catalog {
    let mut catalog = Catalog::new();
    for entry in entries {
        catalog.append(entry).expect("append failed");
    }
    catalog
}

fn numbers(catalog: &Catalog) -> Vec<i32> {
    catalog.devices().iter().map(|d| d.logical_no).collect()
}

#[test]
fn test_join_then_enumerate_gives_unique_numbers() {
    let a = catalog(&[entry(1, 4), entry(2, 7)]);
    let b = catalog(&[entry(3, 4), entry(4, UNBOUND)]);

    let mut joined = Catalog::join(&a, &b).unwrap();
    assert_eq!(joined.len(), 4);
    let serials: Vec<i32> = joined.devices().iter().map(|d| d.serial_no).collect();
    assert_eq!(serials, vec![1, 2, 3, 4]);

    joined.enumerate(0);
    assert_eq!(numbers(&joined), vec![0, 1, 2, 3]);
    let unique: HashSet<i32> = numbers(&joined).into_iter().collect();
    assert_eq!(unique.len(), joined.len());
    assert_eq!(joined.max_number(), 3);

    // Inputs are untouched by the join.
    assert_eq!(numbers(&a), vec![4, 7]);
    assert_eq!(numbers(&b), vec![4, UNBOUND]);
}

#[test]
fn test_verify_detects_duplicates() {
    let mut merged = catalog(&[entry(1, 2), entry(2, 5), entry(3, 2)]);
    assert_eq!(merged.verify().unwrap_err(), MeError::DuplicateLogicalNumber(2));

    let mut clean = catalog(&[entry(1, 2), entry(2, UNBOUND), entry(3, UNBOUND)]);
    clean.verify().unwrap();
    assert!(clean.devices().iter().all(|d| d.plug == PlugState::Blocked));
}

#[test]
fn test_continue_enumerate_fills_lowest_gaps() {
    let mut merged = catalog(&[entry(1, 0), entry(2, UNBOUND), entry(3, 2), entry(4, UNBOUND), entry(5, UNBOUND)]);
    merged.continue_enumerate(0);
    assert_eq!(numbers(&merged), vec![0, 1, 2, 3, 4]);

    // Already bound entries keep their numbers on a second pass.
    merged.continue_enumerate(0);
    assert_eq!(numbers(&merged), vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_continue_enumerate_respects_start() {
    let mut merged = catalog(&[entry(1, 12), entry(2, UNBOUND), entry(3, UNBOUND)]);
    merged.continue_enumerate(10);
    assert_eq!(numbers(&merged), vec![12, 10, 11]);
}

#[test]
fn test_denumerate_and_clean() {
    let mut merged = catalog(&[entry(1, 0), entry(2, 1)]);
    merged.denumerate();
    assert_eq!(numbers(&merged), vec![UNBOUND, UNBOUND]);
    assert_eq!(merged.max_number(), UNBOUND);

    merged.clean();
    assert!(merged.is_empty());
    merged.clean();
    assert!(merged.is_empty());
    assert_eq!(merged.max_number(), UNBOUND);
}

#[test]
fn test_duplicate_is_deep() {
    let original = catalog(&[entry(1, 0)]);
    let mut copy = original.duplicate().unwrap();
    copy.devices_mut()[0].name.push_str("-copy");
    copy.devices_mut()[0].logical_no = 9;

    assert_eq!(original.devices()[0].name, "ME-4680");
    assert_eq!(original.devices()[0].logical_no, 0);
    assert!(Arc::ptr_eq(&original.devices()[0].context, &copy.devices()[0].context));
}

#[test]
fn test_shortcut_agrees_with_scan_on_repeated_numbers() {
    let unverified = catalog(&[entry(1, 0), entry(2, 1), entry(3, 1), entry(4, 0)]);
    let table = unverified.shortcut();
    assert_eq!(table.len(), 2);

    for number in 0..2 {
        let scanned = unverified.resolve(number).entry();
        let indexed = table.resolve(number).entry();
        assert!(std::ptr::eq(scanned, indexed));
    }
    assert_eq!(table.resolve(0).entry().serial_no, 1);
    assert_eq!(table.resolve(1).entry().serial_no, 2);
}
