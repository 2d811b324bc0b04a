//! Driver-wide locking across several backends.

mod common;

use meids::context::{LockFlags, LockOp};
use meids::sim::{LockScope, SimBoard};
use meids::ErrorCode;

fn three_backends() -> (Vec<std::sync::Arc<meids::sim::SimulatedDriver>>, meids::Driver) {
    common::multi_driver(vec![
        vec![SimBoard::multifunction(1)],
        vec![SimBoard::digital(2)],
        vec![SimBoard::digital(3)],
    ])
}

#[test]
fn test_lock_set_reaches_every_backend() {
    let (sims, driver) = three_backends();
    driver.lock_driver(LockOp::Set, LockFlags::empty()).unwrap();
    assert!(sims.iter().all(|sim| sim.holds_lock(LockScope::Driver)));

    driver.lock_driver(LockOp::Release, LockFlags::empty()).unwrap();
    assert!(sims.iter().all(|sim| !sim.holds_lock(LockScope::Driver)));
}

#[test]
fn test_failed_set_releases_earlier_backends() {
    for failing in 0..3 {
        let (sims, driver) = three_backends();
        sims[failing].inject_lock_conflict_on_set();

        let err = driver.lock_driver(LockOp::Set, LockFlags::empty()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Locked);
        for (index, sim) in sims.iter().enumerate() {
            assert!(
                !sim.holds_lock(LockScope::Driver),
                "backend {index} still locked after failure at {failing}"
            );
        }
        assert_eq!(driver.last_error(true), ErrorCode::Locked);
    }
}

#[test]
fn test_foreign_lock_fails_check_before_any_set() {
    let (sims, driver) = three_backends();
    sims[2].foreign_lock(LockScope::Device(0));

    let err = driver.lock_driver(LockOp::Set, LockFlags::empty()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Locked);
    assert!(!sims[0].holds_lock(LockScope::Driver));
    assert!(!sims[1].holds_lock(LockScope::Driver));

    assert_eq!(
        driver.lock_driver(LockOp::Check, LockFlags::empty()).unwrap_err().code(),
        ErrorCode::Locked
    );
}

#[test]
fn test_force_skips_the_check() {
    let (sims, driver) = three_backends();
    sims[1].foreign_lock(LockScope::Device(0));

    driver.lock_driver(LockOp::Set, LockFlags::FORCE).unwrap();
    assert!(sims.iter().all(|sim| sim.holds_lock(LockScope::Driver)));
}
