//! Shared helpers for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use meids::context::{LocalContext, TransportContext};
use meids::sim::{SimBoard, SimulatedDriver};
use meids::trigger::ConvClassMapping;
use meids::Driver;

/// A simulated backend and the local context wrapping it.
pub fn local(label: &str, boards: Vec<SimBoard>) -> (Arc<SimulatedDriver>, Arc<TransportContext>) {
    let sim = Arc::new(SimulatedDriver::with_label(label, boards));
    let context = Arc::new(TransportContext::Local(LocalContext::new(
        sim.clone(),
        ConvClassMapping::Straight,
    )));
    (sim, context)
}

/// A driver over several simulated backends, one context each.
pub fn multi_driver(backends: Vec<Vec<SimBoard>>) -> (Vec<Arc<SimulatedDriver>>, Driver) {
    let (sims, contexts): (Vec<_>, Vec<_>) = backends
        .into_iter()
        .enumerate()
        .map(|(index, boards)| local(&format!("sim{index}"), boards))
        .unzip();
    let driver = Driver::open_contexts(contexts).expect("Failed to open driver");
    (sims, driver)
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
