//! Inert backend behind the dummy catalog entry.

use crate::error::{ErrorCode, MeError};
use crate::notify::ListenerSet;

use super::DriverCalls;

/// Context of the "no such device" sentinel; every call fails with
/// `InvalidDevice`.
#[derive(Default)]
pub struct DummyContext {
    pub(crate) listeners: ListenerSet,
}

impl DummyContext {
    /// New dummy context with an empty listener set.
    pub fn new() -> Self {
        Self::default()
    }
}

impl DriverCalls for DummyContext {
    fn fallback(&self) -> MeError {
        ErrorCode::InvalidDevice.into()
    }
}
