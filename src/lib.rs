//! # meids
//!
//! Hardware-abstraction runtime for ME data-acquisition boards. Applications
//! address a board by a stable logical number; the runtime resolves it to a
//! locally attached board (reached through a control channel) or to a board
//! exported by a remote board server, and forwards every operation through
//! one call surface.
//!
//! ## Crate Structure
//!
//! - **`catalog`**: the tree of discovered device, subdevice and range entries
//!   with append/join/enumerate/verify operations.
//! - **`resolver`**: logical number to catalog entry, plus the dense
//!   shortcut table.
//! - **`context`**: one open backend (`Local`, `Remote` or `Dummy`) and the
//!   [`context::DriverCalls`] operation set every backend implements.
//! - **`dispatch`**: the virtual dispatcher that resolves logical numbers and
//!   forwards calls, splitting list operations by backend.
//! - **`trigger`**: translation between the per-phase and the compact stream
//!   trigger descriptions.
//! - **`notify`**: background listener threads delivering interrupt and
//!   stream callbacks.
//! - **`driver`**: the [`driver::Driver`] handle tying catalog, contexts and
//!   error reporting together.
//! - **`discovery`**: builds catalog entries from a backend's metadata.
//! - **`control`**: the kernel control-channel boundary.
//! - **`sim`**: an in-process simulated control channel.
//! - **`rpc`**: the remote-procedure protocol, client and tokio server.
//! - **`config`** / **`logging`**: Figment configuration and tracing setup.
//! - **`error`**: [`error::MeError`], integer error codes and the error reporter.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use meids::driver::Driver;
//! use meids::sim::{SimBoard, SimulatedDriver};
//!
//! let driver = Driver::open_local(Arc::new(SimulatedDriver::new(vec![SimBoard::multifunction(1)])))?;
//! let dispatch = driver.dispatch();
//! println!("{} has {} subdevices", dispatch.query_device_name(0)?, dispatch.query_number_subdevices(0)?);
//! # Ok::<(), meids::error::MeError>(())
//! ```

pub mod catalog;
pub mod config;
pub mod context;
pub mod control;
pub mod defs;
pub mod discovery;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod logging;
pub mod notify;
pub mod resolver;
pub mod rpc;
pub mod sim;
pub mod trigger;
pub mod types;

pub use driver::Driver;
pub use error::{ErrorCode, MeError, Result};
