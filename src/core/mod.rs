//! Runtime core: device lifecycle, supervision and shutdown.
//!
//! Public API from this module: [`Fleet`] (process-level runtime), [`FleetBuilder`],
//! [`Registry`], [`DeviceManager`], [`FleetConfig`] and the worker's [`WorkCycle`] seam.
//!
//! Internal modules:
//! - [`manager`]: per-device state machine (connect, retry, reconnect, worker restarts);
//! - [`worker`]: periodic work on one open connection, protocol callbacks;
//! - [`registry`]: one manager per device id, self-cleanup, bulk shutdown;
//! - [`fleet`]: event fan-out, OS signals, grace-bounded shutdown;
//! - [`shutdown`]: cross-platform shutdown signal handling.

mod builder;
mod config;
mod fleet;
mod manager;
mod registry;
mod shutdown;
mod worker;

use std::any::Any;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub use builder::FleetBuilder;
pub use config::FleetConfig;
pub use fleet::Fleet;
pub use manager::{DeviceManager, ManagerExit};
#[cfg(test)]
pub(crate) use manager::ManagerParams;
#[cfg(test)]
pub(crate) use registry::REJECTIONS_CAPACITY;
pub use registry::Registry;
pub use worker::{StatusReport, WorkContext, WorkCycle};

/// Locks a std mutex, recovering the data if a holder panicked.
///
/// Critical sections in this crate never leave data half-updated.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
