//! # Status callback.
//!
//! A manager reports every externally visible transition through a
//! [`StatusSink`]. The collaborator behind it persists the value; it must log
//! and return rather than block, since it is called from manager tasks and
//! from client callback threads.
//!
//! Any `Fn(&str, DeviceStatus) + Send + Sync` is a sink:
//! ```rust
//! use std::sync::Arc;
//! use fleetvisor::{DeviceStatus, StatusSink};
//!
//! let sink: Arc<dyn StatusSink> = Arc::new(|id: &str, status: DeviceStatus| {
//!     println!("{id} -> {status}");
//! });
//! sink.on_device_status_changed("press-7", DeviceStatus::Starting);
//! ```

use std::sync::Arc;

use crate::device::DeviceStatus;

/// Receives status transitions (`onDeviceStatusChanged`).
pub trait StatusSink: Send + Sync + 'static {
    fn on_device_status_changed(&self, device_id: &str, status: DeviceStatus);
}

impl<F> StatusSink for F
where
    F: Fn(&str, DeviceStatus) + Send + Sync + 'static,
{
    fn on_device_status_changed(&self, device_id: &str, status: DeviceStatus) {
        self(device_id, status)
    }
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl StatusSink for NoopSink {
    fn on_device_status_changed(&self, _device_id: &str, _status: DeviceStatus) {}
}

/// Shared sink handle.
pub type SinkRef = Arc<dyn StatusSink>;
