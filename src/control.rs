//! # Control surface: maps external status requests onto the registry.
//!
//! [`DeviceControl`] is the state-transition gate. Only `STOPPED → STARTING`
//! activates a manager and only a transition into `STOPPED` deactivates one;
//! movement among `STARTING`, `CONNECTING` and `CONNECTED` belongs to the
//! manager alone and never touches the registry.
//!
//! ```text
//!            ┌──────────┐  start   ┌──────────┐         ┌────────────┐         ┌───────────┐
//!            │ STOPPED  │ ───────► │ STARTING │ ──────► │ CONNECTING │ ──────► │ CONNECTED │
//!            └──────────┘          └──────────┘ ◄────── └────────────┘ ◄────── └───────────┘
//!                 ▲   stop              │                                           │
//!                 └─────────────────────┴───────────────────────────────────────────┘
//! ```
//!
//! Persisted statuses live behind [`DeviceStore`]; [`StoreStatusSink`] writes
//! the manager's status callbacks back into it, and [`DeviceControl::reconcile`]
//! restarts devices that were active before the process last exited.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::core::{Registry, lock};
use crate::device::{Device, DeviceStatus};
use crate::error::ControlError;
use crate::status::StatusSink;

/// Persistence for device snapshots.
///
/// Implementations must be cheap and non-blocking: [`StoreStatusSink`] calls
/// [`DeviceStore::set_status`] from manager tasks and client callbacks.
pub trait DeviceStore: Send + Sync + 'static {
    /// Snapshot of one device.
    fn get(&self, id: &str) -> Option<Device>;

    /// Snapshots of every device, in no particular order.
    fn list(&self) -> Vec<Device>;

    /// Adds a new device; fails if the id is taken.
    fn insert(&self, device: Device) -> Result<(), ControlError>;

    /// Replaces an existing snapshot.
    fn save(&self, device: Device);

    /// Updates the status of a known device. Returns `false` for unknown ids.
    fn set_status(&self, id: &str, status: DeviceStatus) -> bool;
}

/// In-memory [`DeviceStore`].
#[derive(Default)]
pub struct MemoryStore {
    devices: Mutex<HashMap<String, Device>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceStore for MemoryStore {
    fn get(&self, id: &str) -> Option<Device> {
        lock(&self.devices).get(id).cloned()
    }

    fn list(&self) -> Vec<Device> {
        lock(&self.devices).values().cloned().collect()
    }

    fn insert(&self, device: Device) -> Result<(), ControlError> {
        let mut devices = lock(&self.devices);
        if devices.contains_key(&device.id) {
            return Err(ControlError::AlreadyExists { id: device.id });
        }
        devices.insert(device.id.clone(), device);
        Ok(())
    }

    fn save(&self, device: Device) {
        lock(&self.devices).insert(device.id.clone(), device);
    }

    fn set_status(&self, id: &str, status: DeviceStatus) -> bool {
        match lock(&self.devices).get_mut(id) {
            Some(device) => {
                device.status = status;
                true
            }
            None => false,
        }
    }
}

/// [`StatusSink`] that persists every status change into a [`DeviceStore`].
pub struct StoreStatusSink {
    store: Arc<dyn DeviceStore>,
}

impl StoreStatusSink {
    pub fn new(store: Arc<dyn DeviceStore>) -> Self {
        Self { store }
    }
}

impl StatusSink for StoreStatusSink {
    fn on_device_status_changed(&self, device_id: &str, status: DeviceStatus) {
        if self.store.set_status(device_id, status) {
            debug!(device = %device_id, %status, "status persisted");
        } else {
            warn!(device = %device_id, %status, "status change for unknown device ignored");
        }
    }
}

/// State-transition gate in front of the [`Registry`].
pub struct DeviceControl {
    store: Arc<dyn DeviceStore>,
    registry: Arc<Registry>,
}

impl DeviceControl {
    pub fn new(store: Arc<dyn DeviceStore>, registry: Arc<Registry>) -> Self {
        Self { store, registry }
    }

    /// Whether an externally requested status change is allowed.
    pub fn is_valid_transition(from: DeviceStatus, to: DeviceStatus) -> bool {
        use DeviceStatus::*;
        matches!(
            (from, to),
            (Stopped, Starting | Stopped)
                | (Starting, Connecting | Stopped | Starting)
                | (Connecting, Connected | Starting | Connecting)
                | (Connected, Connecting | Starting | Stopped)
        )
    }

    /// Registers a new device in the `STOPPED` state.
    pub fn create(&self, device: Device) -> Result<Device, ControlError> {
        let device = device.with_status(DeviceStatus::Stopped);
        self.store.insert(device.clone())?;
        info!(device = %device.id, kind = %device.kind, environment = %device.environment, "device created");
        Ok(device)
    }

    /// Current snapshot of one device.
    pub fn get(&self, id: &str) -> Result<Device, ControlError> {
        self.store
            .get(id)
            .ok_or_else(|| ControlError::NotFound { id: id.to_string() })
    }

    /// Snapshots of every device, sorted by id.
    pub fn list(&self) -> Vec<Device> {
        let mut devices = self.store.list();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    /// Applies a requested status change and drives the registry accordingly.
    pub async fn update_status(&self, id: &str, to: DeviceStatus) -> Result<Device, ControlError> {
        let mut device = self.get(id)?;
        let from = device.status;
        if !Self::is_valid_transition(from, to) {
            warn!(device = %id, %from, %to, "rejected status change");
            return Err(ControlError::InvalidTransition { from, to });
        }

        device.status = to;
        self.store.save(device.clone());
        info!(device = %id, %from, %to, "status updated");

        if from == DeviceStatus::Stopped && to == DeviceStatus::Starting {
            self.registry.activate(device.clone()).await;
        } else if to == DeviceStatus::Stopped && from != DeviceStatus::Stopped {
            self.registry.deactivate(id).await;
        }
        Ok(device)
    }

    /// Starts a stopped device; any other state is left alone.
    pub async fn start(&self, id: &str) -> Result<Device, ControlError> {
        let device = self.get(id)?;
        if device.status != DeviceStatus::Stopped {
            info!(device = %id, status = %device.status, "device already started; start ignored");
            return Ok(device);
        }
        self.update_status(id, DeviceStatus::Starting).await
    }

    /// Stops a running device from any state; a stopped device is left alone.
    pub async fn stop(&self, id: &str) -> Result<Device, ControlError> {
        let mut device = self.get(id)?;
        if device.status == DeviceStatus::Stopped {
            info!(device = %id, "device already stopped; stop ignored");
            return Ok(device);
        }
        let from = device.status;
        device.status = DeviceStatus::Stopped;
        self.store.save(device.clone());
        info!(device = %id, %from, "device stopping");

        self.registry.deactivate(id).await;
        Ok(device)
    }

    /// Restarts every device whose persisted status is not `STOPPED`.
    ///
    /// Run once at startup. Returns the number of managers started.
    pub async fn reconcile(&self) -> usize {
        let mut started = 0;
        for mut device in self.list() {
            if device.status == DeviceStatus::Stopped {
                continue;
            }
            info!(device = %device.id, previous = %device.status, "restoring device after restart");
            device.status = DeviceStatus::Starting;
            self.store.save(device.clone());
            if self.registry.activate(device).await {
                started += 1;
            }
        }
        started
    }

    /// True when a manager runs for `id`.
    pub async fn is_running(&self, id: &str) -> bool {
        self.registry.is_active(id).await
    }

    /// Device id → manager running, for every active manager.
    pub async fn manager_statuses(&self) -> BTreeMap<String, bool> {
        self.registry.status_snapshot().await
    }
}
