//! # Device registry: one manager per active device.
//!
//! The registry owns every [`DeviceManager`] together with the task running it.
//! Managers never hold a strong reference back to the registry; the spawned task
//! holds a `Weak<Registry>` used only to remove its own entry on exit.
//!
//! ## Architecture
//! ```text
//! activate(device)    → new DeviceManager → spawn run() → insert Handle
//!                          └─ on exit: remove own entry (instance match),
//!                                      publish ManagerExited / ManagerDead,
//!                                      forward credential rejections
//! deactivate(id)      → remove Handle → manager.stop() (join not awaited)
//! shutdown(grace)     → drain map → stop all → join all within grace
//! ```
//!
//! ## Rules
//! - At most one manager per device id; `activate` on a known id is a no-op.
//! - An exiting manager only removes the entry it was inserted under, so a
//!   quick deactivate/activate pair never loses the new manager.
//! - `deactivate` of an unknown id is a no-op.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::{ChangeReason, Provisioner};
use crate::core::manager::{DeviceManager, ManagerExit, ManagerParams};
use crate::core::panic_message;
use crate::core::worker::WorkCycle;
use crate::device::Device;
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::status::SinkRef;

/// A device whose credentials were rejected, with the reason reported by its client.
pub(crate) type Rejection = (String, ChangeReason);

/// Rejections buffered until [`Fleet::run`](crate::Fleet::run) picks them up;
/// later ones are dropped with a warning.
pub(crate) const REJECTIONS_CAPACITY: usize = 16;

/// Handle to a running manager.
struct Handle {
    /// Distinguishes successive managers of the same device id.
    instance: u64,
    manager: Arc<DeviceManager>,
    join: JoinHandle<()>,
}

/// Registry of active device managers, keyed by device id.
pub struct Registry {
    managers: RwLock<HashMap<String, Handle>>,
    bus: Bus,
    params: ManagerParams,
    provisioner: Arc<dyn Provisioner>,
    sink: SinkRef,
    cycle: Arc<dyn WorkCycle>,
    next_instance: AtomicU64,
    rejections: mpsc::Sender<Rejection>,
}

impl Registry {
    pub(crate) fn new(
        bus: Bus,
        params: ManagerParams,
        provisioner: Arc<dyn Provisioner>,
        sink: SinkRef,
        cycle: Arc<dyn WorkCycle>,
        rejections: mpsc::Sender<Rejection>,
    ) -> Arc<Self> {
        Arc::new(Self {
            managers: RwLock::new(HashMap::new()),
            bus,
            params,
            provisioner,
            sink,
            cycle,
            next_instance: AtomicU64::new(0),
            rejections,
        })
    }

    /// Starts a manager for `device` unless one already exists.
    ///
    /// Returns `true` when a new manager was started.
    pub async fn activate(self: &Arc<Self>, device: Device) -> bool {
        let id = device.id.clone();

        let mut managers = self.managers.write().await;
        if managers.contains_key(&id) {
            debug!(device = %id, "manager already running; activate ignored");
            return false;
        }

        let manager = DeviceManager::new(
            device,
            self.params.clone(),
            self.provisioner.clone(),
            self.sink.clone(),
            self.cycle.clone(),
            self.bus.clone(),
        );
        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed) + 1;
        let join = tokio::spawn(supervise(Arc::downgrade(self), manager.clone(), instance));
        managers.insert(
            id.clone(),
            Handle {
                instance,
                manager,
                join,
            },
        );
        drop(managers);

        info!(device = %id, "device manager created and started");
        self.bus
            .publish(Event::new(EventKind::DeviceActivated).with_device(id.as_str()));
        true
    }

    /// Stops and forgets the manager for `id`; unknown ids are ignored.
    ///
    /// Returns `true` when a manager was found. The manager's task is not awaited.
    pub async fn deactivate(&self, id: &str) -> bool {
        let handle = self.managers.write().await.remove(id);
        let Some(handle) = handle else {
            debug!(device = %id, "no manager running; deactivate ignored");
            return false;
        };

        handle.manager.stop().await;
        info!(device = %id, "device manager stopped and removed");
        self.bus
            .publish(Event::new(EventKind::DeviceDeactivated).with_device(id));
        true
    }

    /// True when a manager exists for `id`.
    pub async fn is_active(&self, id: &str) -> bool {
        self.managers.read().await.contains_key(id)
    }

    /// Device id → "manager present and not stopping", sorted by id.
    pub async fn status_snapshot(&self) -> BTreeMap<String, bool> {
        self.managers
            .read()
            .await
            .iter()
            .map(|(id, h)| (id.clone(), !h.manager.is_stopping()))
            .collect()
    }

    /// Returns sorted list of active device ids.
    pub async fn list(&self) -> Vec<String> {
        let managers = self.managers.read().await;
        let mut ids: Vec<String> = managers.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Returns true if no manager is registered.
    pub async fn is_empty(&self) -> bool {
        self.managers.read().await.is_empty()
    }

    /// Stops every manager, clears the map, and waits up to `grace` for their tasks.
    ///
    /// Returns [`RuntimeError::GraceExceeded`] with the ids still running after `grace`.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), RuntimeError> {
        let handles: Vec<(String, Handle)> = {
            let mut managers = self.managers.write().await;
            managers.drain().collect()
        };
        if handles.is_empty() {
            return Ok(());
        }
        info!(count = handles.len(), "stopping all device managers");

        for (_, h) in &handles {
            h.manager.stop().await;
        }

        let deadline = tokio::time::Instant::now() + grace;
        let mut stuck = Vec::new();
        for (id, h) in handles {
            match tokio::time::timeout_at(deadline, h.join).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(device = %id, error = %e, "manager task aborted"),
                Err(_) => stuck.push(id),
            }
        }

        if stuck.is_empty() {
            Ok(())
        } else {
            stuck.sort_unstable();
            warn!(?stuck, ?grace, "managers still running after grace");
            Err(RuntimeError::GraceExceeded { grace, stuck })
        }
    }

    async fn on_manager_exit(&self, id: &str, instance: u64, outcome: Result<ManagerExit, String>) {
        {
            let mut managers = self.managers.write().await;
            if managers.get(id).is_some_and(|h| h.instance == instance) {
                managers.remove(id);
            }
        }

        match outcome {
            Ok(exit) => {
                debug!(device = %id, exit = exit.as_label(), "manager exited; entry cleaned up");
                self.bus.publish(
                    Event::new(EventKind::ManagerExited)
                        .with_device(id)
                        .with_reason(exit.as_label()),
                );
                if let ManagerExit::CredentialsRejected(reason) = exit {
                    if let Err(mpsc::error::TrySendError::Full(_)) =
                        self.rejections.try_send((id.to_string(), reason))
                    {
                        warn!(device = %id, %reason, "rejection queue full; rejection dropped");
                    }
                }
            }
            Err(info) => {
                error!(device = %id, panic = %info, "manager panicked");
                self.bus.publish(
                    Event::new(EventKind::ManagerDead)
                        .with_device(id)
                        .with_reason(info),
                );
            }
        }
    }
}

/// Runs one manager and cleans up its registry entry, whatever the exit cause.
async fn supervise(registry: Weak<Registry>, manager: Arc<DeviceManager>, instance: u64) {
    let outcome = std::panic::AssertUnwindSafe(manager.clone().run())
        .catch_unwind()
        .await
        .map_err(|panic| panic_message(&*panic));

    if outcome.is_err() {
        // Uncategorised failure: treated as a device-level abort.
        manager.stop().await;
    }
    if let Some(registry) = registry.upgrade() {
        registry
            .on_manager_exit(manager.id(), instance, outcome)
            .await;
    }
}
