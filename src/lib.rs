//! # fleetvisor
//!
//! **Fleetvisor** keeps a fleet of simulated devices connected to a remote
//! endpoint. Every active device gets a supervised connection lifecycle:
//! register and open a session, retry transient failures, reopen after
//! unintentional disconnects, and keep a periodic worker running on the open
//! session. Status transitions are reported to a caller-supplied callback.
//!
//! The wire protocol is not part of this crate: it consumes a [`Provisioner`]
//! and [`ConnectionClient`] supplied by the embedding application.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │    Device    │   │    Device    │   │    Device    │
//!     │  (snapshot)  │   │  (snapshot)  │   │  (snapshot)  │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  DeviceControl (state-transition gate, startup reconciliation)    │
//! └──────────────────────────────┬────────────────────────────────────┘
//!                                ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Fleet (runtime)                                                  │
//! │  - Bus (broadcast events)                                         │
//! │  - SubscriberSet (fans out to user subscribers)                   │
//! │  - Registry (one DeviceManager per device id)                     │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!  │DeviceManager │   │DeviceManager │   │DeviceManager │ ──► StatusSink
//!  │(connect/retry│   │              │   │              │     (STARTING, CONNECTING,
//!  │ /reconnect)  │   │              │   │              │      CONNECTED, STOPPED)
//!  └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!         ▼                  ▼                  ▼
//!  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!  │ DeviceWorker │   │ DeviceWorker │   │ DeviceWorker │ ──► WorkCycle every interval
//!  └──────────────┘   └──────────────┘   └──────────────┘
//!
//!  Managers and workers publish Events ──► Bus ──► SubscriberSet ──► Subscribe::on_event
//! ```
//!
//! ### Lifecycle
//! ```text
//! activate(device) ──► Registry ──► DeviceManager::run()
//!
//! STARTING
//!   └─► CONNECTING ──► register + open
//!         ├─ Retryable  ─► sleep(retry delay), try again (until stopped)
//!         ├─ Fatal      ─► STARTING, manager exits (device may be restarted later)
//!         └─ Ok         ─► CONNECTED, spawn worker
//!                            ├─ disconnect      ─► retire worker, CONNECTING, reopen
//!                            ├─ worker exits    ─► new worker, same connection
//!                            ├─ bad credentials ─► manager exits, Fleet::run returns error
//!                            └─ stop            ─► close, STOPPED
//! ```
//!
//! ## Features
//! | Area              | Description                                                      | Key types / traits                          |
//! |-------------------|------------------------------------------------------------------|---------------------------------------------|
//! | **Runtime**       | Fleet-level supervision, OS signals, graceful shutdown.          | [`Fleet`], [`FleetBuilder`], [`Registry`]   |
//! | **Lifecycle**     | Per-device connect/retry/reconnect state machine.                | [`DeviceManager`], [`WorkCycle`]            |
//! | **Control**       | Gate external status requests, restore devices after restart.   | [`DeviceControl`], [`DeviceStore`]          |
//! | **Client seam**   | Contract for the transport and the registration step.            | [`ConnectionClient`], [`Provisioner`]       |
//! | **Subscriber API**| Hook into lifecycle events (logging, metrics, custom).           | [`Subscribe`], [`Event`]                    |
//! | **Policies**      | Retry delay between failed open attempts.                        | [`BackoffPolicy`], [`JitterPolicy`]         |
//! | **Errors**        | Typed, classified failures.                                      | [`ConnectError`], [`RuntimeError`]          |
//! | **Configuration** | Centralized runtime settings.                                    | [`FleetConfig`]                             |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] subscriber that renders events via `tracing`.
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use fleetvisor::{
//!     DeviceControl, Fleet, FleetConfig, MemoryStore, Provisioner, StoreStatusSink,
//! };
//!
//! async fn serve(provisioner: Arc<dyn Provisioner>) -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!
//!     let fleet = Fleet::builder(FleetConfig::default(), provisioner)
//!         .with_status_sink(Arc::new(StoreStatusSink::new(store.clone())))
//!         .build();
//!
//!     let control = DeviceControl::new(store, fleet.registry());
//!     control.reconcile().await;
//!
//!     fleet.run().await?;
//!     Ok(())
//! }
//! ```
mod client;
mod control;
mod core;
mod device;
mod error;
mod events;
mod policies;
mod status;
mod subscribers;

#[cfg(test)]
mod testing;

// ---- Public re-exports ----

pub use client::{
    ChangeReason, ClientRef, ConnectionClient, ConnectionStatus, Message, MessageAck,
    MessageHandler, MethodHandler, MethodRequest, MethodResponse, Provisioner, StatusChange,
    StatusHandler,
};
pub use control::{DeviceControl, DeviceStore, MemoryStore, StoreStatusSink};
pub use core::{
    DeviceManager, Fleet, FleetBuilder, FleetConfig, ManagerExit, Registry, StatusReport,
    WorkContext, WorkCycle,
};
pub use device::{Credentials, Device, DeviceKind, DeviceStatus, Environment};
pub use error::{ConnectError, ControlError, FailureClass, RuntimeError, SendError, WorkerError};
pub use events::{Event, EventKind};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use status::{NoopSink, StatusSink};
pub use subscribers::{Subscribe, SubscriberSet};

// Optional: expose a simple built-in logger subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
