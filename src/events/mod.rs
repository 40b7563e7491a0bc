//! Runtime events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Registry`, `DeviceManager` (and its client status handler),
//!   `DeviceWorker`, `SubscriberSet` workers (overflow/panic), `Fleet` (shutdown).
//! - **Consumers**: `Fleet::subscriber_listener()` (fans out to `SubscriberSet`),
//!   anything calling `Fleet::subscribe()`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
