//! # Event subscriber trait.
//!
//! Each subscriber gets a dedicated worker task fed by a bounded queue
//! (capacity via [`Subscribe::queue_capacity`]). Panics inside `on_event` are
//! caught and reported as `EventKind::SubscriberPanicked`.
//!
//! ## Overflow behavior
//! The new event is dropped for this subscriber only and the runtime publishes
//! `EventKind::SubscriberOverflow`. Other subscribers are unaffected.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use fleetvisor::{DeviceStatus, Event, EventKind, Subscribe};
//!
//! struct ConnectedCounter(std::sync::atomic::AtomicUsize);
//!
//! #[async_trait]
//! impl Subscribe for ConnectedCounter {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::StatusChanged && ev.status == Some(DeviceStatus::Connected) {
//!             self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "connected-counter" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Event subscriber for runtime observability.
///
/// ### Implementation requirements
/// - Use async I/O; avoid blocking the executor.
/// - Handle errors internally; do not panic.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Processes a single event. Called from the subscriber's own worker task, FIFO.
    async fn on_event(&self, event: &Event);

    /// Name used in overflow/panic events.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred queue capacity (clamped to at least 1). Default: 1024.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
