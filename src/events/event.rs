//! # Runtime events emitted by the fleet, registry, managers and workers.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Status events**: externally visible status transitions
//! - **Connection events**: open attempts, retries, disconnects
//! - **Worker events**: worker start/exit and message housekeeping
//! - **Runtime events**: registry membership, subscribers, shutdown
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use fleetvisor::{DeviceStatus, Event, EventKind};
//!
//! let ev = Event::new(EventKind::RetryScheduled)
//!     .with_device("press-7")
//!     .with_reason("transient failure: busy")
//!     .with_attempt(3)
//!     .with_delay(Duration::from_secs(1));
//!
//! assert_eq!(ev.kind, EventKind::RetryScheduled);
//! assert_eq!(ev.device.as_deref(), Some("press-7"));
//! assert_eq!(ev.delay_ms, Some(1000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::device::DeviceStatus;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets: `device` (subscriber name), `reason`.
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `device` (subscriber name), `reason`.
    SubscriberOverflow,

    // === Shutdown events ===
    /// Shutdown requested (OS signal or explicit call).
    ShutdownRequested,

    /// All managers stopped within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some managers did not stop in time.
    GraceExceeded,

    // === Status ===
    /// Status callback invoked.
    ///
    /// Sets: `device`, `status`.
    StatusChanged,

    // === Connection ===
    /// Registration / open attempt starting.
    ///
    /// Sets: `device`, `attempt` (1-based within one connect cycle).
    ConnectAttempt,

    /// Session open.
    ///
    /// Sets: `device`, `attempt`.
    Connected,

    /// Open attempt failed with a retryable error; retry scheduled.
    ///
    /// Sets: `device`, `attempt`, `delay_ms`, `reason`.
    RetryScheduled,

    /// Open sequence aborted (fatal or terminal failure).
    ///
    /// Sets: `device`, `attempt`, `reason`.
    ConnectAborted,

    /// Client reported an unintentional terminal disconnect.
    ///
    /// Sets: `device`, `reason`.
    Disconnected,

    /// Client reported that its credentials can never succeed.
    ///
    /// Sets: `device`, `reason`.
    CredentialsRejected,

    // === Worker ===
    /// Worker loop started.
    ///
    /// Sets: `device`, `attempt` (worker generation).
    WorkerStarted,

    /// Worker loop returned (any cause).
    ///
    /// Sets: `device`, `attempt` (worker generation), `reason` (failure only).
    WorkerExited,

    /// Failed send queued for resend.
    ///
    /// Sets: `device`, `reason`.
    MessageRequeued,

    /// Failed send dropped permanently.
    ///
    /// Sets: `device`, `reason`.
    MessageDropped,

    // === Registry ===
    /// Manager created and started.
    ///
    /// Sets: `device`.
    DeviceActivated,

    /// Manager stop requested and entry removed.
    ///
    /// Sets: `device`.
    DeviceDeactivated,

    /// Manager run loop returned and its entry was cleaned up.
    ///
    /// Sets: `device`, `reason` (exit label).
    ManagerExited,

    /// Manager task panicked.
    ///
    /// Sets: `device`, `reason`.
    ManagerDead,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Device id (or subscriber name for subscriber events).
    pub device: Option<Arc<str>>,
    /// New status, for [`EventKind::StatusChanged`].
    pub status: Option<DeviceStatus>,
    /// Attempt or generation counter (starting from 1).
    pub attempt: Option<u32>,
    /// Retry delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            device: None,
            status: None,
            attempt: None,
            delay_ms: None,
            reason: None,
        }
    }

    /// Attaches a device id.
    #[inline]
    pub fn with_device(mut self, device: impl Into<Arc<str>>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Attaches a status.
    #[inline]
    pub fn with_status(mut self, status: DeviceStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a retry delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_device(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_device(subscriber)
            .with_reason(info)
    }
}
