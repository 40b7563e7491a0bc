//! # LogWriter — renders runtime events as `tracing` records.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO  fleetvisor::events: status device="press-7" status=connecting
//! DEBUG fleetvisor::events: retry scheduled device="press-7" attempt=2 delay_ms=1000 reason="transient failure: busy"
//! WARN  fleetvisor::events: disconnected device="press-7" reason="no_network"
//! ERROR fleetvisor::events: credentials rejected device="press-7" reason="expired_token"
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let device = e.device.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::StatusChanged => {
                let status = e.status.map(|s| s.as_str()).unwrap_or("?");
                info!(target: "fleetvisor::events", device, status, "status");
            }
            EventKind::ConnectAttempt => {
                debug!(target: "fleetvisor::events", device, attempt = e.attempt, "connect attempt");
            }
            EventKind::Connected => {
                info!(target: "fleetvisor::events", device, attempt = e.attempt, "connected");
            }
            EventKind::RetryScheduled => {
                debug!(
                    target: "fleetvisor::events",
                    device, attempt = e.attempt, delay_ms = e.delay_ms, reason, "retry scheduled"
                );
            }
            EventKind::ConnectAborted => {
                error!(target: "fleetvisor::events", device, reason, "connect aborted");
            }
            EventKind::Disconnected => {
                warn!(target: "fleetvisor::events", device, reason, "disconnected");
            }
            EventKind::CredentialsRejected => {
                error!(target: "fleetvisor::events", device, reason, "credentials rejected");
            }
            EventKind::WorkerStarted => {
                debug!(target: "fleetvisor::events", device, generation = e.attempt, "worker started");
            }
            EventKind::WorkerExited => {
                debug!(target: "fleetvisor::events", device, generation = e.attempt, reason, "worker exited");
            }
            EventKind::MessageRequeued => {
                warn!(target: "fleetvisor::events", device, reason, "message requeued");
            }
            EventKind::MessageDropped => {
                error!(target: "fleetvisor::events", device, reason, "message dropped");
            }
            EventKind::DeviceActivated => {
                info!(target: "fleetvisor::events", device, "manager started");
            }
            EventKind::DeviceDeactivated => {
                info!(target: "fleetvisor::events", device, "manager stopped");
            }
            EventKind::ManagerExited => {
                info!(target: "fleetvisor::events", device, reason, "manager exited");
            }
            EventKind::ManagerDead => {
                error!(target: "fleetvisor::events", device, reason, "manager panicked");
            }
            EventKind::SubscriberOverflow => {
                warn!(target: "fleetvisor::events", subscriber = device, reason, "subscriber overflow");
            }
            EventKind::SubscriberPanicked => {
                error!(target: "fleetvisor::events", subscriber = device, reason, "subscriber panicked");
            }
            EventKind::ShutdownRequested => {
                info!(target: "fleetvisor::events", "shutdown requested");
            }
            EventKind::AllStoppedWithin => {
                info!(target: "fleetvisor::events", "all managers stopped within grace");
            }
            EventKind::GraceExceeded => {
                warn!(target: "fleetvisor::events", "grace exceeded");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
