//! # DeviceWorker: periodic task runner for one open connection.
//!
//! A worker is spawned by its [`DeviceManager`](super::manager::DeviceManager)
//! after every successful open (or on worker restart) and runs the device's
//! application logic every `worker_interval` until its token is cancelled or a
//! cycle fails.
//!
//! ```text
//! run(token, notifier)
//!   ├─► publish WorkerStarted, cycle.on_start()
//!   ├─► loop {
//!   │     cycle.run_cycle(ctx)?     (status logging, telemetry hooks)
//!   │     flush resend queue        (queued-message housekeeping)
//!   │     sleep(interval) | token.cancelled() → break
//!   │   }
//!   ├─► panic / error caught at this boundary
//!   ├─► cleanup: clear resend queue, cycle.on_exit()
//!   ├─► publish WorkerExited
//!   └─► notifier.worker_finished()   (exactly once, any exit cause)
//! ```
//!
//! ## Rules
//! - The worker never decides whether it is restarted; the manager does.
//! - Protocol callbacks are served by [`Inbox`], which does not own the client,
//!   so `client → handler → client` never forms an `Arc` cycle.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{
    ClientRef, Message, MessageAck, MessageHandler, MethodHandler, MethodRequest, MethodResponse,
};
use crate::core::manager::Notifier;
use crate::core::{lock, panic_message};
use crate::device::Device;
use crate::error::{SendError, WorkerError};
use crate::events::{Bus, Event, EventKind};

/// View handed to a [`WorkCycle`] on each tick.
pub struct WorkContext<'a> {
    pub device: &'a Device,
    pub client: &'a ClientRef,
    /// 1-based count of cycles run by this worker.
    pub cycle: u64,
    /// Worker generation within its manager (1-based).
    pub generation: u32,
    /// Messages currently waiting for resend.
    pub pending_resend: usize,
}

/// # Application logic run by a worker on every tick.
///
/// Returning an error (or panicking) ends the worker; the manager then spawns a
/// replacement on the same connection.
#[async_trait]
pub trait WorkCycle: Send + Sync + 'static {
    /// Called once when a worker starts, before the first cycle.
    fn on_start(&self, _device: &Device, _generation: u32) {}

    /// One iteration of work.
    async fn run_cycle(&self, ctx: &WorkContext<'_>) -> Result<(), WorkerError>;

    /// Called once when a worker exits, whatever the cause.
    fn on_exit(&self, _device: &Device, _generation: u32) {}
}

/// Default cycle: logs the device's state and its pending resend queue.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusReport;

#[async_trait]
impl WorkCycle for StatusReport {
    async fn run_cycle(&self, ctx: &WorkContext<'_>) -> Result<(), WorkerError> {
        info!(
            device = %ctx.device.id,
            kind = %ctx.device.kind,
            environment = %ctx.device.environment,
            generation = ctx.generation,
            cycle = ctx.cycle,
            connection = ?ctx.client.status(),
            "work cycle"
        );
        if ctx.pending_resend > 0 {
            info!(device = %ctx.device.id, pending = ctx.pending_resend, "messages waiting for resend");
        }
        Ok(())
    }
}

/// Protocol callbacks of one worker.
///
/// Shares the resend queue with its worker; holds no client reference.
pub(crate) struct Inbox {
    device: Arc<str>,
    resend: Mutex<VecDeque<Message>>,
    bus: Bus,
}

impl Inbox {
    fn new(device: &str, bus: Bus) -> Self {
        Self {
            device: Arc::from(device),
            resend: Mutex::new(VecDeque::new()),
            bus,
        }
    }

    fn pending(&self) -> usize {
        lock(&self.resend).len()
    }

    fn drain(&self) -> Vec<Message> {
        lock(&self.resend).drain(..).collect()
    }
}

impl MessageHandler for Inbox {
    fn on_message(&self, message: &Message) -> MessageAck {
        debug!(device = %self.device, correlation_id = %message.correlation_id, "inbound message");
        MessageAck::Complete
    }

    fn on_message_sent(&self, message: Message, result: Result<(), SendError>) {
        match result {
            Ok(()) => {
                debug!(device = %self.device, correlation_id = %message.correlation_id, "message sent");
            }
            Err(e) if e.retryable => {
                warn!(
                    device = %self.device,
                    correlation_id = %message.correlation_id,
                    code = %e.code,
                    "send failed with retryable error; requeueing"
                );
                self.bus.publish(
                    Event::new(EventKind::MessageRequeued)
                        .with_device(self.device.clone())
                        .with_reason(format!("{}: {}", message.correlation_id, e.code)),
                );
                lock(&self.resend).push_back(message);
            }
            Err(e) => {
                error!(
                    device = %self.device,
                    correlation_id = %message.correlation_id,
                    code = %e.code,
                    "send failed with non-retryable error; discarding"
                );
                self.bus.publish(
                    Event::new(EventKind::MessageDropped)
                        .with_device(self.device.clone())
                        .with_reason(format!("{}: {}", message.correlation_id, e.code)),
                );
            }
        }
    }
}

impl MethodHandler for Inbox {
    fn on_method(&self, request: &MethodRequest) -> MethodResponse {
        debug!(device = %self.device, method = %request.name, "method invoked");
        MethodResponse::ok()
    }
}

/// Runs one device's periodic work on one connection.
pub(crate) struct DeviceWorker {
    device: Device,
    client: ClientRef,
    cycle: Arc<dyn WorkCycle>,
    interval: Duration,
    generation: u32,
    inbox: Arc<Inbox>,
    bus: Bus,
}

impl DeviceWorker {
    /// Creates the worker and installs its callbacks on the client.
    pub(crate) fn new(
        device: Device,
        client: ClientRef,
        cycle: Arc<dyn WorkCycle>,
        interval: Duration,
        generation: u32,
        bus: Bus,
    ) -> Self {
        let inbox = Arc::new(Inbox::new(&device.id, bus.clone()));
        client.set_message_handler(inbox.clone());
        client.subscribe_to_methods(inbox.clone());
        Self {
            device,
            client,
            cycle,
            interval,
            generation,
            inbox,
            bus,
        }
    }

    /// Runs until cancelled or failed, then notifies the manager exactly once.
    pub(crate) async fn run(self, token: CancellationToken, notifier: Notifier) {
        info!(device = %self.device.id, generation = self.generation, "worker started");
        self.bus.publish(
            Event::new(EventKind::WorkerStarted)
                .with_device(self.device.id.as_str())
                .with_attempt(self.generation),
        );

        let outcome = std::panic::AssertUnwindSafe(self.work_loop(&token))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(WorkerError::Panicked {
                    info: panic_message(&*panic),
                })
            });

        let mut exited = Event::new(EventKind::WorkerExited)
            .with_device(self.device.id.as_str())
            .with_attempt(self.generation);
        match &outcome {
            Ok(()) => info!(device = %self.device.id, generation = self.generation, "worker stopping"),
            Err(e) => {
                error!(device = %self.device.id, generation = self.generation, error = %e, "worker failed");
                exited = exited.with_reason(e.to_string());
            }
        }

        self.cleanup();
        self.bus.publish(exited);
        notifier.worker_finished();
    }

    async fn work_loop(&self, token: &CancellationToken) -> Result<(), WorkerError> {
        self.cycle.on_start(&self.device, self.generation);
        let mut cycle: u64 = 0;

        while !token.is_cancelled() {
            cycle += 1;
            let ctx = WorkContext {
                device: &self.device,
                client: &self.client,
                cycle,
                generation: self.generation,
                pending_resend: self.inbox.pending(),
            };
            self.cycle.run_cycle(&ctx).await?;
            self.flush_resend();

            let sleep = time::sleep(self.interval);
            tokio::pin!(sleep);
            tokio::select! {
                _ = &mut sleep => {}
                _ = token.cancelled() => break,
            }
        }
        Ok(())
    }

    /// Hands queued messages back to the client; failures re-enter via the inbox.
    fn flush_resend(&self) {
        let queued = self.inbox.drain();
        if queued.is_empty() {
            return;
        }
        debug!(device = %self.device.id, count = queued.len(), "resending queued messages");
        for message in queued {
            self.client.send(message);
        }
    }

    fn cleanup(&self) {
        let dropped = self.inbox.drain().len();
        if dropped > 0 {
            debug!(device = %self.device.id, dropped, "discarded unsent messages");
        }
        self.cycle.on_exit(&self.device, self.generation);
        info!(device = %self.device.id, generation = self.generation, "worker ended and cleaned up");
    }
}
