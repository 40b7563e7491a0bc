//! # DeviceManager: one device's connection lifecycle.
//!
//! Keeps exactly one session per device open, reopens it after unintentional
//! disconnects, restarts the device's worker when it dies, and reports every
//! externally visible transition to the [`StatusSink`](crate::StatusSink).
//!
//! ## Wake-ups
//! Everything that can wake the run loop travels through one single-consumer
//! channel as a tagged [`Signal`]; stop travels through a [`CancellationToken`].
//! Signals carry the connection number or worker generation they belong to, and
//! the loop drops stale ones instead of reasoning about missed notifications.
//!
//! ```text
//! run()
//!   ├─► report STARTING
//!   ├─► loop {
//!   │     ├─► connect_with_retry()          (skipped when restarting a worker
//!   │     │     ├─► report CONNECTING        on a connection that is still open)
//!   │     │     ├─► register → fresh client, install status handler
//!   │     │     ├─► close + open
//!   │     │     │     ├─ Ok         → report CONNECTED
//!   │     │     │     ├─ Fatal      → report STARTING, exit
//!   │     │     │     ├─ Terminal   → report STARTING, exit
//!   │     │     │     └─ Retryable  → sleep(retry.next(n)) | stop → exit
//!   │     ├─► spawn worker (generation g)
//!   │     ├─► wait: Disconnected(c)        → retire worker, reconnect
//!   │     │         WorkerFinished(g)      → restart worker, reuse connection
//!   │     │         CredentialsRejected(c) → exit
//!   │     │         stop                   → exit
//!   │   }
//!   └─► retire worker, close client, report STOPPED (once)
//! ```
//!
//! ## Rules
//! - At most one worker is alive: the previous worker is joined before a new one spawns.
//! - The client status handler never opens or closes; it only reports and signals.
//! - Every blocking point (`wait`, retry sleep) also waits on the stop token.
//! - `STOPPED` is reported exactly once, by whichever of `stop()` and the
//!   loop's finalisation gets there first. Status emissions share one lock with
//!   it, so nothing else reaches the sink after `STOPPED`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{ChangeReason, ClientRef, ConnectionStatus, Provisioner, StatusChange, StatusHandler};
use crate::core::lock;
use crate::core::worker::{DeviceWorker, WorkCycle};
use crate::device::{Device, DeviceStatus};
use crate::error::{ConnectError, FailureClass};
use crate::events::{Bus, Event, EventKind};
use crate::policies::BackoffPolicy;
use crate::status::SinkRef;

/// Parameters shared by every manager of a fleet.
#[derive(Clone, Debug)]
pub(crate) struct ManagerParams {
    pub retry: BackoffPolicy,
    pub worker_interval: Duration,
}

/// Wake-up reasons delivered to the run loop.
#[derive(Debug)]
pub(crate) enum Signal {
    /// Unintentional terminal disconnect of connection `connection`.
    Disconnected { connection: u64 },
    /// Connection `connection` reported credentials that can never succeed.
    CredentialsRejected { connection: u64, reason: ChangeReason },
    /// Worker `generation` returned.
    WorkerFinished { generation: u32 },
}

/// Worker → manager completion handle; consumed on use.
pub(crate) struct Notifier {
    tx: mpsc::UnboundedSender<Signal>,
    generation: u32,
}

impl Notifier {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Signal>, generation: u32) -> Self {
        Self { tx, generation }
    }

    pub(crate) fn worker_finished(self) {
        let _ = self.tx.send(Signal::WorkerFinished {
            generation: self.generation,
        });
    }
}

/// Why a manager's run loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerExit {
    /// Explicit stop.
    Stopped,
    /// Registration/open failed fatally or terminally; eligible for a later restart.
    Aborted(ConnectError),
    /// The client reported credentials that can never succeed.
    CredentialsRejected(ChangeReason),
}

impl ManagerExit {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ManagerExit::Stopped => "manager_stopped",
            ManagerExit::Aborted(_) => "manager_aborted",
            ManagerExit::CredentialsRejected(_) => "manager_credentials_rejected",
        }
    }
}

enum Abort {
    Stopped,
    Failed(ConnectError),
}

/// What the run loop does with a freshly opened connection.
enum Fresh {
    Keep,
    /// The session dropped before the loop picked it up.
    Reopen,
    Rejected(ChangeReason),
}

enum Wake {
    Stop,
    Disconnected,
    WorkerFinished,
    CredentialsRejected(ChangeReason),
}

struct WorkerHandle {
    generation: u32,
    token: CancellationToken,
    join: JoinHandle<()>,
}

/// State machine for one device.
pub struct DeviceManager {
    device: Device,
    params: ManagerParams,
    provisioner: Arc<dyn Provisioner>,
    sink: SinkRef,
    cycle: Arc<dyn WorkCycle>,
    bus: Bus,

    stop: CancellationToken,
    stopping: AtomicBool,
    /// Set once STOPPED has been reported; held across every status emission.
    stopped_reported: Mutex<bool>,

    /// Number of the current client; bumped on every registration.
    connection: AtomicU64,
    client: Mutex<Option<ClientRef>>,

    signals: mpsc::UnboundedSender<Signal>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<Signal>>>,
}

impl DeviceManager {
    pub(crate) fn new(
        device: Device,
        params: ManagerParams,
        provisioner: Arc<dyn Provisioner>,
        sink: SinkRef,
        cycle: Arc<dyn WorkCycle>,
        bus: Bus,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            device,
            params,
            provisioner,
            sink,
            cycle,
            bus,
            stop: CancellationToken::new(),
            stopping: AtomicBool::new(false),
            stopped_reported: Mutex::new(false),
            connection: AtomicU64::new(0),
            client: Mutex::new(None),
            signals: tx,
            inbox: Mutex::new(Some(rx)),
        })
    }

    /// Device id.
    pub fn id(&self) -> &str {
        &self.device.id
    }

    /// True once `stop()` has been called.
    pub fn is_stopping(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Runs the lifecycle until stopped or until an unrecoverable failure.
    ///
    /// Intended to be called once; a second call returns [`ManagerExit::Stopped`] immediately.
    pub async fn run(self: Arc<Self>) -> ManagerExit {
        let inbox = lock(&self.inbox).take();
        let Some(mut signals) = inbox else {
            warn!(device = %self.device.id, "manager run loop already consumed");
            return ManagerExit::Stopped;
        };

        info!(device = %self.device.id, "manager started");
        self.report(DeviceStatus::Starting);

        let mut worker = None;
        let exit = self.supervise(&mut signals, &mut worker).await;

        if let Some(w) = worker.take() {
            self.retire(w).await;
        }
        self.discard_client().await;
        self.report_stopped();

        info!(device = %self.device.id, exit = exit.as_label(), "manager stopped");
        exit
    }

    /// Stops the manager: worker, connection and run loop. Idempotent.
    ///
    /// Does not wait for the run loop to return.
    pub async fn stop(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(device = %self.device.id, "stopping manager");
        // Cancels the worker's child token and wakes every wait in the run loop.
        self.stop.cancel();
        self.discard_client().await;
        self.report_stopped();
    }

    async fn supervise(
        self: &Arc<Self>,
        signals: &mut mpsc::UnboundedReceiver<Signal>,
        worker: &mut Option<WorkerHandle>,
    ) -> ManagerExit {
        let mut generation: u32 = 0;
        let mut reconnect = true;

        loop {
            if self.stop.is_cancelled() {
                return ManagerExit::Stopped;
            }

            let reusable = if reconnect { None } else { self.open_client() };
            let client = match reusable {
                Some(client) => client,
                None => match self.connect_with_retry().await {
                    Ok(client) => match self.settle(signals, &client) {
                        Fresh::Keep => client,
                        Fresh::Reopen => {
                            debug!(device = %self.device.id, "connection dropped right after open; re-opening");
                            reconnect = true;
                            continue;
                        }
                        Fresh::Rejected(reason) => return ManagerExit::CredentialsRejected(reason),
                    },
                    Err(Abort::Stopped) => return ManagerExit::Stopped,
                    Err(Abort::Failed(e)) => {
                        // Eligible for a future restart attempt.
                        self.report(DeviceStatus::Starting);
                        warn!(device = %self.device.id, error = %e, "connect aborted; status set to starting");
                        return ManagerExit::Aborted(e);
                    }
                },
            };

            generation = generation.wrapping_add(1);
            *worker = Some(self.spawn_worker(client, generation));

            let wake = self.wait(signals, generation).await;
            if let Some(w) = worker.take() {
                self.retire(w).await;
            }

            match wake {
                Wake::Stop => return ManagerExit::Stopped,
                Wake::CredentialsRejected(reason) => {
                    return ManagerExit::CredentialsRejected(reason);
                }
                Wake::Disconnected => {
                    debug!(device = %self.device.id, "woken to re-open the connection");
                    reconnect = true;
                }
                Wake::WorkerFinished => {
                    info!(device = %self.device.id, "worker finished unexpectedly; restarting");
                    reconnect = false;
                }
            }
        }
    }

    /// Registers a fresh client and opens it, retrying retryable failures.
    async fn connect_with_retry(self: &Arc<Self>) -> Result<ClientRef, Abort> {
        self.report(DeviceStatus::Connecting);
        info!(device = %self.device.id, "connecting");

        let mut client: Option<ClientRef> = None;
        let mut attempt: u32 = 0;

        loop {
            if self.stop.is_cancelled() {
                return Err(Abort::Stopped);
            }
            attempt = attempt.saturating_add(1);
            self.bus.publish(
                Event::new(EventKind::ConnectAttempt)
                    .with_device(self.device.id.as_str())
                    .with_attempt(attempt),
            );

            match self.try_open(&mut client).await {
                Ok(c) => {
                    if self.stop.is_cancelled() {
                        c.close().await;
                        return Err(Abort::Stopped);
                    }
                    self.report(DeviceStatus::Connected);
                    self.bus.publish(
                        Event::new(EventKind::Connected)
                            .with_device(self.device.id.as_str())
                            .with_attempt(attempt),
                    );
                    info!(device = %self.device.id, attempt, "connected");
                    return Ok(c);
                }
                Err(e) => match e.classify() {
                    FailureClass::Retryable => {
                        debug!(device = %self.device.id, attempt, error = %e, "open failed with retryable error");
                        let delay = self.params.retry.next(attempt - 1);
                        self.bus.publish(
                            Event::new(EventKind::RetryScheduled)
                                .with_device(self.device.id.as_str())
                                .with_attempt(attempt)
                                .with_delay(delay)
                                .with_reason(e.to_string()),
                        );
                        let sleep = time::sleep(delay);
                        tokio::pin!(sleep);
                        tokio::select! {
                            _ = &mut sleep => {}
                            _ = self.stop.cancelled() => return Err(Abort::Stopped),
                        }
                    }
                    FailureClass::Fatal | FailureClass::Terminal => {
                        error!(device = %self.device.id, attempt, error = %e, label = e.as_label(), "open failed");
                        self.bus.publish(
                            Event::new(EventKind::ConnectAborted)
                                .with_device(self.device.id.as_str())
                                .with_attempt(attempt)
                                .with_reason(e.to_string()),
                        );
                        return Err(Abort::Failed(e));
                    }
                },
            }
        }
    }

    /// One registration (if needed) plus open.
    async fn try_open(self: &Arc<Self>, client: &mut Option<ClientRef>) -> Result<ClientRef, ConnectError> {
        let c = match client {
            Some(c) => c.clone(),
            None => {
                let c = self.register().await?;
                *client = Some(c.clone());
                c
            }
        };
        self.reopen(&c).await?;
        Ok(c)
    }

    /// Replaces the current client with a freshly registered one.
    async fn register(self: &Arc<Self>) -> Result<ClientRef, ConnectError> {
        self.discard_client().await;

        let client = self.provisioner.register(&self.device).await?;
        let connection = self.connection.fetch_add(1, Ordering::AcqRel) + 1;
        client.set_status_handler(status_handler(Arc::downgrade(self), connection));
        *lock(&self.client) = Some(client.clone());

        debug!(device = %self.device.id, connection, "registered");
        Ok(client)
    }

    async fn reopen(&self, client: &ClientRef) -> Result<(), ConnectError> {
        client.close().await;
        debug!(device = %self.device.id, "attempting to open the client");
        client.open(false).await
    }

    /// Current client, if it still reports an open session.
    fn open_client(&self) -> Option<ClientRef> {
        lock(&self.client)
            .as_ref()
            .filter(|c| c.status() == ConnectionStatus::Connected)
            .cloned()
    }

    async fn discard_client(&self) {
        let client = lock(&self.client).take();
        if let Some(client) = client {
            client.close().await;
        }
    }

    fn spawn_worker(&self, client: ClientRef, generation: u32) -> WorkerHandle {
        let token = self.stop.child_token();
        let worker = DeviceWorker::new(
            self.device.clone(),
            client,
            self.cycle.clone(),
            self.params.worker_interval,
            generation,
            self.bus.clone(),
        );
        let notifier = Notifier::new(self.signals.clone(), generation);
        let join = tokio::spawn(worker.run(token.clone(), notifier));
        WorkerHandle {
            generation,
            token,
            join,
        }
    }

    /// Stops a worker and waits until it has returned.
    async fn retire(&self, worker: WorkerHandle) {
        worker.token.cancel();
        if let Err(e) = worker.join.await {
            warn!(device = %self.device.id, generation = worker.generation, error = %e, "worker task aborted");
        }
    }

    async fn wait(&self, signals: &mut mpsc::UnboundedReceiver<Signal>, generation: u32) -> Wake {
        loop {
            let signal = tokio::select! {
                biased;
                _ = self.stop.cancelled() => return Wake::Stop,
                s = signals.recv() => match s {
                    Some(s) => s,
                    None => return Wake::Stop,
                },
            };

            let current = self.connection.load(Ordering::Acquire);
            match signal {
                Signal::CredentialsRejected { connection, reason } if connection == current => {
                    return Wake::CredentialsRejected(reason);
                }
                Signal::Disconnected { connection } if connection == current => {
                    return Wake::Disconnected;
                }
                Signal::WorkerFinished { generation: g } if g == generation => {
                    if self.stop.is_cancelled() {
                        return Wake::Stop;
                    }
                    // A disconnect that raced with the worker's exit wins.
                    return self
                        .pending_disconnect(signals, current)
                        .unwrap_or(Wake::WorkerFinished);
                }
                stale => debug!(device = %self.device.id, ?stale, "ignoring stale signal"),
            }
        }
    }

    fn pending_disconnect(
        &self,
        signals: &mut mpsc::UnboundedReceiver<Signal>,
        current: u64,
    ) -> Option<Wake> {
        let mut wake = None;
        while let Ok(signal) = signals.try_recv() {
            match signal {
                Signal::CredentialsRejected { connection, reason } if connection == current => {
                    return Some(Wake::CredentialsRejected(reason));
                }
                Signal::Disconnected { connection } if connection == current => {
                    wake = Some(Wake::Disconnected);
                }
                _ => {}
            }
        }
        wake
    }

    /// Drains signals queued while connecting.
    ///
    /// Disconnects raised by failed attempts are superseded by the successful
    /// open; a disconnect of the current connection is honoured while the
    /// client no longer reports an open session.
    fn settle(&self, signals: &mut mpsc::UnboundedReceiver<Signal>, client: &ClientRef) -> Fresh {
        let current = self.connection.load(Ordering::Acquire);
        let mut fresh = Fresh::Keep;
        while let Ok(signal) = signals.try_recv() {
            match signal {
                Signal::CredentialsRejected { connection, reason } if connection == current => {
                    return Fresh::Rejected(reason);
                }
                Signal::Disconnected { connection }
                    if connection == current && client.status() != ConnectionStatus::Connected =>
                {
                    fresh = Fresh::Reopen;
                }
                stale => debug!(device = %self.device.id, ?stale, "dropping signal queued while connecting"),
            }
        }
        fresh
    }

    /// Client callback; never opens or closes, only reports and signals.
    fn on_connection_status(&self, connection: u64, change: StatusChange) {
        if connection != self.connection.load(Ordering::Acquire) {
            debug!(device = %self.device.id, connection, ?change, "status change from a replaced client");
            return;
        }

        if change.rejects_credentials() {
            error!(
                device = %self.device.id,
                reason = %change.reason,
                "credentials are malformed or expired; they can never succeed"
            );
            self.bus.publish(
                Event::new(EventKind::CredentialsRejected)
                    .with_device(self.device.id.as_str())
                    .with_reason(change.reason.as_str()),
            );
            let _ = self.signals.send(Signal::CredentialsRejected {
                connection,
                reason: change.reason,
            });
            return;
        }

        if change.needs_reopen() && !self.stop.is_cancelled() {
            self.report(DeviceStatus::Connecting);
            info!(device = %self.device.id, reason = %change.reason, "disconnected; status set to connecting");
            self.bus.publish(
                Event::new(EventKind::Disconnected)
                    .with_device(self.device.id.as_str())
                    .with_reason(change.reason.as_str()),
            );
            let _ = self.signals.send(Signal::Disconnected { connection });
        }
    }

    fn report(&self, status: DeviceStatus) {
        let stopped = lock(&self.stopped_reported);
        // After stop only STOPPED may be reported.
        if *stopped || self.stop.is_cancelled() {
            return;
        }
        self.emit(status);
    }

    pub(crate) fn report_stopped(&self) {
        let mut stopped = lock(&self.stopped_reported);
        if !*stopped {
            *stopped = true;
            self.emit(DeviceStatus::Stopped);
        }
    }

    fn emit(&self, status: DeviceStatus) {
        self.sink.on_device_status_changed(&self.device.id, status);
        self.bus.publish(
            Event::new(EventKind::StatusChanged)
                .with_device(self.device.id.as_str())
                .with_status(status),
        );
    }
}

fn status_handler(manager: Weak<DeviceManager>, connection: u64) -> StatusHandler {
    Arc::new(move |change: StatusChange| {
        if let Some(manager) = manager.upgrade() {
            manager.on_connection_status(connection, change);
        }
    })
}
