//! In-crate fakes shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::client::{
    ChangeReason, ClientRef, ConnectionClient, ConnectionStatus, Message, MessageHandler,
    MethodHandler, Provisioner, StatusChange, StatusHandler,
};
use crate::core::{
    ManagerParams, REJECTIONS_CAPACITY, Registry, StatusReport, WorkContext, WorkCycle, lock,
};
use crate::device::{Credentials, Device, DeviceStatus, Environment};
use crate::error::{ConnectError, WorkerError};
use crate::events::Bus;
use crate::policies::BackoffPolicy;
use crate::status::{SinkRef, StatusSink};

pub(crate) fn device(id: &str) -> Device {
    Device::new(id, Environment::Test, Credentials::new("cert", "key"))
}

/// Polls `cond` until it holds; panics after ten seconds.
pub(crate) async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Registry with short timings around the given collaborators.
pub(crate) fn registry(provisioner: Arc<FakeProvisioner>, sink: SinkRef) -> Arc<Registry> {
    let (tx, _rx) = mpsc::channel(REJECTIONS_CAPACITY);
    Registry::new(
        Bus::new(256),
        ManagerParams {
            retry: BackoffPolicy::fixed(Duration::from_millis(10)),
            worker_interval: Duration::from_millis(50),
        },
        provisioner,
        sink,
        Arc::new(StatusReport),
        tx,
    )
}

/// Scripted outcomes shared by a provisioner and the clients it hands out.
#[derive(Default)]
struct Script {
    open_failures: Mutex<VecDeque<ConnectError>>,
    /// Successful opens whose session drops before `open` returns.
    drops_after_open: AtomicUsize,
    opens: AtomicUsize,
    open_times: Mutex<Vec<Instant>>,
}

/// Client whose `open` follows a shared script; status changes are injected by tests.
pub(crate) struct FakeClient {
    script: Arc<Script>,
    status: Mutex<ConnectionStatus>,
    status_handler: Mutex<Option<StatusHandler>>,
    message_handler: Mutex<Option<Arc<dyn MessageHandler>>>,
    method_handler: Mutex<Option<Arc<dyn MethodHandler>>>,
    sent: Mutex<Vec<Message>>,
}

impl FakeClient {
    pub(crate) fn new() -> Arc<Self> {
        Self::scripted(Arc::new(Script::default()))
    }

    fn scripted(script: Arc<Script>) -> Arc<Self> {
        Arc::new(Self {
            script,
            status: Mutex::new(ConnectionStatus::Disconnected),
            status_handler: Mutex::new(None),
            message_handler: Mutex::new(None),
            method_handler: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Simulates the transport ending the session for `reason`.
    pub(crate) fn disconnect(&self, reason: ChangeReason) {
        self.transition(ConnectionStatus::Disconnected, reason);
    }

    pub(crate) fn message_handler(&self) -> Option<Arc<dyn MessageHandler>> {
        lock(&self.message_handler).clone()
    }

    pub(crate) fn method_handler(&self) -> Option<Arc<dyn MethodHandler>> {
        lock(&self.method_handler).clone()
    }

    pub(crate) fn sent_ids(&self) -> Vec<String> {
        lock(&self.sent).iter().map(|m| m.correlation_id.clone()).collect()
    }

    fn transition(&self, status: ConnectionStatus, reason: ChangeReason) {
        let previous = std::mem::replace(&mut *lock(&self.status), status);
        let handler = lock(&self.status_handler).clone();
        if let Some(handler) = handler {
            handler(StatusChange {
                status,
                reason,
                previous,
            });
        }
    }
}

#[async_trait]
impl ConnectionClient for FakeClient {
    async fn open(&self, _retryable_hint: bool) -> Result<(), ConnectError> {
        self.script.opens.fetch_add(1, Ordering::SeqCst);
        lock(&self.script.open_times).push(Instant::now());
        let failure = lock(&self.script.open_failures).pop_front();
        if let Some(e) = failure {
            return Err(e);
        }
        self.transition(ConnectionStatus::Connected, ChangeReason::ConnectionOk);
        let drops = self
            .script
            .drops_after_open
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if drops.is_ok() {
            self.transition(ConnectionStatus::Disconnected, ChangeReason::NoNetwork);
        }
        Ok(())
    }

    async fn close(&self) {
        if self.status() != ConnectionStatus::Disconnected {
            self.transition(ConnectionStatus::Disconnected, ChangeReason::ClientClose);
        }
    }

    fn status(&self) -> ConnectionStatus {
        *lock(&self.status)
    }

    fn set_status_handler(&self, handler: StatusHandler) {
        *lock(&self.status_handler) = Some(handler);
    }

    fn set_message_handler(&self, handler: Arc<dyn MessageHandler>) {
        *lock(&self.message_handler) = Some(handler);
    }

    fn subscribe_to_methods(&self, handler: Arc<dyn MethodHandler>) {
        *lock(&self.method_handler) = Some(handler);
    }

    fn send(&self, message: Message) {
        lock(&self.sent).push(message);
    }
}

/// Provisioner handing out [`FakeClient`]s that share one open script.
#[derive(Default)]
pub(crate) struct FakeProvisioner {
    script: Arc<Script>,
    registration_failures: Mutex<VecDeque<ConnectError>>,
    clients: Mutex<Vec<Arc<FakeClient>>>,
}

impl FakeProvisioner {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues failures for the next `open` calls, across clients.
    pub(crate) fn fail_opens(&self, failures: Vec<ConnectError>) {
        lock(&self.script.open_failures).extend(failures);
    }

    /// Queues failures for the next `register` calls.
    pub(crate) fn fail_registrations(&self, failures: Vec<ConnectError>) {
        lock(&self.registration_failures).extend(failures);
    }

    /// The next `n` successful opens lose their session before returning.
    pub(crate) fn drop_after_opens(&self, n: usize) {
        self.script.drops_after_open.fetch_add(n, Ordering::SeqCst);
    }

    /// When each `open` was called, in order.
    pub(crate) fn open_times(&self) -> Vec<Instant> {
        lock(&self.script.open_times).clone()
    }

    pub(crate) fn opens(&self) -> usize {
        self.script.opens.load(Ordering::SeqCst)
    }

    /// Successful registrations.
    pub(crate) fn registrations(&self) -> usize {
        lock(&self.clients).len()
    }

    /// Most recently registered client.
    pub(crate) fn latest(&self) -> Arc<FakeClient> {
        lock(&self.clients)
            .last()
            .cloned()
            .expect("no client registered yet")
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn register(&self, _device: &Device) -> Result<ClientRef, ConnectError> {
        let failure = lock(&self.registration_failures).pop_front();
        if let Some(e) = failure {
            return Err(e);
        }
        let client = FakeClient::scripted(self.script.clone());
        lock(&self.clients).push(client.clone());
        Ok(client)
    }
}

/// Status sink recording every transition per device.
#[derive(Default)]
pub(crate) struct RecordingSink {
    history: Mutex<HashMap<String, Vec<DeviceStatus>>>,
}

impl RecordingSink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn history(&self, id: &str) -> Vec<DeviceStatus> {
        lock(&self.history).get(id).cloned().unwrap_or_default()
    }

    pub(crate) fn last(&self, id: &str) -> Option<DeviceStatus> {
        lock(&self.history).get(id).and_then(|h| h.last().copied())
    }
}

impl StatusSink for RecordingSink {
    fn on_device_status_changed(&self, device_id: &str, status: DeviceStatus) {
        lock(&self.history)
            .entry(device_id.to_string())
            .or_default()
            .push(status);
    }
}

enum Behaviour {
    Healthy,
    /// Fails on the n-th cycle of every worker.
    FailOn(u64),
    Panic,
}

/// Instrumented work cycle counting starts, exits, cycles and live workers.
pub(crate) struct CountingCycle {
    behaviour: Behaviour,
    starts: AtomicUsize,
    exits: AtomicUsize,
    cycles: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
}

impl CountingCycle {
    fn with(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            starts: AtomicUsize::new(0),
            exits: AtomicUsize::new(0),
            cycles: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
            max_live: AtomicUsize::new(0),
        })
    }

    pub(crate) fn new() -> Arc<Self> {
        Self::with(Behaviour::Healthy)
    }

    pub(crate) fn failing_after(n: u64) -> Arc<Self> {
        Self::with(Behaviour::FailOn(n))
    }

    pub(crate) fn panicking() -> Arc<Self> {
        Self::with(Behaviour::Panic)
    }

    pub(crate) fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub(crate) fn exits(&self) -> usize {
        self.exits.load(Ordering::SeqCst)
    }

    pub(crate) fn cycles(&self) -> usize {
        self.cycles.load(Ordering::SeqCst)
    }

    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub(crate) fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkCycle for CountingCycle {
    fn on_start(&self, _device: &Device, _generation: u32) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
    }

    async fn run_cycle(&self, ctx: &WorkContext<'_>) -> Result<(), WorkerError> {
        self.cycles.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::Healthy => Ok(()),
            Behaviour::FailOn(n) if ctx.cycle >= n => Err(WorkerError::Cycle {
                reason: format!("failed on cycle {}", ctx.cycle),
            }),
            Behaviour::FailOn(_) => Ok(()),
            Behaviour::Panic => panic!("cycle panicked on purpose"),
        }
    }

    fn on_exit(&self, _device: &Device, _generation: u32) {
        self.exits.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
