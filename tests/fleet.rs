use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fleetvisor::{
    ChangeReason, ClientRef, ConnectError, ConnectionClient, ConnectionStatus, Credentials,
    Device, DeviceControl, DeviceStatus, Environment, Event, EventKind, Fleet, FleetConfig,
    MemoryStore, Message, MessageHandler, MethodHandler, Provisioner, RuntimeError, StatusChange,
    StatusHandler, StatusSink, StoreStatusSink, Subscribe, WorkContext, WorkCycle, WorkerError,
};

struct Client {
    status: Mutex<ConnectionStatus>,
    handler: Mutex<Option<StatusHandler>>,
    opens: Arc<AtomicUsize>,
}

impl Client {
    fn emit(&self, status: ConnectionStatus, reason: ChangeReason) {
        let previous = std::mem::replace(&mut *self.status.lock().unwrap(), status);
        let handler = self.handler.lock().unwrap().clone();
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
impl ConnectionClient for Client {
    async fn open(&self, _retryable_hint: bool) -> Result<(), ConnectError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.emit(ConnectionStatus::Connected, ChangeReason::ConnectionOk);
        Ok(())
    }

    async fn close(&self) {
        if self.status() != ConnectionStatus::Disconnected {
            self.emit(ConnectionStatus::Disconnected, ChangeReason::ClientClose);
        }
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.lock().unwrap()
    }

    fn set_status_handler(&self, handler: StatusHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    fn set_message_handler(&self, _handler: Arc<dyn MessageHandler>) {}

    fn subscribe_to_methods(&self, _handler: Arc<dyn MethodHandler>) {}

    fn send(&self, _message: Message) {}
}

#[derive(Default)]
struct Endpoint {
    opens: Arc<AtomicUsize>,
    clients: Mutex<HashMap<String, Arc<Client>>>,
}

impl Endpoint {
    fn client(&self, id: &str) -> Arc<Client> {
        self.clients.lock().unwrap()[id].clone()
    }
}

#[async_trait]
impl Provisioner for Endpoint {
    async fn register(&self, device: &Device) -> Result<ClientRef, ConnectError> {
        let client = Arc::new(Client {
            status: Mutex::new(ConnectionStatus::Disconnected),
            handler: Mutex::new(None),
            opens: self.opens.clone(),
        });
        self.clients
            .lock()
            .unwrap()
            .insert(device.id.clone(), client.clone());
        Ok(client)
    }
}

#[derive(Default)]
struct Statuses(Mutex<HashMap<String, Vec<DeviceStatus>>>);

impl Statuses {
    fn last(&self, id: &str) -> Option<DeviceStatus> {
        self.0.lock().unwrap().get(id).and_then(|h| h.last().copied())
    }

    fn history(&self, id: &str) -> Vec<DeviceStatus> {
        self.0.lock().unwrap().get(id).cloned().unwrap_or_default()
    }
}

impl StatusSink for Statuses {
    fn on_device_status_changed(&self, device_id: &str, status: DeviceStatus) {
        self.0
            .lock()
            .unwrap()
            .entry(device_id.to_string())
            .or_default()
            .push(status);
    }
}

#[derive(Default)]
struct Kinds(Mutex<Vec<EventKind>>);

#[async_trait]
impl Subscribe for Kinds {
    async fn on_event(&self, event: &Event) {
        self.0.lock().unwrap().push(event.kind);
    }

    fn name(&self) -> &'static str {
        "kinds"
    }
}

fn config() -> FleetConfig {
    FleetConfig {
        worker_interval: Duration::from_millis(20),
        grace: Duration::from_secs(2),
        ..FleetConfig::default()
    }
}

fn device(id: &str) -> Device {
    Device::new(id, Environment::Test, Credentials::new("cert", "key"))
}

async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test]
async fn devices_connect_and_stop_on_shutdown() {
    let endpoint = Arc::new(Endpoint::default());
    let statuses = Arc::new(Statuses::default());
    let kinds = Arc::new(Kinds::default());
    let fleet = Fleet::builder(config(), endpoint.clone())
        .with_status_sink(statuses.clone())
        .with_subscribers(vec![kinds.clone() as Arc<dyn Subscribe>])
        .build();

    for id in ["a", "b"] {
        assert!(fleet.activate(device(id)).await);
    }
    assert!(!fleet.activate(device("a")).await);
    eventually(|| {
        statuses.last("a") == Some(DeviceStatus::Connected)
            && statuses.last("b") == Some(DeviceStatus::Connected)
    })
    .await;
    assert_eq!(endpoint.opens.load(Ordering::SeqCst), 2);

    fleet.shutdown().await.unwrap();

    assert!(fleet.status_snapshot().await.is_empty());
    for id in ["a", "b"] {
        assert_eq!(
            statuses.history(id),
            vec![
                DeviceStatus::Starting,
                DeviceStatus::Connecting,
                DeviceStatus::Connected,
                DeviceStatus::Stopped
            ]
        );
    }
    let seen = kinds.0.lock().unwrap().clone();
    assert!(seen.contains(&EventKind::DeviceActivated));
    assert!(seen.contains(&EventKind::WorkerStarted));
    assert!(seen.contains(&EventKind::AllStoppedWithin));
}

#[tokio::test]
async fn disconnect_reopens_through_the_fleet() {
    let endpoint = Arc::new(Endpoint::default());
    let statuses = Arc::new(Statuses::default());
    let fleet = Fleet::builder(config(), endpoint.clone())
        .with_status_sink(statuses.clone())
        .build();

    fleet.activate(device("a")).await;
    eventually(|| statuses.last("a") == Some(DeviceStatus::Connected)).await;

    endpoint
        .client("a")
        .emit(ConnectionStatus::Disconnected, ChangeReason::CommunicationError);
    eventually(|| endpoint.opens.load(Ordering::SeqCst) == 2).await;
    eventually(|| statuses.last("a") == Some(DeviceStatus::Connected)).await;

    assert!(fleet.deactivate("a").await);
    assert!(!fleet.deactivate("a").await);
    assert_eq!(statuses.last("a"), Some(DeviceStatus::Stopped));
}

#[tokio::test]
async fn credential_rejection_ends_run_with_error() {
    let endpoint = Arc::new(Endpoint::default());
    let statuses = Arc::new(Statuses::default());
    let fleet = Fleet::builder(config(), endpoint.clone())
        .with_status_sink(statuses.clone())
        .build();

    fleet.activate(device("a")).await;
    fleet.activate(device("b")).await;
    eventually(|| statuses.last("a") == Some(DeviceStatus::Connected)).await;

    let runner = {
        let fleet = fleet.clone();
        tokio::spawn(async move { fleet.run().await })
    };
    endpoint
        .client("a")
        .emit(ConnectionStatus::Disconnected, ChangeReason::ExpiredToken);

    let err = runner.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::CredentialsRejected { ref device, reason: ChangeReason::ExpiredToken } if device == "a"
    ));
    assert_eq!(statuses.last("a"), Some(DeviceStatus::Stopped));
    assert_eq!(statuses.last("b"), Some(DeviceStatus::Stopped));
    assert!(!fleet.is_active("b").await);
}

#[tokio::test]
async fn control_gate_drives_the_fleet() {
    let endpoint = Arc::new(Endpoint::default());
    let store = Arc::new(MemoryStore::new());
    let fleet = Fleet::builder(config(), endpoint)
        .with_status_sink(Arc::new(StoreStatusSink::new(store.clone())))
        .build();
    let control = DeviceControl::new(store.clone(), fleet.registry());

    control.create(device("a")).unwrap();
    control.start("a").await.unwrap();
    eventually(|| control.get("a").unwrap().status == DeviceStatus::Connected).await;
    assert!(control.is_running("a").await);

    assert!(control.update_status("a", DeviceStatus::Connected).await.is_err());

    control.stop("a").await.unwrap();
    assert!(!control.is_running("a").await);
    assert_eq!(control.get("a").unwrap().status, DeviceStatus::Stopped);

    fleet.shutdown().await.unwrap();
}

/// Cycle that never finishes for device "slow".
#[derive(Default)]
struct Stuck {
    entered: AtomicBool,
}

#[async_trait]
impl WorkCycle for Stuck {
    async fn run_cycle(&self, ctx: &WorkContext<'_>) -> Result<(), WorkerError> {
        if ctx.device.id == "slow" {
            self.entered.store(true, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        Ok(())
    }
}

#[tokio::test]
async fn credential_rejection_is_reported_even_past_grace() {
    let endpoint = Arc::new(Endpoint::default());
    let statuses = Arc::new(Statuses::default());
    let stuck = Arc::new(Stuck::default());
    let fleet = Fleet::builder(
        FleetConfig {
            grace: Duration::from_millis(100),
            ..config()
        },
        endpoint.clone(),
    )
    .with_status_sink(statuses.clone())
    .with_work_cycle(stuck.clone())
    .build();
    let mut events = fleet.subscribe();

    fleet.activate(device("a")).await;
    fleet.activate(device("slow")).await;
    eventually(|| {
        statuses.last("a") == Some(DeviceStatus::Connected) && stuck.entered.load(Ordering::SeqCst)
    })
    .await;

    let runner = {
        let fleet = fleet.clone();
        tokio::spawn(async move { fleet.run().await })
    };
    endpoint
        .client("a")
        .emit(ConnectionStatus::Disconnected, ChangeReason::ExpiredToken);

    let err = runner.await.unwrap().unwrap_err();
    assert_eq!(err.as_label(), "runtime_credentials_rejected");

    let mut grace_exceeded = false;
    while let Ok(event) = events.try_recv() {
        grace_exceeded |= event.kind == EventKind::GraceExceeded;
    }
    assert!(grace_exceeded);
    assert_eq!(statuses.last("slow"), Some(DeviceStatus::Stopped));
}
