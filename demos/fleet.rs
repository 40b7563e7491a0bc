//! # Example: fleet
//!
//! Runs three simulated devices against an in-process endpoint.
//!
//! - `press-1` connects on the first attempt.
//! - `press-2` hits two transient failures first, so the retry delay is visible.
//! - `press-3` is dropped by the "network" every 12 seconds and reconnects.
//!
//! Events are rendered by the built-in [`LogWriter`]; status callbacks land in
//! a [`MemoryStore`] through [`StoreStatusSink`].
//!
//! ## Flow
//! ```text
//! DeviceControl::start(id)
//!   └─► Registry::activate ──► DeviceManager::run()
//!         ├─► STARTING ─► CONNECTING ─► open (retry on transient)
//!         ├─► CONNECTED ─► worker cycles every 2s
//!         └─► disconnect ─► CONNECTING ─► reopen
//! Ctrl-C ──► Fleet::shutdown() ──► STOPPED for every device
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=info cargo run --example fleet --features logging
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fleetvisor::{
    ChangeReason, ClientRef, ConnectError, ConnectionClient, ConnectionStatus, Credentials,
    Device, DeviceControl, DeviceKind, Environment, Fleet, FleetConfig, LogWriter, MemoryStore,
    Message, MessageHandler, MethodHandler, Provisioner, StatusChange, StatusHandler,
    StoreStatusSink, Subscribe,
};
use tracing_subscriber::EnvFilter;

/// Client talking to nothing; `open` fails `flaky_opens` times first.
struct SimClient {
    flaky_opens: AtomicU32,
    status: Mutex<ConnectionStatus>,
    handler: Mutex<Option<StatusHandler>>,
}

impl SimClient {
    fn new(flaky_opens: u32) -> Arc<Self> {
        Arc::new(Self {
            flaky_opens: AtomicU32::new(flaky_opens),
            status: Mutex::new(ConnectionStatus::Disconnected),
            handler: Mutex::new(None),
        })
    }

    fn change(&self, status: ConnectionStatus, reason: ChangeReason) {
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
impl ConnectionClient for SimClient {
    async fn open(&self, _retryable_hint: bool) -> Result<(), ConnectError> {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let left = self.flaky_opens.load(Ordering::Relaxed);
        if left > 0 {
            self.flaky_opens.store(left - 1, Ordering::Relaxed);
            return Err(ConnectError::Transient {
                reason: "endpoint busy".into(),
            });
        }
        self.change(ConnectionStatus::Connected, ChangeReason::ConnectionOk);
        Ok(())
    }

    async fn close(&self) {
        if self.status() != ConnectionStatus::Disconnected {
            self.change(ConnectionStatus::Disconnected, ChangeReason::ClientClose);
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

    fn send(&self, message: Message) {
        println!("[sim] sent {}", message.correlation_id);
    }
}

/// Hands out clients and remembers them so the demo can cut connections.
#[derive(Default)]
struct SimProvisioner {
    clients: Mutex<Vec<(String, Arc<SimClient>)>>,
}

impl SimProvisioner {
    fn drop_connection(&self, id: &str) {
        let client = self
            .clients
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(owner, _)| owner == id)
            .map(|(_, c)| c.clone());
        if let Some(client) = client {
            println!("[sim] network drop for {id}");
            client.change(ConnectionStatus::Disconnected, ChangeReason::NoNetwork);
        }
    }
}

#[async_trait]
impl Provisioner for SimProvisioner {
    async fn register(&self, device: &Device) -> Result<ClientRef, ConnectError> {
        let flaky = if device.id == "press-2" { 2 } else { 0 };
        let client = SimClient::new(flaky);
        self.clients
            .lock()
            .unwrap()
            .push((device.id.clone(), client.clone()));
        Ok(client)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = FleetConfig {
        worker_interval: Duration::from_secs(2),
        grace: Duration::from_secs(5),
        ..FleetConfig::default()
    };

    let store = Arc::new(MemoryStore::new());
    let provisioner = Arc::new(SimProvisioner::default());
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];

    let fleet = Fleet::builder(cfg, provisioner.clone())
        .with_status_sink(Arc::new(StoreStatusSink::new(store.clone())))
        .with_subscribers(subs)
        .build();
    let control = DeviceControl::new(store, fleet.registry());

    for (id, kind) in [
        ("press-1", DeviceKind::AiqCore),
        ("press-2", DeviceKind::AiqCore),
        ("press-3", DeviceKind::AiqCoreTorque),
    ] {
        let creds = Credentials::new(format!("cert-{id}"), format!("key-{id}"));
        control.create(Device::new(id, Environment::Dev, creds).with_kind(kind))?;
        control.start(id).await?;
    }

    let flaky_net = provisioner.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(12));
        tick.tick().await;
        loop {
            tick.tick().await;
            flaky_net.drop_connection("press-3");
        }
    });

    fleet.run().await?;

    for device in control.list() {
        println!("{:<8} {}", device.id, device.status);
    }
    Ok(())
}
