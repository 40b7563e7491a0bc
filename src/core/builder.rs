use std::sync::Arc;

use tokio::sync::mpsc;

use super::fleet::Fleet;
use super::manager::ManagerParams;
use super::registry::{REJECTIONS_CAPACITY, Registry};
use super::worker::{StatusReport, WorkCycle};
use crate::{
    client::Provisioner,
    core::FleetConfig,
    events::Bus,
    status::{NoopSink, SinkRef, StatusSink},
    subscribers::{Subscribe, SubscriberSet},
};

/// Builder for constructing a [`Fleet`] with optional collaborators.
pub struct FleetBuilder {
    cfg: FleetConfig,
    provisioner: Arc<dyn Provisioner>,
    sink: SinkRef,
    cycle: Arc<dyn WorkCycle>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl FleetBuilder {
    /// Creates a new builder with the given configuration and registration step.
    pub fn new(cfg: FleetConfig, provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            cfg,
            provisioner,
            sink: Arc::new(NoopSink),
            cycle: Arc::new(StatusReport),
            subscribers: Vec::new(),
        }
    }

    /// Sets the status callback invoked on every device status transition.
    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the application logic run by every worker.
    ///
    /// Defaults to [`StatusReport`].
    pub fn with_work_cycle(mut self, cycle: Arc<dyn WorkCycle>) -> Self {
        self.cycle = cycle;
        self
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (status changes, retries, worker exits)
    /// through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds and returns the Fleet instance.
    ///
    /// Must be called inside a tokio runtime: subscriber workers are spawned here.
    pub fn build(self) -> Arc<Fleet> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = SubscriberSet::new(self.subscribers, bus.clone());
        let (rejections_tx, rejections_rx) = mpsc::channel(REJECTIONS_CAPACITY);

        let registry = Registry::new(
            bus.clone(),
            ManagerParams {
                retry: self.cfg.retry,
                worker_interval: self.cfg.worker_interval_clamped(),
            },
            self.provisioner,
            self.sink,
            self.cycle,
            rejections_tx,
        );

        Fleet::new_internal(self.cfg, bus, subs, registry, rejections_rx)
    }
}
