//! # Global runtime configuration.
//!
//! [`FleetConfig`] centralizes the knobs shared by every manager in a fleet.
//!
//! ## Sentinel values
//! - `worker_interval = 0s` → clamped to 1ms (a zero-length tick would spin)
//! - `bus_capacity = 0` → clamped to 1
//! - `grace = 0s` → do not wait for managers on shutdown

use std::time::Duration;

use crate::policies::BackoffPolicy;

/// Global configuration for a fleet.
///
/// All fields are public; prefer the accessors to avoid sprinkling sentinel checks.
#[derive(Clone, Debug)]
pub struct FleetConfig {
    /// Delay policy between retryable registration/open failures.
    pub retry: BackoffPolicy,

    /// Period of the worker's work cycle.
    pub worker_interval: Duration,

    /// Maximum time to wait for managers to exit on shutdown.
    pub grace: Duration,

    /// Capacity of the event bus ring buffer.
    ///
    /// Receivers lagging more than this many events skip the oldest ones.
    pub bus_capacity: usize,
}

impl FleetConfig {
    /// Worker period, never zero.
    #[inline]
    pub fn worker_interval_clamped(&self) -> Duration {
        self.worker_interval.max(Duration::from_millis(1))
    }

    /// Bus capacity, never zero.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for FleetConfig {
    /// - `retry = BackoffPolicy::default()` (fixed 1s)
    /// - `worker_interval = 5s`
    /// - `grace = 30s`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            retry: BackoffPolicy::default(),
            worker_interval: Duration::from_secs(5),
            grace: Duration::from_secs(30),
            bus_capacity: 1024,
        }
    }
}
