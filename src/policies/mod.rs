//! Retry delay policies.
//!
//! These knobs control **how long** a manager waits between registration/open
//! attempts that failed with a retryable error.
//!
//! ## Contents
//! - [`BackoffPolicy`] how retry delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization strategy so a fleet does not reconnect in lockstep
//!
//! ## Quick wiring
//! ```text
//! FleetConfig { retry: BackoffPolicy, .. }
//!      └─► core::manager::DeviceManager::connect_with_retry():
//!           - retry.next(attempt) after every retryable failure
//!           - attempt counter resets on every new connect cycle
//! ```
//!
//! ## Defaults
//! - `BackoffPolicy::default()` → first=1s, factor=1.0 (fixed), max=30s, jitter=None.

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
