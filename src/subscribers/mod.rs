//! # Event subscribers for the fleetvisor runtime.
//!
//! [`Subscribe`] is the extension point for observing device lifecycles
//! (metrics, audit trails, dashboards). [`SubscriberSet`] fans events out to
//! every subscriber through its own bounded queue.
//!
//! ```text
//! Manager/Worker ── publish(Event) ──► Bus ──► Fleet listener ──► SubscriberSet
//!                                                                   │
//!                                      ┌────────────┬───────────────┤
//!                                      ▼            ▼               ▼
//!                                  LogWriter     Metrics          Custom
//! ```

mod set;
mod subscriber;

#[cfg(feature = "logging")]
mod log;

pub use set::SubscriberSet;
pub use subscriber::Subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
