//! # Device snapshot and externally visible status.
//!
//! A [`Device`] is owned by the persistence collaborator. The runtime receives a
//! snapshot when a manager is created and never mutates it; every status change
//! flows back through a [`StatusSink`](crate::StatusSink).
//!
//! ## Status machine (external view)
//! ```text
//!            activate
//! STOPPED ───────────► STARTING ──► CONNECTING ──► CONNECTED
//!    ▲                    ▲              ▲              │
//!    │                    │              └── disconnect ┘
//!    └────────── stop / unrecoverable failure (from any state)
//! ```
//! Internal scheduling state is richer: "retrying open" is still `CONNECTING`.

use std::fmt;
use std::str::FromStr;

use crate::error::ControlError;

/// Deployment environment tag (informational only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Environment {
    Dev,
    Test,
    Prod,
}

impl Environment {
    /// Lowercase stable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Test => "test",
            Environment::Prod => "prod",
        }
    }
}

impl FromStr for Environment {
    type Err = ControlError;

    /// Parses `dev` / `test` / `prod`, case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEV" => Ok(Environment::Dev),
            "TEST" => Ok(Environment::Test),
            "PROD" => Ok(Environment::Prod),
            _ => Err(ControlError::InvalidEnvironment {
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of simulated hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceKind {
    #[default]
    AiqCore,
    AiqCoreTorque,
}

impl DeviceKind {
    /// Human-readable product name.
    pub fn display_name(&self) -> &'static str {
        match self {
            DeviceKind::AiqCore => "AIQ Core",
            DeviceKind::AiqCoreTorque => "AIQ Core Torque",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Externally visible device status.
///
/// Exactly one status holds for a device at any instant. It is advisory state
/// pushed to the store, not the manager's scheduling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceStatus {
    #[default]
    Stopped,
    Starting,
    Connecting,
    Connected,
}

impl DeviceStatus {
    /// Lowercase stable name for logs and events.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Stopped => "stopped",
            DeviceStatus::Starting => "starting",
            DeviceStatus::Connecting => "connecting",
            DeviceStatus::Connected => "connected",
        }
    }

    /// True for every status except [`DeviceStatus::Stopped`].
    #[inline]
    pub fn is_active(&self) -> bool {
        !matches!(self, DeviceStatus::Stopped)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque credential material (base64 PEM blobs in practice).
///
/// The runtime never parses it; the [`Provisioner`](crate::Provisioner) does.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub certificate: String,
    pub private_key: String,
}

impl Credentials {
    pub fn new(certificate: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            certificate: certificate.into(),
            private_key: private_key.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("certificate_len", &self.certificate.len())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Device snapshot handed to a manager at creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Unique, opaque identifier.
    pub id: String,
    pub environment: Environment,
    /// Last persisted status.
    pub status: DeviceStatus,
    pub kind: DeviceKind,
    pub credentials: Credentials,
}

impl Device {
    /// Creates a stopped device of the default kind.
    pub fn new(id: impl Into<String>, environment: Environment, credentials: Credentials) -> Self {
        Self {
            id: id.into(),
            environment,
            status: DeviceStatus::Stopped,
            kind: DeviceKind::default(),
            credentials,
        }
    }

    /// Returns a copy with the given kind.
    pub fn with_kind(mut self, kind: DeviceKind) -> Self {
        self.kind = kind;
        self
    }

    /// Returns a copy with the given status.
    pub fn with_status(mut self, status: DeviceStatus) -> Self {
        self.status = status;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_case_insensitively() {
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Dev);
        assert_eq!(" Test ".parse::<Environment>().unwrap(), Environment::Test);
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
    }

    #[test]
    fn environment_rejects_unknown_value() {
        let err = "staging".parse::<Environment>().unwrap_err();
        assert_eq!(err.as_label(), "control_invalid_environment");
        assert!(err.to_string().contains("DEV, TEST, PROD"));
    }

    #[test]
    fn credentials_debug_redacts_private_key() {
        let creds = Credentials::new("cert", "super-secret");
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn new_device_is_stopped() {
        let d = Device::new("d1", Environment::Dev, Credentials::new("c", "k"));
        assert_eq!(d.status, DeviceStatus::Stopped);
        assert!(!d.status.is_active());
        assert_eq!(d.kind.display_name(), "AIQ Core");
    }
}
