//! Error types used by the fleetvisor runtime, its managers and workers.
//!
//! - [`ConnectError`] — failures of the registration / open sequence, classified via
//!   [`ConnectError::classify`] into a [`FailureClass`].
//! - [`SendError`] — outbound message delivery failures reported by a client.
//! - [`WorkerError`] — failures raised by a worker cycle.
//! - [`ControlError`] — rejected control-surface requests.
//! - [`RuntimeError`] — errors raised by the runtime itself.
//!
//! All types provide `as_label` for logs/metrics.

use std::time::Duration;
use thiserror::Error;

use crate::client::ChangeReason;
use crate::device::DeviceStatus;

/// How the manager must react to a [`ConnectError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Credentials rejected or identity unknown; abort this device.
    Fatal,
    /// Transient; sleep and retry until stopped.
    Retryable,
    /// Not retryable and not a credential problem; abort this device.
    Terminal,
}

/// # Failures of the registration / open sequence.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// The endpoint rejected the credentials.
    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },

    /// The device identity is not registered at the endpoint.
    #[error("device identity not found: {reason}")]
    NotFound { reason: String },

    /// Transient failure (network, throttling, service busy).
    #[error("transient failure: {reason}")]
    Transient { reason: String },

    /// Non-retryable failure that is not a credential problem.
    #[error("terminal failure: {reason}")]
    Terminal { reason: String },

    /// Provisioning step failed before a client existed.
    #[error("registration failed (retryable={retryable}): {reason}")]
    Registration { reason: String, retryable: bool },
}

impl ConnectError {
    /// Maps the failure onto the manager's retry policy.
    ///
    /// # Example
    /// ```
    /// use fleetvisor::{ConnectError, FailureClass};
    ///
    /// let err = ConnectError::Transient { reason: "busy".into() };
    /// assert_eq!(err.classify(), FailureClass::Retryable);
    /// ```
    pub fn classify(&self) -> FailureClass {
        match self {
            ConnectError::Unauthorized { .. } | ConnectError::NotFound { .. } => {
                FailureClass::Fatal
            }
            ConnectError::Transient { .. } => FailureClass::Retryable,
            ConnectError::Terminal { .. } => FailureClass::Terminal,
            ConnectError::Registration { retryable, .. } => {
                if *retryable {
                    FailureClass::Retryable
                } else {
                    FailureClass::Terminal
                }
            }
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConnectError::Unauthorized { .. } => "connect_unauthorized",
            ConnectError::NotFound { .. } => "connect_not_found",
            ConnectError::Transient { .. } => "connect_transient",
            ConnectError::Terminal { .. } => "connect_terminal",
            ConnectError::Registration { .. } => "connect_registration",
        }
    }
}

/// Outbound message delivery failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("send failed ({code}, retryable={retryable})")]
pub struct SendError {
    /// Status code reported by the client (e.g. `throttled`, `too_large`).
    pub code: String,
    pub retryable: bool,
}

impl SendError {
    pub fn retryable(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            retryable: true,
        }
    }

    pub fn permanent(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            retryable: false,
        }
    }
}

/// # Errors raised by a worker cycle.
///
/// Any of these ends the worker; the manager restarts it on the same connection.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Work cycle failed.
    #[error("work cycle failed: {reason}")]
    Cycle { reason: String },

    /// Work cycle panicked; the panic was caught at the worker boundary.
    #[error("work cycle panicked: {info}")]
    Panicked { info: String },
}

impl WorkerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::Cycle { .. } => "worker_cycle_failed",
            WorkerError::Panicked { .. } => "worker_panicked",
        }
    }
}

/// # Rejected control requests.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("device with id '{id}' not found")]
    NotFound { id: String },

    #[error("device with id '{id}' already exists")]
    AlreadyExists { id: String },

    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition { from: DeviceStatus, to: DeviceStatus },

    #[error("invalid environment '{value}'; valid values are: DEV, TEST, PROD")]
    InvalidEnvironment { value: String },
}

impl ControlError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ControlError::NotFound { .. } => "control_not_found",
            ControlError::AlreadyExists { .. } => "control_already_exists",
            ControlError::InvalidTransition { .. } => "control_invalid_transition",
            ControlError::InvalidEnvironment { .. } => "control_invalid_environment",
        }
    }
}

/// # Errors produced by the fleetvisor runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some managers did not stop in time.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        grace: Duration,
        /// Device ids whose managers were still running.
        stuck: Vec<String>,
    },

    /// A device's credentials can never succeed (malformed or expired with no renewal).
    ///
    /// The runtime does not exit the process; the embedding application decides.
    #[error("credentials rejected for device {device}: {reason}")]
    CredentialsRejected {
        device: String,
        reason: ChangeReason,
    },

    /// Installing OS signal handlers failed.
    #[error("signal handler registration failed: {0}")]
    Signal(#[from] std::io::Error),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use fleetvisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::CredentialsRejected { .. } => "runtime_credentials_rejected",
            RuntimeError::Signal(_) => "runtime_signal",
        }
    }
}
