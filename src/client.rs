//! # Connection client contract.
//!
//! The wire protocol lives outside this crate. A [`Provisioner`] registers a device
//! and hands back a fresh [`ConnectionClient`]; the manager opens, closes and
//! observes it. Clients report asynchronously from their own tasks:
//!
//! ```text
//! ConnectionClient ──► StatusHandler(StatusChange)       (connection state changes)
//!                  ──► MessageHandler::on_message        (inbound message)
//!                  ──► MessageHandler::on_message_sent   (send completion)
//!                  ──► MethodHandler::on_method          (remote invocation)
//! ```
//!
//! ## Rules
//! - Handlers must never call `open`/`close` on the client that invoked them.
//! - Handlers return quickly; heavy work belongs to the worker loop.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::device::Device;
use crate::error::{ConnectError, SendError};

/// Shared handle to a client.
pub type ClientRef = Arc<dyn ConnectionClient>;

/// Callback for connection status changes.
pub type StatusHandler = Arc<dyn Fn(StatusChange) + Send + Sync>;

/// Connection state reported by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    /// The client is retrying internally; nothing to do yet.
    DisconnectedRetrying,
    /// Terminal disconnect; someone must re-open.
    Disconnected,
}

/// Why a client changed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeReason {
    ConnectionOk,
    /// Closed intentionally by the local side.
    ClientClose,
    CommunicationError,
    NoNetwork,
    RetryExpired,
    /// Credentials are malformed; no retry can ever succeed.
    BadCredential,
    /// Session token expired and there is no renewal path.
    ExpiredToken,
}

impl ChangeReason {
    /// True when the credential material can never succeed again.
    #[inline]
    pub fn is_credential_fatal(&self) -> bool {
        matches!(self, ChangeReason::BadCredential | ChangeReason::ExpiredToken)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeReason::ConnectionOk => "connection_ok",
            ChangeReason::ClientClose => "client_close",
            ChangeReason::CommunicationError => "communication_error",
            ChangeReason::NoNetwork => "no_network",
            ChangeReason::RetryExpired => "retry_expired",
            ChangeReason::BadCredential => "bad_credential",
            ChangeReason::ExpiredToken => "expired_token",
        }
    }
}

impl fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection state change delivered to a [`StatusHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub status: ConnectionStatus,
    pub reason: ChangeReason,
    pub previous: ConnectionStatus,
}

impl StatusChange {
    /// A disconnect the manager must react to by re-opening.
    #[inline]
    pub fn needs_reopen(&self) -> bool {
        self.status == ConnectionStatus::Disconnected && self.reason != ChangeReason::ClientClose
    }

    /// Credentials can never succeed: a bad credential on any status, or an
    /// expired token that ended the session.
    pub fn rejects_credentials(&self) -> bool {
        match self.reason {
            ChangeReason::BadCredential => true,
            ChangeReason::ExpiredToken => self.status == ConnectionStatus::Disconnected,
            _ => false,
        }
    }
}

/// Outbound or inbound protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub correlation_id: String,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(correlation_id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            payload: payload.into(),
        }
    }
}

/// Result of handling an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageAck {
    Complete,
    Abandon,
    Reject,
}

/// Remote operation invoked on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRequest {
    pub name: String,
    pub payload: Option<Vec<u8>>,
}

/// Answer to a [`MethodRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodResponse {
    pub status: u16,
    pub payload: Option<Vec<u8>>,
}

impl MethodResponse {
    pub fn ok() -> Self {
        Self {
            status: 200,
            payload: None,
        }
    }
}

/// Inbound message and send-completion callbacks.
pub trait MessageHandler: Send + Sync + 'static {
    /// Inbound message; answered synchronously.
    fn on_message(&self, message: &Message) -> MessageAck;

    /// Completion of a [`ConnectionClient::send`].
    fn on_message_sent(&self, message: Message, result: Result<(), SendError>);
}

/// Remote invocation callback.
pub trait MethodHandler: Send + Sync + 'static {
    fn on_method(&self, request: &MethodRequest) -> MethodResponse;
}

/// One network session to the remote endpoint.
///
/// Implementations are adapters over a concrete protocol client.
#[async_trait]
pub trait ConnectionClient: Send + Sync + 'static {
    /// Opens the session. `retryable_hint` lets the adapter retry internally.
    async fn open(&self, retryable_hint: bool) -> Result<(), ConnectError>;

    /// Closes the session. Closing a closed client is a no-op.
    async fn close(&self);

    /// Current connection state.
    fn status(&self) -> ConnectionStatus;

    /// Installs the connection status callback (replaces any previous one).
    fn set_status_handler(&self, handler: StatusHandler);

    /// Installs the inbound message / send completion callback.
    fn set_message_handler(&self, handler: Arc<dyn MessageHandler>);

    /// Subscribes to remote invocations.
    fn subscribe_to_methods(&self, handler: Arc<dyn MethodHandler>);

    /// Queues a message; completion is reported via [`MessageHandler::on_message_sent`].
    fn send(&self, message: Message);
}

/// Registration / provisioning step.
///
/// Treated as part of "open" for retry purposes; its own retry policy is the
/// adapter's business.
#[async_trait]
pub trait Provisioner: Send + Sync + 'static {
    /// Registers the device and returns a fresh, unopened client.
    async fn register(&self, device: &Device) -> Result<ClientRef, ConnectError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unintentional_terminal_disconnect_needs_reopen() {
        let change = |status, reason| StatusChange {
            status,
            reason,
            previous: ConnectionStatus::Connected,
        };
        assert!(change(ConnectionStatus::Disconnected, ChangeReason::NoNetwork).needs_reopen());
        assert!(!change(ConnectionStatus::Disconnected, ChangeReason::ClientClose).needs_reopen());
        assert!(
            !change(ConnectionStatus::DisconnectedRetrying, ChangeReason::NoNetwork).needs_reopen()
        );
    }

    #[test]
    fn credential_fatal_reasons() {
        assert!(ChangeReason::BadCredential.is_credential_fatal());
        assert!(ChangeReason::ExpiredToken.is_credential_fatal());
        assert!(!ChangeReason::RetryExpired.is_credential_fatal());
    }

    #[test]
    fn expired_token_rejects_only_once_disconnected() {
        let change = |status, reason| StatusChange {
            status,
            reason,
            previous: ConnectionStatus::Connected,
        };
        assert!(change(ConnectionStatus::Connected, ChangeReason::BadCredential).rejects_credentials());
        assert!(change(ConnectionStatus::Disconnected, ChangeReason::ExpiredToken).rejects_credentials());
        assert!(
            !change(ConnectionStatus::DisconnectedRetrying, ChangeReason::ExpiredToken)
                .rejects_credentials()
        );
    }
}
