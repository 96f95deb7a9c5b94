//! Error types for the transport layer.
//!
//! Three layers of failure are modelled separately:
//!
//! - [`TransportError`]: a single adapter call failed (network, timeout, socket).
//! - [`RequestError`]: the settled outcome of one logical orchestrated request,
//!   tagged with its [`ErrorKind`], optional status and the number of attempts.
//! - [`SessionError`]: a streaming session refused an operation.

use std::{string::FromUtf8Error, time::Duration};

use thiserror::Error;

/// The result type used by transport adapters.
pub type TransportResult<T> = Result<T, TransportError>;

/// Failure of a single adapter call.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Connection could not be established or was lost mid-flight.
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// The adapter gave up waiting.
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// WebSocket level failure.
    #[error("WebSocket error: {message}")]
    WebSocket { message: String },

    /// The remote closed the stream.
    #[error("Connection closed: {reason}")]
    ConnectionClosed { reason: String },

    /// Payload could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Credential acquisition or refresh failed.
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// Invalid configuration.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}

impl From<FromUtf8Error> for TransportError {
    fn from(e: FromUtf8Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}

impl From<url::ParseError> for TransportError {
    fn from(e: url::ParseError) -> Self {
        Self::Config {
            message: format!("invalid url: {e}"),
        }
    }
}

impl TransportError {
    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create a WebSocket error.
    pub fn websocket(message: impl Into<String>) -> Self {
        Self::WebSocket {
            message: message.into(),
        }
    }

    /// Create a connection-closed error.
    pub fn connection_closed(reason: Option<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.unwrap_or_else(|| "closed by peer".to_string()),
        }
    }

    /// Create an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Classification tag carried by every [`RequestError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 4xx-equivalent; never retried, never cached.
    Client,
    /// Network failure, 5xx or timeout; retried per policy, then surfaced.
    Transient,
    /// Credential refresh was attempted and did not help.
    Unauthenticated,
    /// The in-flight chain was cancelled before it settled.
    Cancelled,
    /// The request body could not be encoded or the response decoded.
    Serialization,
}

/// Settled failure of one logical orchestrated request.
///
/// Cloneable so a single outcome can be handed to every deduplicated waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("client error: status={status} after {attempts} attempt(s): {body}")]
    Client {
        status: u16,
        body: String,
        attempts: u32,
    },

    #[error("transient error after {attempts} attempt(s): {message}")]
    Transient {
        status: Option<u16>,
        message: String,
        attempts: u32,
    },

    #[error("unauthenticated: {message}")]
    Unauthenticated { message: String, attempts: u32 },

    #[error("request cancelled")]
    Cancelled { attempts: u32 },

    #[error("serialization error: {message}")]
    Serialization { message: String },
}

impl RequestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Client { .. } => ErrorKind::Client,
            Self::Transient { .. } => ErrorKind::Transient,
            Self::Unauthenticated { .. } => ErrorKind::Unauthenticated,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Serialization { .. } => ErrorKind::Serialization,
        }
    }

    /// HTTP status of the last response, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Client { status, .. } => Some(*status),
            Self::Transient { status, .. } => *status,
            Self::Unauthenticated { .. } => Some(401),
            Self::Cancelled { .. } | Self::Serialization { .. } => None,
        }
    }

    /// Number of transport attempts made across the whole chain.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Client { attempts, .. }
            | Self::Transient { attempts, .. }
            | Self::Unauthenticated { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
            Self::Serialization { .. } => 0,
        }
    }

    pub(crate) fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}

/// Failure reported by a streaming session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// `send` was called while the session was not `Open`.
    #[error("session is not connected")]
    NotConnected,

    /// Reconnect attempts ran out.
    #[error("session gave up after {attempts} reconnect attempt(s)")]
    SessionExhausted { attempts: u32 },

    /// The outbound queue of the open socket is full.
    #[error("outbound queue is full")]
    Backpressure,

    #[error("Configuration error: {message}")]
    Config { message: String },
}
