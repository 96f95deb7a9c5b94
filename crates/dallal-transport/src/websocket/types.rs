//! Core type definitions for streaming sessions.

use std::{fmt, time::Duration};

use bytes::Bytes;

/// One WebSocket data frame. Control frames never leave the socket adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    /// Create a text frame.
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Create a binary frame.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::Binary(data.into())
    }

    /// Get as text if this is a text frame.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Binary(_) => None,
        }
    }

    /// Get as bytes regardless of frame type.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(s) => s.as_bytes(),
            Self::Binary(b) => b,
        }
    }

    /// Text content, decoding binary frames as lossy UTF-8.
    pub fn to_text_lossy(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Binary(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }
}

impl From<String> for Frame {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Frame {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Self::Binary(data.into())
    }
}

/// Generic meaning of an inbound frame, as decided by a
/// [`FrameDecoder`](super::decoder::FrameDecoder).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Payload for the consumer.
    Data,
    /// Informational; surfaced through the state-change channel.
    Status,
    /// Remote-reported error; logged and surfaced, the socket stays open.
    Error,
    /// Keepalive ping; answered by the session, never surfaced.
    Ping,
    /// Not recognized; forwarded raw as data.
    Unknown,
}

/// Decoder output: a kind and the payload to deliver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decoded {
    pub kind: FrameKind,
    pub payload: Frame,
}

impl Decoded {
    pub fn new(kind: FrameKind, payload: Frame) -> Self {
        Self { kind, payload }
    }

    pub fn data(payload: Frame) -> Self {
        Self::new(FrameKind::Data, payload)
    }

    pub fn unknown(payload: Frame) -> Self {
        Self::new(FrameKind::Unknown, payload)
    }
}

/// Why a session reached [`SessionState::Closed`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The consumer called `close()`.
    Requested,
    /// Reconnect attempts ran out.
    Exhausted { attempts: u32 },
}

/// Session state machine states.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Never opened.
    Idle,
    /// Establishing a socket. `attempt` is 0 for the first connect.
    Connecting { attempt: u32 },
    /// Socket established, traffic flows.
    Open,
    /// Waiting `delay` before reconnect attempt `attempt`.
    Reconnecting { attempt: u32, delay: Duration },
    /// The socket failed while connecting or open.
    Error { message: String },
    /// `close()` in progress.
    Closing,
    /// Terminal until the next `open()`.
    Closed { reason: CloseReason },
}

impl SessionState {
    /// Check if the session accepts `send`.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Check if the session is closed (terminal state).
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connecting { attempt } => write!(f, "connecting (attempt {attempt})"),
            Self::Open => f.write_str("open"),
            Self::Reconnecting { attempt, delay } => {
                write!(f, "reconnecting (attempt {attempt} in {delay:?})")
            }
            Self::Error { message } => write!(f, "error: {message}"),
            Self::Closing => f.write_str("closing"),
            Self::Closed {
                reason: CloseReason::Requested,
            } => f.write_str("closed"),
            Self::Closed {
                reason: CloseReason::Exhausted { attempts },
            } => write!(f, "closed after {attempts} reconnect attempt(s)"),
        }
    }
}

/// Event delivered to `on_state_change` listeners.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateChange {
    Transition(SessionState),
    /// A decoded `status` frame.
    Status(Frame),
    /// A decoded `error` frame.
    RemoteError(Frame),
}
