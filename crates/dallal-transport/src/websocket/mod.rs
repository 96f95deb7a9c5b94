//! Resilient streaming sessions over WebSocket.
//!
//! A [`SessionController`] owns exactly one live socket at a time and drives
//! it through an explicit state machine:
//!
//! ```text
//! ┌──────────┐  open()  ┌────────────┐  socket up  ┌──────┐
//! │   Idle   │─────────▶│ Connecting │────────────▶│ Open │
//! └──────────┘          └─────┬──────┘             └──┬───┘
//!                             │ fail                  │ drop / idle
//!                             ▼                       ▼
//!                       ┌───────────┐  delay   ┌──────────────┐
//!                       │   Error   │─────────▶│ Reconnecting │──▶ Connecting
//!                       └─────┬─────┘          └──────────────┘
//!                             │ attempts exhausted
//!                             ▼
//!                       ┌───────────┐
//!                       │  Closed   │◀── Closing ◀── close() from any state
//!                       └───────────┘
//! ```
//!
//! What the bytes mean is left to a consumer-supplied [`FrameDecoder`]:
//! data frames reach `on_data` in arrival order, keepalive pings are answered
//! by the session itself, status and error frames go to `on_state_change`.
//!
//! # Module Structure
//!
//! - `types`: frames, decoded kinds and session states
//! - `decoder`: the decoder trait plus raw and JSON-envelope decoders
//! - `socket`: the socket primitive the session drives
//! - `config`: session configuration
//! - `session`: the controller and its driver task
//! - `tungstenite`: socket adapter over tokio-tungstenite (feature `websocket`)

mod config;
mod decoder;
mod session;
mod socket;
mod types;

#[cfg(feature = "websocket")]
mod tungstenite;

pub use config::SessionConfig;
pub use decoder::{EnvelopeDecoder, FrameDecoder, RawDecoder};
pub use session::SessionController;
pub use socket::{Socket, SocketConnector};
#[cfg(feature = "websocket")]
pub use tungstenite::{TungsteniteConnector, TungsteniteSocket};
pub use types::{CloseReason, Decoded, Frame, FrameKind, SessionState, StateChange};
