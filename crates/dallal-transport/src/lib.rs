//! # Dallal Transport
//!
//! Network resilience layer for the Dallal dashboard client.
//!
//! Two halves, both independent of the concrete HTTP or WebSocket library:
//!
//! - **Request orchestration**: [`RequestOrchestrator`] wraps any
//!   [`Transport`] with a TTL cache, in-flight deduplication, retry with
//!   exponential backoff and a single credential refresh on 401.
//! - **Streaming sessions**: [`SessionController`] owns one WebSocket
//!   connection with an explicit state machine, bounded reconnect,
//!   consumer-supplied decoding and automatic keepalive replies. The
//!   interactive terminal and the log tail in [`consumers`] are built on it.
//!
//! ## Features
//!
//! - `http` (default): [`ReqwestTransport`](http::ReqwestTransport)
//! - `websocket` (default): [`TungsteniteConnector`](websocket::TungsteniteConnector)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use dallal_transport::{
//!     OrchestratorConfig, RequestOptions, RequestOrchestrator,
//!     http::{HttpConfig, ReqwestTransport},
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(ReqwestTransport::new(HttpConfig::default())?);
//!     let api = RequestOrchestrator::new(OrchestratorConfig::new("https://dash.local/api"), transport)?;
//!
//!     let services = api.get("/services", RequestOptions::new()).await?;
//!     println!("{services}");
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod consumers;
pub mod error;
pub mod fingerprint;
pub mod inflight;
pub mod orchestrator;
pub mod reconnect;
pub mod retry;
pub mod transport;
pub mod websocket;

#[cfg(feature = "http")]
pub mod http;

// Re-export commonly used types
pub use auth::{CredentialProvider, NoCredentials, RefreshingCredentials, StaticCredentials};
pub use clock::{Clock, ManualClock, Sleeper, SystemClock, TokioSleeper};
pub use config::{OrchestratorConfig, websocket_url};
pub use error::{ErrorKind, RequestError, SessionError, TransportError, TransportResult};
pub use fingerprint::RequestFingerprint;
pub use orchestrator::{OrchestratorStats, RequestOptions, RequestOrchestrator};
pub use reconnect::{Backoff, ReconnectPolicy};
pub use retry::RetryPolicy;
pub use transport::{Method, Request, RequestId, Response, Transport};
pub use websocket::{
    CloseReason, EnvelopeDecoder, Frame, FrameDecoder, FrameKind, RawDecoder, SessionConfig,
    SessionController, SessionState, StateChange,
};
