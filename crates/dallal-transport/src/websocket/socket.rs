//! Socket primitive consumed by the session controller.

use async_trait::async_trait;

use super::types::Frame;
use crate::error::TransportResult;

/// One live socket. Protocol-level ping/pong and close frames are handled
/// by the implementation and never surface from `recv`.
#[async_trait]
pub trait Socket: Send + 'static {
    async fn send(&mut self, frame: Frame) -> TransportResult<()>;

    /// Next data frame; `None` once the peer closed the stream.
    async fn recv(&mut self) -> Option<TransportResult<Frame>>;

    async fn close(&mut self) -> TransportResult<()>;
}

/// Opens sockets.
#[async_trait]
pub trait SocketConnector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> TransportResult<Box<dyn Socket>>;
}
