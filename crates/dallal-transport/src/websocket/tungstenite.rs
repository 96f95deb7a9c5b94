//! Socket adapter over `tokio-tungstenite`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{
    WebSocketStream, connect_async,
    tungstenite::{Error as WsError, Message},
};

use super::{
    socket::{Socket, SocketConnector},
    types::Frame,
};
use crate::error::{TransportError, TransportResult};

/// Connects with `tokio_tungstenite::connect_async`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SocketConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> TransportResult<Box<dyn Socket>> {
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| TransportError::connection(format!("Failed to connect to {url}: {e}")))?;
        tracing::debug!(url, status = %response.status(), "WebSocket handshake complete");
        Ok(Box::new(TungsteniteSocket::new(stream)))
    }
}

/// A tungstenite stream seen as a [`Socket`]. Protocol pings are answered by
/// tungstenite itself while reading.
pub struct TungsteniteSocket<S> {
    stream: WebSocketStream<S>,
}

impl<S> TungsteniteSocket<S> {
    pub fn new(stream: WebSocketStream<S>) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl<S> Socket for TungsteniteSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, frame: Frame) -> TransportResult<()> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data.to_vec()),
        };
        self.stream
            .send(message)
            .await
            .map_err(|e| TransportError::websocket(e.to_string()))
    }

    async fn recv(&mut self) -> Option<TransportResult<Frame>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Frame::Text(text))),
                Ok(Message::Binary(data)) => return Some(Ok(Frame::Binary(data.into()))),
                Ok(Message::Close(frame)) => {
                    tracing::debug!(frame = ?frame, "Peer closed the socket");
                    return None;
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return None,
                Err(e) => return Some(Err(TransportError::websocket(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) -> TransportResult<()> {
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::websocket(e.to_string())),
        }
    }
}
