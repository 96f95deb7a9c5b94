//! Live container log tailing over a JSON-envelope session.

use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;
use serde_json::{Value, json};

use super::session_url;
use crate::{
    error::SessionError,
    websocket::{EnvelopeDecoder, Frame, SessionController, StateChange},
};

/// Lines kept by default before the oldest are dropped.
pub const DEFAULT_LOG_CAPACITY: usize = 5000;

/// Bounded line buffer fed by a log stream.
struct LineBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl LineBuffer {
    fn push_chunk(&mut self, chunk: &str) {
        for line in chunk.lines() {
            if self.lines.len() == self.capacity {
                self.lines.pop_front();
            }
            self.lines.push_back(line.to_string());
        }
    }
}

/// Tails one container's logs.
///
/// `clear()` asks the server to clear; the local buffer empties when the
/// server acknowledges with `{"type":"cleared"}`.
pub struct LogTail {
    session: SessionController,
    buffer: Arc<Mutex<LineBuffer>>,
}

impl LogTail {
    pub fn new(session: SessionController, capacity: usize) -> Self {
        let buffer = Arc::new(Mutex::new(LineBuffer {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }));

        let sink = Arc::clone(&buffer);
        session.on_data(move |frame| sink.lock().push_chunk(&frame.to_text_lossy()));

        let acked = Arc::clone(&buffer);
        session.on_state_change(move |change| {
            if let StateChange::Status(frame) = change
                && is_cleared_ack(frame)
            {
                acked.lock().lines.clear();
            }
        });

        Self { session, buffer }
    }

    /// Start following `container` through the dashboard at `base_url`.
    /// Re-following tears down the previous stream first.
    pub async fn follow(&self, base_url: &str, container: &str) -> Result<(), SessionError> {
        let url = session_url(base_url, &format!("/ws/logs/{container}"))?;
        tracing::info!(container, "Following container logs");
        self.session
            .open(url, Arc::new(EnvelopeDecoder::new()))
            .await
    }

    /// Snapshot of the buffered lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.buffer.lock().lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().lines.is_empty()
    }

    /// Drop the local buffer without telling the server.
    pub fn reset(&self) {
        self.buffer.lock().lines.clear();
    }

    /// Ask the server to clear the stream.
    pub fn clear(&self) -> Result<(), SessionError> {
        self.session
            .send(Frame::text(json!({"command": "clear"}).to_string()))
    }

    pub fn session(&self) -> &SessionController {
        &self.session
    }

    pub async fn close(&self) {
        self.session.close().await;
    }
}

fn is_cleared_ack(frame: &Frame) -> bool {
    serde_json::from_slice::<Value>(frame.as_bytes())
        .ok()
        .and_then(|v| v.get("type").and_then(Value::as_str).map(|t| t == "cleared"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_is_bounded() {
        let mut buffer = LineBuffer {
            lines: VecDeque::new(),
            capacity: 3,
        };
        buffer.push_chunk("a\nb\n");
        buffer.push_chunk("c\nd\ne");
        assert_eq!(buffer.lines, ["c", "d", "e"]);
    }

    #[test]
    fn test_cleared_ack_detection() {
        assert!(is_cleared_ack(&Frame::text(r#"{"type":"cleared"}"#)));
        assert!(!is_cleared_ack(&Frame::text(r#"{"type":"status","status":"connected"}"#)));
        assert!(!is_cleared_ack(&Frame::text("cleared")));
    }
}
