//! Frame decoders supplied by stream consumers.
//!
//! The [`FrameDecoder`] trait is the only protocol knowledge a session has:
//! it classifies inbound frames, builds keepalive replies and optionally
//! provides frames to send as soon as a socket opens.

use serde_json::{Value, json};

use super::types::{Decoded, Frame, FrameKind};

/// Trait for interpreting one stream protocol.
pub trait FrameDecoder: Send + Sync + 'static {
    /// Classify an inbound frame.
    fn decode(&self, frame: Frame) -> Decoded;

    /// Reply to a decoded keepalive ping, if the protocol expects one.
    fn pong(&self, ping: &Decoded) -> Option<Frame> {
        let _ = ping;
        None
    }

    /// Frames to send immediately after every successful connect, before
    /// the session reports `Open`.
    fn handshake(&self) -> Vec<Frame> {
        Vec::new()
    }
}

/// Pass-through decoder for protocols without an envelope. Every frame is
/// data.
#[derive(Clone, Debug, Default)]
pub struct RawDecoder {
    handshake: Vec<Frame>,
}

impl RawDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `frame` after every connect.
    #[must_use]
    pub fn with_handshake(mut self, frame: Frame) -> Self {
        self.handshake.push(frame);
        self
    }
}

impl FrameDecoder for RawDecoder {
    fn decode(&self, frame: Frame) -> Decoded {
        Decoded::data(frame)
    }

    fn handshake(&self) -> Vec<Frame> {
        self.handshake.clone()
    }
}

/// Decoder for `{"type": ...}` JSON envelopes.
///
/// | `type`                      | kind    | payload                 |
/// |-----------------------------|---------|-------------------------|
/// | `log`                       | Data    | the `data` field        |
/// | `status`, `cleared`, `pong` | Status  | the frame               |
/// | `error`                     | Error   | the `message` field     |
/// | `ping`                      | Ping    | the frame               |
///
/// Anything else, including non-JSON frames, is [`FrameKind::Unknown`].
#[derive(Clone, Debug)]
pub struct EnvelopeDecoder {
    data_type: String,
    data_field: String,
}

impl Default for EnvelopeDecoder {
    fn default() -> Self {
        Self {
            data_type: "log".to_string(),
            data_field: "data".to_string(),
        }
    }
}

impl EnvelopeDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the envelope type and field that carry data payloads.
    #[must_use]
    pub fn data_type(mut self, kind: impl Into<String>, field: impl Into<String>) -> Self {
        self.data_type = kind.into();
        self.data_field = field.into();
        self
    }
}

fn field_frame(value: &Value, field: &str) -> Option<Frame> {
    match value.get(field)? {
        Value::String(s) => Some(Frame::text(s.clone())),
        Value::Null => None,
        other => Some(Frame::text(other.to_string())),
    }
}

impl FrameDecoder for EnvelopeDecoder {
    fn decode(&self, frame: Frame) -> Decoded {
        let Ok(value) = serde_json::from_slice::<Value>(frame.as_bytes()) else {
            return Decoded::unknown(frame);
        };
        let Some(kind) = value.get("type").and_then(Value::as_str) else {
            return Decoded::unknown(frame);
        };

        if kind == self.data_type {
            return match field_frame(&value, &self.data_field) {
                Some(payload) => Decoded::data(payload),
                None => Decoded::unknown(frame),
            };
        }
        match kind {
            "ping" => Decoded::new(FrameKind::Ping, frame),
            "status" | "cleared" | "pong" => Decoded::new(FrameKind::Status, frame),
            "error" => {
                let payload = field_frame(&value, "message").unwrap_or(frame);
                Decoded::new(FrameKind::Error, payload)
            }
            _ => Decoded::unknown(frame),
        }
    }

    fn pong(&self, _ping: &Decoded) -> Option<Frame> {
        Some(Frame::text(json!({"type": "pong"}).to_string()))
    }
}
