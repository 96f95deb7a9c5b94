//! Interactive SSH terminal over a raw pass-through session.

use std::{fmt, sync::Arc};

use serde_json::json;

use super::session_url;
use crate::{
    error::SessionError,
    websocket::{Frame, RawDecoder, SessionController, SessionState},
};

/// What the terminal connects to. The credentials are sent as the first
/// frame after every (re)connect.
#[derive(Clone)]
pub enum TerminalTarget {
    /// A service registered in the dashboard.
    Service {
        service_id: String,
        username: String,
        password: String,
    },
    /// An arbitrary host.
    Custom {
        host: String,
        port: u16,
        username: String,
        password: String,
    },
}

impl TerminalTarget {
    pub fn path(&self) -> String {
        match self {
            Self::Service { service_id, .. } => format!("/ws/ssh/{service_id}"),
            Self::Custom { .. } => "/ws/ssh/custom".to_string(),
        }
    }

    /// Authentication payload expected by the terminal endpoint.
    pub fn handshake(&self) -> Frame {
        let payload = match self {
            Self::Service {
                username, password, ..
            } => json!({"username": username, "password": password}),
            Self::Custom {
                host,
                port,
                username,
                password,
            } => json!({
                "host": host,
                "port": port,
                "username": username,
                "password": password,
            }),
        };
        Frame::text(payload.to_string())
    }

    /// Short human-readable name.
    pub fn label(&self) -> String {
        match self {
            Self::Service { service_id, .. } => format!("service {service_id}"),
            Self::Custom { host, port, .. } => format!("{host}:{port}"),
        }
    }
}

impl fmt::Debug for TerminalTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service {
                service_id,
                username,
                ..
            } => f
                .debug_struct("Service")
                .field("service_id", service_id)
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Custom {
                host,
                port,
                username,
                ..
            } => f
                .debug_struct("Custom")
                .field("host", host)
                .field("port", port)
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// Keystrokes go out verbatim, output comes back verbatim.
pub struct TerminalSession {
    session: SessionController,
}

impl TerminalSession {
    pub fn new(session: SessionController) -> Self {
        Self { session }
    }

    /// Connect to `target` through the dashboard at `base_url`.
    pub async fn connect(&self, base_url: &str, target: &TerminalTarget) -> Result<(), SessionError> {
        let url = session_url(base_url, &target.path())?;
        tracing::info!(terminal = %target.label(), "Opening terminal session");
        let decoder = RawDecoder::new().with_handshake(target.handshake());
        self.session.open(url, Arc::new(decoder)).await
    }

    /// Forward raw input. Dropped with [`SessionError::NotConnected`] while
    /// the socket is down.
    pub fn send_input(&self, input: &str) -> Result<(), SessionError> {
        self.session.send(Frame::text(input))
    }

    /// Send one command line.
    pub fn send_command(&self, command: &str) -> Result<(), SessionError> {
        self.session.send(Frame::text(format!("{command}\n")))
    }

    /// Render terminal output.
    pub fn on_output(&self, render: impl Fn(&str) + Send + Sync + 'static) {
        self.session.on_data(move |frame| render(&frame.to_text_lossy()));
    }

    pub fn is_connected(&self) -> bool {
        self.session.state() == SessionState::Open
    }

    pub fn session(&self) -> &SessionController {
        &self.session
    }

    pub async fn close(&self) {
        self.session.close().await;
    }
}
