//! Stream consumers: thin glue that gives a [`SessionController`] a URL and a
//! decoder and turns its events into something a UI can render. Neither
//! consumer reconnects on its own.
//!
//! [`SessionController`]: crate::websocket::SessionController

mod log_tail;
mod terminal;

pub use log_tail::{DEFAULT_LOG_CAPACITY, LogTail};
pub use terminal::{TerminalSession, TerminalTarget};

use crate::{config::websocket_url, error::SessionError};

fn session_url(base_url: &str, path: &str) -> Result<String, SessionError> {
    websocket_url(base_url, path).map_err(|e| SessionError::Config {
        message: e.to_string(),
    })
}
