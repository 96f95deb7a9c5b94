//! Streaming session configuration.

use std::time::Duration;

use crate::reconnect::ReconnectPolicy;

/// Configuration for a [`SessionController`](super::session::SessionController).
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub reconnect: ReconnectPolicy,
    /// Timeout for establishing one socket.
    pub connect_timeout: Duration,
    /// Treat the socket as dropped after this long without traffic.
    pub idle_timeout: Option<Duration>,
    /// Capacity of the per-connection outbound queue.
    pub outbound_capacity: usize,
    /// How long `close()` waits for the socket to shut down before aborting.
    pub close_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: None,
            outbound_capacity: 64,
            close_timeout: Duration::from_secs(2),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    #[must_use]
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.reconnect.validate()?;
        if self.connect_timeout.is_zero() {
            return Err("Connect timeout must be > 0".to_string());
        }
        if self.idle_timeout.is_some_and(|t| t.is_zero()) {
            return Err("Idle timeout must be > 0".to_string());
        }
        if self.outbound_capacity == 0 {
            return Err("Outbound capacity must be > 0".to_string());
        }
        if self.close_timeout.is_zero() {
            return Err("Close timeout must be > 0".to_string());
        }
        Ok(())
    }
}
