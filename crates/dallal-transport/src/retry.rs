//! Retry policy for orchestrated requests.

use std::time::Duration;

use crate::{error::TransportError, transport::Response};

/// Per-request retry policy: exponential backoff `base * multiplier^(attempt-1)`.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Growth factor applied for each further attempt.
    pub backoff_multiplier: f64,
    /// Cap applied to every computed delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

/// What a single attempt's outcome means for the retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptClass {
    Success,
    /// 401: credential expired.
    Unauthorized,
    /// Other 4xx: give up immediately.
    Client,
    /// Network failure, timeout, 5xx or anything unexpected.
    Transient,
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay to wait after attempt `attempt` (1-indexed) failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_ms = (self.base_delay.as_millis() as f64
            * self.backoff_multiplier.powi(exponent))
        .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(delay_ms as u64)
    }

    pub fn classify_response(response: &Response) -> AttemptClass {
        if response.is_success() {
            AttemptClass::Success
        } else if response.is_unauthorized() {
            AttemptClass::Unauthorized
        } else if response.is_client_error() {
            AttemptClass::Client
        } else {
            AttemptClass::Transient
        }
    }

    /// Payloads that failed to encode or decode fail identically on replay.
    pub fn classify_error(error: &TransportError) -> AttemptClass {
        match error {
            TransportError::Serialization { .. } => AttemptClass::Client,
            _ => AttemptClass::Transient,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("Retry max attempts must be > 0".to_string());
        }
        if self.backoff_multiplier < 1.0 || !self.backoff_multiplier.is_finite() {
            return Err("Backoff multiplier must be >= 1.0".to_string());
        }
        if self.max_delay < self.base_delay {
            return Err("Max retry delay must be >= base retry delay".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RequestId;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.backoff_multiplier, 2.0);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_exponential_delays() {
        let policy = RetryPolicy::new()
            .with_base_delay(Duration::from_millis(100))
            .with_backoff_multiplier(3.0);

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(300));
        assert_eq!(policy.delay_for(3), Duration::from_millis(900));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::new()
            .with_base_delay(Duration::from_secs(10))
            .with_max_delay(Duration::from_secs(15));
        assert_eq!(policy.delay_for(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(2), Duration::from_secs(15));
        assert_eq!(policy.delay_for(40), Duration::from_secs(15));
    }

    #[test]
    fn test_classification() {
        let classify = |status| RetryPolicy::classify_response(&Response::new(RequestId::new(), status, ""));
        assert_eq!(classify(204), AttemptClass::Success);
        assert_eq!(classify(401), AttemptClass::Unauthorized);
        assert_eq!(classify(404), AttemptClass::Client);
        assert_eq!(classify(429), AttemptClass::Client);
        assert_eq!(classify(502), AttemptClass::Transient);
        assert_eq!(
            RetryPolicy::classify_error(&TransportError::timeout(Duration::from_secs(1))),
            AttemptClass::Transient
        );
        assert_eq!(
            RetryPolicy::classify_error(&TransportError::connection("reset")),
            AttemptClass::Transient
        );
        let garbled = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(
            RetryPolicy::classify_error(&TransportError::from(garbled)),
            AttemptClass::Client
        );
    }

    #[test]
    fn test_validation() {
        assert_eq!(
            RetryPolicy::new().with_max_attempts(0).validate().unwrap_err(),
            "Retry max attempts must be > 0"
        );
        assert_eq!(
            RetryPolicy::new()
                .with_backoff_multiplier(0.5)
                .validate()
                .unwrap_err(),
            "Backoff multiplier must be >= 1.0"
        );
        assert!(RetryPolicy::none().validate().is_ok());
    }
}
