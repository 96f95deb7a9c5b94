//! Reconnect policy for streaming sessions.

use std::time::Duration;

use rand::Rng;

/// How the reconnect delay grows with the attempt number.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Backoff {
    /// `base * attempt`
    Linear,
    /// `base * factor^(attempt - 1)`
    Exponential { factor: f64 },
}

/// Bounded reconnect policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReconnectPolicy {
    /// Reconnect attempts allowed after a drop before giving up.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
    pub max_delay: Duration,
    /// Random jitter factor (0.0-1.0) blended into each delay.
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff: Backoff::Linear,
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
        }
    }
}

impl ReconnectPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never reconnect.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    #[must_use]
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    #[must_use]
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.base_delay.is_zero() {
            return Err("Initial reconnect delay must be > 0".to_string());
        }
        if self.max_delay < self.base_delay {
            return Err("Max reconnect delay must be >= initial reconnect delay".to_string());
        }
        if let Backoff::Exponential { factor } = self.backoff
            && (factor < 1.0 || !factor.is_finite())
        {
            return Err("Backoff factor must be >= 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter) || !self.jitter.is_finite() {
            return Err("Jitter must be between 0.0 and 1.0".to_string());
        }
        Ok(())
    }

    /// Delay before reconnect attempt `attempt` (1-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = self.base_delay.as_secs_f64();
        let raw = match self.backoff {
            Backoff::Linear => base * f64::from(attempt),
            Backoff::Exponential { factor } => {
                base * factor.powi(i32::try_from(attempt - 1).unwrap_or(i32::MAX))
            }
        };
        let capped = raw.min(self.max_delay.as_secs_f64());

        if self.jitter == 0.0 {
            return Duration::from_secs_f64(capped);
        }

        let mut rng = rand::rng();
        let randomized = rng.random_range(0.0..=capped);
        let blended = capped * (1.0 - self.jitter) + randomized * self.jitter;
        Duration::from_secs_f64(blended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_delays() {
        let policy = ReconnectPolicy::new().base_delay(Duration::from_secs(2));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
        assert_eq!(policy.delay(3), Duration::from_secs(6));
    }

    #[test]
    fn test_exponential_delays_are_capped() {
        let policy = ReconnectPolicy::new()
            .backoff(Backoff::Exponential { factor: 2.0 })
            .max_delay(Duration::from_secs(5));
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(4), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_below_base() {
        let policy = ReconnectPolicy::new().jitter(0.5);
        for _ in 0..32 {
            let delay = policy.delay(2);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_secs(2));
        }
    }

    #[test]
    fn test_validation() {
        assert!(ReconnectPolicy::default().validate().is_ok());
        assert!(ReconnectPolicy::disabled().validate().is_ok());
        assert_eq!(
            ReconnectPolicy::new()
                .base_delay(Duration::ZERO)
                .validate()
                .unwrap_err(),
            "Initial reconnect delay must be > 0"
        );
        assert_eq!(
            ReconnectPolicy::new()
                .backoff(Backoff::Exponential { factor: 0.5 })
                .validate()
                .unwrap_err(),
            "Backoff factor must be >= 1.0"
        );
        assert_eq!(
            ReconnectPolicy::new().jitter(1.5).validate().unwrap_err(),
            "Jitter must be between 0.0 and 1.0"
        );
    }
}
