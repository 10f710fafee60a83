//! Reconnect policy and backoff delay calculation

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::limits;
use crate::errors::{ConfigError, ConfigResult};

/// When and how often a dropped stream is reopened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Reopen the stream after a retryable transport failure
    pub auto_reconnect: bool,
    /// Consecutive failed attempts tolerated before giving up
    pub max_attempts: u32,
    /// Delay before the first reconnect
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Upper bound on any single delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Random spread applied to each delay (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            max_attempts: limits::MAX_RECONNECT_ATTEMPTS,
            base_delay: Duration::from_millis(limits::RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_secs(limits::MAX_BACKOFF_SECS),
            jitter_factor: limits::BACKOFF_JITTER_FACTOR,
        }
    }
}

impl ReconnectPolicy {
    /// Policy that never reconnects
    pub fn disabled() -> Self {
        Self {
            auto_reconnect: false,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// Whether another attempt is allowed after `attempt` consecutive failures
    pub fn allows_retry(&self, attempt: u32) -> bool {
        self.auto_reconnect && attempt < self.max_attempts
    }

    /// Delay before reconnect number `attempt` (1-based), without jitter
    ///
    /// `base * 2^(attempt-1)`, capped at `max_delay`.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let base_millis = self.base_delay.as_millis() as u64;
        let exponent = attempt.saturating_sub(1);
        let multiplier = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let capped = std::cmp::min(
            base_millis.saturating_mul(multiplier),
            self.max_delay.as_millis() as u64,
        );
        Duration::from_millis(capped)
    }

    /// Delay before reconnect number `attempt`, with jitter applied
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt).as_millis() as u64;

        // Spread reconnects from many clients after a shared outage
        let jitter_range = (nominal as f64 * self.jitter_factor) as u64;
        let jittered = if jitter_range > 0 {
            let offset = fastrand::u64(0..=jitter_range * 2);
            (nominal + offset).saturating_sub(jitter_range)
        } else {
            nominal
        };

        Duration::from_millis(jittered)
    }

    /// Validate the policy
    pub fn validate(&self) -> ConfigResult<()> {
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::invalid(
                "reconnect.jitter_factor",
                self.jitter_factor,
                "jitter factor must be between 0.0 and 1.0",
            ));
        }
        if self.base_delay.is_zero() {
            return Err(ConfigError::invalid(
                "reconnect.base_delay",
                "0s",
                "base delay must be greater than zero",
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::invalid(
                "reconnect.max_delay",
                format!("{:?}", self.max_delay),
                "max delay cannot be shorter than the base delay",
            ));
        }
        Ok(())
    }
}
