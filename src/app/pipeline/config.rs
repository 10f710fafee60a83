//! Configuration for a batch run
//!
//! Groups what is sent with the request (`group_key`, `max_concurrency`)
//! with the timing and reconnect behaviour of the stream.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::connection::ReconnectPolicy;
use crate::constants::{config, limits, progress};
use crate::errors::{ConfigError, ConfigResult};

/// Configuration for one batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Grouping key forwarded to the scoring service
    pub group_key: String,
    /// Concurrency the service should use for this batch
    pub max_concurrency: u32,
    /// Limit from issuing a request to its first byte
    #[serde(with = "humantime_serde")]
    pub first_byte_timeout: Duration,
    /// Longest silence tolerated on an open stream
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// How often metrics are recomputed without new events
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    /// Reconnect behaviour
    pub reconnect: ReconnectPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            group_key: config::DEFAULT_GROUP_KEY.to_string(),
            max_concurrency: limits::DEFAULT_MAX_CONCURRENCY,
            first_byte_timeout: limits::FIRST_BYTE_TIMEOUT,
            idle_timeout: limits::IDLE_TIMEOUT,
            tick_interval: progress::TICK_INTERVAL,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Set the group key
    pub fn with_group_key(mut self, group_key: impl Into<String>) -> Self {
        self.group_key = group_key.into();
        self
    }

    /// Set the requested concurrency
    pub fn with_max_concurrency(mut self, max_concurrency: u32) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Set the first-byte and idle timeouts
    pub fn with_timeouts(mut self, first_byte: Duration, idle: Duration) -> Self {
        self.first_byte_timeout = first_byte;
        self.idle_timeout = idle;
        self
    }

    /// Set the metrics tick interval
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Replace the reconnect policy
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.group_key.trim().is_empty() {
            return Err(ConfigError::invalid(
                "pipeline.group_key",
                &self.group_key,
                "group key cannot be empty",
            ));
        }

        if self.max_concurrency == 0 || self.max_concurrency > limits::MAX_CONCURRENCY_LIMIT {
            return Err(ConfigError::invalid(
                "pipeline.max_concurrency",
                self.max_concurrency,
                &format!("must be between 1 and {}", limits::MAX_CONCURRENCY_LIMIT),
            ));
        }

        for (field, value) in [
            ("pipeline.first_byte_timeout", self.first_byte_timeout),
            ("pipeline.idle_timeout", self.idle_timeout),
            ("pipeline.tick_interval", self.tick_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::invalid(field, "0s", "cannot be zero"));
            }
        }

        self.reconnect.validate()
    }
}
