//! HTTP client configuration and building logic
//!
//! This module handles the configuration and construction of the reqwest
//! client used to hold a long-lived event stream open against the scoring
//! service.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::http;
use crate::errors::{ConfigError, ConfigResult, TransportError, TransportResult};

/// Configuration for the streaming HTTP client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Scoring service base URL
    pub base_url: String,
    /// Batch streaming endpoint, relative to `base_url`
    pub endpoint_path: String,
    /// User agent sent with every request
    pub user_agent: String,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// TCP keep-alive settings
    pub tcp_keepalive: Option<Duration>,
    /// TCP nodelay (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
    /// Connection pool idle timeout
    pub pool_idle_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: http::DEFAULT_BASE_URL.to_string(),
            endpoint_path: http::BATCH_STREAM_PATH.to_string(),
            user_agent: http::USER_AGENT.to_string(),
            connect_timeout: http::CONNECT_TIMEOUT,
            tcp_keepalive: Some(http::TCP_KEEPALIVE),
            tcp_nodelay: true,
            pool_idle_timeout: Some(http::POOL_IDLE_TIMEOUT),
        }
    }
}

impl ClientConfig {
    /// Configuration pointing at a specific service
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        self.stream_url()?;
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "client.connect_timeout",
                "0s",
                "connect timeout must be greater than zero",
            ));
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::invalid(
                "client.user_agent",
                "",
                "user agent cannot be empty",
            ));
        }
        Ok(())
    }

    /// Absolute URL of the batch streaming endpoint
    ///
    /// The base URL is treated as a directory so that a service mounted
    /// under a path prefix keeps that prefix.
    pub fn stream_url(&self) -> ConfigResult<Url> {
        let mut base = Url::parse(&self.base_url).map_err(|e| {
            ConfigError::invalid("client.base_url", &self.base_url, &e.to_string())
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(
                "client.base_url",
                &self.base_url,
                "scheme must be http or https",
            ));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(self.endpoint_path.trim_start_matches('/'))
            .map_err(|e| ConfigError::invalid("client.endpoint_path", &self.endpoint_path, &e.to_string()))
    }

    /// Builds the HTTP client with the specified configuration
    ///
    /// No overall request timeout is set: the stream legitimately stays
    /// open for the whole batch. First-byte and idle limits are enforced by
    /// the connection controller instead.
    pub fn build_http_client(&self) -> TransportResult<Client> {
        let mut client_builder = Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(self.user_agent.as_str())
            .tcp_nodelay(self.tcp_nodelay);

        if let Some(keepalive) = self.tcp_keepalive {
            client_builder = client_builder.tcp_keepalive(keepalive);
        }

        if let Some(idle_timeout) = self.pool_idle_timeout {
            client_builder = client_builder.pool_idle_timeout(idle_timeout);
        }

        client_builder.build().map_err(|e| TransportError::Request {
            reason: e.to_string(),
        })
    }
}
