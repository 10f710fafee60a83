//! Configuration management for evalstream
//!
//! This module provides the TOML configuration document, multi-source
//! loading (explicit path, project-local file, user config directory) and
//! environment overrides on top of zero-config defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app::{ClientConfig, PipelineConfig, ReconnectPolicy};
use crate::constants::{config as files, env, http, limits, progress};
use crate::errors::{ConfigError, ConfigResult};

/// Unified application configuration for TOML serialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Scoring service connection settings
    pub client: ClientConfigToml,
    /// Batch run settings
    pub pipeline: PipelineConfigToml,
    /// Reconnect behaviour
    pub reconnect: ReconnectPolicy,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// TOML-friendly client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfigToml {
    /// Scoring service base URL
    pub base_url: String,
    /// Batch streaming endpoint, relative to the base URL
    pub endpoint_path: String,
    /// Connect timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// TCP keep-alive interval (unset = disabled)
    #[serde(with = "humantime_serde")]
    pub tcp_keepalive: Option<Duration>,
    /// TCP nodelay setting
    pub tcp_nodelay: bool,
    /// Connection pool idle timeout (unset = no timeout)
    #[serde(with = "humantime_serde")]
    pub pool_idle_timeout: Option<Duration>,
}

impl Default for ClientConfigToml {
    fn default() -> Self {
        Self {
            base_url: http::DEFAULT_BASE_URL.to_string(),
            endpoint_path: http::BATCH_STREAM_PATH.to_string(),
            connect_timeout: http::CONNECT_TIMEOUT,
            tcp_keepalive: Some(http::TCP_KEEPALIVE),
            tcp_nodelay: true,
            pool_idle_timeout: Some(http::POOL_IDLE_TIMEOUT),
        }
    }
}

/// TOML-friendly pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfigToml {
    /// Grouping key forwarded with each batch
    pub group_key: String,
    /// Concurrency requested from the scoring service
    pub max_concurrency: u32,
    /// Limit from request to first byte
    #[serde(with = "humantime_serde")]
    pub first_byte_timeout: Duration,
    /// Longest silence tolerated on an open stream
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// Metrics refresh interval
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
}

impl Default for PipelineConfigToml {
    fn default() -> Self {
        Self {
            group_key: files::DEFAULT_GROUP_KEY.to_string(),
            max_concurrency: limits::DEFAULT_MAX_CONCURRENCY,
            first_byte_timeout: limits::FIRST_BYTE_TIMEOUT,
            idle_timeout: limits::IDLE_TIMEOUT,
            tick_interval: progress::TICK_INTERVAL,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level used when no verbosity flag is given
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration with multi-source precedence:
    /// 1. Default values
    /// 2. Config file (explicit path, else first one found)
    /// 3. Environment variables
    ///
    /// CLI arguments are applied afterwards by the caller.
    pub async fn load(config_file_override: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = match config_file_override {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound { path });
                }
                Self::load_from_file(&path).await?
            }
            None => match Self::find_config_file() {
                Some(path) => Self::load_from_file(&path).await?,
                None => Self::default(),
            },
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `EVALSTREAM_*` overrides using the given variable lookup
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(env::BASE_URL).filter(|v| !v.trim().is_empty()) {
            debug!("Base URL overridden by {}", env::BASE_URL);
            self.client.base_url = url;
        }
        if let Some(group_key) = lookup(env::GROUP_KEY).filter(|v| !v.trim().is_empty()) {
            debug!("Group key overridden by {}", env::GROUP_KEY);
            self.pipeline.group_key = group_key;
        }
    }

    /// Validate every section
    pub fn validate(&self) -> ConfigResult<()> {
        self.client_config().validate()?;
        self.pipeline_config().validate()
    }

    /// Runtime HTTP client configuration
    pub fn client_config(&self) -> ClientConfig {
        self.client.to_runtime_config()
    }

    /// Runtime pipeline configuration, including the reconnect policy
    pub fn pipeline_config(&self) -> PipelineConfig {
        self.pipeline.to_runtime_config(&self.reconnect)
    }

    /// Configuration files searched when no explicit path is given
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(files::LOCAL_FILE_NAME)];
        if let Ok(user) = Self::default_config_path() {
            paths.push(user);
        }
        paths
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        for path in Self::search_paths() {
            if path.exists() {
                debug!("Found config file: {}", path.display());
                return Some(path);
            }
        }

        debug!("No config file found in standard locations");
        None
    }

    /// Get the default config file path for the current user
    pub fn default_config_path() -> ConfigResult<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::NotFound {
            path: PathBuf::from("<user config directory>"),
        })?;

        Ok(config_dir.join(files::APP_DIR_NAME).join(files::FILE_NAME))
    }

    /// Load configuration from a TOML file
    pub async fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let config: AppConfig =
            toml::from_str(&content).map_err(|e| ConfigError::InvalidFormat {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Write the commented default configuration to `path`
    ///
    /// Refuses to overwrite an existing file unless `force` is set.
    pub async fn write_default(path: &Path, force: bool) -> ConfigResult<()> {
        if path.exists() && !force {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                reason: "file already exists (use --force to overwrite)".to_string(),
            });
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ConfigError::Io {
                    path: parent.to_path_buf(),
                    reason: e.to_string(),
                })?;
        }

        tokio::fs::write(path, Self::generate_default_config_content())
            .await
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        info!("Wrote default configuration to {}", path.display());
        Ok(())
    }

    /// Effective configuration as TOML
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidFormat {
            path: PathBuf::from("<effective configuration>"),
            reason: e.to_string(),
        })
    }

    /// Generate default configuration content with helpful comments
    pub fn generate_default_config_content() -> String {
        format!(
            r#"# evalstream configuration
# Durations accept humantime strings such as "500ms", "30s" or "2m".

[client]
# Scoring service (overridden by the {url_env} environment variable)
base_url = "{base_url}"
endpoint_path = "{endpoint}"
connect_timeout = "10s"
tcp_keepalive = "30s"
tcp_nodelay = true
pool_idle_timeout = "90s"

[pipeline]
# Forwarded to the service with every batch
group_key = "{group_key}"
max_concurrency = {concurrency}
# Time allowed from request to the first byte of the stream
first_byte_timeout = "30s"
# Longest silence tolerated once the stream is open
idle_timeout = "90s"
# How often progress is refreshed without new events
tick_interval = "1s"

[reconnect]
auto_reconnect = true
# Consecutive failures tolerated before the run fails
max_attempts = {attempts}
# Delay doubles per attempt: base, 2x base, 4x base, ... up to max_delay
base_delay = "1s"
max_delay = "1m"
jitter_factor = {jitter}

[logging]
# Used when no -v / -q flag is given: error, warn, info, debug, trace
level = "warn"
"#,
            url_env = env::BASE_URL,
            base_url = http::DEFAULT_BASE_URL,
            endpoint = http::BATCH_STREAM_PATH,
            group_key = files::DEFAULT_GROUP_KEY,
            concurrency = limits::DEFAULT_MAX_CONCURRENCY,
            attempts = limits::MAX_RECONNECT_ATTEMPTS,
            jitter = limits::BACKOFF_JITTER_FACTOR,
        )
    }
}

impl ClientConfigToml {
    /// Convert to runtime ClientConfig
    pub fn to_runtime_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url.clone(),
            endpoint_path: self.endpoint_path.clone(),
            user_agent: http::USER_AGENT.to_string(),
            connect_timeout: self.connect_timeout,
            tcp_keepalive: self.tcp_keepalive,
            tcp_nodelay: self.tcp_nodelay,
            pool_idle_timeout: self.pool_idle_timeout,
        }
    }
}

impl PipelineConfigToml {
    /// Convert to runtime PipelineConfig
    pub fn to_runtime_config(&self, reconnect: &ReconnectPolicy) -> PipelineConfig {
        PipelineConfig {
            group_key: self.group_key.clone(),
            max_concurrency: self.max_concurrency,
            first_byte_timeout: self.first_byte_timeout,
            idle_timeout: self.idle_timeout,
            tick_interval: self.tick_interval,
            reconnect: reconnect.clone(),
        }
    }
}
