//! Error types for evalstream
//!
//! Errors are grouped by the component that raises them. Only
//! [`PipelineError`] ever reaches a pipeline consumer; transport and decode
//! problems are absorbed by the connection controller and reconciler.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Transport-level failures of a single connection attempt
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportError {
    /// Could not establish the connection
    #[error("Connection failed: {reason}")]
    Connect { reason: String },

    /// No response or first byte within the allowed time
    #[error("Timed out after {seconds} seconds waiting for the stream")]
    Timeout { seconds: u64 },

    /// Stream went silent for longer than the idle timeout
    #[error("Stream idle for more than {seconds} seconds")]
    Idle { seconds: u64 },

    /// Server answered with a non-success status
    #[error("Server responded with HTTP {status}")]
    Status { status: u16 },

    /// Reading the response body failed mid-stream
    #[error("Stream read failed: {reason}")]
    Read { reason: String },

    /// Stream closed before the end-of-batch frame
    #[error("Stream ended before the end-of-batch frame")]
    UnexpectedEof,

    /// The request could not be built or sent at all
    #[error("Invalid request: {reason}")]
    Request { reason: String },
}

impl TransportError {
    /// Whether a fresh connection attempt may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Connect { .. }
            | TransportError::Timeout { .. }
            | TransportError::Idle { .. }
            | TransportError::Read { .. }
            | TransportError::UnexpectedEof => true,
            TransportError::Status { status } => *status == 429 || *status >= 500,
            TransportError::Request { .. } => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            TransportError::Timeout { seconds: 0 }
        } else if error.is_connect() {
            TransportError::Connect {
                reason: error.to_string(),
            }
        } else if let Some(status) = error.status() {
            TransportError::Status {
                status: status.as_u16(),
            }
        } else if error.is_body() || error.is_decode() {
            TransportError::Read {
                reason: error.to_string(),
            }
        } else if error.is_builder() {
            TransportError::Request {
                reason: error.to_string(),
            }
        } else {
            TransportError::Connect {
                reason: error.to_string(),
            }
        }
    }
}

/// A result payload matched none of the known shapes
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PayloadError {
    /// Payload is not a JSON object
    #[error("Malformed result payload: expected an object, found {found}")]
    NotAnObject { found: String },

    /// Envelope present but its body is unusable
    #[error("Malformed result payload: {reason}")]
    MalformedEnvelope { reason: String },
}

/// Reconciler rejections
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconcileError {
    /// The end frame was already applied
    #[error("Result store is frozen; batch already ended")]
    Frozen,

    /// Result payload could not be decoded
    #[error(transparent)]
    MalformedPayload(#[from] PayloadError),
}

/// Errors surfaced to pipeline consumers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// The server sent an `error` frame for the whole batch
    #[error("Server reported an error: {message}")]
    Server { message: String },

    /// Reconnect attempts were exhausted
    #[error("Gave up after {attempts} connection attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: TransportError,
    },

    /// A transport failure that retrying cannot fix
    #[error("Fatal transport error: {0}")]
    Transport(TransportError),

    /// The submitted batch is unusable
    #[error("Invalid batch: {reason}")]
    InvalidBatch { reason: String },

    /// Pipeline configuration failed validation
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Invalid configuration format
    #[error("Invalid configuration format in {path}: {reason}")]
    InvalidFormat { path: PathBuf, reason: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}. {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// Could not read or write a configuration file
    #[error("Configuration file I/O failed for {path}: {reason}")]
    Io { path: PathBuf, reason: String },
}

impl ConfigError {
    /// Shorthand for an invalid field value
    pub fn invalid(field: &str, value: impl ToString, reason: &str) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Top-level application error that can represent any error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Pipeline error
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Transport error outside a pipeline run (client construction)
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Input document could not be parsed
    #[error("Invalid input file {path}: {reason}")]
    Input { path: PathBuf, reason: String },

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic application error with context
    #[error("Application error: {message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Check if the error is recoverable (transient)
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Transport(e) => e.is_retryable(),
            AppError::Pipeline(PipelineError::RetriesExhausted { .. }) => true,
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Pipeline(PipelineError::Server { .. }) => "server",
            AppError::Pipeline(_) => "pipeline",
            AppError::Transport(_) => "transport",
            AppError::Config(_) => "config",
            AppError::Input { .. } => "input",
            AppError::Io(_) => "io",
            AppError::Generic { .. } => "generic",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Transport result type alias
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Reconciler result type alias
pub type ReconcileResult<T> = std::result::Result<T, ReconcileError>;

/// Pipeline result type alias
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Configuration result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
