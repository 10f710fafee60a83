//! Application constants for evalstream
//!
//! This module centralizes all constants used throughout the application,
//! organized by functional domain for maintainability and clarity.

use std::time::Duration;

/// Environment variable names
pub mod env {
    /// Overrides the scoring service base URL
    pub const BASE_URL: &str = "EVALSTREAM_URL";

    /// Overrides the group key sent with each batch
    pub const GROUP_KEY: &str = "EVALSTREAM_GROUP_KEY";
}

/// HTTP client configuration constants
pub mod http {
    use super::Duration;

    /// Default user agent for all HTTP requests
    pub const USER_AGENT: &str = concat!("evalstream/", env!("CARGO_PKG_VERSION"));

    /// Default scoring service base URL
    pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

    /// Batch streaming endpoint, relative to the base URL
    pub const BATCH_STREAM_PATH: &str = "evaluate/batch/stream";

    /// Connection establishment timeout
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// TCP keep-alive interval
    pub const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

    /// Connection pool idle timeout
    pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

    /// Accept header for the event stream
    pub const EVENT_STREAM_MIME: &str = "text/event-stream";
}

/// Wire protocol markers
pub mod wire {
    /// Prefix of a data line
    pub const DATA_PREFIX: &str = "data:";

    /// Prefix of an event-name line
    pub const EVENT_PREFIX: &str = "event:";

    /// Prefix of an SSE comment line
    pub const COMMENT_PREFIX: char = ':';

    /// Envelope discriminator field
    pub const TYPE_FIELD: &str = "type";

    /// Envelope body field
    pub const DATA_FIELD: &str = "data";

    /// Primary item identifier field, followed by its aliases
    pub const ID_FIELDS: [&str; 2] = ["id", "conversation_id"];

    /// Containers searched for a nested identifier, in order
    pub const NESTED_ID_CONTAINERS: [&str; 2] = ["data", "result"];

    /// Fields that may name the item an error frame refers to
    pub const ERROR_SCOPE_FIELDS: [&str; 3] = ["item_id", "id", "conversation_id"];

    /// Fields that may carry an error message
    pub const ERROR_MESSAGE_FIELDS: [&str; 3] = ["message", "error", "detail"];

    /// Message used when a server error frame carries no text
    pub const UNKNOWN_SERVER_ERROR: &str = "unknown server error";

    /// Prefix of identifiers assigned to results that carry none
    pub const SYNTHETIC_ID_PREFIX: &str = "unmatched-";
}

/// Reconnect and timeout configuration
pub mod limits {
    use super::Duration;

    /// Maximum reconnect attempts after the initial connection
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

    /// Base delay for exponential backoff (milliseconds)
    pub const RETRY_BASE_DELAY_MS: u64 = 1000;

    /// Maximum backoff delay (seconds)
    pub const MAX_BACKOFF_SECS: u64 = 60;

    /// Jitter factor for randomizing delays (0.0-1.0)
    pub const BACKOFF_JITTER_FACTOR: f64 = 0.1;

    /// Time allowed from issuing a request to the first byte of the stream
    pub const FIRST_BYTE_TIMEOUT: Duration = Duration::from_secs(30);

    /// Longest silence tolerated on an open stream
    pub const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

    /// Default concurrency requested from the scoring service
    pub const DEFAULT_MAX_CONCURRENCY: u32 = 10;

    /// Upper bound accepted for the requested concurrency
    pub const MAX_CONCURRENCY_LIMIT: u32 = 100;
}

/// Progress reporting
pub mod progress {
    use super::Duration;

    /// Wall-clock interval between metric recomputations
    pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

    /// Lower bound on elapsed seconds when computing throughput
    pub const ELAPSED_EPSILON_SECS: f64 = 1e-3;

    /// Label shown for an unknown ETA
    pub const UNKNOWN_ETA: &str = "unknown";
}

/// Configuration file locations
pub mod config {
    /// Project-local configuration file name
    pub const LOCAL_FILE_NAME: &str = "evalstream.toml";

    /// Directory under the user config dir
    pub const APP_DIR_NAME: &str = "evalstream";

    /// File name inside the user config dir
    pub const FILE_NAME: &str = "config.toml";

    /// Default group key sent with a batch
    pub const DEFAULT_GROUP_KEY: &str = "default";
}

// Re-export commonly used constants for convenience
pub use http::{BATCH_STREAM_PATH, DEFAULT_BASE_URL, USER_AGENT};
pub use limits::{MAX_RECONNECT_ATTEMPTS, RETRY_BASE_DELAY_MS};
