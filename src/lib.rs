//! evalstream Library
//!
//! Client for a streaming batch-evaluation service. Submits a batch of
//! conversation items for scoring, decodes the line-oriented event stream
//! that comes back, reconciles results into a keyed view, and reports live
//! progress. Dropped connections are reopened with bounded backoff and only
//! unfinished items are resubmitted.

pub mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;
pub mod prelude;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};
