//! Prelude module for the evalstream library
//!
//! Re-exports the items needed for typical usage with a single
//! `use evalstream::prelude::*;` statement.
//!
//! # Usage
//!
//! ```rust,no_run
//! use evalstream::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut pipeline = EvaluationPipeline::http(&ClientConfig::default())?;
//!     let items = vec![BatchItem::new("conv-1")];
//!     let outcome = pipeline.start(items, PipelineConfig::default())?.finish().await;
//!     println!("{}", outcome.label());
//!     Ok(())
//! }
//! ```

// Core result types
pub use crate::errors::{AppError, PipelineError, Result, TransportError};

// Facade and the types consumers read
pub use crate::app::{
    BatchHandle, BatchItem, BatchSnapshot, ClientConfig, DataAnomaly, EvaluationPipeline,
    PipelineConfig, PipelineOutcome, ProgressSnapshot, ReconnectPolicy, RecordStatus,
    ResultRecord, Transport,
};

// Configuration file support
pub use crate::config::AppConfig;

// Commonly used constants
pub use crate::constants::{BATCH_STREAM_PATH, DEFAULT_BASE_URL, USER_AGENT};

pub use std::sync::Arc;

pub use tokio;
