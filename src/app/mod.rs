//! Core streaming evaluation pipeline
//!
//! Data flows one way through the components:
//!
//! network bytes → [`FrameDecoder`] → [`WireEvent`]s → [`ResultReconciler`]
//! (keyed store) → [`ProgressSnapshot`] → [`PipelineOutcome`]s
//!
//! [`ConnectionController`] owns the request lifetime and reconnects, and
//! [`EvaluationPipeline`] ties everything together behind `start`.
//!
//! # Examples
//!
//! ```rust,no_run
//! use evalstream::app::{BatchItem, ClientConfig, EvaluationPipeline, PipelineConfig, PipelineOutcome};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut pipeline = EvaluationPipeline::http(&ClientConfig::default())?;
//! let handle = pipeline.start(vec![BatchItem::new("conv-1")], PipelineConfig::default())?;
//!
//! if let PipelineOutcome::Completed(snapshot) = handle.finish().await {
//!     for record in &snapshot.records {
//!         println!("{}: {}", record.item_id, record.status);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod decoder;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod reconciler;

// Re-export main public API
pub use client::{ChunkStream, ClientConfig, HttpTransport, Transport};
pub use connection::{
    ConnectionController, ConnectionPhase, ConnectionState, FailureAction, ReconnectPolicy,
};
pub use decoder::{DecoderStats, FrameDecoder};
pub use models::{
    BatchItem, BatchRequest, EventKind, RecordOrigin, RecordStatus, ResultPayload, ResultRecord,
    WireEvent,
};
pub use pipeline::{BatchHandle, BatchSnapshot, EvaluationPipeline, PipelineConfig, PipelineOutcome};
pub use progress::{format_duration, format_seconds, ProgressSnapshot};
pub use reconciler::{Applied, DataAnomaly, ReconciledStore, ResultReconciler};
