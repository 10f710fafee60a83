//! Values a batch run publishes to its consumer

use serde::Serialize;
use serde_json::Value;

use crate::app::connection::ConnectionState;
use crate::app::decoder::DecoderStats;
use crate::app::models::ResultRecord;
use crate::app::progress::ProgressSnapshot;
use crate::app::reconciler::DataAnomaly;
use crate::errors::PipelineError;

/// Complete view of a batch run at one point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSnapshot {
    pub run_id: u64,
    pub progress: ProgressSnapshot,
    pub connection: ConnectionState,
    /// Records in first-seen order
    pub records: Vec<ResultRecord>,
    /// Batch-level summary metadata, if the server sent any
    pub summary: Option<Value>,
    pub anomalies: Vec<DataAnomaly>,
    /// Wire-level counters across every connection of the run
    pub decoder: DecoderStats,
}

impl BatchSnapshot {
    pub fn record(&self, item_id: &str) -> Option<&ResultRecord> {
        self.records.iter().find(|r| r.item_id == item_id)
    }
}

/// One step of a batch run
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// Progress changed; more outcomes follow
    Snapshot(BatchSnapshot),
    /// The server ended the batch (or nothing was left to wait for)
    Completed(BatchSnapshot),
    /// The run failed; results reconciled so far are kept
    Failed {
        error: PipelineError,
        snapshot: BatchSnapshot,
    },
    /// The caller cancelled the run
    Cancelled(BatchSnapshot),
}

impl PipelineOutcome {
    /// Whether no further outcomes follow this one
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PipelineOutcome::Snapshot(_))
    }

    pub fn snapshot(&self) -> &BatchSnapshot {
        match self {
            PipelineOutcome::Snapshot(snapshot)
            | PipelineOutcome::Completed(snapshot)
            | PipelineOutcome::Cancelled(snapshot)
            | PipelineOutcome::Failed { snapshot, .. } => snapshot,
        }
    }

    /// Short label for logging
    pub fn label(&self) -> &'static str {
        match self {
            PipelineOutcome::Snapshot(_) => "snapshot",
            PipelineOutcome::Completed(_) => "completed",
            PipelineOutcome::Failed { .. } => "failed",
            PipelineOutcome::Cancelled(_) => "cancelled",
        }
    }
}
