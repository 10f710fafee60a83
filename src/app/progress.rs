//! Progress metrics derived from the reconciled store
//!
//! Everything here is a pure function of the store contents and the two
//! instants passed in, so the same snapshot can be recomputed on every
//! applied event and again on the periodic tick.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::app::models::RecordStatus;
use crate::app::reconciler::ReconciledStore;
use crate::constants::progress;

/// Point-in-time progress of a batch run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Submitted items, fixed at batch start
    pub total: usize,
    /// Submitted items with a result
    pub completed: usize,
    /// Submitted items the server reported as failed
    pub failed: usize,
    /// Submitted items still waiting
    pub pending: usize,
    /// Records that arrived for items never submitted
    pub unmatched: usize,
    /// Completed items per second since the run started
    pub throughput_per_sec: f64,
    /// Estimated seconds remaining; `None` while throughput is zero
    pub eta_seconds: Option<f64>,
    pub elapsed_seconds: f64,
}

impl ProgressSnapshot {
    /// Derive a snapshot from the store and elapsed time
    pub fn compute(store: &ReconciledStore, started: Instant, now: Instant) -> Self {
        let elapsed = now.saturating_duration_since(started);
        Self::from_counts(
            store.submitted(),
            store.count_submitted(RecordStatus::Completed),
            store.count_submitted(RecordStatus::Failed),
            store.count_unmatched(),
            elapsed,
        )
    }

    /// Derive a snapshot from raw counters
    pub fn from_counts(
        total: usize,
        completed: usize,
        failed: usize,
        unmatched: usize,
        elapsed: Duration,
    ) -> Self {
        let elapsed_seconds = elapsed.as_secs_f64();
        let throughput_per_sec =
            completed as f64 / elapsed_seconds.max(progress::ELAPSED_EPSILON_SECS);
        let pending = total.saturating_sub(completed + failed);

        let eta_seconds = if pending == 0 {
            Some(0.0)
        } else if throughput_per_sec > 0.0 {
            Some(total.saturating_sub(completed) as f64 / throughput_per_sec)
        } else {
            None
        };

        Self {
            total,
            completed,
            failed,
            pending,
            unmatched,
            throughput_per_sec,
            eta_seconds,
            elapsed_seconds,
        }
    }

    /// Calculate total processed items (completed + failed)
    pub fn processed(&self) -> usize {
        self.completed + self.failed
    }

    /// Calculate completion percentage
    pub fn completion_percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.processed() as f64 / self.total as f64) * 100.0
    }

    /// Check if every submitted item reached a terminal status
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.pending == 0
    }

    /// ETA as a human-readable string
    pub fn format_eta(&self) -> String {
        match self.eta_seconds {
            Some(seconds) => format_seconds(seconds),
            None => progress::UNKNOWN_ETA.to_string(),
        }
    }

    /// Elapsed time as a human-readable string
    pub fn format_elapsed(&self) -> String {
        format_seconds(self.elapsed_seconds)
    }

    /// Throughput as a human-readable string
    pub fn format_throughput(&self) -> String {
        if self.throughput_per_sec >= 1.0 || self.throughput_per_sec == 0.0 {
            format!("{:.1} items/s", self.throughput_per_sec)
        } else {
            format!("{:.1} items/min", self.throughput_per_sec * 60.0)
        }
    }
}

/// Format seconds as `45s`, `2m 5s` or `1h 3m`
pub fn format_seconds(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return progress::UNKNOWN_ETA.to_string();
    }
    format_duration(Duration::from_secs(seconds.round() as u64))
}

/// Format a duration as `45s`, `2m 5s` or `1h 3m`
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
