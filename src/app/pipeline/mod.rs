//! Pipeline facade
//!
//! The only entry point consumers use. [`EvaluationPipeline::start`] seeds a
//! fresh run, spawns the task that drives it, and returns a [`BatchHandle`]
//! yielding tagged [`PipelineOutcome`]s: any number of `Snapshot`s followed
//! by exactly one of `Completed`, `Failed` or `Cancelled`.
//!
//! Snapshots are coalesced: a consumer that falls behind gets the newest
//! snapshot, not a backlog of every intermediate one.
//!
//! The module is organized into specialized components:
//!
//! - [`config`] - Per-run configuration and validation
//! - [`outcome`] - Snapshot and outcome types
//! - `run` - The task driving one run
//!
//! # Examples
//!
//! ```rust,no_run
//! use evalstream::app::{BatchItem, ClientConfig, EvaluationPipeline, PipelineConfig, PipelineOutcome};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut pipeline = EvaluationPipeline::http(&ClientConfig::default())?;
//! let items = vec![BatchItem::new("conv-1"), BatchItem::new("conv-2")];
//! let mut handle = pipeline.start(items, PipelineConfig::default())?;
//!
//! while let Some(outcome) = handle.next_outcome().await {
//!     match outcome {
//!         PipelineOutcome::Snapshot(s) => println!("{:.0}%", s.progress.completion_percentage()),
//!         PipelineOutcome::Completed(s) => println!("done: {} results", s.progress.completed),
//!         PipelineOutcome::Failed { error, .. } => eprintln!("failed: {}", error),
//!         PipelineOutcome::Cancelled(_) => eprintln!("cancelled"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod outcome;
mod run;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::app::client::{ClientConfig, HttpTransport, Transport};
use crate::app::models::BatchItem;
use crate::app::progress::ProgressSnapshot;
use crate::errors::{PipelineResult, TransportResult};

pub use config::PipelineConfig;
pub use outcome::{BatchSnapshot, PipelineOutcome};

use run::BatchRunContext;

/// Cancellation switch shared by a run's handle and the pipeline
#[derive(Debug)]
struct RunControl {
    run_id: u64,
    cancelled: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RunControl {
    /// Abort the run task; returns false if it was already cancelled
    fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Ok(mut task) = self.task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
        debug!("Batch run {} cancelled", self.run_id);
        true
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Starts batch runs against one transport
///
/// At most one run is active: starting a new run cancels the previous one
/// before its replacement is seeded.
pub struct EvaluationPipeline {
    transport: Arc<dyn Transport>,
    active: Option<Arc<RunControl>>,
    next_run_id: u64,
}

impl std::fmt::Debug for EvaluationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationPipeline")
            .field("active", &self.active.as_ref().map(|c| c.run_id))
            .field("next_run_id", &self.next_run_id)
            .finish()
    }
}

impl EvaluationPipeline {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            active: None,
            next_run_id: 1,
        }
    }

    /// Pipeline talking HTTP to the configured scoring service
    pub fn http(config: &ClientConfig) -> TransportResult<Self> {
        Ok(Self::new(Arc::new(HttpTransport::new(config)?)))
    }

    /// Start a batch run
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - `Config` if `config` fails validation
    /// - `InvalidBatch` for an empty batch or empty/duplicate item ids
    pub fn start(
        &mut self,
        items: Vec<BatchItem>,
        config: PipelineConfig,
    ) -> PipelineResult<BatchHandle> {
        config.validate()?;
        self.cancel_active();

        let run_id = self.next_run_id;
        self.next_run_id += 1;

        let (terminal_tx, terminal_rx) = mpsc::unbounded_channel();
        let (context, latest) = BatchRunContext::new(
            run_id,
            items,
            config,
            Arc::clone(&self.transport),
            terminal_tx,
        )?;

        let control = Arc::new(RunControl {
            run_id,
            cancelled: AtomicBool::new(false),
            task: Mutex::new(None),
        });
        let task = tokio::spawn(context.run());
        if let Ok(mut slot) = control.task.lock() {
            *slot = Some(task);
        }
        self.active = Some(Arc::clone(&control));

        Ok(BatchHandle {
            run_id,
            terminal: terminal_rx,
            latest,
            watching: true,
            control,
            done: false,
        })
    }

    /// Cancel the active run, if any
    pub fn cancel_active(&mut self) -> bool {
        match self.active.take() {
            Some(control) => {
                let cancelled = control.cancel();
                if cancelled {
                    info!("Cancelled batch run {} before starting a new one", control.run_id);
                }
                cancelled
            }
            None => false,
        }
    }
}

/// Consumer side of one batch run
///
/// Dropping the handle cancels the run.
#[derive(Debug)]
pub struct BatchHandle {
    run_id: u64,
    /// Receives the single terminal outcome
    terminal: mpsc::UnboundedReceiver<PipelineOutcome>,
    latest: watch::Receiver<BatchSnapshot>,
    /// Cleared once the run task dropped its snapshot sender
    watching: bool,
    control: Arc<RunControl>,
    /// A terminal outcome has been handed out
    done: bool,
}

impl BatchHandle {
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Next outcome, or `None` after the terminal one
    ///
    /// A `Snapshot` is the newest published state; snapshots superseded
    /// before this is called are skipped. Once the run is cancelled, a
    /// single `Cancelled` is returned instead.
    pub async fn next_outcome(&mut self) -> Option<PipelineOutcome> {
        if self.done {
            return None;
        }
        if self.control.is_cancelled() {
            return self.cancelled_outcome();
        }

        loop {
            tokio::select! {
                biased;

                outcome = self.terminal.recv() => {
                    if self.control.is_cancelled() {
                        return self.cancelled_outcome();
                    }
                    return match outcome {
                        Some(outcome) => {
                            self.done = true;
                            Some(outcome)
                        }
                        // The task ended without a terminal outcome; only
                        // an abort does that
                        None => {
                            self.done = true;
                            None
                        }
                    };
                }
                changed = self.latest.changed(), if self.watching => {
                    if changed.is_err() {
                        self.watching = false;
                        continue;
                    }
                    if self.control.is_cancelled() {
                        return self.cancelled_outcome();
                    }
                    let snapshot = self.latest.borrow_and_update().clone();
                    return Some(PipelineOutcome::Snapshot(snapshot));
                }
            }
        }
    }

    fn cancelled_outcome(&mut self) -> Option<PipelineOutcome> {
        self.done = true;
        Some(PipelineOutcome::Cancelled(self.latest()))
    }

    /// Latest published snapshot
    pub fn latest(&self) -> BatchSnapshot {
        self.latest.borrow().clone()
    }

    /// Latest progress metrics, for polling consumers
    pub fn progress(&self) -> ProgressSnapshot {
        self.latest.borrow().progress.clone()
    }

    /// Cancel the run
    ///
    /// No further `Snapshot`, `Completed` or `Failed` outcome is delivered
    /// after this returns. A no-op once a terminal outcome was handed out.
    pub fn cancel(&mut self) -> bool {
        if self.done {
            return false;
        }
        let cancelled = self.control.cancel();
        self.terminal.close();
        cancelled
    }

    /// Whether the run was cancelled, by this handle or by a newer run
    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    /// Wait for the terminal outcome, skipping intermediate snapshots
    pub async fn finish(mut self) -> PipelineOutcome {
        let mut last = None;
        while let Some(outcome) = self.next_outcome().await {
            if outcome.is_terminal() {
                return outcome;
            }
            last = Some(outcome);
        }
        // Only reachable if the task vanished without reporting
        PipelineOutcome::Cancelled(
            last.map(|o| o.snapshot().clone())
                .unwrap_or_else(|| self.latest()),
        )
    }

    /// Consume the handle as a stream of outcomes
    pub fn into_stream(self) -> impl Stream<Item = PipelineOutcome> {
        futures::stream::unfold(self, |mut handle| async move {
            handle.next_outcome().await.map(|outcome| (outcome, handle))
        })
    }
}

impl Drop for BatchHandle {
    fn drop(&mut self) {
        if !self.done {
            self.control.cancel();
        }
    }
}
