//! The task driving one batch run
//!
//! A [`BatchRunContext`] is created per `start` call and owns everything the
//! run mutates: the connection controller and the reconciler. Nothing is
//! shared with other runs.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::config::PipelineConfig;
use super::outcome::{BatchSnapshot, PipelineOutcome};
use crate::app::client::Transport;
use crate::app::connection::{ConnectionController, ConnectionState, FailureAction};
use crate::app::decoder::DecoderStats;
use crate::app::models::{BatchItem, BatchRequest};
use crate::app::progress::ProgressSnapshot;
use crate::app::reconciler::{Applied, ResultReconciler};
use crate::errors::{PipelineError, PipelineResult, ReconcileError, TransportError};

/// Reconciled state plus the channels it is published on
///
/// Intermediate snapshots only replace the value in `latest`, so a consumer
/// that never drains them holds one snapshot at most. `terminal` carries the
/// single terminal outcome.
struct RunTracker {
    run_id: u64,
    reconciler: ResultReconciler,
    started: Instant,
    /// Decoder counters as of the last received event
    decoder: DecoderStats,
    terminal: mpsc::UnboundedSender<PipelineOutcome>,
    latest: watch::Sender<BatchSnapshot>,
}

impl RunTracker {
    fn snapshot(&self, connection: &ConnectionState) -> BatchSnapshot {
        let mut snapshot =
            build_snapshot(self.run_id, &self.reconciler, self.started, connection);
        snapshot.decoder = self.decoder;
        snapshot
    }

    /// Recompute metrics and publish an intermediate snapshot
    fn publish(&self, connection: &ConnectionState) {
        self.latest.send_replace(self.snapshot(connection));
    }

    fn complete(&self, connection: &ConnectionState) {
        let snapshot = self.snapshot(connection);
        info!(
            "Batch run {} completed: {}/{} completed, {} failed in {}",
            self.run_id,
            snapshot.progress.completed,
            snapshot.progress.total,
            snapshot.progress.failed,
            snapshot.progress.format_elapsed()
        );
        self.latest.send_replace(snapshot.clone());
        // A closed receiver means the consumer went away; the run is about
        // to be aborted anyway
        let _ = self.terminal.send(PipelineOutcome::Completed(snapshot));
    }

    fn fail(&self, error: PipelineError, connection: &ConnectionState) {
        let snapshot = self.snapshot(connection);
        error!("Batch run {} failed: {}", self.run_id, error);
        self.latest.send_replace(snapshot.clone());
        let _ = self.terminal.send(PipelineOutcome::Failed { error, snapshot });
    }
}

pub(crate) fn build_snapshot(
    run_id: u64,
    reconciler: &ResultReconciler,
    started: Instant,
    connection: &ConnectionState,
) -> BatchSnapshot {
    BatchSnapshot {
        run_id,
        progress: ProgressSnapshot::compute(reconciler.store(), started, Instant::now()),
        connection: connection.clone(),
        records: reconciler.store().records().to_vec(),
        summary: reconciler.summary().cloned(),
        anomalies: reconciler.anomalies().to_vec(),
        decoder: DecoderStats::default(),
    }
}

/// Per-run state, moved into the spawned task
pub(crate) struct BatchRunContext {
    items: Vec<BatchItem>,
    config: PipelineConfig,
    controller: ConnectionController,
    tracker: RunTracker,
}

impl BatchRunContext {
    /// Seed a fresh reconciler and build the run
    ///
    /// Returns the context and the snapshot the run starts from.
    pub(crate) fn new(
        run_id: u64,
        items: Vec<BatchItem>,
        config: PipelineConfig,
        transport: Arc<dyn Transport>,
        terminal: mpsc::UnboundedSender<PipelineOutcome>,
    ) -> PipelineResult<(Self, watch::Receiver<BatchSnapshot>)> {
        let mut reconciler = ResultReconciler::new();
        reconciler.seed(&items)?;

        let controller = ConnectionController::new(transport, config.reconnect.clone())
            .with_timeouts(config.first_byte_timeout, config.idle_timeout);

        let started = Instant::now();
        let initial = build_snapshot(run_id, &reconciler, started, controller.state());
        let (latest, latest_rx) = watch::channel(initial);

        let tracker = RunTracker {
            run_id,
            reconciler,
            started,
            decoder: DecoderStats::default(),
            terminal,
            latest,
        };

        Ok((
            Self {
                items,
                config,
                controller,
                tracker,
            },
            latest_rx,
        ))
    }

    /// Drive the run to a terminal outcome
    pub(crate) async fn run(mut self) {
        info!(
            "Batch run {} started with {} items",
            self.tracker.run_id,
            self.items.len()
        );

        let mut tick = interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        tick.tick().await;

        let mut request = self.request_for(None);
        loop {
            // Ticks while the request is in flight report `connecting`
            self.controller.begin_connect();
            let connecting = self.controller.state().clone();
            let opened = with_ticks(
                self.controller.open(request),
                &mut tick,
                &self.tracker,
                &connecting,
            )
            .await;

            let failure = match opened {
                Ok(()) => {
                    self.tracker.publish(self.controller.state());
                    match self.read_stream(&mut tick).await {
                        Some(failure) => failure,
                        None => return,
                    }
                }
                Err(failure) => failure,
            };

            let pending = self.tracker.reconciler.pending_ids();
            if pending.is_empty() {
                warn!(
                    "Stream dropped before its end frame ({}) but no item is pending; \
                     completing batch run {} without it",
                    failure, self.tracker.run_id
                );
                self.controller.close();
                self.tracker.reconciler.freeze();
                self.tracker.complete(self.controller.state());
                return;
            }

            match self.controller.on_failure(failure) {
                FailureAction::GiveUp(error) => {
                    self.tracker.fail(error, self.controller.state());
                    return;
                }
                FailureAction::Retry { delay, .. } => {
                    let waiting = self.controller.state().clone();
                    self.tracker.publish(&waiting);
                    with_ticks(tokio::time::sleep(delay), &mut tick, &self.tracker, &waiting)
                        .await;
                }
            }

            request = self.request_for(Some(&pending));
        }
    }

    /// Read events until the run ends or the connection fails
    ///
    /// Returns the transport failure, or `None` once a terminal outcome was
    /// published.
    async fn read_stream(&mut self, tick: &mut Interval) -> Option<TransportError> {
        loop {
            let next = tokio::select! {
                event = self.controller.next_event() => event,
                _ = tick.tick() => {
                    self.tracker.publish(self.controller.state());
                    continue;
                }
            };

            let event = match next {
                Ok(event) => event,
                Err(failure) => return Some(failure),
            };
            self.controller.record_receipt();
            self.tracker.decoder = self.controller.decoder_stats();

            match self.tracker.reconciler.apply(event) {
                Ok(Applied::Finished) => {
                    self.controller.close();
                    self.tracker.complete(self.controller.state());
                    return None;
                }
                Ok(Applied::BatchFailed { message }) => {
                    self.controller.abort();
                    self.tracker
                        .fail(PipelineError::Server { message }, self.controller.state());
                    return None;
                }
                Ok(Applied::Ignored) => {}
                Ok(applied) => {
                    debug!("Applied {:?}", applied);
                    self.tracker.publish(self.controller.state());
                }
                Err(ReconcileError::MalformedPayload(_)) => {
                    // Recorded as an anomaly by the reconciler
                    self.tracker.publish(self.controller.state());
                }
                Err(ReconcileError::Frozen) => {
                    warn!("Ignoring event after the batch ended");
                }
            }
        }
    }

    /// Request body for the next connection
    ///
    /// With `pending` set, only those items are resubmitted, in submission
    /// order.
    fn request_for(&self, pending: Option<&[String]>) -> BatchRequest {
        let items = match pending {
            None => self.items.clone(),
            Some(ids) => {
                let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
                self.items
                    .iter()
                    .filter(|item| wanted.contains(item.id.as_str()))
                    .cloned()
                    .collect()
            }
        };
        if pending.is_some() {
            info!(
                "Resubmitting {} of {} items",
                items.len(),
                self.items.len()
            );
        }
        BatchRequest {
            items,
            group_key: self.config.group_key.clone(),
            max_concurrency: self.config.max_concurrency,
        }
    }
}

/// Await `fut`, publishing a snapshot on every tick in the meantime
async fn with_ticks<F: Future>(
    fut: F,
    tick: &mut Interval,
    tracker: &RunTracker,
    connection: &ConnectionState,
) -> F::Output {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            output = &mut fut => return output,
            _ = tick.tick() => tracker.publish(connection),
        }
    }
}
