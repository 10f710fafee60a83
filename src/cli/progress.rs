//! Live progress display for batch runs
//!
//! Renders pipeline snapshots with an indicatif progress bar when stderr is
//! a terminal, and falls back to periodic text lines otherwise (pipes, CI
//! logs).

use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use crate::app::{BatchSnapshot, PipelineOutcome, ProgressSnapshot};
use crate::errors::{AppError, Result};

/// Configuration for progress display
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Enable visual progress bars
    pub enable_progress_bars: bool,
    /// Minimum spacing between text-mode reports
    pub text_report_interval: Duration,
    /// Show throughput and ETA next to the bar
    pub show_eta: bool,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            enable_progress_bars: true,
            text_report_interval: Duration::from_secs(5),
            show_eta: true,
        }
    }
}

/// Progress display for one batch run
pub struct ProgressDisplay {
    config: ProgressConfig,
    bar: Option<ProgressBar>,
    is_terminal: bool,
    last_report: Option<Instant>,
}

impl ProgressDisplay {
    /// Create a new progress display with the given configuration
    pub fn new(config: ProgressConfig) -> Self {
        let is_terminal = atty::is(atty::Stream::Stderr);

        Self {
            config,
            bar: None,
            is_terminal,
            last_report: None,
        }
    }

    /// Whether a progress bar (rather than text lines) is used
    pub fn uses_bar(&self) -> bool {
        self.config.enable_progress_bars && self.is_terminal
    }

    /// Start the display for a batch of `total` items
    pub fn start(&mut self, total: usize) -> Result<()> {
        if !self.uses_bar() {
            eprintln!("Streaming results for {} items...", total);
            return Ok(());
        }

        let template = if self.config.show_eta {
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}"
        } else {
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}"
        };

        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(template)
                .map_err(|e| AppError::generic(format!("Progress bar template error: {}", e)))?
                .progress_chars("##-"),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        bar.set_message("connecting");
        self.bar = Some(bar);

        debug!("Progress display started for {} items", total);
        Ok(())
    }

    /// Reflect an intermediate snapshot
    pub fn update(&mut self, snapshot: &BatchSnapshot) {
        let progress = &snapshot.progress;

        if let Some(bar) = &self.bar {
            bar.set_position(progress.processed() as u64);
            bar.set_message(bar_message(snapshot));
            return;
        }

        let due = self
            .last_report
            .map_or(true, |at| at.elapsed() >= self.config.text_report_interval);
        if due {
            eprintln!("Progress: {}", status_line(progress));
            self.last_report = Some(Instant::now());
        }
    }

    /// Close the display with the terminal outcome
    pub fn finish(&mut self, outcome: &PipelineOutcome) {
        let progress = &outcome.snapshot().progress;
        let message = match outcome {
            PipelineOutcome::Completed(_) => format!("done in {}", progress.format_elapsed()),
            PipelineOutcome::Failed { error, .. } => format!("failed: {}", error),
            PipelineOutcome::Cancelled(_) => "cancelled".to_string(),
            PipelineOutcome::Snapshot(_) => status_line(progress),
        };

        match self.bar.take() {
            Some(bar) => {
                bar.set_position(progress.processed() as u64);
                bar.finish_with_message(message);
            }
            None => eprintln!("Batch {}: {}", outcome.label(), status_line(progress)),
        }
    }
}

/// Message shown next to the bar
fn bar_message(snapshot: &BatchSnapshot) -> String {
    let progress = &snapshot.progress;
    let mut message = format!(
        "{} failed, {}, ETA {}",
        progress.failed,
        progress.format_throughput(),
        progress.format_eta()
    );
    if snapshot.connection.attempt > 0 {
        message.push_str(&format!(" (reconnect {})", snapshot.connection.attempt));
    }
    message
}

/// One-line textual summary of progress
pub fn status_line(progress: &ProgressSnapshot) -> String {
    let mut line = format!(
        "{}/{} scored ({:.1}%), {} failed, {}, elapsed {}, ETA {}",
        progress.completed,
        progress.total,
        progress.completion_percentage(),
        progress.failed,
        progress.format_throughput(),
        progress.format_elapsed(),
        progress.format_eta()
    );
    if progress.unmatched > 0 {
        line.push_str(&format!(", {} unmatched", progress.unmatched));
    }
    line
}
