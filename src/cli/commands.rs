//! Command handlers for the evalstream CLI
//!
//! This module implements the command handlers that connect CLI arguments
//! to the streaming pipeline and the configuration file.

use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::app::{
    BatchItem, BatchSnapshot, EvaluationPipeline, PipelineOutcome, RecordOrigin, ResultRecord,
};
use crate::cli::{ConfigAction, ConfigArgs, ProgressConfig, ProgressDisplay, RunArgs};
use crate::config::AppConfig;
use crate::errors::{AppError, ConfigError, Result};

/// Widest detail column printed in the results table
const DETAIL_WIDTH: usize = 60;

/// Handle the run command
///
/// Loads the batch, streams it through the pipeline with live progress and
/// prints the final per-item results. Ctrl-C cancels the run and still
/// prints whatever was reconciled.
pub async fn handle_run(args: RunArgs, mut config: AppConfig) -> Result<()> {
    args.validate().map_err(AppError::generic)?;

    if let Some(url) = &args.url {
        config.client.base_url = url.clone();
    }
    if let Some(group_key) = &args.group_key {
        config.pipeline.group_key = group_key.clone();
    }
    if let Some(max_concurrency) = args.max_concurrency {
        config.pipeline.max_concurrency = max_concurrency;
    }
    config.validate()?;

    let items = load_items(&args.input).await?;
    let total = items.len();
    info!(
        "Submitting {} items from {} to {}",
        total,
        args.input.display(),
        config.client.base_url
    );

    let mut pipeline = EvaluationPipeline::http(&config.client_config())?;
    let mut handle = pipeline.start(items, config.pipeline_config())?;

    let mut display = ProgressDisplay::new(ProgressConfig::default());
    display.start(total)?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    let outcome = loop {
        tokio::select! {
            outcome = handle.next_outcome() => match outcome {
                Some(PipelineOutcome::Snapshot(snapshot)) => display.update(&snapshot),
                Some(terminal) => break terminal,
                None => break PipelineOutcome::Cancelled(handle.latest()),
            },
            signal = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                match signal {
                    Ok(()) => {
                        eprintln!("\nCtrl-C received - cancelling batch run");
                        handle.cancel();
                    }
                    Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
                }
            }
        }
    };

    display.finish(&outcome);
    debug!("Batch run ended with {} outcome", outcome.label());

    if args.json {
        println!("{}", render_json(&outcome)?);
    } else {
        print!("{}", format_results_table(outcome.snapshot()));
    }

    match outcome {
        PipelineOutcome::Failed { error, .. } => Err(error.into()),
        _ => Ok(()),
    }
}

/// Handle the config command
///
/// `loaded` is the result of loading the effective configuration; only
/// `show` needs it.
pub async fn handle_config(
    args: ConfigArgs,
    loaded: std::result::Result<AppConfig, ConfigError>,
) -> Result<()> {
    match args.action {
        ConfigAction::Init { path, force } => {
            let path = match path {
                Some(path) => path,
                None => AppConfig::default_config_path()?,
            };
            AppConfig::write_default(&path, force).await?;
            println!("Wrote default configuration to {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = loaded?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

/// Read the batch items from a JSON file
///
/// Accepts a top-level array of item objects, or an object whose `items`
/// field is such an array.
pub async fn load_items(path: &Path) -> Result<Vec<BatchItem>> {
    let input_error = |reason: String| AppError::Input {
        path: path.to_path_buf(),
        reason,
    };

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| input_error(e.to_string()))?;
    let document: Value = serde_json::from_str(&content).map_err(|e| input_error(e.to_string()))?;

    let entries = match document {
        Value::Array(entries) => entries,
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(entries)) => entries,
            _ => return Err(input_error("expected an \"items\" array".to_string())),
        },
        _ => return Err(input_error("expected a JSON array of items".to_string())),
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            BatchItem::from_value(entry).map_err(|e| input_error(format!("item {}: {}", index, e)))
        })
        .collect()
}

/// Final report written with `--json`
#[derive(Debug, Serialize)]
struct RunReport<'a> {
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(flatten)]
    snapshot: &'a BatchSnapshot,
}

fn render_json(outcome: &PipelineOutcome) -> Result<String> {
    let error = match outcome {
        PipelineOutcome::Failed { error, .. } => Some(error.to_string()),
        _ => None,
    };
    let report = RunReport {
        outcome: outcome.label(),
        error,
        snapshot: outcome.snapshot(),
    };
    serde_json::to_string_pretty(&report)
        .map_err(|e| AppError::generic(format!("Failed to serialize results: {}", e)))
}

/// Render the per-item results as a plain-text table
pub fn format_results_table(snapshot: &BatchSnapshot) -> String {
    let id_width = snapshot
        .records
        .iter()
        .map(|r| r.item_id.len())
        .max()
        .unwrap_or(0)
        .max("ITEM".len());

    let mut out = String::new();
    out.push_str(&format!(
        "\n{:<id_width$}  {:<9}  {:<7}  {:<11}  DETAIL\n",
        "ITEM",
        "STATUS",
        "SCORING",
        "ORIGIN",
        id_width = id_width
    ));
    for record in &snapshot.records {
        out.push_str(&format!(
            "{:<id_width$}  {:<9}  {:<7}  {:<11}  {}\n",
            record.item_id,
            record.status.to_string(),
            record.scoring_status().unwrap_or("-"),
            origin_label(record.origin),
            record_detail(record),
            id_width = id_width
        ));
    }

    let progress = &snapshot.progress;
    out.push_str(&format!(
        "\n{} completed, {} failed, {} pending of {} submitted",
        progress.completed, progress.failed, progress.pending, progress.total
    ));
    if progress.unmatched > 0 {
        out.push_str(&format!(", {} unmatched", progress.unmatched));
    }
    out.push_str(&format!(" in {}\n", progress.format_elapsed()));

    let decoder = &snapshot.decoder;
    if decoder.malformed_lines > 0 || decoder.unknown_events > 0 {
        out.push_str(&format!(
            "Skipped {} malformed data lines and {} unknown events\n",
            decoder.malformed_lines, decoder.unknown_events
        ));
    }

    if !snapshot.anomalies.is_empty() {
        out.push_str(&format!("{} data anomalies:\n", snapshot.anomalies.len()));
        for anomaly in &snapshot.anomalies {
            out.push_str(&format!("  - {}\n", anomaly));
        }
    }
    out
}

fn origin_label(origin: RecordOrigin) -> &'static str {
    match origin {
        RecordOrigin::Submitted => "submitted",
        RecordOrigin::Unsolicited => "unsolicited",
        RecordOrigin::Synthetic => "synthetic",
    }
}

/// Error text for failed records, otherwise the compact payload
fn record_detail(record: &ResultRecord) -> String {
    if let Some(error) = &record.error {
        return truncate(error, DETAIL_WIDTH);
    }
    if record.payload.is_empty() {
        return String::new();
    }
    let compact = Value::Object(record.payload.clone()).to_string();
    truncate(&compact, DETAIL_WIDTH)
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(width.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}
