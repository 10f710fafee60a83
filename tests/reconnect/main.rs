//! Integration tests for reconnect behaviour
//!
//! These tests drive the pipeline against a scripted in-memory transport
//! with tokio's clock paused, so backoff timing is checked exactly.

mod scripted;

use std::sync::Arc;
use std::time::Duration;

use evalstream::app::{
    BatchItem, ConnectionPhase, DataAnomaly, EvaluationPipeline, PipelineConfig, PipelineOutcome,
    RecordOrigin, RecordStatus, ReconnectPolicy,
};
use evalstream::errors::{PipelineError, TransportError};
use scripted::{ScriptedTransport, Step};

fn items(ids: &[&str]) -> Vec<BatchItem> {
    ids.iter().map(|id| BatchItem::new(*id)).collect()
}

fn refused() -> TransportError {
    TransportError::Connect {
        reason: "connection refused".to_string(),
    }
}

fn exact_backoff(max_attempts: u32) -> PipelineConfig {
    PipelineConfig::default().with_reconnect(
        ReconnectPolicy::default()
            .with_max_attempts(max_attempts)
            .with_base_delay(Duration::from_millis(1000))
            .with_max_delay(Duration::from_secs(60))
            .with_jitter(0.0),
    )
}

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_until_attempts_exhausted() {
    let transport = Arc::new(ScriptedTransport::new(Vec::new()));
    let mut pipeline = EvaluationPipeline::new(transport.clone());
    let handle = pipeline.start(items(&["a", "b"]), exact_backoff(4)).unwrap();

    match handle.finish().await {
        PipelineOutcome::Failed { error, snapshot } => {
            assert_eq!(
                error,
                PipelineError::RetriesExhausted {
                    attempts: 5,
                    last_error: refused(),
                }
            );
            assert_eq!(snapshot.connection.phase, ConnectionPhase::Aborted);
            assert_eq!(snapshot.connection.last_error, Some(refused()));
            assert_eq!(snapshot.progress.pending, 2);
        }
        other => panic!("unexpected outcome {:?}", other.label()),
    }

    let times = transport.open_times();
    assert_eq!(times.len(), 5);
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    let expected = [1000, 2000, 4000, 8000];
    for (gap, millis) in gaps.iter().zip(expected) {
        let want = Duration::from_millis(millis);
        assert!(
            *gap >= want && *gap < want + Duration::from_millis(50),
            "gap {:?}, expected {:?}",
            gap,
            want
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_backoff_respects_max_delay() {
    let transport = Arc::new(ScriptedTransport::new(Vec::new()));
    let mut pipeline = EvaluationPipeline::new(transport.clone());
    let config = exact_backoff(3).with_reconnect(
        ReconnectPolicy::default()
            .with_max_attempts(3)
            .with_base_delay(Duration::from_millis(1000))
            .with_max_delay(Duration::from_millis(1500))
            .with_jitter(0.0),
    );
    let handle = pipeline.start(items(&["a"]), config).unwrap();
    assert!(matches!(handle.finish().await, PipelineOutcome::Failed { .. }));

    let times = transport.open_times();
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(gaps.len(), 3);
    assert!(gaps[1] < Duration::from_millis(1550));
    assert!(gaps[2] < Duration::from_millis(1550));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_resubmits_only_pending_items() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Step::Stream(vec![
            "data: {\"id\":\"a\",\"score\":1}\n\n",
            "data: {\"id\":\"c\",\"score\":3}\n\n",
        ]),
        Step::Stream(vec!["data: {\"id\":\"b\",\"score\":2}\n\nevent: end\n\n"]),
    ]));
    let mut pipeline = EvaluationPipeline::new(transport.clone());
    let handle = pipeline
        .start(items(&["a", "b", "c"]), exact_backoff(3))
        .unwrap();

    match handle.finish().await {
        PipelineOutcome::Completed(snapshot) => {
            assert_eq!(snapshot.progress.completed, 3);
            assert_eq!(snapshot.connection.attempt, 0);
            assert_eq!(snapshot.connection.connections_opened, 2);
            assert_eq!(snapshot.connection.phase, ConnectionPhase::Closed);
        }
        other => panic!("unexpected outcome {:?}", other.label()),
    }

    assert_eq!(
        transport.requested_ids(),
        vec![
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            vec!["b".to_string()],
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_drop_with_nothing_pending_completes_without_end_frame() {
    let transport = Arc::new(ScriptedTransport::new(vec![Step::Stream(vec![
        "data: {\"id\":\"a\"}\n\ndata: {\"id\":\"b\"}\n\n",
    ])]));
    let mut pipeline = EvaluationPipeline::new(transport.clone());
    let handle = pipeline.start(items(&["a", "b"]), exact_backoff(3)).unwrap();

    match handle.finish().await {
        PipelineOutcome::Completed(snapshot) => {
            assert_eq!(snapshot.progress.completed, 2);
            assert!(snapshot.progress.is_complete());
            // No backoff delay before completing
            assert!(snapshot.progress.elapsed_seconds < 1.0);
            assert_eq!(snapshot.connection.phase, ConnectionPhase::Closed);
            assert_eq!(snapshot.connection.attempt, 0);
        }
        other => panic!("unexpected outcome {:?}", other.label()),
    }
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_drop_with_nothing_pending_completes_when_reconnect_disabled() {
    let transport = Arc::new(ScriptedTransport::new(vec![Step::Stream(vec![
        "data: {\"id\":\"a\"}\n\n",
        "event: error\ndata: {\"item_id\":\"b\",\"message\":\"boom\"}\n\n",
    ])]));
    let mut pipeline = EvaluationPipeline::new(transport.clone());
    let config = PipelineConfig::default().with_reconnect(ReconnectPolicy::disabled());
    let handle = pipeline.start(items(&["a", "b"]), config).unwrap();

    match handle.finish().await {
        PipelineOutcome::Completed(snapshot) => {
            assert_eq!(snapshot.progress.completed, 1);
            assert_eq!(snapshot.progress.failed, 1);
            assert_eq!(snapshot.connection.last_error, None);
        }
        other => panic!("unexpected outcome {:?}", other.label()),
    }
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_every_snapshot_keeps_counters_consistent() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Step::Stream(vec![
            "data: {\"id\":\"a\",\"score\":1}\n\n",
            "data: {\"id\":\"a\",\"score\":2}\n\n",
            "event: error\ndata: {\"item_id\":\"b\",\"message\":\"boom\"}\n\n",
            "data: {\"id\":\"b\",\"score\":3}\n\n",
        ]),
        Step::Stream(vec![
            "data: {\"id\":\"stray\"}\n\n",
            "data: {\"score\":5}\n\n",
            "data: {\"id\":\"c\"}\n\n",
            "event: end\n\n",
        ]),
    ]));
    let mut pipeline = EvaluationPipeline::new(transport.clone());
    let mut handle = pipeline
        .start(items(&["a", "b", "c"]), exact_backoff(3))
        .unwrap();

    let mut seen = Vec::new();
    while let Some(outcome) = handle.next_outcome().await {
        seen.push(outcome.snapshot().progress.clone());
    }
    assert!(seen.len() >= 2);

    for pair in seen.windows(2) {
        assert!(pair[1].completed >= pair[0].completed);
        assert!(pair[1].failed >= pair[0].failed);
    }
    for progress in &seen {
        assert!(progress.completed + progress.failed <= progress.total);
        assert_eq!(progress.total, 3);
    }
    let last = seen.last().unwrap();
    assert_eq!((last.completed, last.failed, last.unmatched), (2, 1, 2));
}

#[tokio::test(start_paused = true)]
async fn test_client_error_status_is_not_retried() {
    let transport = Arc::new(ScriptedTransport::new(vec![Step::Fail(
        TransportError::Status { status: 400 },
    )]));
    let mut pipeline = EvaluationPipeline::new(transport.clone());
    let handle = pipeline.start(items(&["a"]), exact_backoff(3)).unwrap();

    match handle.finish().await {
        PipelineOutcome::Failed { error, .. } => assert_eq!(
            error,
            PipelineError::Transport(TransportError::Status { status: 400 })
        ),
        other => panic!("unexpected outcome {:?}", other.label()),
    }
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_server_unavailable_is_retried() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Step::Fail(TransportError::Status { status: 503 }),
        Step::Stream(vec!["data: {\"id\":\"a\"}\n\nevent: end\n\n"]),
    ]));
    let mut pipeline = EvaluationPipeline::new(transport.clone());
    let handle = pipeline.start(items(&["a"]), exact_backoff(3)).unwrap();

    assert!(matches!(
        handle.finish().await,
        PipelineOutcome::Completed(_)
    ));
    assert_eq!(transport.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_reconnect_fails_on_first_drop() {
    let transport = Arc::new(ScriptedTransport::new(vec![Step::Fail(refused())]));
    let mut pipeline = EvaluationPipeline::new(transport.clone());
    let config = PipelineConfig::default().with_reconnect(ReconnectPolicy::disabled());
    let handle = pipeline.start(items(&["a"]), config).unwrap();

    match handle.finish().await {
        PipelineOutcome::Failed { error, .. } => {
            assert_eq!(error, PipelineError::Transport(refused()))
        }
        other => panic!("unexpected outcome {:?}", other.label()),
    }
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_silent_stream_triggers_reconnect() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Step::Silent,
        Step::Stream(vec!["data: {\"id\":\"a\"}\n\nevent: end\n\n"]),
    ]));
    let mut pipeline = EvaluationPipeline::new(transport.clone());
    let config = exact_backoff(2).with_timeouts(Duration::from_secs(5), Duration::from_secs(10));
    let handle = pipeline.start(items(&["a"]), config).unwrap();

    assert!(matches!(
        handle.finish().await,
        PipelineOutcome::Completed(_)
    ));

    let times = transport.open_times();
    assert_eq!(times.len(), 2);
    // First-byte timeout plus the first backoff delay
    assert!(times[1] - times[0] >= Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_records_keep_submission_order_across_reconnects() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Step::Stream(vec![
            "data: {\"id\":\"c\",\"score\":3}\n\n",
            "data: {\"id\":\"stray\",\"score\":9}\n\n",
        ]),
        Step::Stream(vec![
            "data: {\"id\":\"b\",\"score\":2}\n\n",
            "data: {\"id\":\"c\",\"latency_ms\":40}\n\n",
            "data: {\"score\":5}\n\n",
            "data: {\"id\":\"a\",\"score\":1}\n\n",
            "event: end\n\n",
        ]),
    ]));
    let mut pipeline = EvaluationPipeline::new(transport.clone());
    let handle = pipeline
        .start(items(&["a", "b", "c"]), exact_backoff(3))
        .unwrap();

    let snapshot = match handle.finish().await {
        PipelineOutcome::Completed(snapshot) => snapshot,
        other => panic!("unexpected outcome {:?}", other.label()),
    };

    let order: Vec<&str> = snapshot.records.iter().map(|r| r.item_id.as_str()).collect();
    assert_eq!(order, vec!["a", "b", "c", "stray", "unmatched-1"]);

    let c = snapshot.record("c").unwrap();
    assert_eq!(c.status, RecordStatus::Completed);
    assert_eq!(c.payload["score"], 3);
    assert_eq!(c.payload["latency_ms"], 40);
    assert_eq!(c.deliveries, 2);

    assert_eq!(snapshot.record("stray").unwrap().origin, RecordOrigin::Unsolicited);
    assert_eq!(
        snapshot.record("unmatched-1").unwrap().origin,
        RecordOrigin::Synthetic
    );
    assert_eq!(snapshot.progress.completed, 3);
    assert_eq!(snapshot.progress.unmatched, 2);
    assert!(snapshot.anomalies.iter().any(|a| matches!(
        a,
        DataAnomaly::UnknownItem { item_id } if item_id == "stray"
    )));
    assert!(snapshot
        .anomalies
        .iter()
        .any(|a| matches!(a, DataAnomaly::SyntheticId { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff_stops_reconnecting() {
    let transport = Arc::new(ScriptedTransport::new(Vec::new()));
    let mut pipeline = EvaluationPipeline::new(transport.clone());
    let mut handle = pipeline.start(items(&["a"]), exact_backoff(10)).unwrap();

    // Wait until the run is backing off after its first failure
    loop {
        match handle.next_outcome().await {
            Some(PipelineOutcome::Snapshot(s))
                if s.connection.phase == ConnectionPhase::Reconnecting =>
            {
                break
            }
            Some(PipelineOutcome::Snapshot(_)) => continue,
            other => panic!("unexpected outcome {:?}", other.map(|o| o.label())),
        }
    }

    assert!(handle.cancel());
    let opened = transport.open_count();

    assert!(matches!(
        handle.next_outcome().await,
        Some(PipelineOutcome::Cancelled(_))
    ));
    assert!(handle.next_outcome().await.is_none());

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.open_count(), opened);
}
