//! End-to-end tests for the HTTP transport
//!
//! Runs the pipeline against a wiremock server serving canned event-stream
//! bodies, covering request construction, the clean path, server errors and
//! recovery after a dropped connection.

use std::time::Duration;

use evalstream::app::{
    BatchItem, BatchRequest, ClientConfig, EvaluationPipeline, PipelineConfig, PipelineOutcome,
    RecordStatus, ReconnectPolicy,
};
use evalstream::errors::{PipelineError, TransportError};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STREAM_PATH: &str = "/evaluate/batch/stream";

fn event_stream(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

fn pipeline_for(server: &MockServer) -> EvaluationPipeline {
    let config = ClientConfig::default().with_base_url(server.uri());
    EvaluationPipeline::http(&config).expect("http pipeline")
}

fn fast_reconnect() -> PipelineConfig {
    PipelineConfig::default()
        .with_group_key("nightly")
        .with_max_concurrency(4)
        .with_reconnect(
            ReconnectPolicy::default()
                .with_max_attempts(3)
                .with_base_delay(Duration::from_millis(20))
                .with_max_delay(Duration::from_millis(100))
                .with_jitter(0.0),
        )
}

fn items(ids: &[&str]) -> Vec<BatchItem> {
    ids.iter()
        .map(|id| BatchItem::new(*id).with_field("messages", json!([{"role": "user"}])))
        .collect()
}

#[tokio::test]
async fn test_clean_stream_completes_batch() {
    let server = MockServer::start().await;

    let body = concat!(
        ": connected\r\n\r\n",
        "data: {\"id\":\"conv-1\",\"status\":\"ok\",\"score\":0.8}\r\n\r\n",
        "event: keepalive\ndata: {}\n\n",
        "data: {\"type\":\"result\",\"data\":{\"conversation_id\":\"conv-2\",\"score\":0.4}}\n\n",
        "event: summary\ndata: {\"mean_score\":0.6}\n\n",
        "event: end\ndata: {}\n\n",
    );
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .and(header("accept", "text/event-stream"))
        .respond_with(event_stream(body))
        .expect(1)
        .mount(&server)
        .await;

    let mut pipeline = pipeline_for(&server);
    let handle = pipeline
        .start(items(&["conv-1", "conv-2"]), fast_reconnect())
        .unwrap();

    let snapshot = match handle.finish().await {
        PipelineOutcome::Completed(snapshot) => snapshot,
        other => panic!("unexpected outcome {:?}", other.label()),
    };
    assert_eq!(snapshot.progress.completed, 2);
    assert_eq!(snapshot.progress.failed, 0);
    assert_eq!(snapshot.progress.eta_seconds, Some(0.0));
    assert_eq!(snapshot.record("conv-1").unwrap().payload["score"], 0.8);
    assert_eq!(snapshot.summary, Some(json!({"mean_score": 0.6})));
    assert!(snapshot.anomalies.is_empty());

    let requests = server.received_requests().await.unwrap();
    let sent: BatchRequest = requests[0].body_json().unwrap();
    assert_eq!(sent.group_key, "nightly");
    assert_eq!(sent.max_concurrency, 4);
    assert_eq!(sent.items.len(), 2);
    assert_eq!(sent.items[0].fields["messages"][0]["role"], "user");
}

#[tokio::test]
async fn test_batch_error_frame_fails_without_retry() {
    let server = MockServer::start().await;

    let body = concat!(
        "data: {\"id\":\"conv-1\",\"score\":1}\n\n",
        "event: error\ndata: {\"message\":\"quota exceeded\"}\n\n",
        "data: {\"id\":\"conv-2\",\"score\":1}\n\n",
    );
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(event_stream(body))
        .mount(&server)
        .await;

    let mut pipeline = pipeline_for(&server);
    let handle = pipeline
        .start(items(&["conv-1", "conv-2"]), fast_reconnect())
        .unwrap();

    match handle.finish().await {
        PipelineOutcome::Failed { error, snapshot } => {
            assert_eq!(
                error,
                PipelineError::Server {
                    message: "quota exceeded".to_string()
                }
            );
            // Results received before the error are kept
            assert_eq!(snapshot.progress.completed, 1);
            assert_eq!(
                snapshot.record("conv-2").unwrap().status,
                RecordStatus::Pending
            );
        }
        other => panic!("unexpected outcome {:?}", other.label()),
    }

    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_item_error_fails_only_that_item() {
    let server = MockServer::start().await;

    let body = concat!(
        "event: error\ndata: {\"item_id\":\"conv-1\",\"detail\":\"model timeout\"}\n\n",
        "data: {\"id\":\"conv-2\",\"score\":1}\n\n",
        "event: end\n\n",
    );
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(event_stream(body))
        .mount(&server)
        .await;

    let mut pipeline = pipeline_for(&server);
    let handle = pipeline
        .start(items(&["conv-1", "conv-2"]), fast_reconnect())
        .unwrap();

    match handle.finish().await {
        PipelineOutcome::Completed(snapshot) => {
            let failed = snapshot.record("conv-1").unwrap();
            assert_eq!(failed.status, RecordStatus::Failed);
            assert_eq!(failed.error.as_deref(), Some("model timeout"));
            assert_eq!(snapshot.progress.completed, 1);
            assert_eq!(snapshot.progress.failed, 1);
        }
        other => panic!("unexpected outcome {:?}", other.label()),
    }
}

#[tokio::test]
async fn test_dropped_stream_resumes_with_pending_items() {
    let server = MockServer::start().await;

    // First connection delivers one result, then the body ends early
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(event_stream("data: {\"id\":\"conv-1\",\"score\":1}\n\n"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(event_stream(concat!(
            "data: {\"id\":\"conv-2\",\"score\":2}\n\n",
            "data: {\"id\":\"conv-3\",\"score\":3}\n\n",
            "event: end\n\n",
        )))
        .mount(&server)
        .await;

    let mut pipeline = pipeline_for(&server);
    let handle = pipeline
        .start(items(&["conv-1", "conv-2", "conv-3"]), fast_reconnect())
        .unwrap();

    match handle.finish().await {
        PipelineOutcome::Completed(snapshot) => {
            assert_eq!(snapshot.records.len(), 3);
            assert_eq!(snapshot.progress.completed, 3);
            assert_eq!(snapshot.connection.attempt, 0);
            assert_eq!(snapshot.connection.connections_opened, 2);
        }
        other => panic!("unexpected outcome {:?}", other.label()),
    }

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let resumed: BatchRequest = requests[1].body_json().unwrap();
    let ids: Vec<&str> = resumed.items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["conv-2", "conv-3"]);
}

#[tokio::test]
async fn test_client_error_status_is_fatal() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(422))
        .mount(&server)
        .await;

    let mut pipeline = pipeline_for(&server);
    let handle = pipeline.start(items(&["conv-1"]), fast_reconnect()).unwrap();

    match handle.finish().await {
        PipelineOutcome::Failed { error, .. } => assert_eq!(
            error,
            PipelineError::Transport(TransportError::Status { status: 422 })
        ),
        other => panic!("unexpected outcome {:?}", other.label()),
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_server_error_status_exhausts_retries() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut pipeline = pipeline_for(&server);
    let handle = pipeline.start(items(&["conv-1"]), fast_reconnect()).unwrap();

    match handle.finish().await {
        PipelineOutcome::Failed { error, .. } => assert_eq!(
            error,
            PipelineError::RetriesExhausted {
                attempts: 4,
                last_error: TransportError::Status { status: 503 },
            }
        ),
        other => panic!("unexpected outcome {:?}", other.label()),
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
}
