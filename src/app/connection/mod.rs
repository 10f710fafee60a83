//! Connection controller
//!
//! Owns the lifetime of one streaming request: opening it, pulling decoded
//! events off the wire, and deciding what to do when the transport fails.
//! The controller never sleeps on its own; [`ConnectionController::on_failure`]
//! returns the delay and the caller decides how to wait, so the wait stays
//! cancellable alongside everything else the caller is doing.
//!
//! Timing rules:
//! - from issuing the request to the first received byte: `first_byte_timeout`
//! - between any two received chunks afterwards: `idle_timeout`
//!
//! Both deadlines are stored rather than restarted per read, so dropping a
//! pending [`ConnectionController::next_event`] future and calling it again
//! does not extend them.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::app::client::{ChunkStream, Transport};
use crate::app::decoder::{DecoderStats, FrameDecoder};
use crate::app::models::{BatchRequest, WireEvent};
use crate::constants::limits;
use crate::errors::{PipelineError, TransportError, TransportResult};

pub mod backoff;
pub mod state;

pub use backoff::ReconnectPolicy;
pub use state::{ConnectionPhase, ConnectionState};

/// What the caller should do after a transport failure
#[derive(Debug, Clone, PartialEq)]
pub enum FailureAction {
    /// Wait `delay`, then open a new connection
    Retry { delay: Duration, attempt: u32 },
    /// Stop; the run has failed
    GiveUp(PipelineError),
}

/// Drives one logical stream across reconnects
pub struct ConnectionController {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    first_byte_timeout: Duration,
    idle_timeout: Duration,
    state: ConnectionState,
    decoder: FrameDecoder,
    stream: Option<ChunkStream>,
    /// Decoded events not yet handed out
    queued: VecDeque<WireEvent>,
    /// When the current read gives up
    deadline: Instant,
    /// Whether the current connection has delivered any byte
    received_bytes: bool,
}

impl std::fmt::Debug for ConnectionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionController")
            .field("state", &self.state)
            .field("policy", &self.policy)
            .field("queued", &self.queued.len())
            .finish()
    }
}

impl ConnectionController {
    pub fn new(transport: Arc<dyn Transport>, policy: ReconnectPolicy) -> Self {
        Self {
            transport,
            policy,
            first_byte_timeout: limits::FIRST_BYTE_TIMEOUT,
            idle_timeout: limits::IDLE_TIMEOUT,
            state: ConnectionState::default(),
            decoder: FrameDecoder::new(),
            stream: None,
            queued: VecDeque::new(),
            deadline: Instant::now(),
            received_bytes: false,
        }
    }

    /// Override the first-byte and idle timeouts
    pub fn with_timeouts(mut self, first_byte: Duration, idle: Duration) -> Self {
        self.first_byte_timeout = first_byte;
        self.idle_timeout = idle;
        self
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Counters accumulated by the decoder across every connection
    pub fn decoder_stats(&self) -> DecoderStats {
        self.decoder.stats()
    }

    /// Enter `connecting` ahead of [`Self::open`]
    ///
    /// Lets the caller capture the phase the attempt will report while the
    /// request is in flight.
    pub fn begin_connect(&mut self) {
        self.state.transition(ConnectionPhase::Connecting);
    }

    /// Issue the streaming request
    ///
    /// On success the phase is `open`. On failure the phase is left at
    /// `connecting`; pass the error to [`Self::on_failure`].
    ///
    /// Not cancel-safe: dropping the future abandons the request.
    pub async fn open(&mut self, request: BatchRequest) -> TransportResult<()> {
        self.state.transition(ConnectionPhase::Connecting);
        self.stream = None;
        self.queued.clear();
        self.decoder.reset();
        self.received_bytes = false;
        self.deadline = Instant::now() + self.first_byte_timeout;

        info!(
            "Opening stream for {} items (attempt {})",
            request.items.len(),
            self.state.attempt
        );

        let transport = Arc::clone(&self.transport);
        match timeout_at(self.deadline, transport.open(request)).await {
            Ok(Ok(stream)) => {
                self.stream = Some(stream);
                self.state.connections_opened += 1;
                self.state.transition(ConnectionPhase::Open);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::Timeout {
                seconds: self.first_byte_timeout.as_secs(),
            }),
        }
    }

    /// Next decoded event from the open connection
    ///
    /// Cancel-safe: a dropped call loses no bytes or events.
    ///
    /// # Errors
    ///
    /// - `Timeout` when no byte arrives before the first-byte deadline
    /// - `Idle` when the stream goes silent for longer than the idle timeout
    /// - `Read` when the body fails mid-stream
    /// - `UnexpectedEof` when the stream ends and nothing remains to decode
    pub async fn next_event(&mut self) -> TransportResult<WireEvent> {
        loop {
            if let Some(event) = self.queued.pop_front() {
                return Ok(event);
            }

            let deadline = self.deadline;
            let stream = match self.stream.as_mut() {
                Some(stream) => stream,
                None => return Err(TransportError::UnexpectedEof),
            };

            match timeout_at(deadline, stream.next()).await {
                Ok(Some(Ok(chunk))) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    self.received_bytes = true;
                    self.deadline = Instant::now() + self.idle_timeout;
                    self.queued.extend(self.decoder.feed(&chunk));
                }
                Ok(Some(Err(e))) => {
                    self.stream = None;
                    return Err(e);
                }
                Ok(None) => {
                    debug!("Stream reached end of body");
                    self.stream = None;
                    self.queued.extend(self.decoder.finish());
                }
                Err(_) => {
                    self.stream = None;
                    return Err(if self.received_bytes {
                        TransportError::Idle {
                            seconds: self.idle_timeout.as_secs(),
                        }
                    } else {
                        TransportError::Timeout {
                            seconds: self.first_byte_timeout.as_secs(),
                        }
                    });
                }
            }
        }
    }

    /// A decoded event arrived; the connection is healthy again
    pub fn record_receipt(&mut self) {
        if self.state.attempt > 0 {
            info!(
                "Stream recovered after {} failed attempt(s)",
                self.state.attempt
            );
            self.state.attempt = 0;
        }
    }

    /// Classify a transport failure and update the state machine
    pub fn on_failure(&mut self, error: TransportError) -> FailureAction {
        self.stream = None;
        self.queued.clear();
        self.state.last_error = Some(error.clone());

        if !error.is_retryable() {
            warn!("Transport failure is not retryable: {}", error);
            self.state.transition(ConnectionPhase::Aborted);
            return FailureAction::GiveUp(PipelineError::Transport(error));
        }

        if !self.policy.auto_reconnect {
            warn!("Transport failed and reconnect is disabled: {}", error);
            self.state.transition(ConnectionPhase::Aborted);
            return FailureAction::GiveUp(PipelineError::Transport(error));
        }

        if !self.policy.allows_retry(self.state.attempt) {
            let attempts = self.state.attempt + 1;
            warn!("Giving up after {} connection attempts: {}", attempts, error);
            self.state.transition(ConnectionPhase::Aborted);
            return FailureAction::GiveUp(PipelineError::RetriesExhausted {
                attempts,
                last_error: error,
            });
        }

        self.state.attempt += 1;
        let attempt = self.state.attempt;
        let delay = self.policy.delay_for(attempt);
        warn!(
            "Stream failed ({}). Reconnecting in {}ms (attempt {}/{})",
            error,
            delay.as_millis(),
            attempt,
            self.policy.max_attempts
        );
        self.state.transition(ConnectionPhase::Reconnecting);
        FailureAction::Retry { delay, attempt }
    }

    /// The batch ended normally
    pub fn close(&mut self) {
        self.release();
        self.state.transition(ConnectionPhase::Closed);
    }

    /// The server reported a batch-level error
    pub fn abort(&mut self) {
        self.release();
        self.state.transition(ConnectionPhase::Aborted);
    }

    /// Caller-initiated cancel
    ///
    /// Releases the transport immediately. A no-op when idle or already
    /// terminal; returns whether anything was cancelled.
    pub fn cancel(&mut self) -> bool {
        if matches!(self.state.phase, ConnectionPhase::Idle) || self.state.phase.is_terminal() {
            return false;
        }
        self.release();
        self.state.transition(ConnectionPhase::Closed)
    }

    fn release(&mut self) {
        self.stream = None;
        self.queued.clear();
        self.decoder.reset();
    }
}
