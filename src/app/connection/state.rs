//! Connection lifecycle state machine
//!
//! `idle → connecting → open → {reconnecting → connecting, closed, aborted}`.
//! Cancellation moves any live phase straight to `closed`.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::TransportError;

/// Phase of the streaming connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Closed,
    Aborted,
}

impl ConnectionPhase {
    /// Closed and aborted are final
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionPhase::Closed | ConnectionPhase::Aborted)
    }

    /// Whether moving to `next` is a legal transition
    pub fn can_transition_to(&self, next: ConnectionPhase) -> bool {
        use ConnectionPhase::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Open)
                | (Connecting, Reconnecting)
                | (Open, Reconnecting)
                | (Reconnecting, Connecting)
                | (Connecting | Open | Reconnecting, Closed)
                | (Connecting | Open | Reconnecting, Aborted)
        )
    }
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionPhase::Idle => "idle",
            ConnectionPhase::Connecting => "connecting",
            ConnectionPhase::Open => "open",
            ConnectionPhase::Reconnecting => "reconnecting",
            ConnectionPhase::Closed => "closed",
            ConnectionPhase::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

/// Transport lifecycle as seen by consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    /// Consecutive failed attempts since the last successful receipt
    pub attempt: u32,
    /// Most recent transport failure
    pub last_error: Option<TransportError>,
    /// Connections successfully opened during this run
    pub connections_opened: u32,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            phase: ConnectionPhase::Idle,
            attempt: 0,
            last_error: None,
            connections_opened: 0,
        }
    }
}

impl ConnectionState {
    /// Move to `next`, ignoring illegal transitions
    ///
    /// Returns whether the phase changed.
    pub fn transition(&mut self, next: ConnectionPhase) -> bool {
        if self.phase == next {
            return false;
        }
        if !self.phase.can_transition_to(next) {
            warn!("Ignoring connection transition {} -> {}", self.phase, next);
            return false;
        }
        debug!("Connection {} -> {}", self.phase, next);
        self.phase = next;
        true
    }
}
