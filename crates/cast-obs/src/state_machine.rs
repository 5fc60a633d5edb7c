//! Per-connection lifecycle state machine.
//!
//! The connection task drives this machine; keeping the transitions in a
//! plain struct with an injected clock makes the lifecycle fully testable
//! without sockets or timers:
//!
//! ```text
//! Disconnected → Connecting → Authenticating → Connected
//!       ▲             │              │             │
//!       │             ▼              ▼             ▼
//!       └──(backoff)─ Error ◄────────┴─────────────┘
//! ```
//!
//! Connections without a password skip the `Authenticating` stop.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::backoff::Backoff;

/// Finite connection status, surfaced to the presentation layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Error,
}

/// Lifecycle driver for one named connection.
#[derive(Debug)]
pub struct ConnectionStateMachine {
    status: ConnectionStatus,
    backoff: Backoff,
    retry_at: Option<Instant>,
    last_error: Option<String>,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new(Backoff::default())
    }
}

impl ConnectionStateMachine {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            backoff,
            retry_at: None,
            last_error: None,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// A connect attempt has started (initial or after backoff).
    pub fn on_connect_started(&mut self) {
        self.status = ConnectionStatus::Connecting;
        self.retry_at = None;
    }

    /// The socket is open; the protocol handshake is in progress.
    pub fn on_socket_open(&mut self) {
        self.status = ConnectionStatus::Authenticating;
    }

    /// The handshake completed; the connection is usable.
    pub fn on_authenticated(&mut self) {
        self.status = ConnectionStatus::Connected;
        self.backoff.reset();
        self.last_error = None;
    }

    /// Any failure (connect refused, auth rejected, socket dropped).
    ///
    /// Returns the backoff delay; the caller schedules the next attempt for
    /// `now + delay`.
    pub fn on_failure(&mut self, now: Instant, reason: impl Into<String>) -> Duration {
        self.status = ConnectionStatus::Error;
        self.last_error = Some(reason.into());
        let delay = self.backoff.next_delay();
        self.retry_at = Some(now + delay);
        delay
    }

    /// Whether the backoff period has elapsed and a retry may start.
    pub fn retry_due(&self, now: Instant) -> bool {
        match self.retry_at {
            Some(at) => now >= at,
            None => self.status == ConnectionStatus::Disconnected,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
