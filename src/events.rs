//! Connection lifecycle events broadcast to peers (spec §3, §6), gated by
//! `BroadcastConnectionEvents`.

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionEventKind {
    Opened,
    Closed,
    Reopened,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub user_id: String,
    pub connection_id: String,
    pub user_agent: Option<String>,
    pub kind: ConnectionEventKind,
    pub at: NaiveDateTime,
}

impl ConnectionEvent {
    pub fn new(
        user_id: impl Into<String>,
        connection_id: impl Into<String>,
        user_agent: Option<String>,
        kind: ConnectionEventKind,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            connection_id: connection_id.into(),
            user_agent,
            kind,
            at: Utc::now().naive_utc(),
        }
    }
}

/// Thin wrapper over a broadcast channel so the registry doesn't need to
/// know whether anybody is actually listening.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<ConnectionEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.tx.subscribe()
    }

    /// Sending is best-effort: with no subscribers this is a no-op, matching
    /// the "optional" framing of `ConnectionEvent` in spec §3.
    pub fn publish(&self, event: ConnectionEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(1024)
    }
}
