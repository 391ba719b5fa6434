//! Frame transport adapter (spec §4.3 step 3, §7, component C): the
//! WebSocket-backed link between a live connection and the rest of the hub.
//!
//! Grounded on `stream/stream_manager.rs`'s `DashMap<Key, Entry>` connection
//! table and its "new connection replaces old" policy. That module kept one
//! raw QUIC session per user and opened a fresh stream per request; here the
//! wire is a single long-lived WebSocket per connection carrying small JSON
//! frames, so the table below holds a channel to the connection's write-half
//! task rather than a stream-opening command.
//!
//! This table is the in-memory "who can I reach right now" index (spec §3:
//! "addressable right now"); it is intentionally separate from
//! [`crate::registry::ConnectionRegistry`], the durable registry of record.
//! A connection can be durably registered but momentarily absent from this
//! table during reconnect races — callers see that as `NoTarget`, not as a
//! registry bug.

pub mod ws;

use ahash::RandomState;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{HubError, HubResult};
use crate::ids::{ConnectionId, RequestId};
use crate::response::{self, Response};

/// A call dispatched down to a connection (spec §4.3 step 3): the method
/// name and parameter the client's `Execute` contract receives.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InvokeFrame {
    pub request_id: String,
    pub method: String,
    pub param: Value,
}

/// A completion frame received back from a connection: the envelope from
/// `response.rs` plus the `RequestId` it answers. Parsed by first reading
/// the raw frame as an object so `RequestId` can be pulled out
/// case-insensitively alongside the rest of the response fields.
#[derive(Debug, Clone)]
pub struct CompletionFrame {
    pub request_id: RequestId,
    pub response: Response,
}

impl<'de> serde::Deserialize<'de> for CompletionFrame {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        use serde::de::Error;

        let raw: std::collections::HashMap<String, Value> =
            std::collections::HashMap::deserialize(deserializer)?;
        let request_id = response::field_ci(&raw, "RequestId")
            .and_then(Value::as_str)
            .ok_or_else(|| D::Error::custom("completion frame missing RequestId"))?
            .parse::<RequestId>()
            .map_err(|e| D::Error::custom(format!("invalid RequestId: {e}")))?;
        let response = response::response_from_map(raw).map_err(D::Error::custom)?;
        Ok(CompletionFrame {
            request_id,
            response,
        })
    }
}

/// Table of connections currently reachable over a live socket. Keyed by
/// `ConnectionID`; each entry is the sending half of that connection's
/// outbound frame channel.
#[derive(Default)]
pub struct Dispatcher {
    connections: DashMap<ConnectionId, mpsc::Sender<InvokeFrame>, RandomState>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            connections: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Registers a freshly-opened connection's outbound channel, replacing
    /// any prior entry under the same ID (a reconnect with a reused ID wins
    /// over the stale one, matching the teacher's "new connection replaces
    /// old" rule).
    pub fn register(
        &self,
        connection_id: ConnectionId,
        sender: mpsc::Sender<InvokeFrame>,
    ) {
        self.connections.insert(connection_id, sender);
    }

    pub fn unregister(&self, connection_id: &str) {
        self.connections.remove(connection_id);
    }

    pub fn is_reachable(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// Dispatches a call frame to one connection (spec §4.3 step 3). A
    /// connection absent from this table — disconnected, or never finished
    /// its WebSocket handshake — surfaces as [`HubError::NoTarget`].
    pub async fn send(
        &self,
        connection_id: &str,
        frame: InvokeFrame,
    ) -> HubResult<()> {
        let sender = self
            .connections
            .get(connection_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| HubError::NoTarget)?;

        sender.send(frame).await.map_err(|_| {
            self.connections.remove(connection_id);
            HubError::NoTarget
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn send_delivers_to_a_registered_connection() {
        let dispatcher = Dispatcher::new();
        let (tx, mut rx) = mpsc::channel(8);
        dispatcher.register("c1".into(), tx);

        dispatcher
            .send(
                "c1",
                InvokeFrame {
                    request_id: "r1".into(),
                    method: "Ping".into(),
                    param: json!(null),
                },
            )
            .await
            .unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.method, "Ping");
    }

    #[tokio::test]
    async fn send_to_unknown_connection_is_no_target() {
        let dispatcher = Dispatcher::new();
        let result = dispatcher
            .send(
                "ghost",
                InvokeFrame {
                    request_id: "r1".into(),
                    method: "Ping".into(),
                    param: json!(null),
                },
            )
            .await;
        assert!(matches!(result, Err(HubError::NoTarget)));
    }

    #[test]
    fn completion_frame_accepts_case_insensitive_request_id() {
        let raw = json!({
            "requestid": "01ARZ3NDEKTSV4RRFFQ69G5FAV",
            "ResponseType": "Null",
        });
        let frame: CompletionFrame = serde_json::from_value(raw).unwrap();
        assert_eq!(frame.request_id.to_string(), "01ARZ3NDEKTSV4RRFFQ69G5FAV");
        assert!(matches!(frame.response, Response::Null));
    }
}
