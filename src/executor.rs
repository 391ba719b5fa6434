//! Client executor contract (spec §4.7, component I). This core never runs
//! peer code directly — every connected client implements `Execute` on its
//! own side of the wire. What lives here is the contract itself, plus an
//! in-process reference peer that exercises the full pipeline (admission →
//! targeting → dispatch → `Execute` → size-check → reply) without a real
//! socket, for integration tests.

use std::sync::Arc;

use salvo::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::blob::BlobStore;
use crate::hub::Hub;
use crate::ids::RequestId;
use crate::response::Response;
use crate::transport::InvokeFrame;

/// The single entry point every connected peer implements (spec §4.7):
/// `Execute(method, param) -> value-or-error`.
#[async_trait]
pub trait Execute: Send + Sync {
    async fn execute(&self, method: &str, param: Value) -> Result<Value, String>;
}

/// Drives the reply half of spec §4.7 for one connection: reads inbound
/// `InvokeFrame`s, runs them through an [`Execute`] implementation, applies
/// the inline-vs-blob size decision, and completes the pending request.
///
/// This is a reference peer, not part of the transport adapter — real
/// clients make this same decision in whatever language they're written
/// in; `src/transport/ws.rs` only relays bytes.
pub struct InProcessPeer<E> {
    executor: E,
    blob_store: Arc<dyn BlobStore>,
    max_direct_data_size: usize,
    temp_folder: String,
}

impl<E: Execute> InProcessPeer<E> {
    pub fn new(
        executor: E,
        blob_store: Arc<dyn BlobStore>,
        max_direct_data_size: usize,
        temp_folder: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            blob_store,
            max_direct_data_size,
            temp_folder: temp_folder.into(),
        }
    }

    /// Answers inbound calls from `inbox` until the channel closes (the
    /// dispatcher drops its sender when the connection is unregistered).
    pub async fn run(&self, hub: &Hub, mut inbox: mpsc::Receiver<InvokeFrame>) {
        while let Some(frame) = inbox.recv().await {
            let Ok(request_id) = frame.request_id.parse::<RequestId>() else {
                tracing::warn!(
                    request_id = frame.request_id,
                    "inbound frame had an unparseable requestID"
                );
                continue;
            };
            let response = self.handle(frame).await;
            hub.complete(request_id, response);
        }
    }

    async fn handle(&self, frame: InvokeFrame) -> Response {
        match self.executor.execute(&frame.method, frame.param).await {
            Ok(Value::Null) => Response::Null,
            Ok(value) => self.wrap(&frame.method, value).await,
            Err(message) => Response::Error { message },
        }
    }

    async fn wrap(&self, method: &str, value: Value) -> Response {
        let encoded = match serde_json::to_vec(&value) {
            Ok(bytes) => bytes,
            Err(e) => {
                return Response::Error {
                    message: format!("failed to encode result: {e}"),
                };
            }
        };

        if encoded.len() <= self.max_direct_data_size {
            return Response::Inline(value);
        }

        let name = format!("{method}_{}.json", RequestId::new());
        match self
            .blob_store
            .upload(encoded, &name, &self.temp_folder)
            .await
        {
            Ok(path) => Response::Blob { path },
            Err(e) => Response::Error {
                message: format!("blob upload failed: {e}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::blob::FsBlobStore;

    struct EchoExecutor;

    #[async_trait]
    impl Execute for EchoExecutor {
        async fn execute(
            &self,
            method: &str,
            param: Value,
        ) -> Result<Value, String> {
            match method {
                "Ping" => Ok(json!({"Message": "Pong"})),
                "Fail" => Err("boom".to_string()),
                "Echo" => Ok(param),
                _ => Err(format!("unknown method {method}")),
            }
        }
    }

    fn peer(max_direct_data_size: usize) -> InProcessPeer<EchoExecutor> {
        let dir = tempfile::tempdir().unwrap();
        InProcessPeer::new(
            EchoExecutor,
            Arc::new(FsBlobStore::new(dir.into_path())),
            max_direct_data_size,
            "signalr-temp",
        )
    }

    #[tokio::test]
    async fn small_results_are_wrapped_inline() {
        let peer = peer(10 * 1024);
        let response = peer
            .handle(InvokeFrame {
                request_id: RequestId::new().to_string(),
                method: "Ping".into(),
                param: Value::Null,
            })
            .await;
        assert!(matches!(response, Response::Inline(_)));
    }

    #[tokio::test]
    async fn oversized_results_spill_to_a_blob() {
        let peer = peer(4);
        let response = peer
            .handle(InvokeFrame {
                request_id: RequestId::new().to_string(),
                method: "Ping".into(),
                param: Value::Null,
            })
            .await;
        assert!(matches!(response, Response::Blob { .. }));
    }

    #[tokio::test]
    async fn errors_are_wrapped_as_error_envelopes() {
        let peer = peer(10 * 1024);
        let response = peer
            .handle(InvokeFrame {
                request_id: RequestId::new().to_string(),
                method: "Fail".into(),
                param: Value::Null,
            })
            .await;
        assert!(matches!(response, Response::Error { .. }));
    }

    #[tokio::test]
    async fn null_results_are_wrapped_as_null() {
        let peer = peer(10 * 1024);
        let response = peer
            .handle(InvokeFrame {
                request_id: RequestId::new().to_string(),
                method: "Echo".into(),
                param: Value::Null,
            })
            .await;
        assert!(matches!(response, Response::Null));
    }
}
