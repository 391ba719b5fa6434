//! Request correlator (spec §4.3, component E): the single operation every
//! public `invoke` variant reduces to. Orchestrates admission control (H),
//! targeting (F), the pending-request table (D), and the transport adapter
//! (C), then hands the result to the response decoder (G).

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{HubError, HubResult};
use crate::hub::Hub;
use crate::ids::RequestId;
use crate::response::{self, Response};
use crate::targeting::Target;
use crate::transport::InvokeFrame;

/// Runs steps 1-6 of spec §4.3 and returns the raw envelope together with
/// the admission permit (so callers that still need to decode a `Blob`
/// envelope can keep holding it) and the absolute deadline the call started
/// with (so a decode step can be bounded by whatever of `RequestTimeout` is
/// left, per spec §5: "The blob read in the decoder is itself cancellable
/// with the same deadline").
async fn invoke_core<'a>(
    hub: &'a Hub,
    target: &Target,
    method: &str,
    param: Value,
) -> HubResult<(Response, tokio::sync::SemaphorePermit<'a>, tokio::time::Instant)> {
    // Step 1: admission control. The permit is released on drop, on every
    // exit path of this function including cancellation.
    let permit = hub.admission.acquire().await?;
    let deadline = tokio::time::Instant::now() + hub.request_timeout();

    // Step 2: resolve targets. An empty set - including one made empty by
    // the staleness sweep - refuses early rather than sending to nobody.
    let connection_ids = target.resolve(&hub.registry).await?;
    if connection_ids.is_empty() {
        return Err(HubError::NoTarget);
    }

    // Step 3: allocate a requestID and register a completion slot. The
    // guard removes the slot on drop, covering timeout/cancel/panic paths
    // without relying on code after the awaited completion running.
    let request_id = RequestId::new();
    let (completion, _slot_guard) = hub.pending.register_guarded(request_id)?;

    // Step 4: envelope and dispatch to every resolved connection. A partial
    // send failure is logged, not fatal - the call still succeeds if any
    // other target replies.
    let frame = InvokeFrame {
        request_id: request_id.to_string(),
        method: method.to_string(),
        param,
    };
    for connection_id in &connection_ids {
        if let Err(e) = hub.dispatcher.send(connection_id, frame.clone()).await
        {
            tracing::warn!(
                connection_id,
                request_id = %request_id,
                error = %e,
                "partial send failure dispatching call"
            );
        }
    }

    // Step 5/6: await the first reply under an absolute deadline. Later
    // replies under the same requestID are handled by `Hub::complete`
    // discarding them once the slot is gone.
    match tokio::time::timeout_at(deadline, completion).await {
        Ok(Ok(response)) => Ok((response, permit, deadline)),
        Ok(Err(_)) => Err(HubError::Cancelled),
        Err(_) => Err(HubError::Timeout),
    }
    // `_slot_guard` releases here on every path above; `permit` is returned
    // to the caller, who releases it once decoding (if any) is done.
}

/// `Invoke(target, method, param) -> Response` (spec §4.3), returning the
/// raw envelope — including an `Error` variant — without decoding it into a
/// concrete type. Use [`invoke`] when a typed result is wanted instead.
pub async fn invoke_raw(
    hub: &Hub,
    target: &Target,
    method: &str,
    param: Value,
) -> HubResult<Response> {
    let (response, _permit, _deadline) =
        invoke_core(hub, target, method, param).await?;
    Ok(response)
    // Step 7: `_permit` releases here.
}

/// `Invoke` with the response decoded into `T` (spec §4.5). An `Error`
/// envelope surfaces as `Err(HubError::ClientError)`; see `response::decode`.
///
/// The decode runs with the admission permit still held and bounded by
/// whatever of `RequestTimeout` remains after the reply arrived — a
/// `Response::Blob` whose read hangs surfaces `Timeout` instead of blocking
/// forever and uncounted against `MaxConcurrentRequests` (spec §5).
pub async fn invoke<T: DeserializeOwned>(
    hub: &Hub,
    target: &Target,
    method: &str,
    param: Value,
) -> HubResult<T> {
    let (response, _permit, deadline) =
        invoke_core(hub, target, method, param).await?;

    let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
    tokio::time::timeout(
        remaining,
        response::decode(
            response,
            hub.blob_store.as_ref(),
            &hub.config.temp_folder,
            hub.config.auto_delete_temp_files,
        ),
    )
    .await
    .unwrap_or(Err(HubError::Timeout))
    // `_permit` releases here, after decoding.
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::HubConfig;
    use crate::events::EventBroadcaster;
    use crate::registry::{
        ConnectionRegistry, DieselConnectionStore, NullUserLookup,
    };

    fn test_config() -> &'static HubConfig {
        Box::leak(Box::new(HubConfig {
            listen_addr: "127.0.0.1".into(),
            listen_port: 0,
            database_url: "sqlite::memory:".into(),
            log: Default::default(),
            broadcast_connection_events: false,
            connection_event_method: "ConnectionEvent".into(),
            auto_purge_offline: true,
            stale_age_secs: 300,
            track_user_agent: true,
            max_concurrent_requests: 1,
            request_timeout_secs: 1,
            semaphore_timeout_ms: 50,
            max_direct_data_size: 10 * 1024,
            temp_folder: "signalr-temp".into(),
            auto_delete_temp_files: true,
        }))
    }

    async fn hub_with_open_connection(
        connection_id: &str,
    ) -> (Hub, mpsc::Receiver<InvokeFrame>) {
        let pool = crate::db::init_test_pool();
        let config = test_config();
        let registry = ConnectionRegistry::new(
            Arc::new(DieselConnectionStore::new(pool)),
            Arc::new(NullUserLookup),
            EventBroadcaster::default(),
            config.stale_age(),
            config.auto_purge_offline,
            config.broadcast_connection_events,
        );
        registry.on_open("u1", connection_id, None).await.unwrap();

        let dispatcher = crate::transport::Dispatcher::new();
        let (tx, rx) = mpsc::channel(8);
        dispatcher.register(connection_id.to_string(), tx);

        let hub = Hub {
            config,
            registry,
            dispatcher,
            pending: crate::pending::PendingTable::new(),
            admission: crate::admission::AdmissionControl::new(
                config.max_concurrent_requests,
                config.semaphore_timeout(),
            ),
            blob_store: Arc::new(crate::blob::FsBlobStore::new(
                std::env::temp_dir(),
            )),
        };
        (hub, rx)
    }

    #[tokio::test]
    async fn no_target_when_connection_is_not_open() {
        let (hub, _rx) = hub_with_open_connection("c1").await;

        let result = invoke_raw(
            &hub,
            &Target::Connection("ghost".into()),
            "Ping",
            Value::Null,
        )
        .await;
        assert!(matches!(result, Err(HubError::NoTarget)));
    }

    #[tokio::test]
    async fn timeout_when_nobody_replies() {
        let (hub, _rx) = hub_with_open_connection("c1").await;

        let result = invoke_raw(
            &hub,
            &Target::Connection("c1".into()),
            "Slow",
            Value::Null,
        )
        .await;
        assert!(matches!(result, Err(HubError::Timeout)));
        assert!(hub.pending.is_empty());
        assert_eq!(
            hub.admission.available_permits(),
            hub.config.max_concurrent_requests
        );
    }

    #[tokio::test]
    async fn a_reply_delivered_before_the_deadline_completes_the_call() {
        let (hub, mut rx) = hub_with_open_connection("c1").await;
        let hub = Arc::new(hub);
        let hub_for_call = Arc::clone(&hub);

        let call = tokio::spawn(async move {
            invoke_raw(
                &hub_for_call,
                &Target::Connection("c1".into()),
                "Ping",
                Value::Null,
            )
            .await
        });

        let frame = rx.recv().await.unwrap();
        let request_id: RequestId = frame.request_id.parse().unwrap();
        hub.complete(request_id, Response::Inline(json!({"Message": "Pong"})));

        let response = call.await.unwrap().unwrap();
        match response {
            Response::Inline(v) => assert_eq!(v, json!({"Message": "Pong"})),
            other => panic!("unexpected {other:?}"),
        }
    }

    struct HangingBlobStore;

    #[salvo::async_trait]
    impl crate::blob::BlobStore for HangingBlobStore {
        async fn upload(
            &self,
            _bytes: Vec<u8>,
            _name: &str,
            _folder: &str,
        ) -> crate::blob::BlobResult<String> {
            Ok("unused".to_string())
        }

        async fn read(&self, _path: &str) -> crate::blob::BlobResult<Vec<u8>> {
            // Simulates a blob backend that never returns, to prove the
            // decode step is bounded by the call's deadline rather than
            // blocking forever once the admission permit has already been
            // granted and the reply has already arrived.
            std::future::pending().await
        }

        async fn delete(&self, _path: &str) -> crate::blob::BlobResult<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn typed_invoke_times_out_instead_of_hanging_on_a_stuck_blob_read() {
        let (mut hub, mut rx) = hub_with_open_connection("c1").await;
        hub.blob_store = Arc::new(HangingBlobStore);
        let hub = Arc::new(hub);
        let hub_for_call = Arc::clone(&hub);

        let call = tokio::spawn(async move {
            invoke::<Value>(
                &hub_for_call,
                &Target::Connection("c1".into()),
                "Big",
                Value::Null,
            )
            .await
        });

        let frame = rx.recv().await.unwrap();
        let request_id: RequestId = frame.request_id.parse().unwrap();
        hub.complete(
            request_id,
            Response::Blob {
                path: "signalr-temp/x.json".into(),
            },
        );

        let result = call.await.unwrap();
        assert!(matches!(result, Err(HubError::Timeout)));
        assert!(hub.pending.is_empty());
        assert_eq!(
            hub.admission.available_permits(),
            hub.config.max_concurrent_requests
        );
    }

    #[tokio::test]
    async fn overload_is_returned_when_no_permit_is_free() {
        let (hub, _rx) = hub_with_open_connection("c1").await;
        let hub = Arc::new(hub);

        let held = hub.admission.acquire().await.unwrap();
        let result = invoke_raw(
            &hub,
            &Target::Connection("c1".into()),
            "Ping",
            Value::Null,
        )
        .await;
        drop(held);
        assert!(matches!(result, Err(HubError::Overloaded)));
    }
}
