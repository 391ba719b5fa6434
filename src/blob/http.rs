//! Reference HTTP surface for the blob side-channel (spec §6): `POST
//! /upload/{folder}` and `DELETE /upload?path=...`, backed by whatever
//! [`super::BlobStore`] the hub was wired up with. Rate-limited on the
//! upload path, since it is the one surface an otherwise-unauthenticated
//! peer could hammer (grounded on `utils/limiter.rs`).

use salvo::oapi::extract::{PathParam, QueryParam};
use salvo::prelude::*;

use crate::error::HubError;
use crate::hub::Hub;

/// `POST /upload/{folder}`. The uploaded bytes are stored under a
/// server-chosen, collision-resistant name and the opaque path returned to
/// the caller (spec §4.1: uniqueness is the uploader's responsibility, but
/// this reference endpoint mints one itself so any caller gets the
/// guarantee for free).
#[endpoint(tags("blob"))]
pub async fn upload(
    folder: PathParam<String>,
    req: &mut Request,
) -> Result<Json<UploadResponse>, HubError> {
    let folder = folder.into_inner();
    let bytes = req
        .payload()
        .await
        .map_err(|e| HubError::Io(std::io::Error::other(e.to_string())))?
        .to_vec();
    let name = format!("{}.bin", crate::ids::RequestId::new());

    let hub = Hub::global();
    let path = hub
        .blob_store
        .upload(bytes, &name, &folder)
        .await
        .map_err(|e| HubError::Io(std::io::Error::other(e.to_string())))?;

    Ok(Json(UploadResponse { path }))
}

/// `DELETE /upload?path=...`.
#[endpoint(tags("blob"))]
pub async fn delete(
    path: QueryParam<String>,
) -> Result<Json<DeleteResponse>, HubError> {
    let hub = Hub::global();
    let deleted = hub
        .blob_store
        .delete(&path.into_inner())
        .await
        .map_err(|e| HubError::Io(std::io::Error::other(e.to_string())))?;
    Ok(Json(DeleteResponse { deleted }))
}

/// `GET /blobs/{*path}`. Spec §6 only names the upload/delete endpoints,
/// but a `BlobStore` backend that lives behind HTTP (see `http_client.rs`)
/// needs a matching way to read bytes back; this extends the reference
/// server with that one extra route rather than inventing a new transport.
#[endpoint(tags("blob"))]
pub async fn read(
    path: PathParam<String>,
    res: &mut Response,
) -> Result<(), HubError> {
    let hub = Hub::global();
    let bytes = hub
        .blob_store
        .read(&path.into_inner())
        .await
        .map_err(|e| match e {
            crate::blob::BlobError::NotFound(p) => HubError::BlobMissing { path: p },
            other => HubError::Io(std::io::Error::other(other.to_string())),
        })?;
    res.write_body(bytes).ok();
    Ok(())
}

#[derive(serde::Serialize, ToSchema)]
pub struct UploadResponse {
    pub path: String,
}

#[derive(serde::Serialize, ToSchema)]
pub struct DeleteResponse {
    pub deleted: bool,
}

pub fn router() -> Router {
    let upload_routes = Router::with_path("upload")
        .push(
            Router::with_path("{folder}")
                .post(upload)
                .ip_rate_limit(&crate::utils::limiter::RateLimit::per_minute(30)),
        )
        .delete(delete);
    let read_route = Router::with_path("blobs/{*path}").get(read);
    Router::new().push(upload_routes).push(read_route)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, OnceLock};

    use salvo::test::{ResponseExt, TestClient};

    use super::*;
    use crate::blob::FsBlobStore;
    use crate::config::HubConfig;
    use crate::registry::{DieselConnectionStore, NullUserLookup};

    static INIT: OnceLock<()> = OnceLock::new();

    fn ensure_hub() {
        INIT.get_or_init(|| {
            let config: &'static HubConfig = Box::leak(Box::new(HubConfig {
                listen_addr: "127.0.0.1".into(),
                listen_port: 0,
                database_url: "sqlite::memory:".into(),
                log: Default::default(),
                broadcast_connection_events: false,
                connection_event_method: "ConnectionEvent".into(),
                auto_purge_offline: true,
                stale_age_secs: 300,
                track_user_agent: true,
                max_concurrent_requests: 10,
                request_timeout_secs: 5,
                semaphore_timeout_ms: 1000,
                max_direct_data_size: 10 * 1024,
                temp_folder: "signalr-temp".into(),
                auto_delete_temp_files: true,
            }));
            let pool = crate::db::init_test_pool();
            let dir = tempfile::tempdir().unwrap().into_path();
            crate::hub::Hub::init_with(
                Arc::new(DieselConnectionStore::new(pool)),
                Arc::new(NullUserLookup),
                Arc::new(FsBlobStore::new(dir)),
                config,
            );
        });
    }

    #[tokio::test]
    async fn uploads_then_deletes_a_blob() {
        ensure_hub();
        let service = Service::new(router());

        let mut response = TestClient::post("http://127.0.0.1/upload/responses")
            .raw_json("hello")
            .send(&service)
            .await;
        let uploaded: UploadResponse = response.take_json().await.unwrap();
        assert!(!uploaded.path.is_empty());

        let mut response = TestClient::delete(format!(
            "http://127.0.0.1/upload?path={}",
            uploaded.path
        ))
        .send(&service)
        .await;
        let deleted: DeleteResponse = response.take_json().await.unwrap();
        assert!(deleted.deleted);
    }
}
