//! Alternate `BlobStore` backend (spec §4.1: "alternative implementations
//! (object store) must preserve the semantics"), hitting the reference
//! endpoints in `http.rs` over HTTP instead of touching the filesystem
//! directly. Demonstrates the three-method contract is backend-agnostic;
//! gated behind the `http-blob-store` feature since it pulls in `reqwest`.

use salvo::async_trait;

use super::{BlobError, BlobResult, BlobStore};

pub struct HttpBlobStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[derive(serde::Deserialize)]
struct UploadResponse {
    path: String,
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        _name: &str,
        folder: &str,
    ) -> BlobResult<String> {
        let response = self
            .client
            .post(format!("{}/upload/{folder}", self.base_url))
            .body(bytes)
            .send()
            .await
            .map_err(|e| BlobError::Backend(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BlobError::Backend(format!(
                "upload failed with status {}",
                response.status()
            )));
        }
        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| BlobError::Backend(e.to_string()))?;
        Ok(body.path)
    }

    async fn read(&self, path: &str) -> BlobResult<Vec<u8>> {
        let response = self
            .client
            .get(format!("{}/blobs/{path}", self.base_url))
            .send()
            .await
            .map_err(|e| BlobError::Backend(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BlobError::NotFound(path.to_string()));
        }
        if !response.status().is_success() {
            return Err(BlobError::Backend(format!(
                "read failed with status {}",
                response.status()
            )));
        }
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| BlobError::Backend(e.to_string()))
    }

    async fn delete(&self, path: &str) -> BlobResult<bool> {
        let response = self
            .client
            .delete(format!("{}/upload", self.base_url))
            .query(&[("path", path)])
            .send()
            .await
            .map_err(|e| BlobError::Backend(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BlobError::Backend(format!(
                "delete failed with status {}",
                response.status()
            )));
        }
        #[derive(serde::Deserialize)]
        struct DeleteResponse {
            deleted: bool,
        }
        let body: DeleteResponse = response
            .json()
            .await
            .map_err(|e| BlobError::Backend(e.to_string()))?;
        Ok(body.deleted)
    }
}
