//! Blob side-channel (spec §4.1, component A): store/read/delete opaque
//! blobs keyed by an opaque path. Large responses are diverted here instead
//! of being inlined in a message frame (spec §1, §4.5, §4.7).

pub mod fs_store;
pub mod http;
#[cfg(feature = "http-blob-store")]
pub mod http_client;

use salvo::async_trait;
use thiserror::Error;

pub use fs_store::FsBlobStore;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("blob backend error: {0}")]
    Backend(String),
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Three operations over opaque byte blobs (spec §4.1). `Upload` MUST NOT
/// overwrite silently unless the caller supplies a unique name — the
/// default implementation relies on the caller always supplying a fresh
/// token in `name` (see `executor.rs`'s `<method>_<fresh-token>.json`
/// convention).
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        name: &str,
        folder: &str,
    ) -> BlobResult<String>;

    async fn read(&self, path: &str) -> BlobResult<Vec<u8>>;

    async fn delete(&self, path: &str) -> BlobResult<bool>;
}
