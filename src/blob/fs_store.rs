//! Default `BlobStore`: a local folder on disk. Grounded on the teacher's
//! `rust-embed`-backed static file serving in `main.rs`/`routers.rs` for the
//! "serve a folder over HTTP" half, generalized here to read/write/delete.

use std::path::{Path, PathBuf};

use salvo::async_trait;
use tokio::fs;

use super::{BlobError, BlobResult, BlobStore};

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves `path` against the store root, rejecting any attempt to
    /// escape it via `..` components.
    fn resolve(&self, path: &str) -> BlobResult<PathBuf> {
        let candidate = Path::new(path);
        if candidate
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(BlobError::Backend(format!(
                "rejected path escaping store root: {path}"
            )));
        }
        Ok(self.root.join(candidate))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        name: &str,
        folder: &str,
    ) -> BlobResult<String> {
        let rel = format!("{folder}/{name}");
        let full = self.resolve(&rel)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&full, bytes).await?;
        Ok(rel)
    }

    async fn read(&self, path: &str) -> BlobResult<Vec<u8>> {
        let full = self.resolve(path)?;
        fs::read(&full)
            .await
            .map_err(|_| BlobError::NotFound(path.to_string()))
    }

    async fn delete(&self, path: &str) -> BlobResult<bool> {
        let full = self.resolve(path)?;
        match fs::remove_file(&full).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BlobError::Io(e)),
        }
    }
}
