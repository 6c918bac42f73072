//! Blob gateway: bytes at logical, relative paths.
//!
//! Paths such as `split/report-pages-1-2-Ab3dE9xZ.pdf` are logical; the
//! store owns the mapping to physical storage. Callers are responsible for
//! collision-resistant filenames, so `put` simply overwrites.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Errors emitted by blob storage operations.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("invalid blob path: {0}")]
    InvalidPath(String),

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Trait abstracting over blob storage backends.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<(), BlobError>;

    /// Return the blob bytes or `BlobError::NotFound`.
    async fn get(&self, path: &str) -> Result<Vec<u8>, BlobError>;

    async fn exists(&self, path: &str) -> Result<bool, BlobError>;

    /// Delete the blob if present. Deleting a missing path is not an error;
    /// returns whether something was removed.
    async fn delete(&self, path: &str) -> Result<bool, BlobError>;

    /// Size in bytes, or `BlobError::NotFound`.
    async fn size_of(&self, path: &str) -> Result<u64, BlobError>;

    /// Publicly reachable URL for the blob.
    fn public_url(&self, path: &str) -> String;
}

/// Reject absolute paths, parent traversal and empty segments.
pub fn validate_path(path: &str) -> Result<(), BlobError> {
    if path.is_empty() || path.starts_with('/') || path.contains('\\') {
        return Err(BlobError::InvalidPath(path.to_string()));
    }
    let ok = Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !ok || path.split('/').any(|seg| seg.is_empty()) {
        return Err(BlobError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Filesystem blob store rooted at a directory.
///
/// Writes go to a hidden temp file in the destination directory and are
/// renamed into place, so readers never observe a partial blob.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, BlobError> {
        validate_path(path)?;
        Ok(self.root.join(path))
    }

    fn io(path: &str, source: std::io::Error) -> BlobError {
        if source.kind() == std::io::ErrorKind::NotFound {
            BlobError::NotFound(path.to_string())
        } else {
            BlobError::Io {
                path: path.to_string(),
                source,
            }
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<(), BlobError> {
        let dest = self.resolve(path)?;
        let dir = dest
            .parent()
            .ok_or_else(|| BlobError::InvalidPath(path.to_string()))?;
        fs::create_dir_all(dir).await.map_err(|e| Self::io(path, e))?;

        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));

        let write = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            fs::rename(&tmp, &dest).await
        };
        if let Err(e) = write.await {
            let _ = fs::remove_file(&tmp).await;
            return Err(BlobError::Io {
                path: path.to_string(),
                source: e,
            });
        }
        tracing::debug!(path, bytes = bytes.len(), "blob written");
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, BlobError> {
        let full = self.resolve(path)?;
        fs::read(&full).await.map_err(|e| Self::io(path, e))
    }

    async fn exists(&self, path: &str) -> Result<bool, BlobError> {
        let full = self.resolve(path)?;
        match fs::metadata(&full).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::io(path, e)),
        }
    }

    async fn delete(&self, path: &str) -> Result<bool, BlobError> {
        let full = self.resolve(path)?;
        match fs::remove_file(&full).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::io(path, e)),
        }
    }

    async fn size_of(&self, path: &str) -> Result<u64, BlobError> {
        let full = self.resolve(path)?;
        let meta = fs::metadata(&full).await.map_err(|e| Self::io(path, e))?;
        Ok(meta.len())
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/storage/{}", self.public_base_url, path)
    }
}
