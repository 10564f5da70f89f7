//! Storage abstraction trait
//!
//! Every backend implements [`Storage`]. Callers that need filesystem access ask
//! [`Storage::local_path`] instead of matching on backend types; only path-addressable
//! backends answer `Some`.

use crate::StorageBackend;
use async_trait::async_trait;
use std::path::PathBuf;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Streaming handle returned by [`Storage::open`].
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

#[async_trait]
pub trait Storage: Send + Sync {
    fn backend_type(&self) -> StorageBackend;

    /// Filesystem path of `key` for path-addressable backends, `None` otherwise.
    /// The path is returned whether or not the file exists.
    fn local_path(&self, key: &str) -> Option<PathBuf>;

    /// Public URL for a stored blob.
    fn url(&self, key: &str) -> String;

    /// Read a whole blob into memory.
    async fn read(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Open a blob as a byte stream.
    async fn open(&self, key: &str) -> StorageResult<BlobReader>;

    /// Store `data` under a new blob named after `name` and return the key used.
    ///
    /// Never replaces an existing blob: on collision a short random suffix is
    /// inserted before the extension.
    async fn save(&self, name: &str, data: Vec<u8>, content_type: &str) -> StorageResult<String>;

    /// Replace the blob at `key` in place.
    async fn overwrite(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()>;

    /// Delete a blob. Deleting a missing blob is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;
}
