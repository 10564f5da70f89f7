//! Storage wrappers over a real backend: failing writes for task retries, a
//! backend without filesystem paths, and one that swaps a photo's image while
//! its job is writing.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use kiaba_db::{MemoryStore, PhotoStore};
use kiaba_storage::{BlobReader, Storage, StorageBackend, StorageError, StorageResult};

pub struct FailingWrites {
    inner: Arc<dyn Storage>,
    failing: AtomicBool,
}

impl FailingWrites {
    pub fn new(inner: Arc<dyn Storage>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> StorageResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::BackendError("bucket unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for FailingWrites {
    fn backend_type(&self) -> StorageBackend {
        self.inner.backend_type()
    }

    fn local_path(&self, key: &str) -> Option<PathBuf> {
        self.inner.local_path(key)
    }

    fn url(&self, key: &str) -> String {
        self.inner.url(key)
    }

    async fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.inner.read(key).await
    }

    async fn open(&self, key: &str) -> StorageResult<BlobReader> {
        self.inner.open(key).await
    }

    async fn save(&self, name: &str, data: Vec<u8>, content_type: &str) -> StorageResult<String> {
        self.check()?;
        self.inner.save(name, data, content_type).await
    }

    async fn overwrite(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()> {
        self.check()?;
        self.inner.overwrite(key, data, content_type).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }
}

/// Behaves like an object store: no key has a local path, so every read goes
/// through the backend. Records the content type of each saved blob.
pub struct NoLocalPath {
    inner: Arc<dyn Storage>,
    saved: Mutex<Vec<(String, String)>>,
}

impl NoLocalPath {
    pub fn new(inner: Arc<dyn Storage>) -> Self {
        Self {
            inner,
            saved: Mutex::new(Vec::new()),
        }
    }

    /// `(key, content_type)` of every successful save, in order.
    pub fn saved(&self) -> Vec<(String, String)> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl Storage for NoLocalPath {
    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }

    fn local_path(&self, _key: &str) -> Option<PathBuf> {
        None
    }

    fn url(&self, key: &str) -> String {
        self.inner.url(key)
    }

    async fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.inner.read(key).await
    }

    async fn open(&self, key: &str) -> StorageResult<BlobReader> {
        self.inner.open(key).await
    }

    async fn save(&self, name: &str, data: Vec<u8>, content_type: &str) -> StorageResult<String> {
        let key = self.inner.save(name, data, content_type).await?;
        self.saved
            .lock()
            .unwrap()
            .push((key.clone(), content_type.to_string()));
        Ok(key)
    }

    async fn overwrite(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()> {
        self.inner.overwrite(key, data, content_type).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }
}

struct PendingReplace {
    store: MemoryStore,
    photo_id: Uuid,
    image_key: String,
}

/// Points a photo at a new image the next time a thumbnail is saved, as if the
/// owner replaced it while the job for the old image was running.
pub struct ReplaceDuringThumbnailSave {
    inner: Arc<dyn Storage>,
    pending: Mutex<Option<PendingReplace>>,
}

impl ReplaceDuringThumbnailSave {
    pub fn new(inner: Arc<dyn Storage>) -> Self {
        Self {
            inner,
            pending: Mutex::new(None),
        }
    }

    pub fn replace_on_next_thumbnail(&self, store: MemoryStore, photo_id: Uuid, image_key: &str) {
        *self.pending.lock().unwrap() = Some(PendingReplace {
            store,
            photo_id,
            image_key: image_key.to_string(),
        });
    }
}

#[async_trait]
impl Storage for ReplaceDuringThumbnailSave {
    fn backend_type(&self) -> StorageBackend {
        self.inner.backend_type()
    }

    fn local_path(&self, key: &str) -> Option<PathBuf> {
        self.inner.local_path(key)
    }

    fn url(&self, key: &str) -> String {
        self.inner.url(key)
    }

    async fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.inner.read(key).await
    }

    async fn open(&self, key: &str) -> StorageResult<BlobReader> {
        self.inner.open(key).await
    }

    async fn save(&self, name: &str, data: Vec<u8>, content_type: &str) -> StorageResult<String> {
        let key = self.inner.save(name, data, content_type).await?;
        let pending = if name.starts_with("ads/thumbnails/") {
            self.pending.lock().unwrap().take()
        } else {
            None
        };
        if let Some(pending) = pending {
            pending
                .store
                .replace_image(pending.photo_id, &pending.image_key)
                .await
                .unwrap();
        }
        Ok(key)
    }

    async fn overwrite(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()> {
        self.inner.overwrite(key, data, content_type).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }
}
