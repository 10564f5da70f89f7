//! Photo attach, replace, primary selection and delete.
//!
//! Every operation that changes a listing's set of images schedules processing
//! for the affected photo and leaves the listing not ready until the visibility
//! gate says otherwise.

use bytes::Bytes;
use std::sync::Arc;
use uuid::Uuid;

use kiaba_core::constants::{DEFAULT_IMAGE_BASE_NAME, PHOTO_KEY_PREFIX};
use kiaba_core::error::AppError;
use kiaba_core::models::Photo;
use kiaba_db::{ListingStore, PhotoStore};
use kiaba_storage::{content_type, Storage};
use kiaba_worker::TaskQueue;

use crate::photo_job::PhotoJobRunner;
use crate::visibility::ListingVisibilityGate;

/// An uploaded file as received from a form.
#[derive(Debug, Clone)]
pub struct PhotoUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// How processing jobs get run after a photo changes.
#[derive(Clone)]
pub enum JobScheduler {
    /// Persist a task for the worker pool.
    Queue(Arc<TaskQueue>),
    /// Run the job before returning.
    Inline,
}

pub struct PhotoService {
    listings: Arc<dyn ListingStore>,
    photos: Arc<dyn PhotoStore>,
    storage: Arc<dyn Storage>,
    runner: Arc<PhotoJobRunner>,
    gate: Arc<ListingVisibilityGate>,
    scheduler: JobScheduler,
    max_photos: usize,
}

impl PhotoService {
    pub fn new(
        listings: Arc<dyn ListingStore>,
        photos: Arc<dyn PhotoStore>,
        storage: Arc<dyn Storage>,
        runner: Arc<PhotoJobRunner>,
        gate: Arc<ListingVisibilityGate>,
        scheduler: JobScheduler,
        max_photos: usize,
    ) -> Self {
        Self {
            listings,
            photos,
            storage,
            runner,
            gate,
            scheduler,
            max_photos,
        }
    }

    pub async fn get_photo(&self, photo_id: Uuid) -> Result<Option<Photo>, AppError> {
        self.photos.get_photo(photo_id).await
    }

    pub async fn list_photos(&self, listing_id: Uuid) -> Result<Vec<Photo>, AppError> {
        self.photos.list_photos(listing_id).await
    }

    /// Store an upload, attach it to the listing and schedule its processing job.
    ///
    /// The photo limit is checked before anything is written, then enforced again
    /// inside the insert transaction.
    #[tracing::instrument(skip(self, upload), fields(file_name = %upload.file_name, size = upload.data.len()))]
    pub async fn attach_photo(
        &self,
        listing_id: Uuid,
        upload: PhotoUpload,
        make_primary: bool,
    ) -> Result<Photo, AppError> {
        if self.listings.get_listing(listing_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Listing {}", listing_id)));
        }

        let count = self.photos.count_photos(listing_id).await?;
        if count >= self.max_photos as i64 {
            return Err(AppError::max_photos_exceeded(self.max_photos));
        }

        if upload.data.is_empty() {
            return Err(AppError::InvalidInput("Uploaded file is empty".to_string()));
        }

        let name = upload_key(&upload.file_name);
        let ct = content_type::resolve(&name, upload.content_type.as_deref());
        let key = self
            .storage
            .save(&name, upload.data.to_vec(), &ct)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;

        let photo = match self
            .photos
            .attach_photo(listing_id, &key, make_primary, self.max_photos)
            .await
        {
            Ok(photo) => photo,
            Err(e) => {
                self.remove_blob(&key).await;
                return Err(e);
            }
        };

        tracing::info!(photo_id = %photo.id, listing_id = %listing_id, key = %key, "Photo attached");

        self.schedule(photo.id, Some(&upload.data)).await;
        self.refreshed(photo).await
    }

    /// Make `photo_id` the listing's only primary photo.
    pub async fn set_primary(&self, photo_id: Uuid) -> Result<Photo, AppError> {
        self.photos
            .set_primary(photo_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Photo {}", photo_id)))
    }

    /// Swap a photo's image for a new upload and reprocess it.
    #[tracing::instrument(skip(self, upload), fields(photo_id = %photo_id))]
    pub async fn replace_image(
        &self,
        photo_id: Uuid,
        upload: PhotoUpload,
    ) -> Result<Photo, AppError> {
        let Some(before) = self.photos.get_photo(photo_id).await? else {
            return Err(AppError::NotFound(format!("Photo {}", photo_id)));
        };
        if upload.data.is_empty() {
            return Err(AppError::InvalidInput("Uploaded file is empty".to_string()));
        }

        let name = upload_key(&upload.file_name);
        let ct = content_type::resolve(&name, upload.content_type.as_deref());
        let key = self
            .storage
            .save(&name, upload.data.to_vec(), &ct)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;

        let Some(photo) = self.photos.replace_image(photo_id, &key).await? else {
            self.remove_blob(&key).await;
            return Err(AppError::NotFound(format!("Photo {}", photo_id)));
        };

        if before.has_image() && before.image != key {
            self.remove_blob(&before.image).await;
        }
        if let Some(thumbnail) = before.thumbnail.as_deref() {
            self.remove_blob(thumbnail).await;
        }

        self.schedule(photo.id, Some(&upload.data)).await;
        self.refreshed(photo).await
    }

    /// Delete a photo and its blobs, then re-check the listing, which may become
    /// ready once an unprocessable photo is gone.
    #[tracing::instrument(skip(self))]
    pub async fn delete_photo(&self, photo_id: Uuid) -> Result<(), AppError> {
        let Some(photo) = self.photos.delete_photo(photo_id).await? else {
            return Err(AppError::NotFound(format!("Photo {}", photo_id)));
        };

        if photo.has_image() {
            self.remove_blob(&photo.image).await;
        }
        if let Some(thumbnail) = photo.thumbnail.as_deref() {
            self.remove_blob(thumbnail).await;
        }

        self.gate.evaluate(photo.listing_id).await?;
        tracing::info!(photo_id = %photo_id, listing_id = %photo.listing_id, "Photo deleted");
        Ok(())
    }

    /// Scheduling failures never fail the request; the maintenance commands
    /// pick up photos left without a thumbnail.
    async fn schedule(&self, photo_id: Uuid, upload: Option<&Bytes>) {
        match &self.scheduler {
            JobScheduler::Queue(queue) => {
                if let Err(e) = queue.submit_photo_job(photo_id).await {
                    tracing::error!(error = %e, photo_id = %photo_id, "Failed to queue photo processing");
                }
            }
            JobScheduler::Inline => {
                if let Err(e) = self.runner.run_with_upload(photo_id, false, upload).await {
                    tracing::error!(error = %e, photo_id = %photo_id, "Inline photo processing failed");
                }
            }
        }
    }

    async fn refreshed(&self, photo: Photo) -> Result<Photo, AppError> {
        Ok(self.photos.get_photo(photo.id).await?.unwrap_or(photo))
    }

    async fn remove_blob(&self, key: &str) {
        if let Err(e) = self.storage.delete(key).await {
            tracing::warn!(error = %e, key = %key, "Failed to delete photo blob");
        }
    }
}

/// Storage name for an upload: the sanitized file name under the photo prefix.
pub fn upload_key(file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let mut clean: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    clean = clean.trim_start_matches('.').to_string();
    if clean.is_empty() {
        clean = DEFAULT_IMAGE_BASE_NAME.to_string();
    }
    format!("{}/{}", PHOTO_KEY_PREFIX, clean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_key_strips_directories_and_odd_characters() {
        assert_eq!(upload_key("car.jpg"), "ads/car.jpg");
        assert_eq!(upload_key("C:\\Users\\me\\my car.JPG"), "ads/my_car.JPG");
        assert_eq!(upload_key("../../etc/passwd"), "ads/passwd");
        assert_eq!(upload_key(".."), "ads/image");
        assert_eq!(upload_key(""), "ads/image");
    }
}
