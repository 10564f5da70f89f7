//! One processing job per photo.
//!
//! A job loads the photo row, runs the image pipeline, writes back only the
//! processed columns and then re-evaluates its listing's visibility gate. Jobs are
//! idempotent: a photo already carrying the processed marker is skipped unless
//! the run is forced.

use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use kiaba_core::error::AppError;
use kiaba_core::models::{Photo, ProcessedPhotoFields};
use kiaba_db::PhotoStore;
use kiaba_processing::{PhotoProcessor, ProcessOutcome, ProcessingError};

use crate::visibility::{GateOutcome, ListingVisibilityGate};

#[derive(Debug, Error)]
pub enum PhotoJobError {
    #[error(transparent)]
    Store(#[from] AppError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),
}

impl PhotoJobError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            PhotoJobError::Store(e) => e.is_recoverable(),
            PhotoJobError::Processing(e) => e.is_recoverable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PhotoJobOutcome {
    /// The photo row no longer exists.
    Missing,
    /// The image was replaced while the job ran. Nothing was saved; the job
    /// queued for the new image processes it.
    Superseded,
    AlreadyProcessed { listing_ready: bool },
    /// The row has no image key.
    NoImage,
    /// Nothing readable, or bytes that are not an image. The photo keeps no
    /// thumbnail, so its listing stays hidden.
    Undecodable,
    Processed {
        image: String,
        thumbnail: String,
        watermarked: bool,
        listing_ready: bool,
    },
}

impl PhotoJobOutcome {
    pub fn is_processed(&self) -> bool {
        matches!(self, PhotoJobOutcome::Processed { .. })
    }
}

pub struct PhotoJobRunner {
    photos: Arc<dyn PhotoStore>,
    processor: PhotoProcessor,
    gate: Arc<ListingVisibilityGate>,
}

impl PhotoJobRunner {
    pub fn new(
        photos: Arc<dyn PhotoStore>,
        processor: PhotoProcessor,
        gate: Arc<ListingVisibilityGate>,
    ) -> Self {
        Self {
            photos,
            processor,
            gate,
        }
    }

    pub fn processor(&self) -> &PhotoProcessor {
        &self.processor
    }

    pub async fn run(&self, photo_id: Uuid, force: bool) -> Result<PhotoJobOutcome, PhotoJobError> {
        self.run_with_upload(photo_id, force, None).await
    }

    /// Run the job, preferring `upload` over storage when the photo's blob is
    /// not readable from a local path.
    #[tracing::instrument(skip(self, upload))]
    pub async fn run_with_upload(
        &self,
        photo_id: Uuid,
        force: bool,
        upload: Option<&Bytes>,
    ) -> Result<PhotoJobOutcome, PhotoJobError> {
        let Some(photo) = self.photos.get_photo(photo_id).await? else {
            tracing::warn!("Photo not found, skipping processing");
            return Ok(PhotoJobOutcome::Missing);
        };

        if !photo.has_image() {
            tracing::warn!("Photo has no image, skipping processing");
            return Ok(PhotoJobOutcome::NoImage);
        }

        if photo.is_processed() && !force {
            tracing::debug!("Photo already processed");
            let listing_ready = self.evaluate_gate(photo.listing_id).await?;
            return Ok(PhotoJobOutcome::AlreadyProcessed { listing_ready });
        }

        let keys = match self.processor.process(&photo.image, upload).await? {
            ProcessOutcome::Processed(keys) => keys,
            ProcessOutcome::Undecodable => {
                tracing::warn!(image = %photo.image, "Photo could not be decoded, leaving it unprocessed");
                return Ok(PhotoJobOutcome::Undecodable);
            }
        };

        let fields = ProcessedPhotoFields {
            image: keys.image.clone(),
            thumbnail: keys.thumbnail.clone(),
            processed_at: Utc::now(),
        };

        if !self
            .photos
            .save_processed(photo.id, &photo.image, &fields)
            .await?
        {
            return self.discard_output(&photo, &fields).await;
        }

        self.remove_replaced_blobs(&photo, &fields).await;

        let listing_ready = self.evaluate_gate(photo.listing_id).await?;

        Ok(PhotoJobOutcome::Processed {
            image: keys.image,
            thumbnail: keys.thumbnail,
            watermarked: keys.watermarked,
            listing_ready,
        })
    }

    /// The row was deleted or pointed at a new image before the output could be
    /// saved. Remove what this run wrote unless the row now references it.
    async fn discard_output(
        &self,
        photo: &Photo,
        output: &ProcessedPhotoFields,
    ) -> Result<PhotoJobOutcome, PhotoJobError> {
        let current = self.photos.get_photo(photo.id).await?;
        let current_image = current.as_ref().map(|p| p.image.as_str());

        self.remove_blob(&output.thumbnail).await;
        if current_image != Some(output.image.as_str()) {
            self.remove_blob(&output.image).await;
        }

        match current {
            None => {
                tracing::warn!("Photo deleted during processing, removed new blobs");
                Ok(PhotoJobOutcome::Missing)
            }
            Some(current) => {
                tracing::warn!(
                    processed = %photo.image,
                    current = %current.image,
                    "Photo image replaced during processing, discarded output"
                );
                Ok(PhotoJobOutcome::Superseded)
            }
        }
    }

    async fn evaluate_gate(&self, listing_id: Uuid) -> Result<bool, AppError> {
        Ok(self.gate.evaluate(listing_id).await? == GateOutcome::Ready)
    }

    async fn remove_replaced_blobs(&self, before: &Photo, after: &ProcessedPhotoFields) {
        if let Some(old_thumbnail) = before.thumbnail.as_deref() {
            if !old_thumbnail.trim().is_empty() && old_thumbnail != after.thumbnail {
                self.remove_blob(old_thumbnail).await;
            }
        }
        if before.image != after.image {
            self.remove_blob(&before.image).await;
        }
    }

    async fn remove_blob(&self, key: &str) {
        if let Err(e) = self.processor.storage().delete(key).await {
            tracing::warn!(error = %e, key = %key, "Failed to delete stale blob");
        }
    }
}
