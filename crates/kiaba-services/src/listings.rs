use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use kiaba_core::error::AppError;
use kiaba_core::models::{Listing, ListingStatus, NewListing};
use kiaba_db::{ListingStore, PhotoStore};
use kiaba_storage::Storage;

use crate::metrics::SiteMetrics;

const MAX_PAGE_SIZE: i64 = 100;

pub struct ListingService {
    listings: Arc<dyn ListingStore>,
    photos: Arc<dyn PhotoStore>,
    storage: Arc<dyn Storage>,
    metrics: Arc<SiteMetrics>,
}

impl ListingService {
    pub fn new(
        listings: Arc<dyn ListingStore>,
        photos: Arc<dyn PhotoStore>,
        storage: Arc<dyn Storage>,
        metrics: Arc<SiteMetrics>,
    ) -> Self {
        Self {
            listings,
            photos,
            storage,
            metrics,
        }
    }

    pub async fn create_listing(&self, new: NewListing) -> Result<Listing, AppError> {
        if new.title.trim().is_empty() {
            return Err(AppError::InvalidInput("Listing title is required".to_string()));
        }
        let listing = self.listings.create_listing(new).await?;
        if listing.is_publicly_visible() {
            self.metrics.invalidate();
        }
        tracing::info!(listing_id = %listing.id, status = %listing.status, "Listing created");
        Ok(listing)
    }

    pub async fn get_listing(&self, id: Uuid) -> Result<Listing, AppError> {
        self.listings
            .get_listing(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Listing {}", id)))
    }

    /// Moderation transition. Photo readiness is untouched.
    pub async fn set_status(&self, id: Uuid, status: ListingStatus) -> Result<Listing, AppError> {
        let listing = self
            .listings
            .set_status(id, status)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Listing {}", id)))?;
        self.metrics.invalidate();
        tracing::info!(listing_id = %id, status = %status, "Listing status changed");
        Ok(listing)
    }

    /// Public listings, newest first. Only approved and ready listings are returned.
    pub async fn list_public(&self, limit: i64, offset: i64) -> Result<Vec<Listing>, AppError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let offset = offset.max(0);
        let listings = self.listings.list_public(limit, offset).await?;
        Ok(listings
            .into_iter()
            .filter(Listing::is_publicly_visible)
            .collect())
    }

    /// Delete approved listings past their expiry, along with their photo blobs.
    /// Returns how many listings were removed.
    #[tracing::instrument(skip(self))]
    pub async fn expire_listings(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let expired = self.listings.expired_listings(now).await?;
        let mut removed = 0;

        for listing in expired {
            let photos = self.photos.list_photos(listing.id).await?;
            if !self.listings.delete_listing(listing.id).await? {
                continue;
            }
            removed += 1;

            for photo in photos {
                let keys = std::iter::once(photo.image).chain(photo.thumbnail);
                for key in keys.filter(|k| !k.trim().is_empty()) {
                    if let Err(e) = self.storage.delete(&key).await {
                        tracing::warn!(error = %e, key = %key, "Failed to delete expired photo blob");
                    }
                }
            }
            tracing::info!(listing_id = %listing.id, "Expired listing deleted");
        }

        if removed > 0 {
            self.metrics.invalidate();
        }
        Ok(removed)
    }
}
