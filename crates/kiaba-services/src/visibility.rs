use std::sync::Arc;
use uuid::Uuid;

use kiaba_core::error::AppError;
use kiaba_db::{ListingStore, PhotoStore};

use crate::metrics::SiteMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// Every photo has a thumbnail; the listing is marked ready.
    Ready,
    /// Photos still waiting for a thumbnail.
    Pending { missing: i64 },
    ListingMissing,
}

/// Derives a listing's `ready_for_display` from its photos.
///
/// Runs after every completed photo job, so siblings re-check each other. The
/// write is idempotent and concurrent jobs may both set it; no lock is taken.
pub struct ListingVisibilityGate {
    listings: Arc<dyn ListingStore>,
    photos: Arc<dyn PhotoStore>,
    metrics: Arc<SiteMetrics>,
}

impl ListingVisibilityGate {
    pub fn new(
        listings: Arc<dyn ListingStore>,
        photos: Arc<dyn PhotoStore>,
        metrics: Arc<SiteMetrics>,
    ) -> Self {
        Self {
            listings,
            photos,
            metrics,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn evaluate(&self, listing_id: Uuid) -> Result<GateOutcome, AppError> {
        let Some(listing) = self.listings.get_listing(listing_id).await? else {
            tracing::debug!(listing_id = %listing_id, "Listing gone, nothing to gate");
            return Ok(GateOutcome::ListingMissing);
        };

        let missing = self.photos.count_missing_thumbnails(listing_id).await?;
        if missing > 0 {
            if listing.ready_for_display {
                self.listings
                    .set_ready_for_display(listing_id, false)
                    .await?;
            }
            tracing::debug!(listing_id = %listing_id, missing = missing, "Listing still processing");
            return Ok(GateOutcome::Pending { missing });
        }

        self.listings
            .set_ready_for_display(listing_id, true)
            .await?;
        self.metrics.invalidate();

        if !listing.ready_for_display {
            tracing::info!(listing_id = %listing_id, "Listing ready for display");
        }
        Ok(GateOutcome::Ready)
    }
}
