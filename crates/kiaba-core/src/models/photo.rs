use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One image attached to a listing.
///
/// `image` and `thumbnail` are storage keys, never raw bytes. `processed_at` is the
/// durable marker set once the watermarked output has been written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Photo {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub image: String,
    pub thumbnail: Option<String>,
    pub is_primary: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Photo {
    pub fn has_image(&self) -> bool {
        !self.image.trim().is_empty()
    }

    pub fn has_thumbnail(&self) -> bool {
        self.thumbnail
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }

    /// Whether the pipeline already ran for the current image.
    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some() && self.has_thumbnail()
    }

    pub fn apply_processed(&mut self, fields: &ProcessedPhotoFields) {
        self.image = fields.image.clone();
        self.thumbnail = Some(fields.thumbnail.clone());
        self.processed_at = Some(fields.processed_at);
    }
}

/// The only columns a processing job is allowed to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedPhotoFields {
    pub image: String,
    pub thumbnail: String,
    pub processed_at: DateTime<Utc>,
}
