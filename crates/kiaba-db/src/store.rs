//! Store trait abstractions
//!
//! Services depend on these traits rather than on the Postgres repositories, so
//! the pipeline can run against [`crate::MemoryStore`] in tests and local tools.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiaba_core::error::AppError;
use kiaba_core::models::{
    CityCount, Listing, ListingStatus, NewListing, Photo, ProcessedPhotoFields, Task, TaskType,
};
use uuid::Uuid;

pub type StoreResult<T> = Result<T, AppError>;

/// `last_error` recorded on tasks recovered by [`TaskStore::reap_stale_running`].
pub const STALE_TASK_ERROR: &str = "Task abandoned while running";

#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn create_listing(&self, new: NewListing) -> StoreResult<Listing>;

    async fn get_listing(&self, id: Uuid) -> StoreResult<Option<Listing>>;

    /// Moderation transition. Returns `None` when the listing does not exist.
    async fn set_status(&self, id: Uuid, status: ListingStatus) -> StoreResult<Option<Listing>>;

    /// Write only `ready_for_display`. Returns whether a row was updated.
    async fn set_ready_for_display(&self, id: Uuid, ready: bool) -> StoreResult<bool>;

    /// Approved and ready listings, newest first.
    async fn list_public(&self, limit: i64, offset: i64) -> StoreResult<Vec<Listing>>;

    async fn count_public(&self) -> StoreResult<i64>;

    /// Cities with the most visible listings.
    async fn popular_cities(&self, limit: i64) -> StoreResult<Vec<CityCount>>;

    /// Approved listings whose `expires_at` is at or before `now`.
    async fn expired_listings(&self, now: DateTime<Utc>) -> StoreResult<Vec<Listing>>;

    /// Delete a listing; its photos go with it.
    async fn delete_listing(&self, id: Uuid) -> StoreResult<bool>;
}

#[async_trait]
pub trait PhotoStore: Send + Sync {
    async fn get_photo(&self, id: Uuid) -> StoreResult<Option<Photo>>;

    /// Photos of a listing, primary first then by creation time.
    async fn list_photos(&self, listing_id: Uuid) -> StoreResult<Vec<Photo>>;

    async fn count_photos(&self, listing_id: Uuid) -> StoreResult<i64>;

    async fn count_missing_thumbnails(&self, listing_id: Uuid) -> StoreResult<i64>;

    /// Insert a photo in one transaction: enforce `max_photos`, make it primary
    /// when requested or when it is the first one, and mark the listing not ready.
    async fn attach_photo(
        &self,
        listing_id: Uuid,
        image_key: &str,
        is_primary: bool,
        max_photos: usize,
    ) -> StoreResult<Photo>;

    /// Make `photo_id` the only primary photo of its listing.
    async fn set_primary(&self, photo_id: Uuid) -> StoreResult<Option<Photo>>;

    /// Persist job output. Touches only `image`, `thumbnail` and `processed_at`,
    /// and only while the row still points at `source_image`, the key the job
    /// read. Returns false when the row is gone or its image was replaced.
    async fn save_processed(
        &self,
        photo_id: Uuid,
        source_image: &str,
        fields: &ProcessedPhotoFields,
    ) -> StoreResult<bool>;

    /// Point the photo at a new raw image, clear processing output and mark the
    /// listing not ready.
    async fn replace_image(&self, photo_id: Uuid, image_key: &str) -> StoreResult<Option<Photo>>;

    /// Delete the row, returning it so the caller can remove its blobs.
    async fn delete_photo(&self, photo_id: Uuid) -> StoreResult<Option<Photo>>;

    /// Photos with an image that need the pipeline: missing a thumbnail, or all
    /// of them when `include_processed` is set.
    async fn photos_for_processing(
        &self,
        include_processed: bool,
        limit: Option<i64>,
    ) -> StoreResult<Vec<Photo>>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn enqueue(
        &self,
        task_type: TaskType,
        payload: serde_json::Value,
        max_attempts: i32,
        scheduled_at: DateTime<Utc>,
    ) -> StoreResult<Task>;

    async fn get_task(&self, id: Uuid) -> StoreResult<Option<Task>>;

    /// Claim the oldest due pending task, moving it to running and counting the attempt.
    async fn claim_next(&self) -> StoreResult<Option<Task>>;

    async fn mark_completed(&self, id: Uuid, result: serde_json::Value) -> StoreResult<()>;

    async fn mark_failed(&self, id: Uuid, error: &str) -> StoreResult<()>;

    /// Back to pending, due at `at`.
    async fn reschedule(&self, id: Uuid, at: DateTime<Utc>, error: &str) -> StoreResult<()>;

    /// Recover tasks left `running` by a worker that died: those started before
    /// `started_before` go back to pending, or to failed once their attempts are
    /// used up. Returns how many were reaped.
    async fn reap_stale_running(&self, started_before: DateTime<Utc>) -> StoreResult<u64>;
}
