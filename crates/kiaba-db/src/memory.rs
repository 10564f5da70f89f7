//! In-memory store
//!
//! Implements every store trait over one mutex-guarded state, with the same
//! transactional guarantees as the Postgres repositories (each call is atomic).
//! Used by tests and by tooling that runs without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use kiaba_core::error::AppError;
use kiaba_core::models::{
    CityCount, Listing, ListingStatus, NewListing, Photo, ProcessedPhotoFields, Task, TaskStatus,
    TaskType,
};

use crate::store::{ListingStore, PhotoStore, StoreResult, TaskStore, STALE_TASK_ERROR};

#[derive(Default)]
struct MemoryState {
    listings: HashMap<Uuid, Listing>,
    photos: HashMap<Uuid, Photo>,
    tasks: HashMap<Uuid, Task>,
}

impl MemoryState {
    fn photos_of(&self, listing_id: Uuid) -> impl Iterator<Item = &Photo> {
        self.photos
            .values()
            .filter(move |p| p.listing_id == listing_id)
    }

    fn set_listing_ready(&mut self, listing_id: Uuid, ready: bool) -> bool {
        match self.listings.get_mut(&listing_id) {
            Some(listing) => {
                listing.ready_for_display = ready;
                true
            }
            None => false,
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every task, oldest first.
    pub fn tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.state().tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// Make every pending task due now. Lets tests skip retry backoff.
    pub fn make_all_due(&self) {
        let now = Utc::now();
        for task in self.state().tasks.values_mut() {
            if task.status == TaskStatus::Pending {
                task.scheduled_at = now;
            }
        }
    }
}

fn sorted_public(state: &MemoryState) -> Vec<Listing> {
    let mut listings: Vec<Listing> = state
        .listings
        .values()
        .filter(|l| l.is_publicly_visible())
        .cloned()
        .collect();
    listings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    listings
}

#[async_trait]
impl ListingStore for MemoryStore {
    async fn create_listing(&self, new: NewListing) -> StoreResult<Listing> {
        let now = Utc::now();
        let listing = Listing {
            id: Uuid::new_v4(),
            title: new.title,
            city: new.city,
            status: new.status,
            ready_for_display: true,
            expires_at: new.expires_at,
            created_at: now,
            updated_at: now,
        };
        self.state().listings.insert(listing.id, listing.clone());
        Ok(listing)
    }

    async fn get_listing(&self, id: Uuid) -> StoreResult<Option<Listing>> {
        Ok(self.state().listings.get(&id).cloned())
    }

    async fn set_status(&self, id: Uuid, status: ListingStatus) -> StoreResult<Option<Listing>> {
        let mut state = self.state();
        Ok(state.listings.get_mut(&id).map(|listing| {
            listing.status = status;
            listing.updated_at = Utc::now();
            listing.clone()
        }))
    }

    async fn set_ready_for_display(&self, id: Uuid, ready: bool) -> StoreResult<bool> {
        Ok(self.state().set_listing_ready(id, ready))
    }

    async fn list_public(&self, limit: i64, offset: i64) -> StoreResult<Vec<Listing>> {
        let state = self.state();
        Ok(sorted_public(&state)
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_public(&self) -> StoreResult<i64> {
        let state = self.state();
        Ok(state
            .listings
            .values()
            .filter(|l| l.is_publicly_visible())
            .count() as i64)
    }

    async fn popular_cities(&self, limit: i64) -> StoreResult<Vec<CityCount>> {
        let state = self.state();
        let mut counts: HashMap<&str, i64> = HashMap::new();
        for listing in state.listings.values() {
            if listing.is_publicly_visible() && !listing.city.is_empty() {
                *counts.entry(listing.city.as_str()).or_default() += 1;
            }
        }
        let mut cities: Vec<CityCount> = counts
            .into_iter()
            .map(|(city, listings)| CityCount {
                city: city.to_string(),
                listings,
            })
            .collect();
        cities.sort_by(|a, b| b.listings.cmp(&a.listings).then_with(|| a.city.cmp(&b.city)));
        cities.truncate(limit.max(0) as usize);
        Ok(cities)
    }

    async fn expired_listings(&self, now: DateTime<Utc>) -> StoreResult<Vec<Listing>> {
        let state = self.state();
        let mut listings: Vec<Listing> = state
            .listings
            .values()
            .filter(|l| l.status == ListingStatus::Approved && l.is_expired(now))
            .cloned()
            .collect();
        listings.sort_by_key(|l| l.expires_at);
        Ok(listings)
    }

    async fn delete_listing(&self, id: Uuid) -> StoreResult<bool> {
        let mut state = self.state();
        let existed = state.listings.remove(&id).is_some();
        state.photos.retain(|_, p| p.listing_id != id);
        Ok(existed)
    }
}

#[async_trait]
impl PhotoStore for MemoryStore {
    async fn get_photo(&self, id: Uuid) -> StoreResult<Option<Photo>> {
        Ok(self.state().photos.get(&id).cloned())
    }

    async fn list_photos(&self, listing_id: Uuid) -> StoreResult<Vec<Photo>> {
        let state = self.state();
        let mut photos: Vec<Photo> = state.photos_of(listing_id).cloned().collect();
        photos.sort_by(|a, b| {
            b.is_primary
                .cmp(&a.is_primary)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(photos)
    }

    async fn count_photos(&self, listing_id: Uuid) -> StoreResult<i64> {
        Ok(self.state().photos_of(listing_id).count() as i64)
    }

    async fn count_missing_thumbnails(&self, listing_id: Uuid) -> StoreResult<i64> {
        Ok(self
            .state()
            .photos_of(listing_id)
            .filter(|p| !p.has_thumbnail())
            .count() as i64)
    }

    async fn attach_photo(
        &self,
        listing_id: Uuid,
        image_key: &str,
        is_primary: bool,
        max_photos: usize,
    ) -> StoreResult<Photo> {
        let mut state = self.state();
        if !state.listings.contains_key(&listing_id) {
            return Err(AppError::NotFound(format!("Listing {} not found", listing_id)));
        }

        let count = state.photos_of(listing_id).count();
        if count >= max_photos {
            return Err(AppError::max_photos_exceeded(max_photos));
        }

        let make_primary = is_primary || count == 0;
        if make_primary {
            for photo in state.photos.values_mut() {
                if photo.listing_id == listing_id {
                    photo.is_primary = false;
                }
            }
        }

        let now = Utc::now();
        let photo = Photo {
            id: Uuid::new_v4(),
            listing_id,
            image: image_key.to_string(),
            thumbnail: None,
            is_primary: make_primary,
            processed_at: None,
            created_at: now,
            updated_at: now,
        };
        state.photos.insert(photo.id, photo.clone());
        state.set_listing_ready(listing_id, false);
        Ok(photo)
    }

    async fn set_primary(&self, photo_id: Uuid) -> StoreResult<Option<Photo>> {
        let mut state = self.state();
        let Some(listing_id) = state.photos.get(&photo_id).map(|p| p.listing_id) else {
            return Ok(None);
        };
        for photo in state.photos.values_mut() {
            if photo.listing_id == listing_id {
                photo.is_primary = photo.id == photo_id;
            }
        }
        Ok(state.photos.get(&photo_id).cloned())
    }

    async fn save_processed(
        &self,
        photo_id: Uuid,
        source_image: &str,
        fields: &ProcessedPhotoFields,
    ) -> StoreResult<bool> {
        let mut state = self.state();
        match state.photos.get_mut(&photo_id) {
            Some(photo) if photo.image == source_image => {
                photo.apply_processed(fields);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn replace_image(&self, photo_id: Uuid, image_key: &str) -> StoreResult<Option<Photo>> {
        let mut state = self.state();
        let Some(photo) = state.photos.get_mut(&photo_id) else {
            return Ok(None);
        };
        photo.image = image_key.to_string();
        photo.thumbnail = None;
        photo.processed_at = None;
        photo.updated_at = Utc::now();
        let photo = photo.clone();
        state.set_listing_ready(photo.listing_id, false);
        Ok(Some(photo))
    }

    async fn delete_photo(&self, photo_id: Uuid) -> StoreResult<Option<Photo>> {
        Ok(self.state().photos.remove(&photo_id))
    }

    async fn photos_for_processing(
        &self,
        include_processed: bool,
        limit: Option<i64>,
    ) -> StoreResult<Vec<Photo>> {
        let state = self.state();
        let mut photos: Vec<Photo> = state
            .photos
            .values()
            .filter(|p| p.has_image() && (include_processed || !p.has_thumbnail()))
            .cloned()
            .collect();
        photos.sort_by_key(|p| p.created_at);
        if let Some(limit) = limit {
            photos.truncate(limit.max(0) as usize);
        }
        Ok(photos)
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn enqueue(
        &self,
        task_type: TaskType,
        payload: serde_json::Value,
        max_attempts: i32,
        scheduled_at: DateTime<Utc>,
    ) -> StoreResult<Task> {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            task_type,
            status: TaskStatus::Pending,
            payload,
            result: None,
            attempts: 0,
            max_attempts,
            scheduled_at,
            started_at: None,
            completed_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.state().tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: Uuid) -> StoreResult<Option<Task>> {
        Ok(self.state().tasks.get(&id).cloned())
    }

    async fn claim_next(&self) -> StoreResult<Option<Task>> {
        let now = Utc::now();
        let mut state = self.state();
        let next = state
            .tasks
            .values()
            .filter(|t| t.is_ready_to_run(now))
            .min_by_key(|t| (t.scheduled_at, t.created_at))
            .map(|t| t.id);

        Ok(next.and_then(|id| {
            state.tasks.get_mut(&id).map(|task| {
                task.status = TaskStatus::Running;
                task.attempts += 1;
                task.started_at = Some(now);
                task.updated_at = now;
                task.clone()
            })
        }))
    }

    async fn mark_completed(&self, id: Uuid, result: serde_json::Value) -> StoreResult<()> {
        if let Some(task) = self.state().tasks.get_mut(&id) {
            let now = Utc::now();
            task.status = TaskStatus::Completed;
            task.result = Some(result);
            task.last_error = None;
            task.completed_at = Some(now);
            task.updated_at = now;
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> StoreResult<()> {
        if let Some(task) = self.state().tasks.get_mut(&id) {
            let now = Utc::now();
            task.status = TaskStatus::Failed;
            task.last_error = Some(error.to_string());
            task.completed_at = Some(now);
            task.updated_at = now;
        }
        Ok(())
    }

    async fn reschedule(&self, id: Uuid, at: DateTime<Utc>, error: &str) -> StoreResult<()> {
        if let Some(task) = self.state().tasks.get_mut(&id) {
            task.status = TaskStatus::Pending;
            task.scheduled_at = at;
            task.last_error = Some(error.to_string());
            task.started_at = None;
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn reap_stale_running(&self, started_before: DateTime<Utc>) -> StoreResult<u64> {
        let now = Utc::now();
        let mut reaped = 0;
        for task in self.state().tasks.values_mut() {
            let stale = task.status == TaskStatus::Running
                && task.started_at.is_some_and(|at| at < started_before);
            if !stale {
                continue;
            }
            if task.attempts >= task.max_attempts {
                task.status = TaskStatus::Failed;
                task.completed_at = Some(now);
            } else {
                task.status = TaskStatus::Pending;
                task.scheduled_at = now;
            }
            task.started_at = None;
            task.last_error = Some(STALE_TASK_ERROR.to_string());
            task.updated_at = now;
            reaped += 1;
        }
        Ok(reaped)
    }
}
