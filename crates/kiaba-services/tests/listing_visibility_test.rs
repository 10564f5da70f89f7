//! Listing visibility driven by photo readiness.

mod helpers;

use std::sync::Arc;

use helpers::fixtures;
use helpers::storage::ReplaceDuringThumbnailSave;
use helpers::{setup_test_app, setup_test_app_on, upload, TestOptions};
use kiaba_core::models::ListingStatus;
use kiaba_db::PhotoStore;
use kiaba_services::PhotoJobOutcome;
use kiaba_storage::{LocalStorage, Storage};
use tempfile::TempDir;

#[tokio::test]
async fn test_corrupt_photo_keeps_listing_hidden_until_deleted() {
    let app = setup_test_app().await;
    let listing = app.approved_listing().await;

    app.services
        .photos
        .attach_photo(listing.id, upload("good.jpg", fixtures::jpeg(400, 300)), false)
        .await
        .unwrap();
    let broken = app
        .services
        .photos
        .attach_photo(listing.id, upload("broken.jpg", fixtures::corrupt()), false)
        .await
        .unwrap();

    app.services.queue.drain().await.unwrap();

    let tasks = app.store.tasks();
    assert_eq!(tasks.len(), 2);
    let undecodable = tasks
        .iter()
        .filter_map(|t| t.result.as_ref())
        .filter(|r| r["outcome"]["status"] == "undecodable")
        .count();
    assert_eq!(undecodable, 1);

    let listing_now = app.listing(listing.id).await;
    assert!(!listing_now.ready_for_display);
    assert!(!listing_now.is_publicly_visible());
    assert!(app.services.listings.list_public(20, 0).await.unwrap().is_empty());

    app.services.photos.delete_photo(broken.id).await.unwrap();
    assert!(app.listing(listing.id).await.ready_for_display);
    assert!(!app.storage.exists(&broken.image).await.unwrap());
    assert_eq!(app.services.listings.list_public(20, 0).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unapproved_listing_stays_hidden_when_ready() {
    let app = setup_test_app().await;
    let listing = app.approved_listing().await;
    app.services
        .listings
        .set_status(listing.id, ListingStatus::Pending)
        .await
        .unwrap();

    app.services
        .photos
        .attach_photo(listing.id, upload("desk.jpg", fixtures::jpeg(300, 300)), false)
        .await
        .unwrap();
    app.services.queue.drain().await.unwrap();

    let pending = app.listing(listing.id).await;
    assert!(pending.ready_for_display);
    assert!(!pending.is_publicly_visible());
    assert_eq!(app.services.metrics.total_visible_listings().await.unwrap(), 0);

    app.services
        .listings
        .set_status(listing.id, ListingStatus::Approved)
        .await
        .unwrap();
    assert_eq!(app.services.metrics.total_visible_listings().await.unwrap(), 1);
}

#[tokio::test]
async fn test_primary_photo_stays_unique() {
    let app = setup_test_app().await;
    let listing = app.approved_listing().await;

    let mut ids = Vec::new();
    for name in ["one.jpg", "two.jpg", "three.jpg"] {
        let photo = app
            .services
            .photos
            .attach_photo(listing.id, upload(name, fixtures::jpeg(32, 32)), false)
            .await
            .unwrap();
        ids.push(photo.id);
    }

    let explicit = app
        .services
        .photos
        .attach_photo(listing.id, upload("four.jpg", fixtures::jpeg(32, 32)), true)
        .await
        .unwrap();
    assert!(explicit.is_primary);

    app.services.photos.set_primary(ids[1]).await.unwrap();

    let photos = app.store.list_photos(listing.id).await.unwrap();
    let primaries: Vec<_> = photos.iter().filter(|p| p.is_primary).collect();
    assert_eq!(primaries.len(), 1);
    assert_eq!(primaries[0].id, ids[1]);
}

#[tokio::test]
async fn test_replacing_image_hides_listing_until_reprocessed() {
    let app = setup_test_app().await;
    let listing = app.approved_listing().await;
    let photo = app
        .services
        .photos
        .attach_photo(listing.id, upload("old.jpg", fixtures::jpeg(200, 200)), false)
        .await
        .unwrap();
    app.services.queue.drain().await.unwrap();
    assert!(app.listing(listing.id).await.ready_for_display);
    let old = app.store.get_photo(photo.id).await.unwrap().unwrap();

    let replaced = app
        .services
        .photos
        .replace_image(photo.id, upload("new.jpg", fixtures::jpeg(200, 100)))
        .await
        .unwrap();
    assert_eq!(replaced.image, "ads/new.jpg");
    assert!(!replaced.has_thumbnail());
    assert!(!app.listing(listing.id).await.ready_for_display);
    assert!(!app.storage.exists(&old.image).await.unwrap());

    app.services.queue.drain().await.unwrap();
    let processed = app.store.get_photo(photo.id).await.unwrap().unwrap();
    assert!(processed.is_processed());
    assert!(app.listing(listing.id).await.ready_for_display);
}

#[tokio::test]
async fn test_image_replaced_mid_job_is_not_overwritten() {
    let temp_dir = TempDir::new().unwrap();
    let inner: Arc<dyn Storage> = Arc::new(
        LocalStorage::new(temp_dir.path().join("media"), "/media".to_string())
            .await
            .unwrap(),
    );
    let storage = Arc::new(ReplaceDuringThumbnailSave::new(inner));
    let app = setup_test_app_on(temp_dir, storage.clone(), TestOptions::default()).await;
    let listing = app.approved_listing().await;

    let photo = app
        .services
        .photos
        .attach_photo(listing.id, upload("old.jpg", fixtures::jpeg(400, 300)), false)
        .await
        .unwrap();
    assert_eq!(photo.image, "ads/old.jpg");
    let new_key = app
        .storage
        .save("ads/new.jpg", fixtures::jpeg(300, 400), "image/jpeg")
        .await
        .unwrap();
    assert_eq!(new_key, "ads/new.jpg");

    storage.replace_on_next_thumbnail(app.store.clone(), photo.id, &new_key);
    let outcome = app.services.runner.run(photo.id, false).await.unwrap();
    assert_eq!(outcome, PhotoJobOutcome::Superseded);

    let current = app.store.get_photo(photo.id).await.unwrap().unwrap();
    assert_eq!(current.image, "ads/new.jpg");
    assert!(current.thumbnail.is_none());
    assert!(current.processed_at.is_none());
    assert!(!app.storage.exists("ads/thumbnails/old_thumb.webp").await.unwrap());
    assert!(!app.storage.exists("ads/old.jpg").await.unwrap());
    assert!(!app.listing(listing.id).await.ready_for_display);

    let outcome = app.services.runner.run(photo.id, false).await.unwrap();
    assert!(outcome.is_processed(), "got {:?}", outcome);

    let processed = app.store.get_photo(photo.id).await.unwrap().unwrap();
    assert_eq!(processed.image, "ads/new.jpg");
    assert_eq!(
        processed.thumbnail.as_deref(),
        Some("ads/thumbnails/new_thumb.webp")
    );
    let thumb = app.storage.read("ads/thumbnails/new_thumb.webp").await.unwrap();
    assert_eq!(fixtures::dimensions(&thumb), (240, 320));
    assert!(app.listing(listing.id).await.ready_for_display);
}
