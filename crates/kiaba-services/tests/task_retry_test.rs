//! Photo jobs retried through the task queue when storage writes fail or the
//! worker running them dies.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::fixtures;
use helpers::storage::FailingWrites;
use helpers::{setup_test_app_on, setup_test_app_with, upload, TestOptions};
use kiaba_core::models::TaskStatus;
use kiaba_db::{PhotoStore, TaskStore};
use kiaba_storage::{LocalStorage, Storage};
use tempfile::TempDir;

async fn failing_app(backoff: Duration) -> (helpers::TestApp, Arc<FailingWrites>) {
    let temp_dir = TempDir::new().unwrap();
    let local: Arc<dyn Storage> = Arc::new(
        LocalStorage::new(temp_dir.path().join("media"), "/media".to_string())
            .await
            .unwrap(),
    );
    let failing = Arc::new(FailingWrites::new(local));
    let app = setup_test_app_on(
        temp_dir,
        failing.clone(),
        TestOptions {
            retry_backoff: backoff,
            ..TestOptions::default()
        },
    )
    .await;
    (app, failing)
}

#[tokio::test]
async fn test_storage_failure_exhausts_attempts() {
    let (app, failing) = failing_app(Duration::ZERO).await;
    let listing = app.approved_listing().await;
    let photo = app
        .services
        .photos
        .attach_photo(listing.id, upload("tv.jpg", fixtures::jpeg(200, 150)), false)
        .await
        .unwrap();

    failing.set_failing(true);
    let outcomes = app.services.queue.drain().await.unwrap();
    let statuses: Vec<TaskStatus> = outcomes.iter().map(|o| o.status).collect();
    assert_eq!(
        statuses,
        vec![TaskStatus::Pending, TaskStatus::Pending, TaskStatus::Failed]
    );

    let task = app.store.tasks().pop().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempts, 3);
    assert!(task.last_error.unwrap().contains("bucket unavailable"));

    let photo = app.store.get_photo(photo.id).await.unwrap().unwrap();
    assert!(!photo.has_thumbnail());
    assert!(!app.listing(listing.id).await.ready_for_display);
}

#[tokio::test]
async fn test_retry_succeeds_once_storage_recovers() {
    let (app, failing) = failing_app(Duration::from_secs(60)).await;
    let listing = app.approved_listing().await;
    let photo = app
        .services
        .photos
        .attach_photo(listing.id, upload("radio.jpg", fixtures::jpeg(200, 150)), false)
        .await
        .unwrap();

    failing.set_failing(true);
    let first = app.services.queue.drain().await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].status, TaskStatus::Pending);

    // Backoff not elapsed yet.
    assert!(app.services.queue.run_once().await.unwrap().is_none());

    failing.set_failing(false);
    app.store.make_all_due();
    let second = app.services.queue.drain().await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].status, TaskStatus::Completed);

    assert!(app
        .store
        .get_photo(photo.id)
        .await
        .unwrap()
        .unwrap()
        .is_processed());
    assert!(app.listing(listing.id).await.ready_for_display);
}

#[tokio::test]
async fn test_job_abandoned_by_dead_worker_is_redelivered() {
    let app = setup_test_app_with(TestOptions {
        task_timeout: Duration::from_secs(1),
        stale_grace_period: Duration::ZERO,
        ..TestOptions::default()
    })
    .await;
    let listing = app.approved_listing().await;
    let photo = app
        .services
        .photos
        .attach_photo(listing.id, upload("lamp.jpg", fixtures::jpeg(64, 48)), false)
        .await
        .unwrap();

    // A worker claims the job and dies without recording an outcome.
    let claimed = app.store.claim_next().await.unwrap().unwrap();
    app.store.make_all_due();
    assert!(app.services.queue.drain().await.unwrap().is_empty());
    assert_eq!(app.services.queue.reap_stale_tasks().await.unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(app.services.queue.reap_stale_tasks().await.unwrap(), 1);

    let outcomes = app.services.queue.drain().await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].task_id, claimed.id);
    assert_eq!(outcomes[0].status, TaskStatus::Completed);

    let task = app.store.tasks().pop().unwrap();
    assert_eq!(task.attempts, 2);
    assert!(app
        .store
        .get_photo(photo.id)
        .await
        .unwrap()
        .unwrap()
        .is_processed());
    assert!(app.listing(listing.id).await.ready_for_display);
}
