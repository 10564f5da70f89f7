//! Test helpers: build the service graph over the in-memory store and a
//! temporary local storage directory.
//!
//! Run from workspace root: `cargo test -p kiaba-services`.

#![allow(dead_code)]

pub mod fixtures;
pub mod storage;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use kiaba_core::config::StorageSettings;
use kiaba_core::models::{Listing, ListingStatus, NewListing};
use kiaba_core::{Config, PipelineConfig, StorageBackend, TaskQueueSettings};
use kiaba_db::MemoryStore;
use kiaba_services::{AppServices, PhotoUpload, Stores};
use kiaba_storage::{LocalStorage, Storage};
use tempfile::TempDir;

pub struct TestApp {
    pub services: AppServices,
    pub store: MemoryStore,
    pub storage: Arc<dyn Storage>,
    pub _temp_dir: TempDir,
}

/// Knobs the tests vary; everything else uses production defaults.
pub struct TestOptions {
    pub with_logo: bool,
    pub async_processing: bool,
    pub retry_backoff: Duration,
    pub task_timeout: Duration,
    pub stale_grace_period: Duration,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            with_logo: true,
            async_processing: true,
            retry_backoff: Duration::ZERO,
            task_timeout: TaskQueueSettings::default().timeout,
            stale_grace_period: TaskQueueSettings::default().stale_grace_period,
        }
    }
}

pub fn test_config(root: &Path, options: &TestOptions) -> Config {
    let static_dir = root.join("static");
    Config {
        environment: "test".to_string(),
        log_json: false,
        database_url: None,
        db_max_connections: 1,
        storage: StorageSettings {
            backend: StorageBackend::Local,
            local_path: root.join("media").display().to_string(),
            local_base_url: "/media".to_string(),
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
        },
        pipeline: PipelineConfig {
            static_dirs: vec![static_dir],
            logo_fallback_path: root.join("staticfiles/img/logo.png"),
            ..PipelineConfig::default()
        },
        task_queue: TaskQueueSettings {
            retry_backoff: options.retry_backoff,
            timeout: options.task_timeout,
            stale_grace_period: options.stale_grace_period,
            ..TaskQueueSettings::default()
        },
        async_processing: options.async_processing,
        max_photos_per_listing: 5,
        site_metrics_cache_ttl: Duration::from_secs(300),
        popular_cities_limit: 6,
    }
}

pub async fn setup_test_app() -> TestApp {
    setup_test_app_with(TestOptions::default()).await
}

pub async fn setup_test_app_with(options: TestOptions) -> TestApp {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let storage: Arc<dyn Storage> = Arc::new(
        LocalStorage::new(temp_dir.path().join("media"), "/media".to_string())
            .await
            .expect("Failed to create local storage"),
    );
    setup_test_app_on(temp_dir, storage, options).await
}

/// Same as [`setup_test_app_with`] but over a caller-built storage backend.
pub async fn setup_test_app_on(
    temp_dir: TempDir,
    storage: Arc<dyn Storage>,
    options: TestOptions,
) -> TestApp {
    let config = test_config(temp_dir.path(), &options);
    if options.with_logo {
        let logo_path = temp_dir.path().join("static/img/logo.png");
        tokio::fs::create_dir_all(logo_path.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(&logo_path, fixtures::logo_png(100, 50))
            .await
            .unwrap();
    }

    let store = MemoryStore::new();
    let services = AppServices::build(&config, Stores::memory(store.clone()), storage.clone(), false);

    TestApp {
        services,
        store,
        storage,
        _temp_dir: temp_dir,
    }
}

impl TestApp {
    pub async fn approved_listing(&self) -> Listing {
        self.services
            .listings
            .create_listing(NewListing {
                title: "Washing machine".to_string(),
                city: "Bamako".to_string(),
                status: ListingStatus::Approved,
                expires_at: None,
            })
            .await
            .expect("Failed to create listing")
    }

    pub async fn listing(&self, id: uuid::Uuid) -> Listing {
        self.services.listings.get_listing(id).await.unwrap()
    }
}

pub fn upload(file_name: &str, data: Vec<u8>) -> PhotoUpload {
    PhotoUpload {
        file_name: file_name.to_string(),
        content_type: None,
        data: data.into(),
    }
}
