//! Wiring of stores, storage, pipeline and task queue into one service graph.

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;

use kiaba_core::Config;
use kiaba_db::{
    ListingRepository, ListingStore, MemoryStore, PhotoRepository, PhotoStore, TaskRepository,
    TaskStore,
};
use kiaba_processing::PhotoProcessor;
use kiaba_storage::{create_storage, Storage};
use kiaba_worker::{TaskHandlerContext, TaskQueue};

use crate::dispatch::Dispatcher;
use crate::listings::ListingService;
use crate::maintenance::Maintenance;
use crate::metrics::SiteMetrics;
use crate::photo_job::PhotoJobRunner;
use crate::photos::{JobScheduler, PhotoService};
use crate::visibility::ListingVisibilityGate;

#[derive(Clone)]
pub struct Stores {
    pub listings: Arc<dyn ListingStore>,
    pub photos: Arc<dyn PhotoStore>,
    pub tasks: Arc<dyn TaskStore>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            listings: Arc::new(ListingRepository::new(pool.clone())),
            photos: Arc::new(PhotoRepository::new(pool.clone())),
            tasks: Arc::new(TaskRepository::new(pool)),
        }
    }

    pub fn memory(store: MemoryStore) -> Self {
        Self {
            listings: Arc::new(store.clone()),
            photos: Arc::new(store.clone()),
            tasks: Arc::new(store),
        }
    }
}

pub struct AppServices {
    pub storage: Arc<dyn Storage>,
    pub listings: Arc<ListingService>,
    pub photos: Arc<PhotoService>,
    pub metrics: Arc<SiteMetrics>,
    pub maintenance: Arc<Maintenance>,
    pub runner: Arc<PhotoJobRunner>,
    pub queue: Arc<TaskQueue>,
    // The queue only holds a weak handle; this keeps the handlers alive.
    dispatcher: Arc<Dispatcher>,
}

impl AppServices {
    /// Build the service graph. With `spawn_worker` the queue starts its worker
    /// pool on the current runtime; otherwise tasks are only persisted and run
    /// through [`TaskQueue::run_once`] or another process.
    pub fn build(
        config: &Config,
        stores: Stores,
        storage: Arc<dyn Storage>,
        spawn_worker: bool,
    ) -> Self {
        let metrics = Arc::new(SiteMetrics::new(
            stores.listings.clone(),
            config.site_metrics_cache_ttl,
            config.popular_cities_limit,
        ));
        let gate = Arc::new(ListingVisibilityGate::new(
            stores.listings.clone(),
            stores.photos.clone(),
            metrics.clone(),
        ));
        let processor = PhotoProcessor::new(storage.clone(), config.pipeline.clone());
        let runner = Arc::new(PhotoJobRunner::new(
            stores.photos.clone(),
            processor,
            gate.clone(),
        ));

        let dispatcher = Arc::new(Dispatcher::new(runner.clone()));
        let context: Arc<dyn TaskHandlerContext> = dispatcher.clone();
        let weak = Arc::downgrade(&context);
        let queue = Arc::new(if spawn_worker {
            TaskQueue::new(stores.tasks.clone(), config.task_queue.clone(), weak)
        } else {
            TaskQueue::new_no_worker(stores.tasks.clone(), config.task_queue.clone(), weak)
        });

        let scheduler = if config.async_processing {
            JobScheduler::Queue(queue.clone())
        } else {
            JobScheduler::Inline
        };

        let photos = Arc::new(PhotoService::new(
            stores.listings.clone(),
            stores.photos.clone(),
            storage.clone(),
            runner.clone(),
            gate,
            scheduler,
            config.max_photos_per_listing,
        ));
        let listings = Arc::new(ListingService::new(
            stores.listings,
            stores.photos.clone(),
            storage.clone(),
            metrics.clone(),
        ));
        let maintenance = Arc::new(Maintenance::new(stores.photos, runner.clone()));

        tracing::info!(
            async_processing = config.async_processing,
            worker = spawn_worker,
            storage = %storage.backend_type(),
            "Services initialized"
        );

        Self {
            storage,
            listings,
            photos,
            metrics,
            maintenance,
            runner,
            queue,
            dispatcher,
        }
    }

    /// Connect to Postgres and the configured storage backend, then build.
    pub async fn from_config(config: &Config, spawn_worker: bool) -> Result<Self> {
        let pool = kiaba_db::connect(config.database_url()?, config.db_max_connections).await?;
        let storage = create_storage(&config.storage)
            .await
            .context("Failed to initialize storage backend")?;
        Ok(Self::build(config, Stores::postgres(pool), storage, spawn_worker))
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }
}
