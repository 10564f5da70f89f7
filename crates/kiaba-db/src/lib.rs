//! Kiaba database layer
//!
//! Postgres repositories for listings, photos and background tasks, the store
//! traits they implement, and an in-memory store with the same semantics.

use anyhow::{Context, Result};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

pub mod db;
pub mod memory;
pub mod store;

pub use db::{ListingRepository, PhotoRepository, TaskRepository};
pub use memory::MemoryStore;
pub use store::{ListingStore, PhotoStore, StoreResult, TaskStore, STALE_TASK_ERROR};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Open the connection pool.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!(max_connections = max_connections, "Database pool ready");
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");
    Ok(())
}
