//! Kiaba CLI: task worker, migrations and photo maintenance commands.
//!
//! Configuration comes from the environment (see `kiaba_core::Config`).

use anyhow::Context;
use clap::{Parser, Subcommand};
use kiaba_cli::{print_json, read_upload};
use kiaba_core::Config;
use kiaba_infra::{init_telemetry, shutdown_telemetry};
use kiaba_services::AppServices;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "kiaba", about = "Kiaba listing photo pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Process queued photo jobs until interrupted
    Worker,
    /// Attach an image file to a listing and schedule its processing
    AttachPhoto {
        /// Listing UUID
        #[arg(long)]
        listing: Uuid,
        /// Make this the listing's primary photo
        #[arg(long)]
        primary: bool,
        /// Path to the image file
        file: PathBuf,
    },
    /// Generate thumbnails for photos that lack one
    RegenerateThumbnails {
        /// Reprocess every photo, not only those missing a thumbnail
        #[arg(long)]
        force: bool,
    },
    /// Re-run watermarking on stored photos
    ApplyWatermark {
        /// Only report how many photos would be reprocessed
        #[arg(long)]
        dry_run: bool,
        /// Maximum number of photos
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Delete approved listings past their expiry date
    ExpireListings,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    if let Err(e) = init_telemetry(config.log_json) {
        eprintln!("Failed to initialize tracing: {}", e);
    }

    match cli.command {
        Commands::Migrate => {
            let pool =
                kiaba_db::connect(config.database_url()?, config.db_max_connections).await?;
            kiaba_db::run_migrations(&pool).await?;
        }
        Commands::Worker => {
            let services = AppServices::from_config(&config, true).await?;
            tracing::info!(
                max_workers = config.task_queue.max_workers,
                "Worker running, press Ctrl-C to stop"
            );
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutdown requested, waiting for in-flight tasks");
            services.shutdown().await;
            tracing::info!("Worker stopped");
        }
        Commands::AttachPhoto {
            listing,
            primary,
            file,
        } => {
            let services = AppServices::from_config(&config, false).await?;
            let upload = read_upload(&file).await?;
            let photo = services
                .photos
                .attach_photo(listing, upload, primary)
                .await?;
            print_json(&photo)?;
        }
        Commands::RegenerateThumbnails { force } => {
            let services = AppServices::from_config(&config, false).await?;
            let report = services.maintenance.regenerate_thumbnails(force).await?;
            print_json(&report)?;
        }
        Commands::ApplyWatermark { dry_run, limit } => {
            let services = AppServices::from_config(&config, false).await?;
            let report = services
                .maintenance
                .reapply_watermark(dry_run, limit)
                .await?;
            print_json(&report)?;
        }
        Commands::ExpireListings => {
            let services = AppServices::from_config(&config, false).await?;
            let removed = services.listings.expire_listings(chrono::Utc::now()).await?;
            print_json(&serde_json::json!({ "expired": removed }))?;
        }
    }

    shutdown_telemetry().await;
    Ok(())
}
