//! Batch reprocessing commands.

use serde::Serialize;
use std::sync::Arc;

use kiaba_core::error::AppError;
use kiaba_db::PhotoStore;

use crate::photo_job::{PhotoJobOutcome, PhotoJobRunner};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub scanned: usize,
    pub processed: usize,
    pub skipped: usize,
    pub undecodable: usize,
    pub failed: usize,
}

impl MaintenanceReport {
    fn record(&mut self, outcome: &PhotoJobOutcome) {
        match outcome {
            PhotoJobOutcome::Processed { .. } => self.processed += 1,
            PhotoJobOutcome::Undecodable => self.undecodable += 1,
            PhotoJobOutcome::Missing
            | PhotoJobOutcome::Superseded
            | PhotoJobOutcome::NoImage
            | PhotoJobOutcome::AlreadyProcessed { .. } => self.skipped += 1,
        }
    }
}

pub struct Maintenance {
    photos: Arc<dyn PhotoStore>,
    runner: Arc<PhotoJobRunner>,
}

impl Maintenance {
    pub fn new(photos: Arc<dyn PhotoStore>, runner: Arc<PhotoJobRunner>) -> Self {
        Self { photos, runner }
    }

    /// Process every photo lacking a thumbnail, or every photo when `force` is set.
    #[tracing::instrument(skip(self))]
    pub async fn regenerate_thumbnails(&self, force: bool) -> Result<MaintenanceReport, AppError> {
        let photos = self.photos.photos_for_processing(force, None).await?;
        let mut report = MaintenanceReport {
            scanned: photos.len(),
            ..Default::default()
        };

        for photo in photos {
            match self.runner.run(photo.id, force).await {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    tracing::error!(error = %e, photo_id = %photo.id, "Thumbnail regeneration failed");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            processed = report.processed,
            undecodable = report.undecodable,
            failed = report.failed,
            "Thumbnail regeneration finished"
        );
        Ok(report)
    }

    /// Re-run the full pipeline on stored photos. With `dry_run` only counts them.
    #[tracing::instrument(skip(self))]
    pub async fn reapply_watermark(
        &self,
        dry_run: bool,
        limit: Option<i64>,
    ) -> Result<MaintenanceReport, AppError> {
        let photos = self.photos.photos_for_processing(true, limit).await?;
        let mut report = MaintenanceReport {
            scanned: photos.len(),
            ..Default::default()
        };

        if dry_run {
            report.skipped = photos.len();
            tracing::info!(photos = report.scanned, "Dry run, no photo rewritten");
            return Ok(report);
        }

        for photo in photos {
            match self.runner.run(photo.id, true).await {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    tracing::error!(error = %e, photo_id = %photo.id, "Watermark reapplication failed");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            processed = report.processed,
            failed = report.failed,
            "Watermark reapplication finished"
        );
        Ok(report)
    }
}
