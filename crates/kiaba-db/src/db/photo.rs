use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use kiaba_core::error::AppError;
use kiaba_core::models::{Photo, ProcessedPhotoFields};

use crate::db::transaction::TransactionGuard;
use crate::store::{PhotoStore, StoreResult};

const PHOTO_COLUMNS: &str =
    "id, listing_id, image, thumbnail, is_primary, processed_at, created_at, updated_at";

#[derive(Clone)]
pub struct PhotoRepository {
    pool: PgPool,
}

impl PhotoRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PhotoStore for PhotoRepository {
    #[tracing::instrument(skip(self))]
    async fn get_photo(&self, id: Uuid) -> StoreResult<Option<Photo>> {
        let photo = sqlx::query_as::<Postgres, Photo>(&format!(
            "SELECT {PHOTO_COLUMNS} FROM photos WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch photo")?;

        Ok(photo)
    }

    #[tracing::instrument(skip(self))]
    async fn list_photos(&self, listing_id: Uuid) -> StoreResult<Vec<Photo>> {
        let photos = sqlx::query_as::<Postgres, Photo>(&format!(
            r#"
            SELECT {PHOTO_COLUMNS}
            FROM photos
            WHERE listing_id = $1
            ORDER BY is_primary DESC, created_at ASC
            "#
        ))
        .bind(listing_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list photos")?;

        Ok(photos)
    }

    async fn count_photos(&self, listing_id: Uuid) -> StoreResult<i64> {
        let count: i64 =
            sqlx::query_scalar::<Postgres, i64>("SELECT COUNT(*) FROM photos WHERE listing_id = $1")
                .bind(listing_id)
                .fetch_one(&self.pool)
                .await
                .context("Failed to count photos")?;

        Ok(count)
    }

    async fn count_missing_thumbnails(&self, listing_id: Uuid) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar::<Postgres, i64>(
            r#"
            SELECT COUNT(*)
            FROM photos
            WHERE listing_id = $1
                AND (thumbnail IS NULL OR btrim(thumbnail) = '')
            "#,
        )
        .bind(listing_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count photos missing thumbnails")?;

        Ok(count)
    }

    #[tracing::instrument(skip(self))]
    async fn attach_photo(
        &self,
        listing_id: Uuid,
        image_key: &str,
        is_primary: bool,
        max_photos: usize,
    ) -> StoreResult<Photo> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;

        // Serialises concurrent attaches to the same listing.
        let locked: Option<Uuid> =
            sqlx::query_scalar::<Postgres, Uuid>("SELECT id FROM listings WHERE id = $1 FOR UPDATE")
                .bind(listing_id)
                .fetch_optional(tx.conn()?)
                .await
                .context("Failed to lock listing")?;
        if locked.is_none() {
            tx.rollback().await?;
            return Err(AppError::NotFound(format!("Listing {} not found", listing_id)));
        }

        let count: i64 =
            sqlx::query_scalar::<Postgres, i64>("SELECT COUNT(*) FROM photos WHERE listing_id = $1")
                .bind(listing_id)
                .fetch_one(tx.conn()?)
                .await
                .context("Failed to count photos")?;
        if count >= max_photos as i64 {
            tx.rollback().await?;
            return Err(AppError::max_photos_exceeded(max_photos));
        }

        let make_primary = is_primary || count == 0;
        if make_primary {
            sqlx::query(
                "UPDATE photos SET is_primary = FALSE, updated_at = NOW() WHERE listing_id = $1 AND is_primary",
            )
            .bind(listing_id)
            .execute(tx.conn()?)
            .await
            .context("Failed to clear primary photo")?;
        }

        let photo = sqlx::query_as::<Postgres, Photo>(&format!(
            r#"
            INSERT INTO photos (listing_id, image, is_primary)
            VALUES ($1, $2, $3)
            RETURNING {PHOTO_COLUMNS}
            "#
        ))
        .bind(listing_id)
        .bind(image_key)
        .bind(make_primary)
        .fetch_one(tx.conn()?)
        .await
        .context("Failed to insert photo")?;

        sqlx::query("UPDATE listings SET ready_for_display = FALSE WHERE id = $1")
            .bind(listing_id)
            .execute(tx.conn()?)
            .await
            .context("Failed to mark listing as processing")?;

        tx.commit().await?;

        tracing::info!(
            photo_id = %photo.id,
            listing_id = %listing_id,
            is_primary = photo.is_primary,
            "Photo attached"
        );
        Ok(photo)
    }

    #[tracing::instrument(skip(self))]
    async fn set_primary(&self, photo_id: Uuid) -> StoreResult<Option<Photo>> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;

        let listing_id: Option<Uuid> =
            sqlx::query_scalar::<Postgres, Uuid>("SELECT listing_id FROM photos WHERE id = $1 FOR UPDATE")
                .bind(photo_id)
                .fetch_optional(tx.conn()?)
                .await
                .context("Failed to fetch photo")?;
        let Some(listing_id) = listing_id else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query(
            "UPDATE photos SET is_primary = FALSE, updated_at = NOW() WHERE listing_id = $1 AND is_primary AND id <> $2",
        )
        .bind(listing_id)
        .bind(photo_id)
        .execute(tx.conn()?)
        .await
        .context("Failed to clear primary photo")?;

        let photo = sqlx::query_as::<Postgres, Photo>(&format!(
            r#"
            UPDATE photos
            SET is_primary = TRUE,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {PHOTO_COLUMNS}
            "#
        ))
        .bind(photo_id)
        .fetch_one(tx.conn()?)
        .await
        .context("Failed to set primary photo")?;

        tx.commit().await?;
        Ok(Some(photo))
    }

    #[tracing::instrument(skip(self, fields))]
    async fn save_processed(
        &self,
        photo_id: Uuid,
        source_image: &str,
        fields: &ProcessedPhotoFields,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE photos
            SET image = $3,
                thumbnail = $4,
                processed_at = $5
            WHERE id = $1
                AND image = $2
            "#,
        )
        .bind(photo_id)
        .bind(source_image)
        .bind(&fields.image)
        .bind(&fields.thumbnail)
        .bind(fields.processed_at)
        .execute(&self.pool)
        .await
        .context("Failed to save processed photo")?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn replace_image(&self, photo_id: Uuid, image_key: &str) -> StoreResult<Option<Photo>> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;

        let photo = sqlx::query_as::<Postgres, Photo>(&format!(
            r#"
            UPDATE photos
            SET image = $2,
                thumbnail = NULL,
                processed_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {PHOTO_COLUMNS}
            "#
        ))
        .bind(photo_id)
        .bind(image_key)
        .fetch_optional(tx.conn()?)
        .await
        .context("Failed to replace photo image")?;

        let Some(photo) = photo else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query("UPDATE listings SET ready_for_display = FALSE WHERE id = $1")
            .bind(photo.listing_id)
            .execute(tx.conn()?)
            .await
            .context("Failed to mark listing as processing")?;

        tx.commit().await?;
        Ok(Some(photo))
    }

    #[tracing::instrument(skip(self))]
    async fn delete_photo(&self, photo_id: Uuid) -> StoreResult<Option<Photo>> {
        let photo = sqlx::query_as::<Postgres, Photo>(&format!(
            "DELETE FROM photos WHERE id = $1 RETURNING {PHOTO_COLUMNS}"
        ))
        .bind(photo_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to delete photo")?;

        Ok(photo)
    }

    async fn photos_for_processing(
        &self,
        include_processed: bool,
        limit: Option<i64>,
    ) -> StoreResult<Vec<Photo>> {
        let photos = sqlx::query_as::<Postgres, Photo>(&format!(
            r#"
            SELECT {PHOTO_COLUMNS}
            FROM photos
            WHERE btrim(image) <> ''
                AND ($1 OR thumbnail IS NULL OR btrim(thumbnail) = '')
            ORDER BY created_at ASC
            LIMIT $2
            "#
        ))
        .bind(include_processed)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch photos for processing")?;

        Ok(photos)
    }
}
