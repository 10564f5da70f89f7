use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use kiaba_core::models::{CityCount, Listing, ListingStatus, NewListing};

use crate::store::{ListingStore, StoreResult};

const LISTING_COLUMNS: &str =
    "id, title, city, status, ready_for_display, expires_at, created_at, updated_at";

/// SQL form of [`Listing::is_publicly_visible`].
pub(crate) const VISIBLE_PREDICATE: &str = "status = 'approved' AND ready_for_display";

#[derive(Clone)]
pub struct ListingRepository {
    pool: PgPool,
}

impl ListingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ListingStore for ListingRepository {
    #[tracing::instrument(skip(self, new), fields(title = %new.title))]
    async fn create_listing(&self, new: NewListing) -> StoreResult<Listing> {
        let listing = sqlx::query_as::<Postgres, Listing>(&format!(
            r#"
            INSERT INTO listings (title, city, status, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING {LISTING_COLUMNS}
            "#
        ))
        .bind(&new.title)
        .bind(&new.city)
        .bind(new.status.to_string())
        .bind(new.expires_at)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert listing")?;

        tracing::info!(listing_id = %listing.id, status = %listing.status, "Listing created");
        Ok(listing)
    }

    #[tracing::instrument(skip(self))]
    async fn get_listing(&self, id: Uuid) -> StoreResult<Option<Listing>> {
        let listing = sqlx::query_as::<Postgres, Listing>(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch listing")?;

        Ok(listing)
    }

    #[tracing::instrument(skip(self))]
    async fn set_status(&self, id: Uuid, status: ListingStatus) -> StoreResult<Option<Listing>> {
        let listing = sqlx::query_as::<Postgres, Listing>(&format!(
            r#"
            UPDATE listings
            SET status = $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {LISTING_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(status.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to update listing status")?;

        Ok(listing)
    }

    #[tracing::instrument(skip(self))]
    async fn set_ready_for_display(&self, id: Uuid, ready: bool) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE listings
            SET ready_for_display = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(ready)
        .execute(&self.pool)
        .await
        .context("Failed to update listing readiness")?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn list_public(&self, limit: i64, offset: i64) -> StoreResult<Vec<Listing>> {
        let listings = sqlx::query_as::<Postgres, Listing>(&format!(
            r#"
            SELECT {LISTING_COLUMNS}
            FROM listings
            WHERE {VISIBLE_PREDICATE}
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list public listings")?;

        Ok(listings)
    }

    async fn count_public(&self) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar::<Postgres, i64>(&format!(
            "SELECT COUNT(*) FROM listings WHERE {VISIBLE_PREDICATE}"
        ))
        .fetch_one(&self.pool)
        .await
        .context("Failed to count public listings")?;

        Ok(count)
    }

    async fn popular_cities(&self, limit: i64) -> StoreResult<Vec<CityCount>> {
        let cities = sqlx::query_as::<Postgres, CityCount>(&format!(
            r#"
            SELECT city, COUNT(*) AS listings
            FROM listings
            WHERE {VISIBLE_PREDICATE} AND city <> ''
            GROUP BY city
            ORDER BY listings DESC, city ASC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to aggregate popular cities")?;

        Ok(cities)
    }

    #[tracing::instrument(skip(self))]
    async fn expired_listings(&self, now: DateTime<Utc>) -> StoreResult<Vec<Listing>> {
        let listings = sqlx::query_as::<Postgres, Listing>(&format!(
            r#"
            SELECT {LISTING_COLUMNS}
            FROM listings
            WHERE status = 'approved'
                AND expires_at IS NOT NULL
                AND expires_at <= $1
            ORDER BY expires_at ASC
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch expired listings")?;

        Ok(listings)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_listing(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM listings WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete listing")?;

        Ok(result.rows_affected() > 0)
    }
}
