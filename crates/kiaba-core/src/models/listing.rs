use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// Moderation status. Independent of photo readiness.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
    Archived,
}

impl Display for ListingStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ListingStatus::Draft => write!(f, "draft"),
            ListingStatus::Pending => write!(f, "pending"),
            ListingStatus::Approved => write!(f, "approved"),
            ListingStatus::Rejected => write!(f, "rejected"),
            ListingStatus::Archived => write!(f, "archived"),
        }
    }
}

impl FromStr for ListingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ListingStatus::Draft),
            "pending" => Ok(ListingStatus::Pending),
            "approved" => Ok(ListingStatus::Approved),
            "rejected" => Ok(ListingStatus::Rejected),
            "archived" => Ok(ListingStatus::Archived),
            _ => Err(anyhow::anyhow!("Invalid listing status: {}", s)),
        }
    }
}

/// Public visibility derived from moderation status and photo readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Not approved; never shown regardless of photos.
    Hidden,
    /// Approved, but at least one photo still lacks a thumbnail.
    Processing,
    Public,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: Uuid,
    pub title: String,
    pub city: String,
    pub status: ListingStatus,
    /// True only while every photo of the listing has a thumbnail.
    pub ready_for_display: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Listing {
    pub fn visibility(&self) -> Visibility {
        match (self.status, self.ready_for_display) {
            (ListingStatus::Approved, true) => Visibility::Public,
            (ListingStatus::Approved, false) => Visibility::Processing,
            _ => Visibility::Hidden,
        }
    }

    pub fn is_publicly_visible(&self) -> bool {
        self.visibility() == Visibility::Public
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Listing {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Listing {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            city: row.try_get("city")?,
            status: row.try_get::<String, _>("status")?.parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse listing status: {}", e).into())
            })?,
            ready_for_display: row.try_get("ready_for_display")?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewListing {
    pub title: String,
    pub city: String,
    pub status: ListingStatus,
    pub expires_at: Option<DateTime<Utc>>,
}

/// One row of the popular-cities footer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct CityCount {
    pub city: String,
    pub listings: i64,
}
