//! Site-wide listing metrics shown in page footers.
//!
//! Both values are read through a TTL cache and repopulated lazily. Anything that
//! changes public visibility calls [`SiteMetrics::invalidate`].

use std::sync::Arc;
use std::time::Duration;

use kiaba_core::constants::{
    CACHE_KEY_POPULAR_CITIES, CACHE_KEY_TOTAL_VISIBLE_LISTINGS, SITE_METRICS_CACHE_KEYS,
};
use kiaba_core::error::AppError;
use kiaba_core::models::CityCount;
use kiaba_db::ListingStore;

use crate::cache::TtlCache;

#[derive(Debug, Clone, PartialEq)]
enum MetricValue {
    Count(i64),
    Cities(Vec<CityCount>),
}

/// Cached footer metrics.
///
/// The cache lives in this process only. [`SiteMetrics::invalidate`] clears this
/// instance's entries; other processes, such as a web server when jobs run in a
/// separate `worker`, keep serving their cached values until the TTL expires.
pub struct SiteMetrics {
    listings: Arc<dyn ListingStore>,
    cache: TtlCache<MetricValue>,
    popular_cities_limit: usize,
}

impl SiteMetrics {
    pub fn new(listings: Arc<dyn ListingStore>, ttl: Duration, popular_cities_limit: usize) -> Self {
        Self {
            listings,
            cache: TtlCache::new(SITE_METRICS_CACHE_KEYS.len(), ttl),
            popular_cities_limit,
        }
    }

    /// Number of approved and ready listings.
    pub async fn total_visible_listings(&self) -> Result<i64, AppError> {
        if let Some(MetricValue::Count(count)) = self.cache.get(CACHE_KEY_TOTAL_VISIBLE_LISTINGS) {
            return Ok(count);
        }
        let count = self.listings.count_public().await?;
        self.cache
            .insert(CACHE_KEY_TOTAL_VISIBLE_LISTINGS, MetricValue::Count(count));
        Ok(count)
    }

    /// Cities with the most visible listings.
    pub async fn popular_cities(&self) -> Result<Vec<CityCount>, AppError> {
        if let Some(MetricValue::Cities(cities)) = self.cache.get(CACHE_KEY_POPULAR_CITIES) {
            return Ok(cities);
        }
        let cities = self
            .listings
            .popular_cities(self.popular_cities_limit as i64)
            .await?;
        self.cache
            .insert(CACHE_KEY_POPULAR_CITIES, MetricValue::Cities(cities.clone()));
        Ok(cities)
    }

    /// Drop this process's cached values.
    pub fn invalidate(&self) {
        for key in SITE_METRICS_CACHE_KEYS {
            self.cache.remove(key);
        }
        tracing::debug!("Site metrics cache invalidated");
    }

    pub fn is_cached(&self, key: &str) -> bool {
        self.cache.contains(key)
    }
}
