//! Fixed names shared across crates.

/// Cache key holding the number of publicly visible listings.
pub const CACHE_KEY_TOTAL_VISIBLE_LISTINGS: &str = "total_approved_ads";

/// Cache key holding the footer's popular-cities list.
pub const CACHE_KEY_POPULAR_CITIES: &str = "popular_cities_footer";

/// Every key dropped when site metrics are invalidated.
pub const SITE_METRICS_CACHE_KEYS: [&str; 2] =
    [CACHE_KEY_TOTAL_VISIBLE_LISTINGS, CACHE_KEY_POPULAR_CITIES];

/// Storage prefix for raw and processed listing photos.
pub const PHOTO_KEY_PREFIX: &str = "ads";

/// Storage prefix for generated thumbnails.
pub const THUMBNAIL_KEY_PREFIX: &str = "ads/thumbnails";

/// Base name used when a photo's original file name is empty.
pub const DEFAULT_IMAGE_BASE_NAME: &str = "image";
