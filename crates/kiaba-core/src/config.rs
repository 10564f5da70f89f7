//! Configuration module
//!
//! Everything is read from the environment (a `.env` file is loaded first when
//! present). Unparseable numeric values fall back to their defaults so a typo in
//! one tuning knob never prevents the worker from starting.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::storage_types::StorageBackend;

const DB_MAX_CONNECTIONS: u32 = 10;
const IMAGE_MAX_DIMENSION: u32 = 1000;
const THUMBNAIL_MAX_DIMENSION: u32 = 320;
const IMAGE_QUALITY: f32 = 65.0;
const THUMBNAIL_QUALITY: f32 = 65.0;
const WATERMARK_OPACITY: f32 = 0.5;
const WATERMARK_SIZE_FRACTION: f32 = 0.25;
const WATERMARK_LOGO_RELATIVE_PATH: &str = "img/logo.png";
const WATERMARK_LOGO_FALLBACK: &str = "staticfiles/img/logo.png";
const MAX_PHOTOS_PER_LISTING: usize = 5;
const TASK_QUEUE_MAX_WORKERS: usize = 4;
const TASK_QUEUE_POLL_INTERVAL_MS: u64 = 1000;
const TASK_QUEUE_MAX_ATTEMPTS: i32 = 3;
const TASK_QUEUE_RETRY_BACKOFF_SECS: u64 = 60;
const TASK_QUEUE_TIMEOUT_SECS: u64 = 600;
const TASK_QUEUE_STALE_REAP_INTERVAL_SECS: u64 = 60;
const TASK_QUEUE_STALE_GRACE_PERIOD_SECS: u64 = 300;
const SITE_METRICS_CACHE_TTL_SECS: u64 = 300;
const POPULAR_CITIES_LIMIT: usize = 6;

/// Thresholds for the photo post-processing pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    pub max_width: u32,
    pub max_height: u32,
    /// Lossy quality (0-100) for the main image.
    pub quality: f32,
    pub thumbnail_max_width: u32,
    pub thumbnail_max_height: u32,
    pub thumbnail_quality: f32,
    /// Factor applied to the logo's alpha channel, 0.0..=1.0.
    pub watermark_opacity: f32,
    /// Logo size as a fraction of the image's shorter side.
    pub watermark_size_fraction: f32,
    pub static_dirs: Vec<PathBuf>,
    pub logo_relative_path: PathBuf,
    pub logo_fallback_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_width: IMAGE_MAX_DIMENSION,
            max_height: IMAGE_MAX_DIMENSION,
            quality: IMAGE_QUALITY,
            thumbnail_max_width: THUMBNAIL_MAX_DIMENSION,
            thumbnail_max_height: THUMBNAIL_MAX_DIMENSION,
            thumbnail_quality: THUMBNAIL_QUALITY,
            watermark_opacity: WATERMARK_OPACITY,
            watermark_size_fraction: WATERMARK_SIZE_FRACTION,
            static_dirs: vec![PathBuf::from("static")],
            logo_relative_path: PathBuf::from(WATERMARK_LOGO_RELATIVE_PATH),
            logo_fallback_path: PathBuf::from(WATERMARK_LOGO_FALLBACK),
        }
    }
}

impl PipelineConfig {
    fn from_env() -> Self {
        let defaults = Self::default();
        let static_dirs = env::var("STATIC_DIRS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from)
                    .collect::<Vec<_>>()
            })
            .filter(|dirs| !dirs.is_empty())
            .unwrap_or(defaults.static_dirs);

        Self {
            max_width: env_or("IMAGE_MAX_WIDTH", IMAGE_MAX_DIMENSION),
            max_height: env_or("IMAGE_MAX_HEIGHT", IMAGE_MAX_DIMENSION),
            quality: env_or("IMAGE_QUALITY", IMAGE_QUALITY),
            thumbnail_max_width: env_or("THUMBNAIL_MAX_WIDTH", THUMBNAIL_MAX_DIMENSION),
            thumbnail_max_height: env_or("THUMBNAIL_MAX_HEIGHT", THUMBNAIL_MAX_DIMENSION),
            thumbnail_quality: env_or("THUMBNAIL_QUALITY", THUMBNAIL_QUALITY),
            watermark_opacity: env_or("WATERMARK_OPACITY", WATERMARK_OPACITY).clamp(0.0, 1.0),
            watermark_size_fraction: env_or("WATERMARK_SIZE_FRACTION", WATERMARK_SIZE_FRACTION),
            static_dirs,
            logo_relative_path: env::var("WATERMARK_LOGO_RELATIVE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.logo_relative_path),
            logo_fallback_path: env::var("WATERMARK_LOGO_FALLBACK")
                .map(PathBuf::from)
                .unwrap_or(defaults.logo_fallback_path),
        }
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.max_width == 0 || self.max_height == 0 {
            return Err(anyhow::anyhow!("IMAGE_MAX_WIDTH/IMAGE_MAX_HEIGHT must be > 0"));
        }
        if self.thumbnail_max_width == 0 || self.thumbnail_max_height == 0 {
            return Err(anyhow::anyhow!(
                "THUMBNAIL_MAX_WIDTH/THUMBNAIL_MAX_HEIGHT must be > 0"
            ));
        }
        for (name, q) in [
            ("IMAGE_QUALITY", self.quality),
            ("THUMBNAIL_QUALITY", self.thumbnail_quality),
        ] {
            if !(0.0..=100.0).contains(&q) {
                return Err(anyhow::anyhow!("{} must be between 0 and 100", name));
            }
        }
        if !(self.watermark_size_fraction > 0.0 && self.watermark_size_fraction <= 1.0) {
            return Err(anyhow::anyhow!(
                "WATERMARK_SIZE_FRACTION must be in (0, 1]"
            ));
        }
        Ok(())
    }
}

/// Task queue tuning.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskQueueSettings {
    pub max_workers: usize,
    pub poll_interval: Duration,
    /// Attempts in total, first run included.
    pub max_attempts: i32,
    pub retry_backoff: Duration,
    pub timeout: Duration,
    /// How often the pool returns abandoned `running` tasks to the queue. Zero
    /// disables the reaper.
    pub stale_reap_interval: Duration,
    /// Added to `timeout` before a running task counts as abandoned.
    pub stale_grace_period: Duration,
}

impl TaskQueueSettings {
    /// A task still running after this long was lost by its worker.
    pub fn stale_after(&self) -> Duration {
        self.timeout + self.stale_grace_period
    }
}

impl Default for TaskQueueSettings {
    fn default() -> Self {
        Self {
            max_workers: TASK_QUEUE_MAX_WORKERS,
            poll_interval: Duration::from_millis(TASK_QUEUE_POLL_INTERVAL_MS),
            max_attempts: TASK_QUEUE_MAX_ATTEMPTS,
            retry_backoff: Duration::from_secs(TASK_QUEUE_RETRY_BACKOFF_SECS),
            timeout: Duration::from_secs(TASK_QUEUE_TIMEOUT_SECS),
            stale_reap_interval: Duration::from_secs(TASK_QUEUE_STALE_REAP_INTERVAL_SECS),
            stale_grace_period: Duration::from_secs(TASK_QUEUE_STALE_GRACE_PERIOD_SECS),
        }
    }
}

/// Storage backend selection and its settings.
#[derive(Clone, Debug)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub local_path: String,
    pub local_base_url: String,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub environment: String,
    pub log_json: bool,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub storage: StorageSettings,
    pub pipeline: PipelineConfig,
    pub task_queue: TaskQueueSettings,
    /// When false, photos are processed inline instead of through the task queue.
    pub async_processing: bool,
    pub max_photos_per_listing: usize,
    pub site_metrics_cache_ttl: Duration,
    pub popular_cities_limit: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let backend = match env::var("STORAGE_BACKEND") {
            Ok(value) => value.parse::<StorageBackend>()?,
            Err(_) => StorageBackend::Local,
        };

        let storage = StorageSettings {
            backend,
            local_path: env::var("LOCAL_STORAGE_PATH").unwrap_or_else(|_| "./media".to_string()),
            local_base_url: env::var("LOCAL_STORAGE_BASE_URL")
                .unwrap_or_else(|_| "/media".to_string()),
            s3_bucket: env::var("S3_BUCKET").ok(),
            s3_region: env::var("S3_REGION")
                .or_else(|_| env::var("AWS_REGION"))
                .ok(),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
        };

        let task_queue = TaskQueueSettings {
            max_workers: env_or("TASK_QUEUE_MAX_WORKERS", TASK_QUEUE_MAX_WORKERS).max(1),
            poll_interval: Duration::from_millis(env_or(
                "TASK_QUEUE_POLL_INTERVAL_MS",
                TASK_QUEUE_POLL_INTERVAL_MS,
            )),
            max_attempts: env_or("TASK_QUEUE_MAX_ATTEMPTS", TASK_QUEUE_MAX_ATTEMPTS).max(1),
            retry_backoff: Duration::from_secs(env_or(
                "TASK_QUEUE_RETRY_BACKOFF_SECS",
                TASK_QUEUE_RETRY_BACKOFF_SECS,
            )),
            timeout: Duration::from_secs(env_or("TASK_QUEUE_TIMEOUT_SECS", TASK_QUEUE_TIMEOUT_SECS)),
            stale_reap_interval: Duration::from_secs(env_or(
                "TASK_QUEUE_STALE_REAP_INTERVAL_SECS",
                TASK_QUEUE_STALE_REAP_INTERVAL_SECS,
            )),
            stale_grace_period: Duration::from_secs(env_or(
                "TASK_QUEUE_STALE_GRACE_PERIOD_SECS",
                TASK_QUEUE_STALE_GRACE_PERIOD_SECS,
            )),
        };

        let config = Config {
            environment,
            log_json: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            database_url: env::var("DATABASE_URL").ok(),
            db_max_connections: env_or("DB_MAX_CONNECTIONS", DB_MAX_CONNECTIONS),
            storage,
            pipeline: PipelineConfig::from_env(),
            task_queue,
            async_processing: env_bool("ASYNC_IMAGE_PROCESSING", true),
            max_photos_per_listing: env_or("MAX_PHOTOS_PER_LISTING", MAX_PHOTOS_PER_LISTING),
            site_metrics_cache_ttl: Duration::from_secs(env_or(
                "SITE_METRICS_CACHE_TTL_SECS",
                SITE_METRICS_CACHE_TTL_SECS,
            )),
            popular_cities_limit: env_or("POPULAR_CITIES_LIMIT", POPULAR_CITIES_LIMIT),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.storage.backend == StorageBackend::S3 && self.storage.s3_bucket.is_none() {
            return Err(anyhow::anyhow!(
                "S3_BUCKET must be set when STORAGE_BACKEND=s3"
            ));
        }
        if self.max_photos_per_listing == 0 {
            return Err(anyhow::anyhow!("MAX_PHOTOS_PER_LISTING must be > 0"));
        }
        self.pipeline.validate()
    }

    pub fn database_url(&self) -> Result<&str, anyhow::Error> {
        self.database_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set"))
    }

    pub fn is_production(&self) -> bool {
        matches!(self.environment.to_lowercase().as_str(), "production" | "prod")
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        })
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_defaults() {
        let cfg = PipelineConfig::default();
        assert_eq!((cfg.max_width, cfg.max_height), (1000, 1000));
        assert_eq!((cfg.thumbnail_max_width, cfg.thumbnail_max_height), (320, 320));
        assert_eq!(cfg.quality, 65.0);
        assert_eq!(cfg.watermark_opacity, 0.5);
        assert_eq!(cfg.watermark_size_fraction, 0.25);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn queue_defaults_match_retry_policy() {
        let q = TaskQueueSettings::default();
        assert_eq!(q.max_attempts, 3);
        assert_eq!(q.retry_backoff, Duration::from_secs(60));
        assert_eq!(q.stale_after(), Duration::from_secs(900));
    }

    #[test]
    fn rejects_out_of_range_thresholds() {
        let cfg = PipelineConfig {
            quality: 140.0,
            ..PipelineConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = PipelineConfig {
            watermark_size_fraction: 0.0,
            ..PipelineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_or_falls_back_on_garbage() {
        env::set_var("KIABA_TEST_ENV_OR_GARBAGE", "twelve");
        assert_eq!(env_or("KIABA_TEST_ENV_OR_GARBAGE", 7u32), 7);
        env::set_var("KIABA_TEST_ENV_OR_GARBAGE", " 12 ");
        assert_eq!(env_or("KIABA_TEST_ENV_OR_GARBAGE", 7u32), 12);
        env::remove_var("KIABA_TEST_ENV_OR_GARBAGE");
    }
}
