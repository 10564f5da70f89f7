//! Kiaba Core Library
//!
//! Domain models, error types and configuration shared by every Kiaba crate:
//! listings, their photos, and the background tasks that process those photos.

pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod storage_types;
pub mod task_error;

// Re-export commonly used types
pub use config::{Config, PipelineConfig, TaskQueueSettings};
pub use error::AppError;
pub use storage_types::StorageBackend;
pub use task_error::{TaskError, TaskResultExt};
