//! Kiaba Storage Library
//!
//! Blob storage for listing photos behind one [`Storage`] trait, with a local
//! filesystem backend (path-addressable) and an S3-compatible object store
//! backend (name-addressable only).
//!
//! # Storage key format
//!
//! Keys are relative, `/`-separated names such as `ads/bike.jpg` or
//! `ads/thumbnails/bike_thumb.webp`. Keys must not contain `..` or a leading `/`.
//! Validation and collision-free naming are centralized in the `keys` module.

pub mod content_type;
pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage;
pub use kiaba_core::StorageBackend;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{BlobReader, Storage, StorageError, StorageResult};
