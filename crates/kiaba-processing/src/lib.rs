//! Photo post-processing for listing images.
//!
//! The pipeline for one photo:
//! - `codec`: find and decode the source bitmap (local path, pending upload, or remote blob)
//! - `watermark`: composite the site logo, centered and semi-transparent
//! - `resize` / `encode`: bound the size and re-encode, WebP first with a format fallback
//! - `writer`: store the main image and thumbnail back through [`kiaba_storage::Storage`]
//!
//! [`PhotoProcessor`] ties the steps together; CPU-bound work runs on the blocking pool.

pub mod codec;
pub mod encode;
pub mod logo;
pub mod naming;
pub mod pipeline;
pub mod processor;
pub mod resize;
pub mod watermark;
pub mod writer;

pub use codec::{DecodedImage, SourceImage, SourceOrigin};
pub use encode::{EncodeError, EncodedImage, Encoder, OutputFormat};
pub use logo::LogoLocator;
pub use pipeline::{PhotoPipeline, ProcessedOutput};
pub use processor::{PhotoProcessor, ProcessOutcome, ProcessedKeys, ProcessingError};
pub use watermark::{Watermark, WatermarkConfig};
pub use writer::StorageWriter;
