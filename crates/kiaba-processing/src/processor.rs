use crate::codec;
use crate::encode::EncodeError;
use crate::logo::LogoLocator;
use crate::pipeline::{PhotoPipeline, ProcessedOutput};
use crate::watermark::Watermark;
use crate::writer::StorageWriter;
use bytes::Bytes;
use kiaba_core::PipelineConfig;
use kiaba_storage::{Storage, StorageError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("Image processing task failed: {0}")]
    Join(String),
}

impl ProcessingError {
    /// Storage hiccups and aborted blocking tasks are worth retrying; an image
    /// that no encoder accepts will fail the same way next time.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ProcessingError::Encode(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedKeys {
    pub image: String,
    pub thumbnail: String,
    pub watermarked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// No readable source, or bytes that do not decode as an image.
    Undecodable,
    Processed(ProcessedKeys),
}

/// Runs one photo through load, decode, watermark, resize, encode and write.
#[derive(Clone)]
pub struct PhotoProcessor {
    storage: Arc<dyn Storage>,
    pipeline: Arc<PhotoPipeline>,
    logo: LogoLocator,
    writer: StorageWriter,
}

impl PhotoProcessor {
    pub fn new(storage: Arc<dyn Storage>, config: PipelineConfig) -> Self {
        let logo = LogoLocator::from_config(&config);
        Self::with_parts(storage, PhotoPipeline::new(config), logo)
    }

    pub fn with_parts(storage: Arc<dyn Storage>, pipeline: PhotoPipeline, logo: LogoLocator) -> Self {
        Self {
            writer: StorageWriter::new(storage.clone()),
            storage,
            pipeline: Arc::new(pipeline),
            logo,
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Process the image stored under `image_key`. `upload` carries bytes of an
    /// upload that may not have reached storage yet.
    #[tracing::instrument(skip(self, upload), fields(image_key = %image_key))]
    pub async fn process(
        &self,
        image_key: &str,
        upload: Option<&Bytes>,
    ) -> Result<ProcessOutcome, ProcessingError> {
        let start = std::time::Instant::now();

        let Some(source) = codec::load_source(self.storage.as_ref(), image_key, upload).await
        else {
            return Ok(ProcessOutcome::Undecodable);
        };

        let logo_bytes = self.logo.load().await;
        let pipeline = self.pipeline.clone();
        let bytes = source.bytes.clone();
        let key = source.key.clone();

        let output = tokio::task::spawn_blocking(move || -> Result<Option<ProcessedOutput>, EncodeError> {
            let decoded = match codec::decode(&bytes, &key) {
                Ok(decoded) => decoded,
                Err(e) => {
                    tracing::warn!(error = %e, key = %key, "Photo is not a decodable image");
                    return Ok(None);
                }
            };

            let logo = logo_bytes.and_then(|data| match Watermark::decode_logo(&data) {
                Ok(logo) => Some(logo),
                Err(e) => {
                    tracing::warn!(error = %e, "Watermark logo does not decode, skipping watermark");
                    None
                }
            });

            pipeline.process(decoded, logo.as_ref()).map(Some)
        })
        .await
        .map_err(|e| ProcessingError::Join(e.to_string()))??;

        let Some(output) = output else {
            return Ok(ProcessOutcome::Undecodable);
        };

        let watermarked = output.watermarked;
        let written = self.writer.write(&source, output).await?;

        tracing::info!(
            image = %written.image,
            thumbnail = %written.thumbnail,
            watermarked = watermarked,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Photo processed"
        );

        Ok(ProcessOutcome::Processed(ProcessedKeys {
            image: written.image,
            thumbnail: written.thumbnail,
            watermarked,
        }))
    }
}
