//! Image codec adapter
//!
//! Locates a photo's bytes and decodes them. Sources are tried in order:
//! the backend's filesystem path, bytes of an upload that has not been flushed
//! yet, then a stream opened through the storage backend by key.

use bytes::Bytes;
use image::{DynamicImage, ImageFormat, ImageReader};
use kiaba_storage::Storage;
use std::io::Cursor;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

/// Where the source bytes came from. Decides how the writer persists output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOrigin {
    LocalPath(PathBuf),
    Upload,
    Remote,
}

#[derive(Debug, Clone)]
pub struct SourceImage {
    /// Storage key of the photo's current image.
    pub key: String,
    pub bytes: Vec<u8>,
    pub origin: SourceOrigin,
}

impl SourceImage {
    pub fn is_local_path(&self) -> bool {
        matches!(self.origin, SourceOrigin::LocalPath(_))
    }
}

#[derive(Debug)]
pub struct DecodedImage {
    pub image: DynamicImage,
    /// Best guess of the original container format.
    pub format: ImageFormat,
}

/// Fetch the source bytes for `key`, or `None` when no source is readable.
pub async fn load_source(
    storage: &dyn Storage,
    key: &str,
    upload: Option<&Bytes>,
) -> Option<SourceImage> {
    if let Some(path) = storage.local_path(key) {
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    return Some(SourceImage {
                        key: key.to_string(),
                        bytes,
                        origin: SourceOrigin::LocalPath(path),
                    })
                }
                Err(e) => {
                    tracing::warn!(error = %e, path = %path.display(), "Failed to read local photo file");
                }
            }
        }
    }

    if let Some(upload) = upload.filter(|b| !b.is_empty()) {
        return Some(SourceImage {
            key: key.to_string(),
            bytes: upload.to_vec(),
            origin: SourceOrigin::Upload,
        });
    }

    match storage.open(key).await {
        Ok(mut reader) => {
            let mut bytes = Vec::new();
            match reader.read_to_end(&mut bytes).await {
                Ok(_) => Some(SourceImage {
                    key: key.to_string(),
                    bytes,
                    origin: SourceOrigin::Remote,
                }),
                Err(e) => {
                    tracing::warn!(error = %e, key = %key, "Failed to read photo stream");
                    None
                }
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, key = %key, "Photo source not readable");
            None
        }
    }
}

/// Decode bytes into a bitmap; `name` only feeds format inference.
pub fn decode(bytes: &[u8], name: &str) -> Result<DecodedImage, image::ImageError> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let format = resolve_format(reader.format(), name);
    let image = reader.decode()?;
    Ok(DecodedImage { image, format })
}

/// Container format when known, otherwise the extension table, otherwise JPEG.
pub fn resolve_format(container: Option<ImageFormat>, name: &str) -> ImageFormat {
    container
        .or_else(|| format_from_extension(name))
        .unwrap_or(ImageFormat::Jpeg)
}

pub fn format_from_extension(name: &str) -> Option<ImageFormat> {
    let ext = kiaba_storage::keys::split_extension(name)
        .1?
        .to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
        "png" => Some(ImageFormat::Png),
        "webp" => Some(ImageFormat::WebP),
        "gif" => Some(ImageFormat::Gif),
        _ => None,
    }
}
