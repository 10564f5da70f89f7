use crate::codec::SourceImage;
use crate::naming;
use crate::pipeline::ProcessedOutput;
use kiaba_storage::{content_type, Storage, StorageResult};
use std::sync::Arc;

/// Storage keys of a persisted main image and thumbnail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenKeys {
    pub image: String,
    pub thumbnail: String,
}

/// Persists pipeline output through the storage backend.
///
/// A source read from the backend's filesystem is overwritten in place and keeps
/// its key. Any other source gets a new main blob under `ads/`. Thumbnails are
/// always saved as new blobs under `ads/thumbnails/`.
#[derive(Clone)]
pub struct StorageWriter {
    storage: Arc<dyn Storage>,
}

impl StorageWriter {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn write(
        &self,
        source: &SourceImage,
        output: ProcessedOutput,
    ) -> StorageResult<WrittenKeys> {
        let ProcessedOutput {
            main, thumbnail, ..
        } = output;

        let image = if source.is_local_path() {
            self.storage
                .overwrite(&source.key, main.data, main.format.to_mime_type())
                .await?;
            source.key.clone()
        } else {
            let name = naming::main_image_name(&source.key, main.format.extension());
            self.storage
                .save(&name, main.data, content_type::for_name(&name))
                .await?
        };

        let thumb_name = naming::thumbnail_name(&source.key, thumbnail.format.extension());
        let thumbnail = self
            .storage
            .save(
                &thumb_name,
                thumbnail.data,
                content_type::for_name(&thumb_name),
            )
            .await?;

        tracing::debug!(image = %image, thumbnail = %thumbnail, "Processed photo written");
        Ok(WrittenKeys { image, thumbnail })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SourceOrigin;
    use crate::encode::{EncodedImage, OutputFormat};
    use kiaba_storage::LocalStorage;
    use tempfile::tempdir;

    fn output() -> ProcessedOutput {
        let encoded = |data: &[u8]| EncodedImage {
            data: data.to_vec(),
            format: OutputFormat::WebP,
            width: 1,
            height: 1,
        };
        ProcessedOutput {
            main: encoded(b"main"),
            thumbnail: encoded(b"thumb"),
            watermarked: false,
        }
    }

    #[tokio::test]
    async fn local_source_is_overwritten_in_place() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(
            LocalStorage::new(dir.path(), "/media".to_string())
                .await
                .unwrap(),
        );
        storage
            .save("ads/bike.jpg", b"raw".to_vec(), "image/jpeg")
            .await
            .unwrap();
        let source = SourceImage {
            key: "ads/bike.jpg".to_string(),
            bytes: b"raw".to_vec(),
            origin: SourceOrigin::LocalPath(dir.path().join("ads/bike.jpg")),
        };

        let keys = StorageWriter::new(storage.clone())
            .write(&source, output())
            .await
            .unwrap();
        assert_eq!(keys.image, "ads/bike.jpg");
        assert_eq!(keys.thumbnail, "ads/thumbnails/bike_thumb.webp");
        assert_eq!(storage.read("ads/bike.jpg").await.unwrap(), b"main");
        assert_eq!(storage.read(&keys.thumbnail).await.unwrap(), b"thumb");
    }

    #[tokio::test]
    async fn remote_source_gets_new_blob_without_clobbering() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(
            LocalStorage::new(dir.path(), "/media".to_string())
                .await
                .unwrap(),
        );
        storage
            .save("ads/bike.webp", b"other".to_vec(), "image/webp")
            .await
            .unwrap();
        let source = SourceImage {
            key: "ads/bike.jpg".to_string(),
            bytes: Vec::new(),
            origin: SourceOrigin::Remote,
        };

        let keys = StorageWriter::new(storage.clone())
            .write(&source, output())
            .await
            .unwrap();
        assert_ne!(keys.image, "ads/bike.webp");
        assert!(keys.image.starts_with("ads/bike_") && keys.image.ends_with(".webp"));
        assert_eq!(storage.read("ads/bike.webp").await.unwrap(), b"other");
    }
}
