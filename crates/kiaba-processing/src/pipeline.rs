use crate::codec::DecodedImage;
use crate::encode::{EncodeError, EncodedImage, Encoder};
use crate::resize;
use crate::watermark::{Watermark, WatermarkConfig};
use image::RgbaImage;
use kiaba_core::PipelineConfig;

/// Main image and thumbnail produced from one source bitmap.
#[derive(Debug, Clone)]
pub struct ProcessedOutput {
    pub main: EncodedImage,
    pub thumbnail: EncodedImage,
    pub watermarked: bool,
}

/// CPU-bound part of photo processing. Synchronous; callers run it on the
/// blocking pool.
#[derive(Debug, Clone)]
pub struct PhotoPipeline {
    config: PipelineConfig,
    encoder: Encoder,
}

impl PhotoPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_encoder(config, Encoder::default())
    }

    pub fn with_encoder(config: PipelineConfig, encoder: Encoder) -> Self {
        Self { config, encoder }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Watermark (when a logo is given), bound to the main size, encode, then
    /// derive the thumbnail from the same bitmap.
    pub fn process(
        &self,
        decoded: DecodedImage,
        logo: Option<&RgbaImage>,
    ) -> Result<ProcessedOutput, EncodeError> {
        let DecodedImage { image, format } = decoded;
        let config = &self.config;

        let (image, watermarked) = match logo {
            Some(logo) => (
                Watermark::apply(&image, logo, &WatermarkConfig::from(config)),
                true,
            ),
            None => (image, false),
        };

        let main_bitmap = resize::bound(image, config.max_width, config.max_height);
        let main = self.encoder.encode(&main_bitmap, config.quality, format)?;

        let thumb_bitmap = resize::bound(
            main_bitmap,
            config.thumbnail_max_width,
            config.thumbnail_max_height,
        );
        let thumbnail = self
            .encoder
            .encode(&thumb_bitmap, config.thumbnail_quality, format)?;

        tracing::debug!(
            main_width = main.width,
            main_height = main.height,
            main_bytes = main.data.len(),
            thumbnail_width = thumbnail.width,
            thumbnail_height = thumbnail.height,
            watermarked = watermarked,
            "Photo encoded"
        );

        Ok(ProcessedOutput {
            main,
            thumbnail,
            watermarked,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::OutputFormat;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba};

    fn decoded(width: u32, height: u32) -> DecodedImage {
        DecodedImage {
            image: DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([90, 90, 90]))),
            format: ImageFormat::Jpeg,
        }
    }

    #[test]
    fn large_photo_is_bounded_and_thumbnailed() {
        let pipeline = PhotoPipeline::new(PipelineConfig::default());
        let logo = RgbaImage::from_pixel(20, 10, Rgba([255, 0, 0, 255]));

        let out = pipeline.process(decoded(2000, 1500), Some(&logo)).unwrap();
        assert!(out.watermarked);
        assert_eq!((out.main.width, out.main.height), (1000, 750));
        assert_eq!((out.thumbnail.width, out.thumbnail.height), (320, 240));
        assert_eq!(out.main.format, OutputFormat::WebP);
        assert_eq!(out.thumbnail.format, OutputFormat::WebP);
    }

    #[test]
    fn small_photo_keeps_size_without_logo() {
        let pipeline = PhotoPipeline::new(PipelineConfig::default());
        let out = pipeline.process(decoded(200, 100), None).unwrap();
        assert!(!out.watermarked);
        assert_eq!((out.main.width, out.main.height), (200, 100));
        assert_eq!((out.thumbnail.width, out.thumbnail.height), (200, 100));
    }

    #[test]
    fn thresholds_follow_config() {
        let config = PipelineConfig {
            max_width: 400,
            max_height: 400,
            thumbnail_max_width: 100,
            thumbnail_max_height: 100,
            ..PipelineConfig::default()
        };
        let out = PhotoPipeline::new(config)
            .process(decoded(800, 600), None)
            .unwrap();
        assert_eq!((out.main.width, out.main.height), (400, 300));
        assert_eq!((out.thumbnail.width, out.thumbnail.height), (100, 75));
    }
}
