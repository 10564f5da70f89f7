use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageReader, RgbaImage};
use std::io::Cursor;

/// Watermark configuration
#[derive(Debug, Clone, Copy)]
pub struct WatermarkConfig {
    /// Multiplier applied to every logo alpha value, 0.0..=1.0.
    pub opacity: f32,
    /// Logo's longer side as a fraction of the photo's shorter side.
    pub size_fraction: f32,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            opacity: 0.5,
            size_fraction: 0.25,
        }
    }
}

impl From<&kiaba_core::PipelineConfig> for WatermarkConfig {
    fn from(config: &kiaba_core::PipelineConfig) -> Self {
        Self {
            opacity: config.watermark_opacity,
            size_fraction: config.watermark_size_fraction,
        }
    }
}

pub struct Watermark;

impl Watermark {
    /// Decode logo bytes into RGBA.
    pub fn decode_logo(data: &[u8]) -> Result<RgbaImage, image::ImageError> {
        let reader = ImageReader::new(Cursor::new(data)).with_guessed_format()?;
        Ok(reader.decode()?.to_rgba8())
    }

    /// Logo dimensions after scaling: the longer logo side becomes
    /// `floor(min(image_w, image_h) * size_fraction)`, aspect ratio kept.
    pub fn logo_dimensions(
        image: (u32, u32),
        logo: (u32, u32),
        size_fraction: f32,
    ) -> (u32, u32) {
        let (img_w, img_h) = image;
        let (logo_w, logo_h) = (logo.0.max(1), logo.1.max(1));
        let size = ((img_w.min(img_h) as f32 * size_fraction) as u32).max(1);
        let ratio = logo_w as f64 / logo_h as f64;

        if logo_w >= logo_h {
            (size, ((size as f64 / ratio) as u32).max(1))
        } else {
            (((size as f64 * ratio) as u32).max(1), size)
        }
    }

    /// Composite `logo` centered on `img` with reduced opacity.
    pub fn apply(img: &DynamicImage, logo: &RgbaImage, config: &WatermarkConfig) -> DynamicImage {
        let (img_width, img_height) = img.dimensions();
        let (target_w, target_h) =
            Self::logo_dimensions((img_width, img_height), logo.dimensions(), config.size_fraction);

        let mut logo_img = if logo.dimensions() != (target_w, target_h) {
            imageops::resize(logo, target_w, target_h, FilterType::Lanczos3)
        } else {
            logo.clone()
        };

        if config.opacity < 1.0 {
            for pixel in logo_img.pixels_mut() {
                pixel[3] = (pixel[3] as f32 * config.opacity) as u8;
            }
        }

        // Integer centering; a logo larger than the photo hangs off the top-left edge.
        let x = (img_width as i64 - target_w as i64) / 2;
        let y = (img_height as i64 - target_h as i64) / 2;

        let mut img_rgba = img.to_rgba8();
        imageops::overlay(&mut img_rgba, &logo_img, x, y);

        DynamicImage::ImageRgba8(img_rgba)
    }
}
