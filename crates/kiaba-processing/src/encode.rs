//! Output encoding
//!
//! WebP is always attempted first. When it fails, PNG sources are written as
//! lossless PNG and everything else as JPEG at the same quality.

use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::{DynamicImage, GenericImageView, ImageFormat, RgbImage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("WebP encoding failed: {0}")]
    WebP(String),

    #[error("PNG encoding failed: {0}")]
    Png(#[from] image::ImageError),

    #[error("JPEG encoding failed: {0}")]
    Jpeg(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    WebP,
    Png,
    Jpeg,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::WebP => "webp",
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }

    pub fn to_mime_type(self) -> &'static str {
        match self {
            OutputFormat::WebP => "image/webp",
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub data: Vec<u8>,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
}

type WebpEncodeFn = fn(&RgbImage, f32) -> Result<Vec<u8>, EncodeError>;

#[derive(Debug, Clone, Copy)]
pub struct Encoder {
    webp: WebpEncodeFn,
}

impl Default for Encoder {
    fn default() -> Self {
        Self { webp: encode_webp }
    }
}

impl Encoder {
    /// Encoder with a custom WebP stage.
    pub fn with_webp(webp: WebpEncodeFn) -> Self {
        Self { webp }
    }

    /// Encode `img`, falling back on `source_format` when WebP fails.
    pub fn encode(
        &self,
        img: &DynamicImage,
        quality: f32,
        source_format: ImageFormat,
    ) -> Result<EncodedImage, EncodeError> {
        let (width, height) = img.dimensions();
        let rgb = flatten_on_white(img);

        let (data, format) = match (self.webp)(&rgb, quality) {
            Ok(data) => (data, OutputFormat::WebP),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    source_format = ?source_format,
                    "WebP encoding failed, falling back to source format"
                );
                if source_format == ImageFormat::Png {
                    (encode_png(img)?, OutputFormat::Png)
                } else {
                    (encode_jpeg(&rgb, quality)?, OutputFormat::Jpeg)
                }
            }
        };

        Ok(EncodedImage {
            data,
            format,
            width,
            height,
        })
    }
}

/// Lossy WebP via libwebp.
pub fn encode_webp(rgb: &RgbImage, quality: f32) -> Result<Vec<u8>, EncodeError> {
    let (width, height) = rgb.dimensions();
    let encoder = webp::Encoder::from_rgb(rgb, width, height);
    let memory = encoder
        .encode_simple(false, quality)
        .map_err(|e| EncodeError::WebP(format!("{:?}", e)))?;
    Ok(memory.to_vec())
}

/// Lossless PNG at maximum compression, alpha preserved.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, EncodeError> {
    let mut buffer = Vec::new();
    let encoder =
        PngEncoder::new_with_quality(&mut buffer, CompressionType::Best, PngFilterType::Adaptive);
    img.write_with_encoder(encoder)?;
    Ok(buffer)
}

/// Baseline JPEG using mozjpeg
pub fn encode_jpeg(rgb: &RgbImage, quality: f32) -> Result<Vec<u8>, EncodeError> {
    let (width, height) = rgb.dimensions();

    let mut comp = mozjpeg::Compress::new(mozjpeg::ColorSpace::JCS_RGB);
    comp.set_size(width as usize, height as usize);
    comp.set_quality(quality);
    comp.set_optimize_coding(true);

    let mut comp = comp.start_compress(Vec::new())?;
    comp.write_scanlines(rgb)?;
    Ok(comp.finish()?)
}

/// Drop alpha by compositing over white.
pub fn flatten_on_white(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let p = rgba.get_pixel(x, y);
        let alpha = p[3] as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha)) / 255) as u8;
        image::Rgb([blend(p[0]), blend(p[1]), blend(p[2])])
    })
}
