use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

/// Target size that fits `(width, height)` inside the bounds, or `None` when
/// the image already fits. Never upscales; aspect ratio kept, dimensions floored.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> Option<(u32, u32)> {
    if width <= max_width && height <= max_height {
        return None;
    }
    let ratio = (max_width as f64 / width as f64).min(max_height as f64 / height as f64);
    let new_width = ((width as f64 * ratio) as u32).clamp(1, max_width.max(1));
    let new_height = ((height as f64 * ratio) as u32).clamp(1, max_height.max(1));
    Some((new_width, new_height))
}

/// Downscale `img` to fit the bounds with Lanczos3; returns it unchanged otherwise.
pub fn bound(img: DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    match fit_within(width, height, max_width, max_height) {
        Some((w, h)) => img.resize_exact(w, h, FilterType::Lanczos3),
        None => img,
    }
}
