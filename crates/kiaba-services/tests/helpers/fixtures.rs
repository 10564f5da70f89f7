//! Test fixtures: encoded images and a semi-transparent logo.

use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use std::io::Cursor;

fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format).expect("Failed to encode fixture");
    out.into_inner()
}

pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 120])
    });
    encode(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg)
}

pub fn png_with_alpha(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba([10, 200, 10, 128]));
    encode(DynamicImage::ImageRgba8(img), ImageFormat::Png)
}

pub fn logo_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 200]));
    encode(DynamicImage::ImageRgba8(img), ImageFormat::Png)
}

pub fn corrupt() -> Vec<u8> {
    b"\xff\xd8\xff\xe0 truncated jpeg header".to_vec()
}

/// Width and height of an encoded image.
pub fn dimensions(data: &[u8]) -> (u32, u32) {
    let img = image::load_from_memory(data).expect("Stored output should decode");
    (img.width(), img.height())
}
