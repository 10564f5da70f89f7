//! Content types for stored images.
//!
//! Some S3-compatible providers reject `application/octet-stream` uploads, so
//! every write carries a concrete image type derived from the blob name.

use crate::keys::split_extension;

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const DEFAULT_IMAGE_CONTENT_TYPE: &str = "image/jpeg";

/// Image content type for a blob name, falling back to JPEG.
pub fn for_name(name: &str) -> &'static str {
    let ext = split_extension(name).1.map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("webp") => "image/webp",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("avif") => "image/avif",
        _ => DEFAULT_IMAGE_CONTENT_TYPE,
    }
}

/// Prefer a declared image type, otherwise derive one from the name.
pub fn resolve(name: &str, declared: Option<&str>) -> String {
    match declared.map(str::trim) {
        Some(ct) if ct.starts_with("image/") => ct.to_ascii_lowercase(),
        _ => for_name(name).to_string(),
    }
}
