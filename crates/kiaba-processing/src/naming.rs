use kiaba_core::constants::{DEFAULT_IMAGE_BASE_NAME, PHOTO_KEY_PREFIX, THUMBNAIL_KEY_PREFIX};
use kiaba_storage::keys::split_extension;

/// File stem of a storage key: `ads/bike_2.jpg` -> `bike_2`. Empty stems map to `image`.
pub fn base_name(key: &str) -> &str {
    let file_name = key.rsplit('/').next().unwrap_or(key);
    let (stem, _) = split_extension(file_name);
    if stem.trim().is_empty() {
        DEFAULT_IMAGE_BASE_NAME
    } else {
        stem
    }
}

/// `ads/<base>.<ext>`
pub fn main_image_name(source_key: &str, extension: &str) -> String {
    format!("{}/{}.{}", PHOTO_KEY_PREFIX, base_name(source_key), extension)
}

/// `ads/thumbnails/<base>_thumb.<ext>`
pub fn thumbnail_name(source_key: &str, extension: &str) -> String {
    format!(
        "{}/{}_thumb.{}",
        THUMBNAIL_KEY_PREFIX,
        base_name(source_key),
        extension
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_names_from_source_key() {
        assert_eq!(main_image_name("ads/bike.jpg", "webp"), "ads/bike.webp");
        assert_eq!(
            thumbnail_name("ads/bike.jpg", "webp"),
            "ads/thumbnails/bike_thumb.webp"
        );
    }

    #[test]
    fn keeps_inner_dots() {
        assert_eq!(base_name("ads/my.old.bike.png"), "my.old.bike");
    }

    #[test]
    fn empty_stem_uses_default() {
        assert_eq!(base_name(""), "image");
        assert_eq!(base_name("ads/"), "image");
        assert_eq!(main_image_name("ads/", "webp"), "ads/image.webp");
    }
}
