//! Shared key handling for storage backends.

use crate::traits::{StorageError, StorageResult};
use uuid::Uuid;

/// Attempts made to find a free name before giving up.
pub const MAX_NAME_ATTEMPTS: usize = 16;

/// Reject keys that could escape the storage root.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("Storage key is empty".to_string()));
    }
    if key.starts_with('/') || key.contains('\\') || key.split('/').any(|part| part == "..") {
        return Err(StorageError::InvalidKey(format!(
            "Storage key contains invalid characters: {}",
            key
        )));
    }
    Ok(())
}

/// Split `ads/bike.photo.jpg` into (`ads/bike.photo`, Some(`jpg`)).
pub fn split_extension(name: &str) -> (&str, Option<&str>) {
    let file_start = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    match name[file_start..].rfind('.') {
        Some(0) | None => (name, None),
        Some(dot) => {
            let dot = file_start + dot;
            (&name[..dot], Some(&name[dot + 1..]))
        }
    }
}

/// Same name with a 7-character random suffix before the extension.
pub fn alternative_name(name: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    let suffix = &suffix[..7];
    match split_extension(name) {
        (stem, Some(ext)) => format!("{}_{}.{}", stem, suffix, ext),
        (stem, None) => format!("{}_{}", stem, suffix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_traversal_and_absolute_keys() {
        assert!(validate_key("ads/bike.jpg").is_ok());
        assert!(validate_key("ads/..hidden.jpg").is_ok());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("ads/../../x").is_err());
        assert!(validate_key("/ads/bike.jpg").is_err());
        assert!(validate_key("").is_err());
    }

    #[test]
    fn splits_only_the_file_extension() {
        assert_eq!(split_extension("ads/bike.jpg"), ("ads/bike", Some("jpg")));
        assert_eq!(split_extension("ads.v2/bike"), ("ads.v2/bike", None));
        assert_eq!(split_extension("ads/.hidden"), ("ads/.hidden", None));
    }

    #[test]
    fn alternative_name_keeps_extension() {
        let alt = alternative_name("ads/bike.webp");
        assert!(alt.starts_with("ads/bike_"));
        assert!(alt.ends_with(".webp"));
        assert_eq!(alt.len(), "ads/bike_.webp".len() + 7);
        assert_ne!(alt, alternative_name("ads/bike.webp"));
    }
}
