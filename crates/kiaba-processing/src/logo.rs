use kiaba_core::PipelineConfig;
use std::path::{Path, PathBuf};

/// Finds the site logo among the static directories.
///
/// Candidates are each static dir joined with the relative logo path, then the
/// fallback path. Lookup happens per job, so a logo deployed after startup is
/// picked up and a removed one is skipped.
#[derive(Debug, Clone)]
pub struct LogoLocator {
    candidates: Vec<PathBuf>,
}

impl LogoLocator {
    pub fn new(static_dirs: &[PathBuf], relative_path: &Path, fallback_path: &Path) -> Self {
        let mut candidates: Vec<PathBuf> = static_dirs
            .iter()
            .map(|dir| dir.join(relative_path))
            .collect();
        candidates.push(fallback_path.to_path_buf());
        Self { candidates }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            &config.static_dirs,
            &config.logo_relative_path,
            &config.logo_fallback_path,
        )
    }

    /// A locator that never finds a logo.
    pub fn disabled() -> Self {
        Self {
            candidates: Vec::new(),
        }
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    /// First candidate that exists as a file.
    pub async fn locate(&self) -> Option<PathBuf> {
        for candidate in &self.candidates {
            if let Ok(meta) = tokio::fs::metadata(candidate).await {
                if meta.is_file() {
                    return Some(candidate.clone());
                }
            }
        }
        None
    }

    /// Logo bytes, or `None` (with a warning) when no candidate is readable.
    pub async fn load(&self) -> Option<Vec<u8>> {
        let Some(path) = self.locate().await else {
            tracing::warn!(
                candidates = ?self.candidates,
                "Watermark logo not found, skipping watermark"
            );
            return None;
        };

        match tokio::fs::read(&path).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "Failed to read watermark logo");
                None
            }
        }
    }
}
