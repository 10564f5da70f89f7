use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use kiaba_services::PhotoUpload;

/// Read a file from disk as a photo upload named after the file.
pub async fn read_upload(path: &Path) -> Result<PhotoUpload> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(PhotoUpload {
        file_name,
        content_type: None,
        data: data.into(),
    })
}

pub fn print_json(value: &impl Serialize) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}
