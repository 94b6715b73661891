use crate::run_artifacts::{ScanManifest, SlideRecord};
use anyhow::{Context, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Output directory of a single CLI scan.
#[derive(Debug, Clone)]
pub struct ScanRun {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub output_dir: PathBuf,
}

/// File-system friendly stem for a video URL.
pub fn url_slug(url: &str) -> String {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let mut slug = String::new();
    for c in without_scheme.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
        if slug.len() >= 48 {
            break;
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "video".to_string()
    } else {
        slug.to_string()
    }
}

/// Creates a fresh `<slug>-<timestamp>` directory under `output_root`.
pub fn create_run(output_root: &Path, url: &str) -> Result<ScanRun> {
    let created_at = Utc::now();
    let run_id = format!("{}-{}", url_slug(url), created_at.format("%Y%m%d-%H%M%S"));

    let output_dir = output_root.join(&run_id);
    if output_dir.exists() {
        return Err(anyhow::anyhow!(
            "Output directory already exists for: {}",
            run_id
        ));
    }

    fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    Ok(ScanRun {
        run_id,
        created_at,
        output_dir,
    })
}

/// Extracts the bytes of a `data:<mime>;base64,<payload>` URL.
pub fn decode_data_url(data_url: &str) -> Result<Vec<u8>> {
    let (header, payload) = data_url
        .split_once(',')
        .ok_or_else(|| anyhow::anyhow!("Not a data URL"))?;
    if !header.starts_with("data:") || !header.ends_with(";base64") {
        anyhow::bail!("Unsupported data URL header: {}", header);
    }
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .context("Invalid base64 payload")
}

impl ScanRun {
    /// Writes one slide as `slide_<seconds>.jpg`, suffixing on collision.
    pub fn write_slide(&self, timestamp: f64, phash: &str, jpeg: &[u8]) -> Result<SlideRecord> {
        let stem = format!("slide_{:06}", timestamp.round() as u64);
        let mut file = format!("{}.jpg", stem);
        let mut n = 1;
        while self.output_dir.join(&file).exists() {
            file = format!("{}_{}.jpg", stem, n);
            n += 1;
        }

        fs::write(self.output_dir.join(&file), jpeg)
            .with_context(|| format!("Failed to write {}", file))?;

        Ok(SlideRecord {
            file,
            timestamp,
            phash: phash.to_string(),
            bytes: jpeg.len(),
        })
    }

    pub fn write_manifest(&self, manifest: &ScanManifest) -> Result<PathBuf> {
        let path = self.output_dir.join(MANIFEST_FILE);
        let content = serde_json::to_string_pretty(manifest)?;
        fs::write(&path, content)?;
        Ok(path)
    }
}

#[cfg(test)]
pub fn load_manifest(output_dir: &Path) -> Result<ScanManifest> {
    let content = fs::read_to_string(output_dir.join(MANIFEST_FILE))?;
    Ok(serde_json::from_str(&content)?)
}
