// Scan artifact struct definitions
//
// This module contains the struct definitions for artifacts that are persisted
// as JSON files within a scan's output directory.

use crate::pipeline::types::{ScanMode, VideoMetadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One slide image written by a scan
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SlideRecord {
    /// File name relative to the scan directory
    pub file: String,
    pub timestamp: f64,
    pub phash: String,
    pub bytes: usize,
}

/// Contents of `manifest.json`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScanManifest {
    pub scan_id: String,
    /// Name of the output directory
    pub run_id: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub mode: ScanMode,
    pub range_start: f64,
    pub range_end: f64,
    #[serde(default)]
    pub metadata: Option<VideoMetadata>,
    /// Whether smart clean ran before the slides were written
    pub cleaned: bool,
    /// Slides captured before cleaning
    pub captured: usize,
    pub slides: Vec<SlideRecord>,
}
