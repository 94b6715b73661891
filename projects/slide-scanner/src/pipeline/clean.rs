// Smart clean: a second pass over captured slides that merges near-duplicates
// and drops bursts.

use crate::vision::phash::hamming_distance_str;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CLEAN_THRESHOLD: u32 = 12;
pub const DEFAULT_BURST_WINDOW_SECS: f64 = 1.0;

/// A captured slide as the client holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slide {
    pub image_url: String,
    pub timestamp: f64,
    pub phash: String,
}

impl Slide {
    /// Size of the encoded image. Smaller usually means less on-screen
    /// obstruction (cursor, presenter overlay), so it is a heuristic only.
    pub fn encoded_size(&self) -> usize {
        match self.image_url.split_once(";base64,") {
            Some((_, payload)) => payload.len(),
            None => self.image_url.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CleanOptions {
    /// Slides within this Hamming distance of the previous kept slide merge
    pub threshold: u32,
    /// Slides closer than this to the previous kept slide are dropped
    pub burst_window: f64,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_CLEAN_THRESHOLD,
            burst_window: DEFAULT_BURST_WINDOW_SECS,
        }
    }
}

pub fn smart_clean(mut slides: Vec<Slide>, options: &CleanOptions) -> Vec<Slide> {
    slides.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    let input = slides.len();

    let mut kept: Vec<Slide> = Vec::with_capacity(input);
    for slide in slides {
        if let Some(last) = kept.last_mut() {
            let distance =
                hamming_distance_str(Some(last.phash.as_str()), Some(slide.phash.as_str()));
            if distance <= options.threshold {
                if slide.encoded_size() < last.encoded_size() {
                    tracing::debug!(
                        "Replacing slide at {:.1}s with smaller near-duplicate at {:.1}s",
                        last.timestamp,
                        slide.timestamp
                    );
                    *last = slide;
                }
                continue;
            }
            if slide.timestamp - last.timestamp < options.burst_window {
                tracing::debug!("Dropping burst slide at {:.1}s", slide.timestamp);
                continue;
            }
        }
        kept.push(slide);
    }

    tracing::info!("Smart clean kept {} of {} slides", kept.len(), input);
    kept
}
