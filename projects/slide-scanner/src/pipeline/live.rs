// Live auto-capture: watches a playing video and keeps frames that changed.

use crate::error::ScanError;
use crate::vision::decode_frame;
use crate::vision::edge_density::{analyze_image, EdgeDensity};
use crate::vision::phash::{dhash, hamming_distance, PerceptualHash};
use image::DynamicImage;

/// A frame after blank detection; blank frames are never hashed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LiveFrame {
    Blank(EdgeDensity),
    Hashed(PerceptualHash),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LiveDecision {
    Blank,
    Duplicate { distance: u32 },
    Capture(PerceptualHash),
}

pub fn inspect(image: &DynamicImage) -> LiveFrame {
    let density = analyze_image(image);
    if density.is_blank {
        LiveFrame::Blank(density)
    } else {
        LiveFrame::Hashed(dhash(image))
    }
}

pub fn inspect_encoded(bytes: &[u8], timestamp: f64) -> Result<LiveFrame, ScanError> {
    decode_frame(bytes, timestamp).map(|img| inspect(&img))
}

/// Tracks the last captured hash of a live session.
#[derive(Debug, Clone, Copy)]
pub struct LiveCaptureEngine {
    threshold: u32,
    last_captured: Option<PerceptualHash>,
}

impl LiveCaptureEngine {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            last_captured: None,
        }
    }

    #[cfg(test)]
    pub fn observe(&mut self, image: &DynamicImage) -> LiveDecision {
        self.decide(inspect(image))
    }

    pub fn decide(&mut self, frame: LiveFrame) -> LiveDecision {
        let hash = match frame {
            LiveFrame::Blank(_) => return LiveDecision::Blank,
            LiveFrame::Hashed(hash) => hash,
        };
        let distance = hamming_distance(Some(&hash), self.last_captured.as_ref());
        if distance < self.threshold {
            return LiveDecision::Duplicate { distance };
        }
        self.last_captured = Some(hash);
        LiveDecision::Capture(hash)
    }
}
