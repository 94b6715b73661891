// Frame analysis: perceptual hashing and blank-frame detection

pub mod edge_density;
pub mod phash;

use crate::error::ScanError;
use image::DynamicImage;

/// Decodes an encoded screenshot (JPEG/PNG) into an image.
pub fn decode_frame(bytes: &[u8], timestamp: f64) -> Result<DynamicImage, ScanError> {
    image::load_from_memory(bytes).map_err(|e| ScanError::Frame {
        timestamp,
        reason: e.to_string(),
    })
}

/// Decodes and hashes an encoded screenshot.
pub fn hash_frame(bytes: &[u8], timestamp: f64) -> Result<phash::PerceptualHash, ScanError> {
    decode_frame(bytes, timestamp).map(|img| phash::dhash(&img))
}
