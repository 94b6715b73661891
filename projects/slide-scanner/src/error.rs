//! Typed failures surfaced to HTTP callers and to the scan stream.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// Missing or malformed request data, rejected before any browser work.
    #[error("Invalid request: {0}")]
    InvalidInput(String),

    /// The browser process could not be started.
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    /// The page did not reach a loaded state in time.
    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    /// The video player container never appeared.
    #[error("Video player not found within {seconds}s")]
    PlayerNotFound { seconds: u64 },

    /// The page has a video element but no usable duration.
    #[error("Video duration unavailable")]
    DurationUnavailable,

    /// A single captured frame could not be decoded or hashed.
    #[error("Frame at {timestamp:.1}s unusable: {reason}")]
    Frame { timestamp: f64, reason: String },

    /// The player kept crashing at the same timestamp.
    #[error("Player crashed {attempts} times at {timestamp:.1}s, giving up")]
    RecoveryExhausted { timestamp: f64, attempts: u32 },

    /// Any other browser protocol failure.
    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Scan was cancelled")]
    Cancelled,
}

impl ScanError {
    /// Per-frame failures are skipped; everything else ends the chunk.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Frame { .. })
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Cancelled => StatusCode::CONFLICT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ScanError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!("Request failed: {}", self);
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
