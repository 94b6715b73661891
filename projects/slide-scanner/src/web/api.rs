use crate::browser::BrowserLauncher;
use crate::error::ScanError;
use crate::pipeline::clean::{smart_clean, CleanOptions, Slide};
use crate::pipeline::orchestrator::{report_scan, stop_scan, ScanOrchestrator};
use crate::pipeline::types::VideoMetadata;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct MetadataQuery {
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanRequest {
    pub slides: Vec<Slide>,
    pub threshold: Option<u32>,
    pub burst_window: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct CleanResponse {
    pub slides: Vec<Slide>,
    pub removed: usize,
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn metadata<L: BrowserLauncher>(
    State(orchestrator): State<ScanOrchestrator<L>>,
    Query(query): Query<MetadataQuery>,
) -> Result<Json<VideoMetadata>, ScanError> {
    orchestrator.probe(&query.url).await.map(Json)
}

pub async fn scan_status(Path(scan_id): Path<String>) -> Result<Json<Value>, StatusCode> {
    report_scan(&scan_id)
        .map(|state| Json(state.to_progress_json()))
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn stop_scan_handler(Path(scan_id): Path<String>) -> Result<Json<Value>, StatusCode> {
    if stop_scan(&scan_id) {
        Ok(Json(json!({ "scanId": scan_id, "stopped": true })))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

pub async fn clean(Json(request): Json<CleanRequest>) -> Result<Json<CleanResponse>, ScanError> {
    let defaults = CleanOptions::default();
    let options = CleanOptions {
        threshold: request.threshold.unwrap_or(defaults.threshold),
        burst_window: request.burst_window.unwrap_or(defaults.burst_window),
    };
    if !options.burst_window.is_finite() || options.burst_window < 0.0 {
        return Err(ScanError::InvalidInput(
            "burstWindow must be a non-negative number".into(),
        ));
    }

    let input = request.slides.len();
    let slides = smart_clean(request.slides, &options);
    Ok(Json(CleanResponse {
        removed: input - slides.len(),
        slides,
    }))
}
