use crate::error::ScanError;
use crate::pipeline::types::{ScanChunk, VideoMetadata};

/// Seconds between captures for a video of the given length. Longer videos
/// are sampled more coarsely to bound frame count and scan time.
pub fn sampling_interval(duration_secs: f64) -> f64 {
    if duration_secs < 300.0 {
        2.0
    } else if duration_secs < 900.0 {
        5.0
    } else if duration_secs < 1800.0 {
        10.0
    } else if duration_secs < 3600.0 {
        15.0
    } else {
        20.0
    }
}

/// Parallel workers for a video of the given length, capped at `max_workers`.
pub fn worker_count(duration_secs: f64, max_workers: usize) -> usize {
    let planned = if duration_secs > 1200.0 {
        4
    } else if duration_secs > 300.0 {
        2
    } else {
        1
    };
    planned.min(max_workers.max(1))
}

pub fn metadata_for(duration_secs: f64) -> VideoMetadata {
    VideoMetadata {
        duration_seconds: duration_secs,
        suggested_interval_seconds: sampling_interval(duration_secs),
    }
}

/// Resolves a requested range against the probed duration.
///
/// An end of 0, or one at/after the duration, means the end of the video.
pub fn resolve_range(
    range_start: f64,
    range_end: f64,
    duration_secs: f64,
) -> Result<(f64, f64), ScanError> {
    if !range_start.is_finite() || !range_end.is_finite() {
        return Err(ScanError::InvalidInput("range must be finite".to_string()));
    }
    let end = if range_end <= 0.0 || range_end >= duration_secs {
        duration_secs
    } else {
        range_end
    };
    let start = range_start.max(0.0);
    if start >= end {
        return Err(ScanError::InvalidInput(format!(
            "range start {start}s is not before range end {end}s"
        )));
    }
    Ok((start, end))
}

/// Splits `[start, end]` into exactly `workers` contiguous chunks of width
/// `ceil((end - start) / workers)`. Trailing chunks may be short or empty.
pub fn plan_chunks(start: f64, end: f64, workers: usize) -> Vec<ScanChunk> {
    let workers = workers.max(1);
    let width = ((end - start) / workers as f64).ceil();

    (0..workers)
        .map(|i| ScanChunk {
            worker_index: i,
            start_seconds: (start + i as f64 * width).min(end),
            end_seconds: (start + (i + 1) as f64 * width).min(end),
        })
        .collect()
}
