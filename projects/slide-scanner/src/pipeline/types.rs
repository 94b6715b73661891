use crate::vision::phash::PerceptualHash;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// How a chunk walks through its time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Pause the player and seek to each sampled timestamp.
    #[default]
    Seek,
    /// Play the video and auto-capture while it runs.
    Live,
}

/// A scan as requested by a client. `range_end` of 0 means "to the end".
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    #[serde(alias = "videoUrl")]
    pub url: String,
    #[serde(default)]
    pub range_start: f64,
    #[serde(default)]
    pub range_end: f64,
    #[serde(default)]
    pub mode: ScanMode,
    #[serde(default)]
    pub workers: Option<usize>,
}

impl ScanRequest {
    #[cfg(test)]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            range_start: 0.0,
            range_end: 0.0,
            mode: ScanMode::Seek,
            workers: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub duration_seconds: f64,
    pub suggested_interval_seconds: f64,
}

/// One worker's slice of the scanned range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanChunk {
    pub worker_index: usize,
    pub start_seconds: f64,
    pub end_seconds: f64,
}

impl ScanChunk {
    /// Completion of this chunk at `current`, as a whole percentage.
    pub fn progress_at(&self, current: f64) -> u8 {
        let span = self.end_seconds - self.start_seconds;
        if span <= 0.0 {
            return 100;
        }
        let pct = ((current - self.start_seconds) / span * 100.0).round();
        pct.clamp(0.0, 100.0) as u8
    }
}

/// Events produced by a single chunk's scan loop, in timestamp order.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Image {
        timestamp: f64,
        jpeg: Vec<u8>,
        hash: PerceptualHash,
        progress: u8,
    },
    /// Frame was a near-duplicate, blank or unusable.
    Skipped { timestamp: f64, progress: u8 },
    Done,
    Failed { message: String },
}

/// A chunk event tagged with the worker that produced it.
#[derive(Debug)]
pub struct WorkerMessage {
    pub worker_index: usize,
    pub event: CaptureEvent,
}

/// Events on the client-facing stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScanEvent {
    Meta {
        duration: f64,
        interval: f64,
        workers: usize,
        #[serde(rename = "scanId")]
        scan_id: String,
    },
    Image {
        #[serde(rename = "imageUrl")]
        image_url: String,
        timestamp: u64,
        progress: u8,
        phash: String,
        worker: usize,
    },
    Progress {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
        progress: u8,
    },
    Done {
        #[serde(rename = "totalSlides")]
        total_slides: usize,
    },
    Error {
        error: String,
    },
}

impl ScanEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

/// Immutable tunables shared by every worker of every scan.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub max_workers: usize,
    pub duplicate_threshold: u32,
    pub live_duplicate_threshold: u32,
    pub navigation_timeout: Duration,
    pub player_timeout: Duration,
    pub seek_ack_timeout: Duration,
    pub settle_delay: Duration,
    pub unacked_settle_delay: Duration,
    pub spinner_timeout: Duration,
    pub max_recoveries: u32,
    pub live_poll_interval: Duration,
    pub live_stall_limit: u32,
    pub jpeg_quality: u8,
    pub viewport: (u32, u32),
    pub user_agent: String,
    pub headless: bool,
    pub chrome_executable: Option<PathBuf>,
    pub player_selector: String,
    pub video_selector: String,
    pub spinner_selector: String,
    pub crash_markers: Vec<String>,
    pub blocked_urls: Vec<String>,
    /// How long a finished scan stays registered when nobody polls its status
    pub registry_retention: Duration,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            max_workers: 4,
            duplicate_threshold: 8,
            live_duplicate_threshold: 10,
            navigation_timeout: Duration::from_secs(60),
            player_timeout: Duration::from_secs(20),
            seek_ack_timeout: Duration::from_secs(3),
            settle_delay: Duration::from_millis(500),
            unacked_settle_delay: Duration::from_millis(1000),
            spinner_timeout: Duration::from_secs(1),
            max_recoveries: 2,
            live_poll_interval: Duration::from_secs(1),
            live_stall_limit: 20,
            jpeg_quality: 80,
            viewport: (1280, 720),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"
                .to_string(),
            headless: true,
            chrome_executable: None,
            player_selector: "video".to_string(),
            video_selector: "video".to_string(),
            spinner_selector: "[class*=\"spinner\"]".to_string(),
            crash_markers: vec![
                "Something went wrong".to_string(),
                "An error occurred".to_string(),
            ],
            blocked_urls: [
                "*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.svg", "*.ico", "*.woff",
                "*.woff2", "*.ttf", "*.otf", "*doubleclick.net*", "*googlesyndication.com*",
                "*google-analytics.com*", "*googletagmanager.com*", "*adservice.google.com*",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            registry_retention: Duration::from_secs(600),
        }
    }
}

/// Scan state shared between the orchestrator, its workers and HTTP handlers.
///
/// Workers only read `is_active`; every other field is written by the
/// orchestrator's event loop.
#[derive(Debug)]
pub struct ScanState {
    pub scan_id: String,
    pub url: String,
    pub is_active: AtomicBool,
    pub is_complete: AtomicBool,
    pub error: RwLock<Option<String>>,
    pub metadata: RwLock<Option<VideoMetadata>>,
    /// Progress per worker, 0-100
    pub worker_progress: RwLock<Vec<u8>>,
    pub slides_found: AtomicUsize,
    pub frames_skipped: AtomicUsize,
    pub start_time: Instant,
}

impl ScanState {
    pub fn new(scan_id: String, url: String) -> Self {
        Self {
            scan_id,
            url,
            is_active: AtomicBool::new(true),
            is_complete: AtomicBool::new(false),
            error: RwLock::new(None),
            metadata: RwLock::new(None),
            worker_progress: RwLock::new(Vec::new()),
            slides_found: AtomicUsize::new(0),
            frames_skipped: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.is_active.store(false, Ordering::Relaxed);
    }

    pub fn set_workers(&self, count: usize) {
        if let Ok(mut progress) = self.worker_progress.write() {
            *progress = vec![0; count];
        }
    }

    /// Records a worker's progress and returns the new overall progress.
    pub fn update_worker(&self, worker_index: usize, progress: u8) -> u8 {
        if let Ok(mut workers) = self.worker_progress.write() {
            if let Some(slot) = workers.get_mut(worker_index) {
                *slot = progress;
            }
        }
        self.overall_progress()
    }

    /// Arithmetic mean of per-worker progress.
    pub fn overall_progress(&self) -> u8 {
        let workers = match self.worker_progress.read() {
            Ok(w) => w,
            Err(_) => return 0,
        };
        if workers.is_empty() {
            return 0;
        }
        let sum: u32 = workers.iter().map(|&p| u32::from(p)).sum();
        (f64::from(sum) / workers.len() as f64).round() as u8
    }

    pub fn fail(&self, message: &str) {
        if let Ok(mut error) = self.error.write() {
            error.get_or_insert_with(|| message.to_string());
        }
        self.stop();
    }

    pub fn to_progress_json(&self) -> serde_json::Value {
        let workers = self
            .worker_progress
            .read()
            .map(|w| w.clone())
            .unwrap_or_default();
        let metadata = self.metadata.read().ok().and_then(|m| *m);
        let error = self.error.read().ok().and_then(|e| e.clone());

        serde_json::json!({
            "scan_id": self.scan_id,
            "url": self.url,
            "is_active": self.is_active(),
            "is_complete": self.is_complete.load(Ordering::Relaxed),
            "error": error,
            "metadata": metadata,
            "progress": self.overall_progress(),
            "worker_progress": workers,
            "slides_found": self.slides_found.load(Ordering::Relaxed),
            "frames_skipped": self.frames_skipped.load(Ordering::Relaxed),
            "elapsed_secs": self.start_time.elapsed().as_secs_f64(),
        })
    }
}
