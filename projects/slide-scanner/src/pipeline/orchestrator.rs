// Scan orchestrator: manages the scan lifecycle
//
// Probes the video once, fans out one session per chunk, aggregates their
// events into a single client stream and tracks scan state in a registry.

use crate::browser::{BrowserLauncher, PlayerPage};
use crate::error::ScanError;
use crate::pipeline::planner::{metadata_for, plan_chunks, resolve_range, worker_count};
use crate::pipeline::session::{run_worker, ChunkTask};
pub use crate::pipeline::types::ScanState;
use crate::pipeline::types::{
    CaptureEvent, ScanEvent, ScanRequest, ScanSettings, VideoMetadata, WorkerMessage,
};
use base64::Engine;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep, Instant};

const EVENT_BUFFER: usize = 64;
const WORKER_BUFFER: usize = 32;
const DURATION_POLL: Duration = Duration::from_millis(250);

// Global registry of scans, live and recently finished
lazy_static::lazy_static! {
    static ref SCAN_REGISTRY: RwLock<HashMap<String, Arc<ScanState>>> =
        RwLock::new(HashMap::new());
}

static SCAN_COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn get_scan_state(scan_id: &str) -> Option<Arc<ScanState>> {
    SCAN_REGISTRY.read().ok()?.get(scan_id).cloned()
}

/// Returns the state of a scan; a finished scan is removed once reported.
pub fn report_scan(scan_id: &str) -> Option<Arc<ScanState>> {
    let state = get_scan_state(scan_id)?;
    if state.is_complete.load(Ordering::Relaxed) {
        unregister_scan(scan_id);
    }
    Some(state)
}

fn register_scan(state: Arc<ScanState>) {
    tracing::info!("Registering scan: {}", state.scan_id);
    if let Ok(mut registry) = SCAN_REGISTRY.write() {
        registry.insert(state.scan_id.clone(), state);
    }
}

fn unregister_scan(scan_id: &str) {
    if let Ok(mut registry) = SCAN_REGISTRY.write() {
        registry.remove(scan_id);
    }
}

/// Stop a running scan; workers exit at their next iteration.
pub fn stop_scan(scan_id: &str) -> bool {
    match get_scan_state(scan_id) {
        Some(state) => {
            tracing::info!("Stopping scan: {}", scan_id);
            state.stop();
            true
        }
        None => false,
    }
}

fn new_scan_id() -> String {
    let seq = SCAN_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!(
        "scan-{}-{:04}",
        chrono::Utc::now().format("%Y%m%d%H%M%S"),
        seq
    )
}

/// Rejects anything but an absolute http(s) URL with a host.
pub fn validate_url(url: &str) -> Result<(), ScanError> {
    let url = url.trim();
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| ScanError::InvalidInput(format!("not an http(s) URL: {:?}", url)))?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(ScanError::InvalidInput(format!("URL has no host: {:?}", url)));
    }
    Ok(())
}

fn validate_request(request: &ScanRequest) -> Result<(), ScanError> {
    validate_url(&request.url)?;
    if !request.range_start.is_finite() || !request.range_end.is_finite() {
        return Err(ScanError::InvalidInput("range must be finite".into()));
    }
    if request.range_start < 0.0 || request.range_end < 0.0 {
        return Err(ScanError::InvalidInput("range must not be negative".into()));
    }
    if request.workers == Some(0) {
        return Err(ScanError::InvalidInput("workers must be at least 1".into()));
    }
    Ok(())
}

/// How the aggregation loop ended.
enum Outcome {
    Completed(usize),
    Failed(String),
    /// A worker failure was already forwarded as the terminal event
    Reported,
    Cancelled,
}

pub struct ScanOrchestrator<L: BrowserLauncher> {
    launcher: Arc<L>,
    settings: Arc<ScanSettings>,
}

impl<L: BrowserLauncher> Clone for ScanOrchestrator<L> {
    fn clone(&self) -> Self {
        Self {
            launcher: self.launcher.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<L: BrowserLauncher> ScanOrchestrator<L> {
    pub fn new(launcher: L, settings: Arc<ScanSettings>) -> Self {
        Self {
            launcher: Arc::new(launcher),
            settings,
        }
    }

    /// Opens the video in a throwaway browser and reads its duration.
    pub async fn probe(&self, url: &str) -> Result<VideoMetadata, ScanError> {
        validate_url(url)?;
        tracing::info!("Probing metadata for {}", url);
        let mut page = self.launcher.launch("probe").await?;
        let result = read_duration(&mut page, url, self.settings.player_timeout).await;
        page.close().await;

        let duration = result?;
        let metadata = metadata_for(duration);
        tracing::info!(
            "Duration {:.1}s, interval {}s",
            metadata.duration_seconds,
            metadata.suggested_interval_seconds
        );
        Ok(metadata)
    }

    /// Validates and registers a scan, then drives it in the background.
    /// The receiver yields exactly one terminal event.
    pub fn start(
        &self,
        request: ScanRequest,
    ) -> Result<(Arc<ScanState>, mpsc::Receiver<ScanEvent>), ScanError> {
        validate_request(&request)?;

        let state = Arc::new(ScanState::new(new_scan_id(), request.url.clone()));
        register_scan(state.clone());

        let (events, rx) = mpsc::channel(EVENT_BUFFER);
        let driver = ScanDriver {
            orchestrator: self.clone(),
            state: state.clone(),
            request,
            events,
        };
        tokio::spawn(driver.run());

        Ok((state, rx))
    }
}

async fn read_duration<P: PlayerPage>(
    page: &mut P,
    url: &str,
    timeout: Duration,
) -> Result<f64, ScanError> {
    page.open(url).await?;
    let deadline = Instant::now() + timeout;
    loop {
        match page.duration().await {
            Ok(Some(duration)) if duration.is_finite() && duration > 0.0 => return Ok(duration),
            Ok(_) => {}
            Err(e) => tracing::debug!("Duration not readable yet: {:#}", e),
        }
        if Instant::now() >= deadline {
            return Err(ScanError::DurationUnavailable);
        }
        sleep(DURATION_POLL).await;
    }
}

struct ScanDriver<L: BrowserLauncher> {
    orchestrator: ScanOrchestrator<L>,
    state: Arc<ScanState>,
    request: ScanRequest,
    events: mpsc::Sender<ScanEvent>,
}

impl<L: BrowserLauncher> ScanDriver<L> {
    async fn run(self) {
        let scan_id = self.state.scan_id.clone();
        let outcome = self.drive().await;

        let terminal = match outcome {
            Outcome::Completed(total_slides) => {
                tracing::info!("Scan {} done: {} slides", scan_id, total_slides);
                Some(ScanEvent::Done { total_slides })
            }
            Outcome::Failed(error) => {
                tracing::error!("Scan {} failed: {}", scan_id, error);
                self.state.fail(&error);
                Some(ScanEvent::Error { error })
            }
            Outcome::Cancelled => {
                let error = ScanError::Cancelled.to_string();
                tracing::info!("Scan {} cancelled", scan_id);
                self.state.fail(&error);
                Some(ScanEvent::Error { error })
            }
            Outcome::Reported => None,
        };
        if let Some(event) = terminal {
            let _ = self.events.send(event).await;
        }

        self.state.stop();
        self.state.is_complete.store(true, Ordering::Relaxed);

        // Closing the event channel ends the client stream; scans nobody
        // polls are dropped from the registry after the retention period
        let retention = self.orchestrator.settings.registry_retention;
        drop(self);
        sleep(retention).await;
        unregister_scan(&scan_id);
    }

    async fn drive(&self) -> Outcome {
        let settings = self.orchestrator.settings.clone();

        let metadata = match self.orchestrator.probe(&self.request.url).await {
            Ok(metadata) => metadata,
            Err(e) => return Outcome::Failed(e.to_string()),
        };
        if let Ok(mut slot) = self.state.metadata.write() {
            *slot = Some(metadata);
        }

        let duration = metadata.duration_seconds;
        let (start, end) =
            match resolve_range(self.request.range_start, self.request.range_end, duration) {
                Ok(range) => range,
                Err(e) => return Outcome::Failed(e.to_string()),
            };
        let max_workers = settings.max_workers.max(1);
        let workers = match self.request.workers {
            Some(n) => n.clamp(1, max_workers),
            None => worker_count(duration, max_workers),
        };
        let interval = metadata.suggested_interval_seconds;
        let chunks = plan_chunks(start, end, workers);
        self.state.set_workers(chunks.len());

        let meta = ScanEvent::Meta {
            duration,
            interval,
            workers: chunks.len(),
            scan_id: self.state.scan_id.clone(),
        };
        if self.events.send(meta).await.is_err() {
            return Outcome::Cancelled;
        }

        tracing::info!(
            "Scan {} covering {:.1}s..{:.1}s with {} workers",
            self.state.scan_id,
            start,
            end,
            chunks.len()
        );

        let workers = chunks.len();
        let (tx, mut rx) = mpsc::channel::<WorkerMessage>(WORKER_BUFFER);
        let mut tasks = JoinSet::new();
        for chunk in chunks {
            let task = ChunkTask {
                url: self.request.url.clone(),
                chunk,
                interval,
                mode: self.request.mode,
                settings: settings.clone(),
                state: self.state.clone(),
                tx: tx.clone(),
            };
            tasks.spawn(run_worker(self.orchestrator.launcher.clone(), task));
        }
        drop(tx);

        self.aggregate(&mut rx, &mut tasks, workers).await
    }

    /// Forwards the loss of a worker task as the scan's failure.
    async fn worker_lost(&self, error: JoinError) {
        let message = format!("Worker task aborted: {}", error);
        tracing::error!("Scan {}: {}", self.state.scan_id, message);
        self.state.fail(&message);
        let _ = self.events.send(ScanEvent::Error { error: message }).await;
    }

    /// Single event loop: folds worker messages into scan state and the
    /// client stream until every worker has released its channel.
    async fn aggregate(
        &self,
        rx: &mut mpsc::Receiver<WorkerMessage>,
        tasks: &mut JoinSet<()>,
        workers: usize,
    ) -> Outcome {
        let mut total_slides = 0usize;
        let mut finished = vec![false; workers];
        let mut failed = false;
        let mut disconnected = false;

        loop {
            let message = tokio::select! {
                message = rx.recv() => message,
                Some(joined) = tasks.join_next() => {
                    if let Err(e) = joined {
                        if !failed && !disconnected {
                            failed = true;
                            self.worker_lost(e).await;
                        }
                    }
                    continue;
                }
                _ = self.events.closed(), if !disconnected => {
                    tracing::info!("Client for scan {} disconnected", self.state.scan_id);
                    disconnected = true;
                    self.state.stop();
                    continue;
                }
            };
            let Some(WorkerMessage {
                worker_index,
                event,
            }) = message
            else {
                break;
            };
            if matches!(event, CaptureEvent::Done | CaptureEvent::Failed { .. }) {
                if let Some(slot) = finished.get_mut(worker_index) {
                    *slot = true;
                }
            }
            if failed || disconnected {
                // Draining until siblings have closed their browsers
                continue;
            }

            let outgoing = match event {
                CaptureEvent::Image {
                    timestamp,
                    jpeg,
                    hash,
                    progress,
                } => {
                    total_slides += 1;
                    self.state.slides_found.fetch_add(1, Ordering::Relaxed);
                    let progress = self.state.update_worker(worker_index, progress);
                    ScanEvent::Image {
                        image_url: jpeg_data_url(&jpeg),
                        timestamp: timestamp.round() as u64,
                        progress,
                        phash: hash.to_string(),
                        worker: worker_index,
                    }
                }
                CaptureEvent::Skipped {
                    timestamp,
                    progress,
                } => {
                    self.state.frames_skipped.fetch_add(1, Ordering::Relaxed);
                    ScanEvent::Progress {
                        timestamp: Some(timestamp.round() as u64),
                        progress: self.state.update_worker(worker_index, progress),
                    }
                }
                CaptureEvent::Done => {
                    tracing::info!("Worker {} finished", worker_index);
                    ScanEvent::Progress {
                        timestamp: None,
                        progress: self.state.update_worker(worker_index, 100),
                    }
                }
                CaptureEvent::Failed { message } => {
                    tracing::error!("Worker {} failed: {}", worker_index, message);
                    failed = true;
                    self.state.fail(&message);
                    ScanEvent::Error { error: message }
                }
            };

            if self.events.send(outgoing).await.is_err() {
                disconnected = true;
                self.state.stop();
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if !failed && !disconnected {
                    failed = true;
                    self.worker_lost(e).await;
                }
            }
        }

        if failed {
            Outcome::Reported
        } else if disconnected || !self.state.is_active() {
            Outcome::Cancelled
        } else if let Some(worker) = finished.iter().position(|done| !done) {
            Outcome::Failed(format!("Worker {} exited without finishing its chunk", worker))
        } else {
            Outcome::Completed(total_slides)
        }
    }
}

pub fn jpeg_data_url(jpeg: &[u8]) -> String {
    format!(
        "data:image/jpeg;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(jpeg)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{FakeFrame, FakeLauncher, FakeScript};
    use crate::pipeline::types::ScanMode;

    fn fast_settings() -> ScanSettings {
        ScanSettings {
            settle_delay: Duration::ZERO,
            unacked_settle_delay: Duration::ZERO,
            spinner_timeout: Duration::ZERO,
            player_timeout: Duration::from_millis(50),
            live_poll_interval: Duration::ZERO,
            ..ScanSettings::default()
        }
    }

    fn orchestrator(script: FakeScript) -> ScanOrchestrator<FakeLauncher> {
        ScanOrchestrator::new(FakeLauncher::new(script), Arc::new(fast_settings()))
    }

    async fn collect(mut rx: mpsc::Receiver<ScanEvent>) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn terminal_count(events: &[ScanEvent]) -> usize {
        events.iter().filter(|e| e.is_terminal()).count()
    }

    fn overall_progress(events: &[ScanEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                ScanEvent::Image { progress, .. } | ScanEvent::Progress { progress, .. } => {
                    Some(*progress)
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://video.example.com/watch?v=1").is_ok());
        assert!(validate_url("http://localhost:8080").is_ok());
        assert!(validate_url("").is_err());
        assert!(validate_url("ftp://example.com/v").is_err());
        assert!(validate_url("https://").is_err());
        assert!(validate_url("https:///path").is_err());
    }

    #[test]
    fn test_data_url() {
        assert_eq!(jpeg_data_url(&[0xff, 0xd8]), "data:image/jpeg;base64,/9g=");
    }

    #[tokio::test]
    async fn test_short_video_scan() {
        // Slide changes every 4s over a 10s video: 0, 4, 8
        let script = FakeScript::new(10.0, |t| FakeFrame::Slide(1 + 2 * (t / 4.0) as u8));
        let orch = orchestrator(script);
        let (state, rx) = orch.start(ScanRequest::new("https://v.example/a")).unwrap();
        let events = collect(rx).await;

        assert!(matches!(
            &events[0],
            ScanEvent::Meta { duration, interval, workers: 1, scan_id }
                if *duration == 10.0 && *interval == 2.0 && *scan_id == state.scan_id
        ));
        let images: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                ScanEvent::Image { timestamp, .. } => Some(*timestamp),
                _ => None,
            })
            .collect();
        assert_eq!(images, vec![0, 4, 8]);
        assert_eq!(terminal_count(&events), 1);
        assert_eq!(events.last(), Some(&ScanEvent::Done { total_slides: 3 }));
        assert!(state.is_complete.load(Ordering::Relaxed));
        assert_eq!(state.slides_found.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_parallel_scan_progress_is_monotonic() {
        let script = FakeScript::new(1500.0, |t| FakeFrame::Slide(1 + (t / 300.0) as u8));
        let orch = orchestrator(script);
        let launcher = orch.launcher.clone();
        let (_, rx) = orch.start(ScanRequest::new("https://v.example/long")).unwrap();
        let events = collect(rx).await;

        assert!(matches!(events[0], ScanEvent::Meta { workers: 4, .. }));
        let progress = overall_progress(&events);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.last(), Some(&100));
        assert!(matches!(events.last(), Some(ScanEvent::Done { .. })));
        assert_eq!(
            launcher.stats.launched.load(Ordering::SeqCst),
            launcher.stats.closed.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn test_worker_override_is_clamped() {
        let script = FakeScript::new(100.0, |_| FakeFrame::Slide(1));
        let orch = orchestrator(script);
        let mut request = ScanRequest::new("https://v.example/a");
        request.workers = Some(64);
        let (_, rx) = orch.start(request).unwrap();
        let events = collect(rx).await;
        assert!(matches!(events[0], ScanEvent::Meta { workers: 4, .. }));
    }

    #[tokio::test]
    async fn test_worker_failure_stops_siblings() {
        let mut script = FakeScript::new(1500.0, |t| FakeFrame::Slide(1 + (t / 100.0) as u8));
        script.fail_open_for = Some("-w2".into());
        let orch = orchestrator(script);
        let launcher = orch.launcher.clone();
        let (state, rx) = orch.start(ScanRequest::new("https://v.example/b")).unwrap();
        let events = collect(rx).await;

        assert_eq!(terminal_count(&events), 1);
        assert!(matches!(
            events.last(),
            Some(ScanEvent::Error { error }) if error.contains("Navigation")
        ));
        assert!(!state.is_active());
        assert!(state.error.read().unwrap().is_some());
        assert_eq!(
            launcher.stats.launched.load(Ordering::SeqCst),
            launcher.stats.closed.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn test_probe_failure_is_single_error() {
        let mut script = FakeScript::new(10.0, |_| FakeFrame::Slide(1));
        script.duration = None;
        let orch = orchestrator(script);
        let (_, rx) = orch.start(ScanRequest::new("https://v.example/c")).unwrap();
        let events = collect(rx).await;
        assert_eq!(
            events,
            vec![ScanEvent::Error {
                error: ScanError::DurationUnavailable.to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_invalid_range_after_probe() {
        let orch = orchestrator(FakeScript::new(100.0, |_| FakeFrame::Slide(1)));
        let mut request = ScanRequest::new("https://v.example/d");
        request.range_start = 150.0;
        let (_, rx) = orch.start(request).unwrap();
        let events = collect(rx).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ScanEvent::Error { error } if error.contains("Invalid")));
    }

    #[tokio::test]
    async fn test_invalid_request_rejected_before_browser_work() {
        let orch = orchestrator(FakeScript::new(100.0, |_| FakeFrame::Slide(1)));
        let launcher = orch.launcher.clone();
        let result = orch.start(ScanRequest::new("not a url"));
        assert!(matches!(result, Err(ScanError::InvalidInput(_))));

        let mut request = ScanRequest::new("https://v.example/e");
        request.range_start = f64::NAN;
        assert!(orch.start(request).is_err());
        assert_eq!(launcher.stats.launched.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_scan_ends_with_cancelled_error() {
        let mut script = FakeScript::new(1000.0, |t| FakeFrame::Slide(1 + (t / 50.0) as u8));
        script.screenshot_delay = Duration::from_millis(5);
        let orch = orchestrator(script);
        let launcher = orch.launcher.clone();
        let (state, mut rx) = orch.start(ScanRequest::new("https://v.example/f")).unwrap();

        let first = rx.recv().await;
        assert!(matches!(first, Some(ScanEvent::Meta { .. })));
        assert!(get_scan_state(&state.scan_id).is_some());
        assert!(stop_scan(&state.scan_id));

        let events = collect(rx).await;
        assert_eq!(terminal_count(&events), 1);
        assert_eq!(
            events.last(),
            Some(&ScanEvent::Error {
                error: ScanError::Cancelled.to_string()
            })
        );
        assert_eq!(
            launcher.stats.launched.load(Ordering::SeqCst),
            launcher.stats.closed.load(Ordering::SeqCst)
        );

        // Finished scans are reported once, then dropped from the registry
        assert!(report_scan(&state.scan_id).is_some());
        assert!(get_scan_state(&state.scan_id).is_none());
        assert!(!stop_scan(&state.scan_id));
    }

    #[tokio::test]
    async fn test_client_disconnect_stops_workers() {
        let mut script = FakeScript::new(1000.0, |_| FakeFrame::Slide(1));
        script.screenshot_delay = Duration::from_millis(5);
        let orch = orchestrator(script);
        let launcher = orch.launcher.clone();
        let (state, rx) = orch.start(ScanRequest::new("https://v.example/g")).unwrap();
        drop(rx);

        let deadline = Instant::now() + Duration::from_secs(10);
        while !state.is_complete.load(Ordering::Relaxed) && Instant::now() < deadline {
            sleep(Duration::from_millis(10)).await;
        }
        assert!(state.is_complete.load(Ordering::Relaxed));
        assert!(!state.is_active());
        assert_eq!(
            launcher.stats.launched.load(Ordering::SeqCst),
            launcher.stats.closed.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn test_live_mode_scan() {
        let mut script = FakeScript::new(8.0, |t| FakeFrame::Slide(if t < 4.0 { 1 } else { 6 }));
        script.live_step = 1.0;
        let orch = orchestrator(script);
        let mut request = ScanRequest::new("https://v.example/h");
        request.mode = ScanMode::Live;
        let (_, rx) = orch.start(request).unwrap();
        let events = collect(rx).await;
        assert_eq!(events.last(), Some(&ScanEvent::Done { total_slides: 2 }));
    }

    #[tokio::test]
    async fn test_lost_worker_fails_the_scan() {
        // The second chunk's renderer dies mid-scan and never reports
        let script = FakeScript::new(40.0, |t| {
            if (30.0..32.0).contains(&t) {
                panic!("renderer died at {}", t);
            }
            FakeFrame::Slide(1 + (t / 10.0) as u8)
        });
        let orch = orchestrator(script);
        let mut request = ScanRequest::new("https://v.example/j");
        request.workers = Some(2);
        let (state, rx) = orch.start(request).unwrap();
        let events = collect(rx).await;

        assert!(matches!(events[0], ScanEvent::Meta { workers: 2, .. }));
        assert_eq!(terminal_count(&events), 1);
        assert!(matches!(
            events.last(),
            Some(ScanEvent::Error { error }) if error.contains("Worker")
        ));
        assert!(!events.iter().any(|e| matches!(e, ScanEvent::Done { .. })));
        assert!(!state.is_active());
        assert!(state.error.read().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unpolled_scan_leaves_registry() {
        let settings = ScanSettings {
            registry_retention: Duration::from_millis(20),
            ..fast_settings()
        };
        let script = FakeScript::new(10.0, |_| FakeFrame::Slide(1));
        let orch = ScanOrchestrator::new(FakeLauncher::new(script), Arc::new(settings));

        let mut ids = Vec::new();
        for _ in 0..3 {
            let (state, rx) = orch.start(ScanRequest::new("https://v.example/k")).unwrap();
            let events = collect(rx).await;
            assert!(matches!(events.last(), Some(ScanEvent::Done { .. })));
            ids.push(state.scan_id.clone());
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while ids.iter().any(|id| get_scan_state(id).is_some()) && Instant::now() < deadline {
            sleep(Duration::from_millis(10)).await;
        }
        assert!(ids.iter().all(|id| get_scan_state(id).is_none()));
    }

    #[tokio::test]
    async fn test_probe_reports_metadata() {
        let orch = orchestrator(FakeScript::new(1000.0, |_| FakeFrame::Slide(1)));
        let metadata = orch.probe("https://v.example/i").await.unwrap();
        assert_eq!(metadata.duration_seconds, 1000.0);
        assert_eq!(metadata.suggested_interval_seconds, 10.0);
        assert_eq!(orch.launcher.stats.closed.load(Ordering::SeqCst), 1);
    }
}
