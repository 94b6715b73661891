// Browser session controller: drives one browser through one chunk.
//
// Each worker owns a ChunkSession for its chunk's lifetime. The session walks
// Launching -> Navigating -> PlayerReady -> Scanning (<-> Recovering) -> Done,
// or Failed from any state, and always closes its page on the way out.

use crate::browser::{BrowserLauncher, PlayerPage};
use crate::error::ScanError;
use crate::pipeline::live::{inspect_encoded, LiveCaptureEngine, LiveDecision};
use crate::pipeline::types::{
    CaptureEvent, ScanChunk, ScanMode, ScanSettings, ScanState, WorkerMessage,
};
use crate::vision::hash_frame;
use crate::vision::phash::{hamming_distance, PerceptualHash};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

const SPINNER_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Launching,
    Navigating,
    PlayerReady,
    Scanning,
    Recovering,
    Done,
    Failed,
}

/// Everything one worker needs to scan its chunk.
pub struct ChunkTask {
    pub url: String,
    pub chunk: ScanChunk,
    pub interval: f64,
    pub mode: ScanMode,
    pub settings: Arc<ScanSettings>,
    pub state: Arc<ScanState>,
    pub tx: mpsc::Sender<WorkerMessage>,
}

impl ChunkTask {
    fn label(&self) -> String {
        let id: String = self.state.scan_id.chars().take(8).collect();
        format!("{}-w{}", id, self.chunk.worker_index)
    }
}

/// Worker entry point: launch, scan, report exactly one terminal event.
pub async fn run_worker<L: BrowserLauncher>(launcher: Arc<L>, task: ChunkTask) {
    let label = task.label();
    tracing::info!(
        "[{}] Launching for chunk {:.1}s..{:.1}s",
        label,
        task.chunk.start_seconds,
        task.chunk.end_seconds
    );

    let page = match launcher.launch(&label).await {
        Ok(page) => page,
        Err(e) => {
            tracing::error!("[{}] {}", label, e);
            let message = WorkerMessage {
                worker_index: task.chunk.worker_index,
                event: CaptureEvent::Failed {
                    message: e.to_string(),
                },
            };
            let _ = task.tx.send(message).await;
            return;
        }
    };

    let url = task.url.clone();
    let mut session = ChunkSession::new(page, task, label);
    let result = session.run(&url).await;
    session.finish(result).await;
}

pub struct ChunkSession<P: PlayerPage> {
    page: P,
    task: ChunkTask,
    label: String,
    phase: SessionPhase,
    /// Hash of the last frame this chunk emitted as an image
    last_emitted: Option<PerceptualHash>,
}

impl<P: PlayerPage> ChunkSession<P> {
    pub fn new(page: P, task: ChunkTask, label: String) -> Self {
        Self {
            page,
            task,
            label,
            phase: SessionPhase::Launching,
            last_emitted: None,
        }
    }

    fn transition(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            tracing::debug!("[{}] {:?} -> {:?}", self.label, self.phase, phase);
            self.phase = phase;
        }
    }

    /// Polled once per iteration: the scan was stopped or nobody is listening.
    fn should_continue(&self) -> bool {
        self.task.state.is_active() && !self.task.tx.is_closed()
    }

    async fn emit(&mut self, event: CaptureEvent) -> Result<(), ScanError> {
        let message = WorkerMessage {
            worker_index: self.task.chunk.worker_index,
            event,
        };
        self.task
            .tx
            .send(message)
            .await
            .map_err(|_| ScanError::Cancelled)
    }

    pub async fn run(&mut self, url: &str) -> Result<(), ScanError> {
        self.open(url).await?;
        match self.task.mode {
            ScanMode::Seek => self.scan().await,
            ScanMode::Live => self.scan_live().await,
        }
    }

    async fn open(&mut self, url: &str) -> Result<(), ScanError> {
        self.transition(SessionPhase::Navigating);
        self.page.open(url).await?;
        self.page
            .prepare_player()
            .await
            .map_err(|e| ScanError::Browser(format!("{:#}", e)))?;
        self.transition(SessionPhase::PlayerReady);
        Ok(())
    }

    /// Emits the terminal event and releases the browser.
    async fn finish(mut self, result: Result<(), ScanError>) {
        match result {
            Ok(()) => {
                self.transition(SessionPhase::Done);
                tracing::info!("[{}] Chunk complete", self.label);
                let _ = self.emit(CaptureEvent::Done).await;
            }
            Err(ScanError::Cancelled) => {
                self.transition(SessionPhase::Done);
                tracing::info!("[{}] Stopped", self.label);
            }
            Err(e) => {
                self.transition(SessionPhase::Failed);
                tracing::error!("[{}] Chunk failed: {}", self.label, e);
                let _ = self
                    .emit(CaptureEvent::Failed {
                        message: e.to_string(),
                    })
                    .await;
            }
        }
        self.page.close().await;
    }

    /// Seek-mode loop over `[chunk start, chunk end)` in `interval` steps.
    pub async fn scan(&mut self) -> Result<(), ScanError> {
        self.transition(SessionPhase::Scanning);
        self.last_emitted = None;
        let chunk = self.task.chunk;
        let mut current = chunk.start_seconds;

        while current < chunk.end_seconds {
            if !self.should_continue() {
                return Err(ScanError::Cancelled);
            }

            self.recover_if_crashed(current).await?;

            let event = match self.capture_at(current).await {
                Ok(event) => event,
                Err(e) if e.is_transient() => {
                    tracing::warn!("[{}] Skipping {:.1}s: {}", self.label, current, e);
                    CaptureEvent::Skipped {
                        timestamp: current,
                        progress: chunk.progress_at(current),
                    }
                }
                Err(e) => return Err(e),
            };
            self.emit(event).await?;

            current += self.task.interval;
        }
        Ok(())
    }

    /// Reloads the page while it shows a crash marker, at most `max_recoveries`
    /// times for this timestamp. Returns whether a reload happened.
    async fn recover_if_crashed(&mut self, timestamp: f64) -> Result<bool, ScanError> {
        let mut attempts = 0;
        loop {
            match self.page.has_crashed().await {
                Ok(false) => break,
                Ok(true) => {}
                Err(e) => {
                    tracing::debug!("[{}] Crash check failed: {:#}", self.label, e);
                    break;
                }
            }
            if attempts >= self.task.settings.max_recoveries {
                return Err(ScanError::RecoveryExhausted {
                    timestamp,
                    attempts,
                });
            }
            attempts += 1;
            self.transition(SessionPhase::Recovering);
            tracing::warn!(
                "[{}] Player crashed at {:.1}s, recovery {}/{}",
                self.label,
                timestamp,
                attempts,
                self.task.settings.max_recoveries
            );
            if let Err(e) = self.page.reload().await {
                tracing::warn!("[{}] Reload failed: {}", self.label, e);
            }
        }
        self.transition(SessionPhase::Scanning);
        Ok(attempts > 0)
    }

    /// Seek, settle, screenshot and dedup a single timestamp.
    async fn capture_at(&mut self, timestamp: f64) -> Result<CaptureEvent, ScanError> {
        let settings = self.task.settings.clone();
        let frame_error = |e: anyhow::Error| ScanError::Frame {
            timestamp,
            reason: format!("{:#}", e),
        };

        let acked = self
            .page
            .seek(timestamp, settings.seek_ack_timeout)
            .await
            .map_err(frame_error)?;
        if acked {
            sleep(settings.settle_delay).await;
        } else {
            tracing::debug!("[{}] No seek ack at {:.1}s", self.label, timestamp);
            sleep(settings.unacked_settle_delay).await;
        }
        self.wait_for_spinner().await;

        let jpeg = self.page.screenshot().await.map_err(frame_error)?;
        let (jpeg, hash) = hash_off_thread(jpeg, timestamp).await?;
        let progress = self.task.chunk.progress_at(timestamp);

        let distance = hamming_distance(Some(&hash), self.last_emitted.as_ref());
        if distance < settings.duplicate_threshold {
            tracing::debug!(
                "[{}] Duplicate at {:.1}s (distance {})",
                self.label,
                timestamp,
                distance
            );
            return Ok(CaptureEvent::Skipped {
                timestamp,
                progress,
            });
        }

        self.last_emitted = Some(hash);
        Ok(CaptureEvent::Image {
            timestamp,
            jpeg,
            hash,
            progress,
        })
    }

    async fn wait_for_spinner(&mut self) {
        let deadline = Instant::now() + self.task.settings.spinner_timeout;
        while Instant::now() < deadline {
            match self.page.spinner_visible().await {
                Ok(true) => sleep(SPINNER_POLL).await,
                _ => break,
            }
        }
    }

    /// Live-mode loop: play from chunk start and auto-capture until chunk end.
    pub async fn scan_live(&mut self) -> Result<(), ScanError> {
        self.transition(SessionPhase::Scanning);
        let settings = self.task.settings.clone();
        let chunk = self.task.chunk;
        let mut engine = LiveCaptureEngine::new(settings.live_duplicate_threshold);
        let mut last_timestamp = f64::NEG_INFINITY;
        let mut stalled = 0u32;

        self.start_playback(chunk.start_seconds).await?;

        loop {
            if !self.should_continue() {
                return Err(ScanError::Cancelled);
            }

            let resume = last_timestamp.max(chunk.start_seconds);
            if self.recover_if_crashed(resume).await? {
                self.start_playback(resume).await?;
            }

            let position = match self.page.position().await {
                Ok(position) => position,
                Err(e) => {
                    tracing::warn!("[{}] Position unavailable: {:#}", self.label, e);
                    stalled += 1;
                    if stalled >= settings.live_stall_limit {
                        return Err(ScanError::Browser("playback position lost".into()));
                    }
                    sleep(settings.live_poll_interval).await;
                    continue;
                }
            };
            if position.ended || position.current >= chunk.end_seconds {
                break;
            }
            if position.current <= last_timestamp {
                stalled += 1;
                if stalled >= settings.live_stall_limit {
                    return Err(ScanError::Browser(format!(
                        "playback stalled at {:.1}s",
                        position.current
                    )));
                }
                sleep(settings.live_poll_interval).await;
                continue;
            }
            stalled = 0;

            let timestamp = position.current;
            let event = match self.capture_live(&mut engine, timestamp).await {
                Ok(event) => event,
                Err(e) if e.is_transient() => {
                    tracing::warn!("[{}] Skipping {:.1}s: {}", self.label, timestamp, e);
                    CaptureEvent::Skipped {
                        timestamp,
                        progress: chunk.progress_at(timestamp),
                    }
                }
                Err(e) => return Err(e),
            };
            last_timestamp = timestamp;
            self.emit(event).await?;

            sleep(settings.live_poll_interval).await;
        }
        Ok(())
    }

    async fn start_playback(&mut self, from: f64) -> Result<(), ScanError> {
        let ack_timeout = self.task.settings.seek_ack_timeout;
        let browser_error = |e: anyhow::Error| ScanError::Browser(format!("{:#}", e));
        self.page
            .seek(from, ack_timeout)
            .await
            .map_err(browser_error)?;
        self.page.play().await.map_err(browser_error)
    }

    async fn capture_live(
        &mut self,
        engine: &mut LiveCaptureEngine,
        timestamp: f64,
    ) -> Result<CaptureEvent, ScanError> {
        let progress = self.task.chunk.progress_at(timestamp);
        let jpeg = self
            .page
            .screenshot()
            .await
            .map_err(|e| ScanError::Frame {
                timestamp,
                reason: format!("{:#}", e),
            })?;

        let (jpeg, frame) = tokio::task::spawn_blocking(move || {
            let frame = inspect_encoded(&jpeg, timestamp);
            (jpeg, frame)
        })
        .await
        .map_err(|e| ScanError::Frame {
            timestamp,
            reason: e.to_string(),
        })?;

        match engine.decide(frame?) {
            LiveDecision::Capture(hash) => Ok(CaptureEvent::Image {
                timestamp,
                jpeg,
                hash,
                progress,
            }),
            decision => {
                tracing::debug!("[{}] {:?} at {:.1}s", self.label, decision, timestamp);
                Ok(CaptureEvent::Skipped {
                    timestamp,
                    progress,
                })
            }
        }
    }
}

/// Decodes and hashes on the blocking pool, handing the bytes back.
async fn hash_off_thread(
    bytes: Vec<u8>,
    timestamp: f64,
) -> Result<(Vec<u8>, PerceptualHash), ScanError> {
    let (bytes, hash) = tokio::task::spawn_blocking(move || {
        let hash = hash_frame(&bytes, timestamp);
        (bytes, hash)
    })
    .await
    .map_err(|e| ScanError::Frame {
        timestamp,
        reason: e.to_string(),
    })?;
    Ok((bytes, hash?))
}
