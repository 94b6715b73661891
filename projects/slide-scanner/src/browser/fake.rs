// Scripted PlayerPage used by pipeline tests.

use super::{BrowserLauncher, PlaybackPosition, PlayerPage};
use crate::error::ScanError;
use anyhow::{bail, Result};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the player shows at a given timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FakeFrame {
    Slide(u8),
    Blank,
    /// Bytes that do not decode as an image
    Corrupt,
}

/// Renders a slide whose difference hash is row-uniform: row `r` is all ones
/// when bit `r` of `id` is set. Distinct ids therefore differ by at least 8.
/// A faint 1px checker keeps the edge density high without moving the hash.
pub fn slide_image(id: u8) -> DynamicImage {
    let (width, height) = (144u32, 128u32);
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        let row = y / 16;
        let ramp = 20 + x * 215 / (width - 1);
        let base = if id & (1 << row) != 0 { 255 - ramp } else { ramp };
        let v = if (x + y) % 2 == 0 { base + 10 } else { base - 10 };
        let v = v.min(255) as u8;
        Rgb([v, v, v])
    }))
}

pub fn blank_image() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(144, 128, Rgb([40, 40, 40])))
}

pub fn encode_png(image: &DynamicImage) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Png)
        .expect("png encode");
    bytes.into_inner()
}

/// Behaviour shared by every page a `FakeLauncher` creates.
#[derive(Clone)]
pub struct FakeScript {
    pub duration: Option<f64>,
    pub fail_launch: bool,
    pub fail_open: bool,
    /// Worker label substring whose page fails to open
    pub fail_open_for: Option<String>,
    pub frames: Arc<dyn Fn(f64) -> FakeFrame + Send + Sync>,
    /// Timestamps whose screenshot errors
    pub screenshot_errors: Vec<f64>,
    /// Number of crash reports per timestamp; `u32::MAX` never recovers
    pub crashes: HashMap<u64, u32>,
    pub seek_acks: bool,
    /// Seconds the playhead advances per position poll in live mode
    pub live_step: f64,
    /// Delay applied to every screenshot
    pub screenshot_delay: Duration,
}

impl FakeScript {
    pub fn new(duration: f64, frames: impl Fn(f64) -> FakeFrame + Send + Sync + 'static) -> Self {
        Self {
            duration: Some(duration),
            fail_launch: false,
            fail_open: false,
            fail_open_for: None,
            frames: Arc::new(frames),
            screenshot_errors: Vec::new(),
            crashes: HashMap::new(),
            seek_acks: true,
            live_step: 1.0,
            screenshot_delay: Duration::ZERO,
        }
    }
}

/// Counters observed by tests.
#[derive(Default)]
pub struct FakeStats {
    pub launched: AtomicUsize,
    pub closed: AtomicUsize,
    pub reloads: AtomicUsize,
    pub seeks: Mutex<Vec<f64>>,
}

pub struct FakeLauncher {
    pub script: FakeScript,
    pub stats: Arc<FakeStats>,
}

impl FakeLauncher {
    pub fn new(script: FakeScript) -> Self {
        Self {
            script,
            stats: Arc::new(FakeStats::default()),
        }
    }
}

impl BrowserLauncher for FakeLauncher {
    type Page = FakePage;

    async fn launch(&self, label: &str) -> Result<FakePage, ScanError> {
        if self.script.fail_launch {
            return Err(ScanError::Launch("no browser".into()));
        }
        self.stats.launched.fetch_add(1, Ordering::SeqCst);
        Ok(FakePage {
            label: label.to_string(),
            script: self.script.clone(),
            stats: self.stats.clone(),
            current: 0.0,
            playing: false,
            seeked: true,
            crash_reports: HashMap::new(),
        })
    }
}

pub struct FakePage {
    label: String,
    script: FakeScript,
    stats: Arc<FakeStats>,
    current: f64,
    playing: bool,
    /// The next position poll reports the seek target without advancing
    seeked: bool,
    crash_reports: HashMap<u64, u32>,
}

impl FakePage {
    fn key(&self) -> u64 {
        self.current.round() as u64
    }
}

impl PlayerPage for FakePage {
    async fn open(&mut self, url: &str) -> Result<(), ScanError> {
        let targeted = self
            .script
            .fail_open_for
            .as_ref()
            .is_some_and(|needle| self.label.contains(needle.as_str()));
        if self.script.fail_open || targeted {
            return Err(ScanError::Navigation {
                url: url.to_string(),
                reason: "unreachable".into(),
            });
        }
        Ok(())
    }

    async fn prepare_player(&mut self) -> Result<()> {
        self.playing = false;
        Ok(())
    }

    async fn duration(&mut self) -> Result<Option<f64>> {
        Ok(self.script.duration)
    }

    async fn has_crashed(&mut self) -> Result<bool> {
        let key = self.key();
        let limit = self.script.crashes.get(&key).copied().unwrap_or(0);
        let seen = self.crash_reports.entry(key).or_insert(0);
        if *seen < limit {
            *seen = seen.saturating_add(1);
            return Ok(true);
        }
        Ok(false)
    }

    async fn reload(&mut self) -> Result<(), ScanError> {
        self.stats.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn seek(&mut self, seconds: f64, _ack_timeout: Duration) -> Result<bool> {
        self.current = seconds;
        self.seeked = true;
        self.stats.seeks.lock().unwrap().push(seconds);
        Ok(self.script.seek_acks)
    }

    async fn spinner_visible(&mut self) -> Result<bool> {
        Ok(false)
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>> {
        if !self.script.screenshot_delay.is_zero() {
            tokio::time::sleep(self.script.screenshot_delay).await;
        }
        if self
            .script
            .screenshot_errors
            .iter()
            .any(|t| (t - self.current).abs() < 1e-6)
        {
            bail!("screenshot glitch at {}", self.current);
        }
        Ok(match (self.script.frames)(self.current) {
            FakeFrame::Slide(id) => encode_png(&slide_image(id)),
            FakeFrame::Blank => encode_png(&blank_image()),
            FakeFrame::Corrupt => vec![0xde, 0xad, 0xbe, 0xef],
        })
    }

    async fn play(&mut self) -> Result<()> {
        self.playing = true;
        Ok(())
    }

    async fn position(&mut self) -> Result<PlaybackPosition> {
        if self.playing && !self.seeked {
            self.current += self.script.live_step;
        }
        self.seeked = false;
        let duration = self.script.duration.unwrap_or(0.0);
        Ok(PlaybackPosition {
            current: self.current,
            ended: self.current >= duration,
        })
    }

    async fn close(self) {
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
    }
}
