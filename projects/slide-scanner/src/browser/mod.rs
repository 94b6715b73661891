pub mod chrome;
#[cfg(test)]
pub mod fake;

use crate::error::ScanError;
use anyhow::Result;
use std::future::Future;
use std::time::Duration;

/// Playback head of the video element.
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize)]
pub struct PlaybackPosition {
    pub current: f64,
    pub ended: bool,
}

/// One browser page driving one video player. Each scan worker owns its page
/// exclusively and must call `close` on every exit path.
pub trait PlayerPage: Send {
    /// Loads `url` and waits for the player container. Failures are terminal.
    fn open(&mut self, url: &str) -> impl Future<Output = Result<(), ScanError>> + Send;

    /// Hides player chrome, fills the viewport with the video, mutes and pauses it.
    fn prepare_player(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Current duration of the video element, if known yet.
    fn duration(&mut self) -> impl Future<Output = Result<Option<f64>>> + Send;

    /// True when the page shows a playback-crashed marker.
    fn has_crashed(&mut self) -> impl Future<Output = Result<bool>> + Send;

    /// Reloads the page, waits for the player and prepares it again.
    fn reload(&mut self) -> impl Future<Output = Result<(), ScanError>> + Send;

    /// Seeks to `seconds`. Resolves `true` on a `seeked` acknowledgment,
    /// `false` if `ack_timeout` elapsed first.
    fn seek(
        &mut self,
        seconds: f64,
        ack_timeout: Duration,
    ) -> impl Future<Output = Result<bool>> + Send;

    fn spinner_visible(&mut self) -> impl Future<Output = Result<bool>> + Send;

    /// JPEG of the player element, or of the full page when the element is gone.
    fn screenshot(&mut self) -> impl Future<Output = Result<Vec<u8>>> + Send;

    fn play(&mut self) -> impl Future<Output = Result<()>> + Send;

    fn position(&mut self) -> impl Future<Output = Result<PlaybackPosition>> + Send;

    /// Releases the page and its browser process.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Starts isolated browser instances, one per scan worker.
pub trait BrowserLauncher: Send + Sync + 'static {
    type Page: PlayerPage + 'static;

    fn launch(&self, label: &str) -> impl Future<Output = Result<Self::Page, ScanError>> + Send;
}
