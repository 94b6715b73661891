// Headless Chromium backend for PlayerPage, driven over CDP with chromiumoxide.

use super::{BrowserLauncher, PlaybackPosition, PlayerPage};
use crate::error::ScanError;
use crate::pipeline::types::ScanSettings;
use anyhow::{anyhow, Context, Result};
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams as NetworkEnableParams, SetBlockedUrLsParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

const STYLE_ID: &str = "__slide_scanner_style";
const SELECTOR_POLL: Duration = Duration::from_millis(250);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Masks the most common automation fingerprints before any page script runs.
const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
window.chrome = window.chrome || { runtime: {} };
"#;

/// Selectors hidden over the player. `visibility` is used rather than
/// `display` so the video can opt back in even when nested inside one.
const CHROME_SELECTORS: &str = r#"[class*="control"], [class*="overlay"], [class*="gradient"],
[class*="watermark"], [class*="chrome"], [class*="ad-"], [id*="ad-"], [class*="caption"],
[class*="tooltip"], [class*="endscreen"]"#;

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

pub struct ChromeLauncher {
    settings: Arc<ScanSettings>,
}

impl ChromeLauncher {
    pub fn new(settings: Arc<ScanSettings>) -> Self {
        Self { settings }
    }
}

impl BrowserLauncher for ChromeLauncher {
    type Page = ChromePage;

    async fn launch(&self, label: &str) -> Result<ChromePage, ScanError> {
        let settings = self.settings.clone();
        let profile = tempfile::Builder::new()
            .prefix(&format!("slide-scanner-{}-", label))
            .tempdir()
            .map_err(|e| ScanError::Launch(format!("profile dir: {}", e)))?;

        let (width, height) = settings.viewport;
        let mut builder = BrowserConfig::builder()
            .user_data_dir(profile.path())
            .window_size(width, height)
            .viewport(Viewport {
                width,
                height,
                ..Viewport::default()
            })
            .no_sandbox()
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--mute-audio")
            .arg("--autoplay-policy=no-user-gesture-required");
        if !settings.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &settings.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(ScanError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ScanError::Launch(e.to_string()))?;

        let worker_label = label.to_string();
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("[{}] CDP handler error: {}", worker_label, e);
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let mut browser = browser;
                shutdown(&mut browser, handler_task, label).await;
                return Err(ScanError::Launch(e.to_string()));
            }
        };

        let chrome = ChromePage {
            driver: PageDriver {
                label: label.to_string(),
                page,
                settings,
            },
            browser,
            handler_task,
            _profile: profile,
        };

        if let Err(e) = chrome.driver.configure().await {
            chrome.close().await;
            return Err(ScanError::Launch(format!("{:#}", e)));
        }

        tracing::info!("[{}] Browser launched", label);
        Ok(chrome)
    }
}

pub struct ChromePage {
    driver: PageDriver,
    browser: Browser,
    handler_task: JoinHandle<()>,
    // Dropped after the browser exits, which deletes the profile directory
    _profile: TempDir,
}

/// CDP helpers over a single page.
struct PageDriver {
    label: String,
    page: Page,
    settings: Arc<ScanSettings>,
}

impl PageDriver {
    /// User agent, fingerprint masking and request blocking.
    async fn configure(&self) -> Result<()> {
        self.page
            .execute(SetUserAgentOverrideParams::new(
                self.settings.user_agent.clone(),
            ))
            .await
            .context("Failed to set user agent")?;
        self.page
            .execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT))
            .await
            .context("Failed to install stealth script")?;
        self.page
            .execute(NetworkEnableParams::default())
            .await
            .context("Failed to enable network domain")?;
        self.page
            .execute(SetBlockedUrLsParams::new(self.settings.blocked_urls.clone()))
            .await
            .context("Failed to install request blocklist")?;
        Ok(())
    }

    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T> {
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(|e| anyhow!(e))?;
        let result = self.page.evaluate_expression(params).await?;
        Ok(result.into_value()?)
    }

    fn video_expr(&self) -> String {
        format!(
            "document.querySelector({})",
            js_string(&self.settings.video_selector)
        )
    }

    async fn wait_for_selector(&self, selector: &str, limit: Duration) -> Result<bool> {
        let script = format!("document.querySelector({}) !== null", js_string(selector));
        let deadline = Instant::now() + limit;
        loop {
            if self.eval::<bool>(script.clone()).await.unwrap_or(false) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(SELECTOR_POLL).await;
        }
    }

    async fn wait_for_player(&self) -> Result<(), ScanError> {
        let limit = self.settings.player_timeout;
        match self
            .wait_for_selector(&self.settings.player_selector, limit)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => Err(ScanError::PlayerNotFound {
                seconds: limit.as_secs(),
            }),
            Err(e) => Err(ScanError::Browser(e.to_string())),
        }
    }
}

impl PlayerPage for ChromePage {
    async fn open(&mut self, url: &str) -> Result<(), ScanError> {
        tracing::info!("[{}] Navigating to {}", self.driver.label, url);
        let navigation = self.driver.page.goto(url);
        match timeout(self.driver.settings.navigation_timeout, navigation).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(ScanError::Navigation {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ScanError::Navigation {
                    url: url.to_string(),
                    reason: format!(
                        "not loaded within {}s",
                        self.driver.settings.navigation_timeout.as_secs()
                    ),
                })
            }
        }
        self.driver.wait_for_player().await
    }

    async fn prepare_player(&mut self) -> Result<()> {
        let css = format!(
            "{chrome} {{ visibility: hidden !important; opacity: 0 !important; }}\n\
             {video} {{ visibility: visible !important; opacity: 1 !important; \
             position: fixed !important; top: 0 !important; left: 0 !important; \
             width: 100vw !important; height: 100vh !important; \
             z-index: 2147483647 !important; object-fit: contain !important; \
             background: #000 !important; }}",
            chrome = CHROME_SELECTORS,
            video = self.driver.settings.video_selector,
        );
        let script = format!(
            r#"(() => {{
                if (!document.getElementById({id})) {{
                    const style = document.createElement('style');
                    style.id = {id};
                    style.textContent = {css};
                    (document.head || document.documentElement).appendChild(style);
                }}
                const v = {video};
                if (!v) return false;
                v.muted = true;
                v.pause();
                return true;
            }})()"#,
            id = js_string(STYLE_ID),
            css = js_string(&css),
            video = self.driver.video_expr(),
        );
        if !self.driver.eval::<bool>(script).await? {
            anyhow::bail!(
                "video element {:?} missing",
                self.driver.settings.video_selector
            );
        }
        Ok(())
    }

    async fn duration(&mut self) -> Result<Option<f64>> {
        let script = format!(
            "(() => {{ const v = {}; return v && isFinite(v.duration) && v.duration > 0 ? v.duration : -1; }})()",
            self.driver.video_expr()
        );
        let duration: f64 = self.driver.eval(script).await?;
        Ok((duration > 0.0).then_some(duration))
    }

    async fn has_crashed(&mut self) -> Result<bool> {
        let markers = serde_json::to_string(&self.driver.settings.crash_markers)?;
        let script = format!(
            "(() => {{ const t = document.body ? document.body.innerText : ''; return {}.some(m => t.includes(m)); }})()",
            markers
        );
        self.driver.eval(script).await
    }

    async fn reload(&mut self) -> Result<(), ScanError> {
        tracing::warn!("[{}] Reloading page after player crash", self.driver.label);
        let reload = self.driver.page.reload();
        match timeout(self.driver.settings.navigation_timeout, reload).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(ScanError::Browser(e.to_string())),
            Err(_) => {
                return Err(ScanError::Navigation {
                    url: "reload".to_string(),
                    reason: "timed out".to_string(),
                })
            }
        }
        self.driver.wait_for_player().await?;
        self.prepare_player()
            .await
            .map_err(|e| ScanError::Browser(format!("{:#}", e)))
    }

    async fn seek(&mut self, seconds: f64, ack_timeout: Duration) -> Result<bool> {
        let script = format!(
            r#"new Promise((resolve) => {{
                const v = {video};
                if (!v) {{ resolve(false); return; }}
                const timer = setTimeout(() => resolve(false), {ms});
                v.addEventListener('seeked', () => {{ clearTimeout(timer); resolve(true); }}, {{ once: true }});
                v.currentTime = {seconds};
            }})"#,
            video = self.driver.video_expr(),
            ms = ack_timeout.as_millis(),
            seconds = seconds,
        );
        // The page-side timer normally wins; this bounds a stuck CDP call.
        let ack = self.driver.eval::<bool>(script);
        match timeout(ack_timeout + Duration::from_secs(1), ack).await {
            Ok(result) => result,
            Err(_) => Ok(false),
        }
    }

    async fn spinner_visible(&mut self) -> Result<bool> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({});
                if (!el) return false;
                const s = getComputedStyle(el);
                return s.display !== 'none' && s.visibility !== 'hidden' && el.offsetParent !== null;
            }})()"#,
            js_string(&self.driver.settings.spinner_selector)
        );
        self.driver.eval(script).await
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>> {
        let label = &self.driver.label;
        let selector = self.driver.settings.player_selector.clone();
        match self.driver.page.find_element(selector).await {
            Ok(element) => match element.screenshot(CaptureScreenshotFormat::Jpeg).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => tracing::debug!("[{}] Element screenshot failed: {}", label, e),
            },
            Err(e) => tracing::debug!("[{}] Player element unavailable: {}", label, e),
        }

        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Jpeg)
            .quality(i64::from(self.driver.settings.jpeg_quality))
            .build();
        self.driver
            .page
            .screenshot(params)
            .await
            .context("Full page screenshot failed")
    }

    async fn play(&mut self) -> Result<()> {
        let script = format!(
            "(() => {{ const v = {}; if (!v) return false; v.muted = true; const p = v.play(); if (p) p.catch(() => {{}}); return true; }})()",
            self.driver.video_expr()
        );
        if !self.driver.eval::<bool>(script).await? {
            anyhow::bail!("video element missing");
        }
        Ok(())
    }

    async fn position(&mut self) -> Result<PlaybackPosition> {
        let script = format!(
            "(() => {{ const v = {}; return v ? {{ current: v.currentTime, ended: v.ended }} : {{ current: -1, ended: true }}; }})()",
            self.driver.video_expr()
        );
        self.driver.eval(script).await
    }

    async fn close(mut self) {
        shutdown(&mut self.browser, self.handler_task, &self.driver.label).await;
    }
}

async fn shutdown(browser: &mut Browser, handler_task: JoinHandle<()>, label: &str) {
    if let Err(e) = browser.close().await {
        tracing::warn!("[{}] Browser close failed: {}", label, e);
    }
    match timeout(CLOSE_TIMEOUT, browser.wait()).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::warn!("[{}] Waiting for browser exit failed: {}", label, e),
        Err(_) => {
            tracing::warn!("[{}] Browser did not exit, killing", label);
            let _ = browser.kill().await;
        }
    }
    handler_task.abort();
    tracing::info!("[{}] Browser closed", label);
}
