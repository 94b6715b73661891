use crate::pipeline::types::{ScanMode, ScanRequest, ScanSettings};
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 12206;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Server options used when no subcommand is given
    #[command(flatten)]
    pub serve: ServeArgs,

    #[command(flatten)]
    pub browser: BrowserArgs,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the scan API (default)
    Serve(ServeArgs),
    /// Scan one video and write its slides to disk
    Scan(ScanArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1", env = "SLIDE_SCANNER_HOST")]
    pub host: IpAddr,

    /// Port to bind to
    #[arg(long, default_value_t = DEFAULT_PORT, env = "SLIDE_SCANNER_PORT")]
    pub port: u16,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ScanArgs {
    /// Page URL of the video to scan
    #[arg(long)]
    pub url: String,

    /// Root directory for scan output; each scan gets a fresh subdirectory
    #[arg(long, default_value = "slides", env = "SLIDE_SCANNER_OUTPUT_ROOT")]
    pub output_root: PathBuf,

    /// Start of the scanned range in seconds
    #[arg(long, default_value_t = 0.0)]
    pub range_start: f64,

    /// End of the scanned range in seconds; 0 scans to the end
    #[arg(long, default_value_t = 0.0)]
    pub range_end: f64,

    #[arg(long, value_enum, default_value_t = ScanMode::Seek)]
    pub mode: ScanMode,

    /// Override the planned worker count
    #[arg(long)]
    pub workers: Option<usize>,

    /// Run smart clean over the captured slides before writing them
    #[arg(long)]
    pub clean: bool,
}

impl ScanArgs {
    pub fn to_request(&self) -> ScanRequest {
        ScanRequest {
            url: self.url.clone(),
            range_start: self.range_start,
            range_end: self.range_end,
            mode: self.mode,
            workers: self.workers,
        }
    }
}

/// Browser and scan tunables shared by both subcommands.
#[derive(clap::Args, Debug, Clone)]
pub struct BrowserArgs {
    /// Upper bound on parallel browsers per scan
    #[arg(long, global = true, default_value_t = 4, env = "SLIDE_SCANNER_MAX_WORKERS")]
    pub max_workers: usize,

    /// Chrome/Chromium binary; autodetected when unset
    #[arg(long, global = true, env = "SLIDE_SCANNER_CHROME")]
    pub chrome_executable: Option<PathBuf>,

    /// Show browser windows
    #[arg(long, global = true, env = "SLIDE_SCANNER_HEADFUL")]
    pub headful: bool,

    #[arg(long, global = true, default_value_t = 1280, env = "SLIDE_SCANNER_VIEWPORT_WIDTH")]
    pub viewport_width: u32,

    #[arg(long, global = true, default_value_t = 720, env = "SLIDE_SCANNER_VIEWPORT_HEIGHT")]
    pub viewport_height: u32,

    #[arg(long, global = true, default_value_t = 60, env = "SLIDE_SCANNER_NAVIGATION_TIMEOUT")]
    pub navigation_timeout_secs: u64,

    #[arg(long, global = true, default_value_t = 20, env = "SLIDE_SCANNER_PLAYER_TIMEOUT")]
    pub player_timeout_secs: u64,

    #[arg(long, global = true, default_value_t = 3000, env = "SLIDE_SCANNER_SEEK_ACK_MS")]
    pub seek_ack_ms: u64,

    /// Wait after an acknowledged seek; doubled when the seek is unacknowledged
    #[arg(long, global = true, default_value_t = 500, env = "SLIDE_SCANNER_SETTLE_MS")]
    pub settle_ms: u64,

    #[arg(long, global = true, default_value_t = 8, env = "SLIDE_SCANNER_DUPLICATE_THRESHOLD")]
    pub duplicate_threshold: u32,

    #[arg(long, global = true, default_value_t = 10, env = "SLIDE_SCANNER_LIVE_THRESHOLD")]
    pub live_duplicate_threshold: u32,

    /// Reloads allowed per timestamp after a player crash
    #[arg(long, global = true, default_value_t = 2, env = "SLIDE_SCANNER_MAX_RECOVERIES")]
    pub max_recoveries: u32,

    #[arg(long, global = true, default_value_t = 80, env = "SLIDE_SCANNER_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    #[arg(long, global = true, env = "SLIDE_SCANNER_USER_AGENT")]
    pub user_agent: Option<String>,

    /// CSS selector of the player container; screenshots are clipped to it
    #[arg(long, global = true, default_value = "video", env = "SLIDE_SCANNER_PLAYER_SELECTOR")]
    pub player_selector: String,

    /// CSS selector of the <video> element that is paused, seeked and played
    #[arg(long, global = true, default_value = "video", env = "SLIDE_SCANNER_VIDEO_SELECTOR")]
    pub video_selector: String,

    #[arg(
        long,
        global = true,
        default_value = "[class*=\"spinner\"]",
        env = "SLIDE_SCANNER_SPINNER_SELECTOR"
    )]
    pub spinner_selector: String,

    /// Seconds a finished scan stays queryable when its status is never read
    #[arg(long, global = true, default_value_t = 600, env = "SLIDE_SCANNER_REGISTRY_RETENTION")]
    pub registry_retention_secs: u64,

    /// Page text that marks a crashed player; repeatable
    #[arg(long = "crash-marker", global = true, value_delimiter = ',', env = "SLIDE_SCANNER_CRASH_MARKERS")]
    pub crash_markers: Vec<String>,
}

impl BrowserArgs {
    pub fn to_settings(&self) -> ScanSettings {
        let defaults = ScanSettings::default();
        let settle = Duration::from_millis(self.settle_ms);
        ScanSettings {
            max_workers: self.max_workers.max(1),
            duplicate_threshold: self.duplicate_threshold,
            live_duplicate_threshold: self.live_duplicate_threshold,
            navigation_timeout: Duration::from_secs(self.navigation_timeout_secs),
            player_timeout: Duration::from_secs(self.player_timeout_secs),
            seek_ack_timeout: Duration::from_millis(self.seek_ack_ms),
            settle_delay: settle,
            unacked_settle_delay: settle * 2,
            max_recoveries: self.max_recoveries,
            jpeg_quality: self.jpeg_quality.clamp(1, 100),
            viewport: (self.viewport_width, self.viewport_height),
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent.clone()),
            headless: !self.headful,
            chrome_executable: self.chrome_executable.clone(),
            player_selector: self.player_selector.clone(),
            video_selector: self.video_selector.clone(),
            registry_retention: Duration::from_secs(self.registry_retention_secs),
            spinner_selector: self.spinner_selector.clone(),
            crash_markers: if self.crash_markers.is_empty() {
                defaults.crash_markers.clone()
            } else {
                self.crash_markers.clone()
            },
            ..defaults
        }
    }
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn command(&self) -> Command {
        self.command
            .clone()
            .unwrap_or_else(|| Command::Serve(self.serve.clone()))
    }
}
