mod browser;
mod cli;
mod error;
mod pipeline;
mod run_artifacts;
mod run_context;
mod scan_command;
mod vision;
mod web;

use anyhow::Result;
use browser::chrome::ChromeLauncher;
use cli::{Args, Command};
use pipeline::orchestrator::ScanOrchestrator;
use std::sync::Arc;
use web::server::run_server;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let args = Args::parse_args();
    let settings = Arc::new(args.browser.to_settings());
    let orchestrator = ScanOrchestrator::new(ChromeLauncher::new(settings.clone()), settings);

    match args.command() {
        Command::Serve(serve) => run_server(serve.host, serve.port, orchestrator).await?,
        Command::Scan(scan) => {
            let summary = scan_command::run_scan(&orchestrator, &scan).await?;
            println!(
                "{} slides ({} captured) in {} after {:.1}s",
                summary.written,
                summary.captured,
                summary.output_dir.display(),
                summary.duration.as_secs_f64()
            );
        }
    }

    Ok(())
}
