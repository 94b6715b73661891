// In-process scan driven from the command line: runs the orchestrator,
// shows progress and writes the slides plus a manifest to disk.

use crate::browser::BrowserLauncher;
use crate::cli::ScanArgs;
use crate::pipeline::clean::{smart_clean, CleanOptions, Slide};
use crate::pipeline::orchestrator::ScanOrchestrator;
use crate::pipeline::types::{ScanEvent, VideoMetadata};
use crate::run_artifacts::ScanManifest;
use crate::run_context::{create_run, decode_data_url};
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::{Duration, Instant};

pub struct ScanSummary {
    pub output_dir: PathBuf,
    pub captured: usize,
    pub written: usize,
    pub duration: Duration,
}

fn progress_bar() -> Result<ProgressBar> {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

pub async fn run_scan<L: BrowserLauncher>(
    orchestrator: &ScanOrchestrator<L>,
    args: &ScanArgs,
) -> Result<ScanSummary> {
    let start_time = Instant::now();
    let request = args.to_request();
    let (state, mut rx) = orchestrator.start(request.clone())?;
    let pb = progress_bar()?;

    let mut metadata: Option<VideoMetadata> = None;
    let mut slides: Vec<Slide> = Vec::new();
    let mut failure: Option<String> = None;

    while let Some(event) = rx.recv().await {
        let terminal = event.is_terminal();
        match event {
            ScanEvent::Meta {
                duration,
                interval,
                workers,
                ..
            } => {
                metadata = Some(VideoMetadata {
                    duration_seconds: duration,
                    suggested_interval_seconds: interval,
                });
                pb.set_message(format!(
                    "{:.0}s video, every {}s, {} workers",
                    duration, interval, workers
                ));
            }
            ScanEvent::Image {
                image_url,
                timestamp,
                progress,
                phash,
                ..
            } => {
                pb.set_position(u64::from(progress));
                slides.push(Slide {
                    image_url,
                    timestamp: timestamp as f64,
                    phash,
                });
                pb.set_message(format!("{} slides", slides.len()));
            }
            ScanEvent::Progress { progress, .. } => pb.set_position(u64::from(progress)),
            ScanEvent::Done { total_slides } => {
                pb.finish_with_message(format!("Done, {} slides", total_slides));
            }
            ScanEvent::Error { error } => {
                pb.abandon_with_message(format!("Failed: {}", error));
                failure = Some(error);
            }
        }
        if terminal {
            break;
        }
    }

    if let Some(error) = failure {
        anyhow::bail!("Scan {} failed: {}", state.scan_id, error);
    }

    let captured = slides.len();
    let slides = if args.clean {
        smart_clean(slides, &CleanOptions::default())
    } else {
        let mut slides = slides;
        slides.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        slides
    };

    // Only a successful scan gets an output directory
    let run = create_run(&args.output_root, &request.url)?;
    tracing::info!("Writing slides to {}", run.output_dir.display());

    let mut records = Vec::with_capacity(slides.len());
    for slide in &slides {
        let jpeg = decode_data_url(&slide.image_url)?;
        records.push(run.write_slide(slide.timestamp, &slide.phash, &jpeg)?);
    }

    let manifest = ScanManifest {
        scan_id: state.scan_id.clone(),
        run_id: run.run_id.clone(),
        url: request.url.clone(),
        created_at: run.created_at,
        mode: request.mode,
        range_start: request.range_start,
        range_end: request.range_end,
        metadata,
        cleaned: args.clean,
        captured,
        slides: records,
    };
    let manifest_path = run.write_manifest(&manifest)?;
    tracing::info!(
        "Wrote {} of {} slides and {}",
        manifest.slides.len(),
        captured,
        manifest_path.display()
    );

    Ok(ScanSummary {
        output_dir: run.output_dir,
        captured,
        written: manifest.slides.len(),
        duration: start_time.elapsed(),
    })
}
