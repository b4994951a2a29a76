use anyhow::{Context, Result};
use chrono::Local;
use lanespeed::cli::Args;
use lanespeed::config::build_pipeline_config;
use lanespeed::lane_speed_processor::LaneSpeedProcessor;
use lanespeed::progress::StreamProgressTracker;
use lanespeed::report::JsonLinesWriter;
use lanespeed::source::{DetectionFileSource, FrameSource};
use lanespeed::stream_processor::{RunControl, StreamProcessor};
use std::io::{BufReader, IsTerminal};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Timestamped run directory for outputs that were not given a path
fn default_output_path() -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    PathBuf::from(format!("./runs/{}/tracks.jsonl", timestamp))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lanespeed=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Args = argh::from_env();
    info!("lane & speed estimation starting on {}", args.source);

    let config = build_pipeline_config(&args).context("invalid configuration")?;
    let fps = config.fps;

    let source = DetectionFileSource::open(Path::new(&args.source))?;

    let output_path = args.out.as_ref().map(PathBuf::from).unwrap_or_else(default_output_path);
    let mut sink = JsonLinesWriter::create(&output_path)?;
    info!("writing frame reports to {}", output_path.display());

    let control = RunControl::new();
    control.install_ctrlc_handler()?;
    if std::io::stdin().is_terminal() {
        control.listen_for_commands(BufReader::new(std::io::stdin()))?;
        info!("type p + Enter to pause/resume, q + Enter to stop");
    }

    let mut progress = if args.quiet {
        StreamProgressTracker::hidden(fps)
    } else {
        match source.len_hint() {
            Some(total) => StreamProgressTracker::new(total, fps, &args.source),
            None => StreamProgressTracker::new_unknown_total(fps, &args.source),
        }
    };

    let mut processor = LaneSpeedProcessor::new(config);
    let summary = processor.process_stream(source, &mut sink, &control, Some(&mut progress))?;
    progress.finish();

    info!(
        "done: {} frames written to {}",
        summary.frames_processed,
        output_path.display()
    );
    Ok(())
}
