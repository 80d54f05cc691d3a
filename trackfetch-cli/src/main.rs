mod cli;

use std::process;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{Level, error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use fetchio::{ClientConfig, create_client};
use providers::{TrackRequest, create_provider};

use crate::cli::Args;

const MB: f64 = 1024.0 * 1024.0;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        error!("{e:#}");
        process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let client = create_client(&ClientConfig::default()).context("building HTTP client")?;
    let mut provider = create_provider(args.provider, client);

    let request = TrackRequest {
        file_name: args
            .file_name
            .unwrap_or_else(|| format!("{}.flac", args.track_id)),
        track_id: args.track_id,
        isrc: args.isrc,
        quality: args.quality,
        output_dir: args.output_dir,
    };

    info!(provider = %provider.kind(), track_id = %request.track_id, "Starting download");

    let bar = progress_bar(args.quiet);
    let mut progress = provider.subscribe_progress();
    let reporter = {
        let bar = bar.clone();
        tokio::spawn(async move {
            while progress.changed().await.is_ok() {
                let snapshot = *progress.borrow_and_update();
                bar.set_message(format!(
                    "{:.2} MB ({:.2} MB/s)",
                    snapshot.bytes_written as f64 / MB,
                    snapshot.throughput_bps / MB,
                ));
            }
        })
    };

    let result = provider.download(&request).await;
    reporter.abort();
    bar.finish_and_clear();

    let path = result.with_context(|| format!("downloading track {}", request.track_id))?;
    info!(path = %path.display(), "Download complete");
    println!("{}", path.display());
    Ok(())
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    bar.enable_steady_tick(Duration::from_millis(120));
    if let Ok(style) = ProgressStyle::with_template("{spinner:.blue} {msg}") {
        bar.set_style(style);
    }
    bar
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_level(verbose))
        .init();
}
