//! CLI entry point for chunkload.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chunkload_core::download::parse_http_url;
use chunkload_core::{Downloader, Progress, SessionHandle, SessionState, Sink, TransferRequest};
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::{debug, error, info, warn};

mod app_config;
mod cli;

use cli::Args;

const POLL_INTERVAL: Duration = Duration::from_millis(120);

fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let config = app_config::resolve_config(&args)?;
    let options = app_config::request_options(&args)?;
    let output_dir = args.output_dir.clone().unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;

    let downloader = Downloader::new(config)?;
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        downloader.handle().spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupted.store(true, Ordering::SeqCst);
            }
        });
    }

    let mut sessions = Vec::with_capacity(args.urls.len());
    let mut reserved = HashSet::new();
    let mut rejected = 0usize;
    for url in &args.urls {
        let started = parse_http_url(url).and_then(|parsed| {
            downloader.start(
                TransferRequest::new(url.as_str()).with_options(options.clone()),
                Sink::reserve_file_in_dir(&output_dir, &parsed, &mut reserved),
            )
        });
        match started {
            Ok(session) => sessions.push(session),
            Err(e) => {
                error!(url = %url, error = %e, "Rejected download");
                rejected += 1;
            }
        }
    }

    let show_bars = !args.quiet && !args.json;
    let finals = monitor(&downloader, &sessions, &interrupted, show_bars);
    downloader.close();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&finals)?);
    }
    report(&finals, rejected, interrupted.load(Ordering::SeqCst))
}

/// Polls every session until all have ended, driving progress bars.
fn monitor(
    downloader: &Downloader,
    sessions: &[SessionHandle],
    interrupted: &AtomicBool,
    show_bars: bool,
) -> Vec<Progress> {
    let multi = MultiProgress::new();
    let bars: Vec<Option<ProgressBar>> = sessions
        .iter()
        .map(|session| show_bars.then(|| multi.add(new_bar(session))))
        .collect();
    let mut cancel_sent = false;

    loop {
        if interrupted.load(Ordering::SeqCst) && !cancel_sent {
            warn!("Interrupted; cancelling all downloads");
            downloader.cancel_all();
            cancel_sent = true;
        }

        let snapshots: Vec<Progress> = sessions.iter().map(SessionHandle::progress).collect();
        for (snapshot, bar) in snapshots.iter().zip(&bars) {
            if let Some(bar) = bar {
                update_bar(bar, snapshot);
            }
        }
        if snapshots.iter().all(|p| p.state.is_terminal()) {
            return snapshots;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn new_bar(session: &SessionHandle) -> ProgressBar {
    let style = ProgressStyle::with_template(
        "{spinner} {msg:30!} [{bar:30}] {bytes}/{total_bytes} {bytes_per_sec}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ");
    let bar = ProgressBar::new(0).with_style(style);
    let name = session
        .progress()
        .target
        .rsplit(std::path::MAIN_SEPARATOR)
        .next()
        .unwrap_or_default()
        .to_string();
    bar.set_message(name);
    bar
}

fn update_bar(bar: &ProgressBar, progress: &Progress) {
    if bar.is_finished() {
        return;
    }
    if let Some(total) = progress.total_size {
        bar.set_length(total);
    }
    bar.set_position(progress.downloaded);
    match progress.state {
        SessionState::Finished => bar.finish(),
        SessionState::Failed => bar.abandon_with_message("failed"),
        SessionState::Cancelled => bar.abandon_with_message("cancelled"),
        SessionState::Pending | SessionState::Running => bar.tick(),
    }
}

fn report(finals: &[Progress], rejected: usize, interrupted: bool) -> Result<()> {
    let finished = finals.iter().filter(|p| p.finished).count();
    let cancelled = finals.iter().filter(|p| p.cancelled).count();
    let failed = finals.iter().filter(|p| p.failed).count() + rejected;
    for progress in finals.iter().filter(|p| p.failed) {
        error!(
            url = %progress.url,
            error = progress.error.as_deref().unwrap_or("unknown error"),
            "Download failed"
        );
    }
    info!(finished, failed, cancelled, "Downloads complete");

    if interrupted {
        bail!("Interrupted; {cancelled} download(s) cancelled");
    }
    if failed > 0 {
        bail!("{failed} of {} download(s) failed", finals.len() + rejected);
    }
    Ok(())
}
