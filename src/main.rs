// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! vidpull CLI
//!
//! Runs the HTTP API by default; `vidpull fetch <url>` downloads a single
//! URL in the foreground with a progress bar.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vidpull::config::Config;
use vidpull::engine::{EngineOptions, YtDlpEngine, OPT_FORMAT};
use vidpull::jobs::{DispatchRequest, JobDispatcher, SnapshotStatus};
use vidpull::server::Server;

/// How often `fetch` polls its job.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "vidpull")]
#[command(author, version, about = "Background video downloads with pollable progress")]
#[command(long_about = "vidpull wraps yt-dlp behind a small HTTP API.\n\n\
    Start server:        vidpull (or: vidpull serve)\n\
    Download one URL:    vidpull fetch <URL>\n\
    Poll a job:          GET /progress/<download_id>")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (default: ~/.vidpull/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose mode: debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API (default)
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind to; 0.0.0.0 exposes the API to the network
        #[arg(long)]
        bind: Option<String>,
    },

    /// Download a single URL in the foreground
    ///
    /// Examples:
    ///   vidpull fetch https://www.youtube.com/watch?v=dQw4w9WgXcQ
    ///   vidpull fetch https://example.com/clip --format bestaudio
    Fetch {
        /// Media URL
        url: String,

        /// yt-dlp format expression (overrides the configured default)
        #[arg(short, long)]
        format: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "vidpull=debug" } else { "vidpull=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn build_dispatcher(config: &Config) -> Result<JobDispatcher> {
    fs::create_dir_all(&config.downloads_dir).with_context(|| {
        format!(
            "Failed to create downloads directory {}",
            config.downloads_dir.display()
        )
    })?;
    let engine = Arc::new(YtDlpEngine::new(&config.ytdlp_path));
    Ok(JobDispatcher::new(engine, config.job_settings())
        .with_max_concurrent_jobs(config.max_concurrent_jobs))
}

async fn serve(config: Config, port: Option<u16>, bind: Option<String>) -> Result<()> {
    let dispatcher = build_dispatcher(&config)?;
    let server = Server::new(port.unwrap_or(config.port), dispatcher)
        .with_bind_address(bind.unwrap_or_else(|| config.bind_address.clone()))
        .with_snapshot_ttl(config.snapshot_ttl());
    server.start().await
}

async fn fetch(config: Config, url: String, format: Option<String>) -> Result<()> {
    use indicatif::{ProgressBar, ProgressStyle};

    let dispatcher = build_dispatcher(&config)?;
    let mut request = DispatchRequest::new(url);
    if let Some(format) = format {
        let mut options = EngineOptions::new();
        options.insert(OPT_FORMAT.to_string(), format.into());
        request = request.with_options(options);
    }
    let handle = dispatcher.dispatch(request).map_err(|e| anyhow::anyhow!(e.user_message()))?;
    let id = handle.id().clone();

    let pb = ProgressBar::new(1000);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {spinner:.green} [{bar:40.cyan/blue}] {prefix:>6} | {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("█▓░"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message("Preparing download...");

    let mut interval = tokio::time::interval(POLL_INTERVAL);
    let outcome = loop {
        interval.tick().await;
        let snapshot = dispatcher.progress(id.as_str());
        let percent = snapshot.percent.unwrap_or(0.0);
        pb.set_position((percent * 10.0).round() as u64);
        pb.set_prefix(format!("{:.1}%", percent));

        match snapshot.status {
            SnapshotStatus::Starting => {}
            SnapshotStatus::Downloading => {
                let speed = snapshot.speed.unwrap_or(0.0) / 1024.0 / 1024.0;
                pb.set_message(format!(
                    "{} ({:.2} MiB/s, ETA {}s)",
                    snapshot.filename.as_deref().unwrap_or_default(),
                    speed,
                    snapshot.eta.unwrap_or(0)
                ));
            }
            SnapshotStatus::Finished | SnapshotStatus::Error | SnapshotStatus::NotFound => {
                break snapshot;
            }
        }

        // Clean engine exit without a finished report leaves the job in
        // `downloading`; stop once the task itself is done.
        if handle.is_finished() {
            break dispatcher.progress(id.as_str());
        }
    };

    tracing::info!(
        job = %id,
        elapsed_secs = handle.elapsed().num_seconds(),
        status = ?outcome.status,
        "Download job ended"
    );

    match outcome.status {
        SnapshotStatus::Finished => {
            pb.finish_and_clear();
            println!(
                "\x1b[32m[OK]\x1b[0m Saved {}",
                outcome.filename.as_deref().unwrap_or_default()
            );
            Ok(())
        }
        SnapshotStatus::Error | SnapshotStatus::NotFound => {
            pb.finish_and_clear();
            let message = outcome.error.unwrap_or_else(|| "Download not found".to_string());
            println!("\x1b[31m[X]\x1b[0m {}", message);
            bail!("Download failed: {}", message)
        }
        SnapshotStatus::Starting | SnapshotStatus::Downloading => {
            pb.finish_and_clear();
            println!("\x1b[33m[!]\x1b[0m yt-dlp exited without reporting a finished file");
            Ok(())
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(cli.config.as_deref())?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    match cli.command {
        None => runtime.block_on(serve(config, None, None)),
        Some(Commands::Serve { port, bind }) => runtime.block_on(serve(config, port, bind)),
        Some(Commands::Fetch { url, format }) => runtime.block_on(fetch(config, url, format)),
    }
}
