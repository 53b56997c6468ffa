//! lintlink - binary entry point.
//!
//! Serves the language server protocol on stdin/stdout. Stdout carries the
//! protocol, so logs only ever go to a file.

use std::env;
use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Parser)]
#[command(version, about = "Keeps editor diagnostics in sync with cargo and bacon")]
struct Args {
    /// Tracing filter, e.g. `debug` or `lintlink_lsp=trace`. Overrides RUST_LOG.
    #[arg(long, value_name = "FILTER")]
    log_level: Option<String>,

    /// Log file to append to instead of the default location.
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

fn init_tracing(args: &Args) {
    let env_filter = match args.log_level.as_deref() {
        Some(level) => EnvFilter::try_new(level).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    }
    .or_else(|| EnvFilter::try_new("info").ok())
    .unwrap_or_else(|| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file(args.log_file.clone());

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // No log file means no logs; stdout belongs to the protocol.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file(explicit: Option<PathBuf>) -> (Option<(PathBuf, File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates(explicit) {
        if let Some(parent) = candidate.parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates(explicit: Option<PathBuf>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(path) = explicit {
        candidates.push(path);
    }

    // $XDG_STATE_HOME/lintlink/lintlink.log, else the platform data dir
    if let Some(state_dir) = env::var_os("XDG_STATE_HOME")
        .map(PathBuf::from)
        .filter(|dir| dir.is_absolute())
        .or_else(dirs::state_dir)
        .or_else(dirs::data_local_dir)
    {
        candidates.push(state_dir.join("lintlink").join("lintlink.log"));
    }

    // Fallback: ./.lintlink/lintlink.log
    candidates.push(PathBuf::from(".lintlink").join("lintlink.log"));

    candidates
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args);
    tracing::info!("lintlink {} starting", env!("CARGO_PKG_VERSION"));

    let result = lintlink_lsp::serve(tokio::io::stdin(), tokio::io::stdout()).await;
    if let Err(e) = &result {
        tracing::error!("Server stopped: {e:#}");
    }
    result
}
