//! # Content Shield CLI (`shield`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `shield scan <paths...>` | Stage and scan local files, print alerts |
//! | `shield serve` | Start the HTTP API |
//! | `shield check-config` | Validate and print the effective configuration |
//!
//! ## Examples
//!
//! ```bash
//! # Scan a folder of artwork with human progress
//! shield scan ./artwork --progress human
//!
//! # Scan a track whose extension is unusual
//! shield scan ./mix.bin --kind audio
//!
//! # Serve the API with a config file
//! shield --config ./config/shield.toml serve
//! ```
//!
//! Logging goes to stderr and is filtered by `RUST_LOG` (default `info`).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use content_shield::config::{self, Config};
use content_shield::progress::ProgressMode;
use content_shield::{scan_cmd, server};
use content_shield_core::models::MediaKind;

/// Content Shield: find copies of your artwork and music.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Without it, built-in defaults are used (demo collaborators).
#[derive(Parser)]
#[command(
    name = "shield",
    about = "Content Shield: stage media, fingerprint it, search for copies, and track alerts",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). See `config/shield.example.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stage and scan image or audio files.
    ///
    /// Directories are walked recursively. All files are scanned
    /// concurrently (bounded by `scan.max_concurrent_scans`) and the
    /// resulting alerts are printed, highest priority first.
    Scan {
        /// Files or directories to scan.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Treat every file as this kind instead of guessing from the extension.
        #[arg(long, value_parser = parse_kind)]
        kind: Option<MediaKind>,

        /// Progress output on stderr. Defaults to `human` on a terminal, `off` otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,

        /// Print alerts as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Validate the configuration and print the effective settings.
    CheckConfig,
}

fn parse_kind(s: &str) -> Result<MediaKind, String> {
    s.parse()
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn load(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => config::load_config(path),
        None => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();
    let cfg = load(cli.config.as_ref())?;

    match cli.command {
        Commands::Scan {
            paths,
            kind,
            progress,
            json,
        } => {
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            scan_cmd::run_scan(&cfg, &paths, kind, progress, json).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::CheckConfig => {
            cfg.validate()?;
            print_config(&cfg);
        }
    }

    Ok(())
}

fn print_config(cfg: &Config) {
    println!("Configuration OK");
    println!();
    println!("  [limits]");
    println!(
        "    image: {} bytes, {}",
        cfg.limits.image_max_bytes,
        cfg.limits.image_types.join(", ")
    );
    println!(
        "    audio: {} bytes, {}",
        cfg.limits.audio_max_bytes,
        cfg.limits.audio_types.join(", ")
    );
    println!("  [scan]");
    println!("    max_concurrent_scans: {}", cfg.scan.max_concurrent_scans);
    println!(
        "    tick: +{} every {}ms",
        cfg.scan.tick_step, cfg.scan.tick_interval_ms
    );
    println!(
        "    timeouts: queue {}ms, fingerprint {}ms, search {}ms",
        cfg.scan.queue_timeout_ms, cfg.scan.fingerprint_timeout_ms, cfg.scan.search_timeout_ms
    );
    println!(
        "    retries: {} (backoff {}ms)",
        cfg.scan.max_retries, cfg.scan.retry_backoff_ms
    );
    println!("  [collaborators]");
    println!("    provider: {}", cfg.collaborators.provider);
    if let Some(url) = &cfg.collaborators.fingerprint_url {
        println!("    fingerprint_url: {}", url);
    }
    if let Some(url) = &cfg.collaborators.search_url {
        println!("    search_url: {}", url);
    }
    println!("  [server]");
    println!("    bind: {}", cfg.server.bind);
}
