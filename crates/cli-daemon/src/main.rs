//! CLI entry point for the segment merge daemon
//!
//! Loads configuration (file, then environment, then flags) and either runs a
//! single pass or stays resident on the cron schedule.

use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};
use segmerge_daemon::config::ConfigError;
use segmerge_daemon::{Config, Daemon};
use std::path::PathBuf;
use std::process::ExitCode;

/// Segment Merge Daemon - per-day merging and retention for camera recordings
#[derive(Parser, Debug)]
#[command(name = "segmerge-daemon")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input directory holding raw segments
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Output directory for merged files (default: <dir>/daily)
    #[arg(short, long)]
    out_dir: Option<PathBuf>,

    /// Delete raw segments older than this many days (0 = all completed days)
    #[arg(long)]
    days: Option<u32>,

    /// Delete merged files older than this many days
    #[arg(long)]
    merged_days: Option<u32>,

    /// 5-field cron expression; runs as a daemon when set
    #[arg(long)]
    cron: Option<String>,

    /// Re-merge days whose output already exists
    #[arg(long)]
    overwrite: bool,

    /// Log what would happen without touching any file
    #[arg(long)]
    dry_run: bool,

    /// Path or name of the ffmpeg binary
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// Skip the ffmpeg startup check. For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,

    /// Print the pass report as JSON (one-shot mode only)
    #[arg(long)]
    json: bool,
}

impl Args {
    /// Layers command-line flags over an already loaded configuration
    fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.dir {
            config.dir = dir.clone();
        }
        if let Some(out_dir) = &self.out_dir {
            config.out_dir = Some(out_dir.clone());
        }
        if let Some(days) = self.days {
            config.raw_retention_days = Some(days);
        }
        if let Some(days) = self.merged_days {
            config.merged_retention_days = Some(days);
        }
        if let Some(cron) = &self.cron {
            config.cron = cron.clone();
        }
        if self.overwrite {
            config.overwrite = true;
        }
        if self.dry_run {
            config.dry_run = true;
        }
        if let Some(ffmpeg) = &self.ffmpeg {
            config.ffmpeg_path = ffmpeg.clone();
        }
        config.normalize();
    }
}

fn load_config(args: &Args) -> Result<Config, ConfigError> {
    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);
    Ok(config)
}

fn print_report(report: &segmerge_daemon::PassReport) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize pass report")?;
    println!("{}", json);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::from(2);
        }
    };

    info!("Input directory: {}", config.dir.display());
    info!("Output directory: {}", config.resolved_out_dir().display());
    if config.dry_run {
        info!("Dry run: no files will be written or deleted");
    }

    let daemon = if args.skip_checks {
        warn!("Skipping startup checks (--skip-checks enabled)");
        Daemon::new_without_checks(config)
    } else {
        match Daemon::new(config) {
            Ok(daemon) => daemon,
            Err(e) => {
                error!("Failed to initialize daemon: {}", e);
                return ExitCode::FAILURE;
            }
        }
    };

    if daemon.config.is_daemon() {
        if args.json {
            warn!("--json is ignored in daemon mode");
        }
        daemon.run_forever().await;
        return ExitCode::SUCCESS;
    }

    let report = daemon.run_once().await;
    if args.json {
        if let Err(e) = print_report(&report) {
            error!("{:#}", e);
        }
    }

    match report.ensure_success() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
