//! Startup checks module for the segment merge daemon
//!
//! Verifies the media tool can be executed before any pass runs:
//! - `<ffmpeg> -version` must succeed
//! - the reported major version is logged when it can be parsed

use crate::config::Config;
use log::{info, warn};
use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("FFmpeg not available: {0}")]
    FfmpegUnavailable(String),
}

/// Parse FFmpeg version string and extract major version number
///
/// Handles various FFmpeg version formats:
/// - Standard: "ffmpeg version 8.0 ..."
/// - N-prefixed: "ffmpeg version n8.0-... ..."
///
/// Snapshot builds (`N-12345-g...`) carry no release number and yield `None`.
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))?;

    let version_part = version_line
        .to_lowercase()
        .split("ffmpeg version")
        .nth(1)?
        .split_whitespace()
        .next()?
        .to_string();

    let version_str = version_part.trim_start_matches('n');

    let major_str = version_str.split(['.', '-']).next()?;

    major_str.parse().ok()
}

/// Check that the ffmpeg binary can be executed by running `<binary> -version`
///
/// # Arguments
/// * `binary` - Name or path of the ffmpeg executable
///
/// # Returns
/// The parsed major version, or `None` when the banner has no release number.
///
/// # Errors
/// `StartupError::FfmpegUnavailable` when the binary cannot be started or exits
/// with a failure status.
pub fn check_ffmpeg_available(binary: &Path) -> Result<Option<u32>, StartupError> {
    let output = Command::new(binary).arg("-version").output().map_err(|e| {
        StartupError::FfmpegUnavailable(format!(
            "{} -version failed; is ffmpeg installed and in PATH? Error: {}",
            binary.display(),
            e
        ))
    })?;

    if !output.status.success() {
        return Err(StartupError::FfmpegUnavailable(format!(
            "{} -version exited with {}",
            binary.display(),
            output.status
        )));
    }

    let version_output = String::from_utf8_lossy(&output.stdout);
    Ok(parse_ffmpeg_version(&version_output))
}

/// Run all startup checks for `cfg`
pub fn run_startup_checks(cfg: &Config) -> Result<(), StartupError> {
    match check_ffmpeg_available(&cfg.ffmpeg_path)? {
        Some(major) => info!(
            "Using {} (major version {})",
            cfg.ffmpeg_path.display(),
            major
        ),
        None => warn!(
            "Using {} (version could not be determined)",
            cfg.ffmpeg_path.display()
        ),
    }
    Ok(())
}
