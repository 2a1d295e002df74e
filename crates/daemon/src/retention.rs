//! Retention sweeper.
//!
//! Two independent age-based passes: raw segments under the input directory and
//! merged outputs under the output directory. Deletion lists are sorted before
//! anything is removed, and a failed removal never stops the sweep.

use crate::classify::{classify_name, MERGED_EXTENSION, RAW_PREFIX};
use crate::config::Config;
use crate::scan::{walk_files, ScanError};
use crate::segment::start_of_day;
use chrono::{Duration, NaiveDateTime};
use log::{info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("Scan failed: {0}")]
    Scan(#[from] ScanError),
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Files older than this instant were candidates; `None` when the sweep was disabled.
    pub cutoff: Option<NaiveDateTime>,
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
    pub dry_run: bool,
}

/// Cutoff for raw segments.
///
/// A horizon of 0 means "everything from completed days": the cutoff is the
/// midnight that started today, so nothing ending today is touched.
pub fn raw_cutoff(days: u32, now: NaiveDateTime) -> NaiveDateTime {
    if days == 0 {
        start_of_day(now.date())
    } else {
        now - Duration::days(i64::from(days))
    }
}

/// Cutoff for merged outputs.
pub fn merged_cutoff(days: u32, now: NaiveDateTime) -> NaiveDateTime {
    now - Duration::days(i64::from(days))
}

/// Raw segment files under `dir` whose end is strictly before `cutoff`.
///
/// The output directory is not descended into. Malformed intervals are never
/// candidates.
pub fn plan_raw_deletions(
    dir: &Path,
    out_dir: &Path,
    cutoff: NaiveDateTime,
) -> Result<Vec<PathBuf>, RetentionError> {
    let mut candidates: Vec<PathBuf> = walk_files(dir, Some(out_dir))?
        .into_iter()
        .filter(|path| {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                return false;
            };
            match classify_name(name).into_raw() {
                Some(times) if times.end < times.start => {
                    warn!("Ignoring segment with end before start: {}", path.display());
                    false
                }
                Some(times) => times.end < cutoff,
                None => false,
            }
        })
        .collect();
    candidates.sort();
    Ok(candidates)
}

/// Merged outputs under `out_dir` whose end is strictly before `cutoff`.
///
/// A missing output directory yields an empty plan.
pub fn plan_merged_deletions(
    out_dir: &Path,
    cutoff: NaiveDateTime,
) -> Result<Vec<PathBuf>, RetentionError> {
    if !out_dir.exists() {
        return Ok(Vec::new());
    }

    let mut candidates: Vec<PathBuf> = walk_files(out_dir, None)?
        .into_iter()
        .filter(|path| {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                return false;
            };
            if name.starts_with(&format!("{}_", RAW_PREFIX)) {
                return false;
            }
            match classify_name(name).into_merged() {
                Some(times) if !times.extension.eq_ignore_ascii_case(MERGED_EXTENSION) => false,
                Some(times) if times.end < times.start => {
                    warn!("Ignoring merged file with end before start: {}", path.display());
                    false
                }
                Some(times) => times.end < cutoff,
                None => false,
            }
        })
        .collect();
    candidates.sort();
    Ok(candidates)
}

/// Removes `paths` one at a time; failures are logged and collected.
pub fn delete_files(paths: Vec<PathBuf>, dry_run: bool) -> SweepReport {
    let mut report = SweepReport {
        dry_run,
        ..SweepReport::default()
    };

    for path in paths {
        if dry_run {
            info!("[dry-run] would delete {}", path.display());
            report.deleted.push(path);
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted {}", path.display());
                report.deleted.push(path);
            }
            Err(e) => {
                warn!("Failed to delete {}: {}", path.display(), e);
                report.failed.push(path);
            }
        }
    }
    report
}

/// Raw sweep for the configured horizon; a no-op when no horizon is set.
pub fn sweep_raw(config: &Config, now: NaiveDateTime) -> Result<SweepReport, RetentionError> {
    let Some(days) = config.raw_retention_days else {
        return Ok(SweepReport::default());
    };
    let cutoff = raw_cutoff(days, now);
    info!("Raw retention: deleting segments ending before {}", cutoff);

    let plan = plan_raw_deletions(&config.dir, &config.resolved_out_dir(), cutoff)?;
    let mut report = delete_files(plan, config.dry_run);
    report.cutoff = Some(cutoff);
    Ok(report)
}

/// Merged sweep for the configured horizon; a no-op when no horizon is set.
pub fn sweep_merged(config: &Config, now: NaiveDateTime) -> Result<SweepReport, RetentionError> {
    let Some(days) = config.merged_retention_days else {
        return Ok(SweepReport::default());
    };
    let cutoff = merged_cutoff(days, now);
    info!("Merged retention: deleting outputs ending before {}", cutoff);

    let plan = plan_merged_deletions(&config.resolved_out_dir(), cutoff)?;
    let mut report = delete_files(plan, config.dry_run);
    report.cutoff = Some(cutoff);
    Ok(report)
}
