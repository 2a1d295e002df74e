//! Grouping and merge orchestration.
//!
//! Eligible raw segments are split at midnight, bucketed by `(source, day)` and
//! concatenated into one output per bucket. One failed day never stops the other
//! days; every decision is collected into a [`MergeReport`].

use crate::classify::format_merged_name;
use crate::config::Config;
use crate::media::{ConcatRequest, MediaError, MediaTool};
use crate::scan::{absolute_clean, collect_raw_segments, ScanError};
use crate::segment::{day_key, start_of_day, Segment};
use crate::split::{plan_day_parts, planned_segments, split_cross_day, SplitError};
use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that abandon the whole merge pass.
///
/// Per-group problems are not errors here; they are recorded as
/// [`GroupOutcome`]s and surfaced through [`MergeReport::ensure_clean`].
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Scan failed: {0}")]
    Scan(#[from] ScanError),

    #[error("Split failed: {0}")]
    Split(#[from] SplitError),

    #[error("Failed to create output directory {path}: {source}")]
    CreateOutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create scratch directory: {0}")]
    ScratchDir(std::io::Error),

    #[error("Failed to write concat manifest: {0}")]
    Manifest(std::io::Error),

    #[error("Failed to stage output {path}: {source}")]
    StageOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{failed} of {total} day group(s) failed")]
    Aggregate { failed: usize, total: usize },
}

/// Settings the orchestrator needs from the run configuration.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub out_dir: PathBuf,
    pub overwrite: bool,
    pub dry_run: bool,
}

impl MergeOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            out_dir: config.resolved_out_dir(),
            overwrite: config.overwrite,
            dry_run: config.dry_run,
        }
    }
}

/// Segments of one source on one calendar day, ascending by start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayGroup {
    pub source_key: String,
    pub day: NaiveDate,
    pub segments: Vec<Segment>,
}

/// Why a group was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoisonReason {
    /// A member starts or the last member ends on another day.
    CrossDay,
    /// Members do not share one extension.
    ExtensionMismatch,
    /// A segment feeding this day could not be split.
    SplitFailed,
}

impl std::fmt::Display for PoisonReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoisonReason::CrossDay => write!(f, "segments outside the group day"),
            PoisonReason::ExtensionMismatch => write!(f, "extension mismatch"),
            PoisonReason::SplitFailed => write!(f, "day-boundary split failed"),
        }
    }
}

/// Decision taken for one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GroupOutcome {
    Merged,
    AlreadyExists,
    DryRun,
    Poisoned { reason: PoisonReason },
    Failed { error: String },
}

impl GroupOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, GroupOutcome::Poisoned { .. } | GroupOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupReport {
    pub source_key: String,
    /// `YYYYMMDD`
    pub day: String,
    pub segments: usize,
    pub output: Option<PathBuf>,
    #[serde(flatten)]
    pub outcome: GroupOutcome,
}

/// Per-group outcomes of one merge pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Raw segments found by the scan.
    pub scanned: usize,
    /// Segments that passed the skip-today and well-formedness filter.
    pub eligible: usize,
    /// Cross-day segments dropped for a non-positive duration.
    pub dropped: usize,
    pub groups: Vec<GroupReport>,
}

impl MergeReport {
    pub fn failed_count(&self) -> usize {
        self.groups.iter().filter(|g| g.outcome.is_failure()).count()
    }

    pub fn merged_count(&self) -> usize {
        self.groups
            .iter()
            .filter(|g| g.outcome == GroupOutcome::Merged)
            .count()
    }

    /// Converts recorded group failures into the aggregate error.
    pub fn ensure_clean(&self) -> Result<(), MergeError> {
        match self.failed_count() {
            0 => Ok(()),
            failed => Err(MergeError::Aggregate {
                failed,
                total: self.groups.len(),
            }),
        }
    }
}

/// Keeps segments that are well formed and ended strictly before today's midnight.
pub fn filter_eligible(segments: Vec<Segment>, now: NaiveDateTime) -> Vec<Segment> {
    let today = start_of_day(now.date());
    segments
        .into_iter()
        .filter(|segment| {
            if !segment.is_well_formed() {
                warn!(
                    "Ignoring segment with end before start: {}",
                    segment.path.display()
                );
                return false;
            }
            segment.end < today
        })
        .collect()
}

/// Buckets single-day segments by `(source_key, start day)`.
///
/// Groups come back in lexicographic key order; members are stably sorted by start.
pub fn group_by_day(segments: Vec<Segment>) -> Vec<DayGroup> {
    let mut buckets: BTreeMap<(String, NaiveDate), Vec<Segment>> = BTreeMap::new();
    for segment in segments {
        buckets
            .entry((segment.source_key.clone(), segment.start_day()))
            .or_default()
            .push(segment);
    }

    buckets
        .into_iter()
        .map(|((source_key, day), mut segments)| {
            segments.sort_by_key(|s| s.start);
            DayGroup {
                source_key,
                day,
                segments,
            }
        })
        .collect()
}

/// Checks that a group lies within its day and shares one extension.
pub fn validate_group(group: &DayGroup) -> Result<(), PoisonReason> {
    let (Some(first), Some(last)) = (group.segments.first(), group.segments.last()) else {
        return Err(PoisonReason::CrossDay);
    };
    if first.start_day() != group.day || last.end_day() != group.day {
        return Err(PoisonReason::CrossDay);
    }
    if group
        .segments
        .iter()
        .any(|s| s.extension != first.extension)
    {
        return Err(PoisonReason::ExtensionMismatch);
    }
    Ok(())
}

/// Output location of a valid, non-empty group.
pub fn output_path(out_dir: &Path, group: &DayGroup) -> Option<PathBuf> {
    let first = group.segments.first()?;
    let last = group.segments.last()?;
    let dir = if group.source_key.is_empty() {
        out_dir.to_path_buf()
    } else {
        out_dir.join(&group.source_key)
    };
    Some(dir.join(format_merged_name(first.start, last.end)))
}

/// Sets aside cross-day segments whose every target day already has an output.
///
/// Returns the segments still to split and the planned parts of those set aside.
/// Output names are worked out from the planned split of all `eligible`
/// segments, so a rerun does not trim what it would only skip afterwards.
pub fn settle_finished(eligible: Vec<Segment>, out_dir: &Path) -> (Vec<Segment>, Vec<Segment>) {
    let planned: Vec<Segment> = eligible
        .iter()
        .flat_map(|s| {
            if s.spans_days() {
                planned_segments(s, &plan_day_parts(s.start, s.end))
            } else {
                vec![s.clone()]
            }
        })
        .collect();
    let finished: BTreeSet<(String, NaiveDate)> = group_by_day(planned)
        .into_iter()
        .filter(|g| output_path(out_dir, g).is_some_and(|p| p.exists()))
        .map(|g| (g.source_key, g.day))
        .collect();

    let mut pending = Vec::new();
    let mut settled = Vec::new();
    for segment in eligible {
        if segment.spans_days() {
            let parts = plan_day_parts(segment.start, segment.end);
            let done = !parts.is_empty()
                && parts
                    .iter()
                    .all(|p| finished.contains(&(segment.source_key.clone(), p.start.date())));
            if done {
                debug!(
                    "All days of {} already merged, not splitting",
                    segment.path.display()
                );
                settled.extend(planned_segments(&segment, &parts));
                continue;
            }
        }
        pending.push(segment);
    }
    (pending, settled)
}

async fn merge_group<M: MediaTool>(
    group: &DayGroup,
    output: &Path,
    media: &M,
    options: &MergeOptions,
) -> Result<GroupOutcome, MergeError> {
    if output.exists() && !options.overwrite {
        info!("Skip existing: {}", output.display());
        return Ok(GroupOutcome::AlreadyExists);
    }

    let inputs: Vec<PathBuf> = group
        .segments
        .iter()
        .map(|s| absolute_clean(&s.path))
        .collect();

    if options.dry_run {
        info!(
            "[dry-run] would merge {} segment(s) -> {}",
            inputs.len(),
            output.display()
        );
        return Ok(GroupOutcome::DryRun);
    }

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).map_err(|source| MergeError::CreateOutputDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let request = ConcatRequest {
        inputs,
        output: output.to_path_buf(),
    };
    match media.concat(&request).await {
        Ok(()) => {
            info!(
                "Merged {} segment(s) -> {}",
                request.inputs.len(),
                output.display()
            );
            Ok(GroupOutcome::Merged)
        }
        Err(MediaError::Manifest(e)) => Err(MergeError::Manifest(e)),
        Err(MediaError::Staging(source)) => Err(MergeError::StageOutput {
            path: output.to_path_buf(),
            source,
        }),
        Err(e) => {
            // The tool writes to a staging file, so `output` is untouched here
            error!("Merge failed for {}: {}", output.display(), e);
            Ok(GroupOutcome::Failed {
                error: e.to_string(),
            })
        }
    }
}

/// Runs one merge pass over already-scanned raw segments.
///
/// # Arguments
/// * `segments` - Raw segments from the scanner
/// * `media` - Tool used for trimming and concatenation
/// * `options` - Output directory, overwrite and dry-run switches
/// * `now` - Local wall-clock time of the pass
///
/// # Returns
/// A report with one entry per day group. Group failures do not make this
/// function fail; call [`MergeReport::ensure_clean`] to surface them.
///
/// # Errors
/// Filesystem failures the pass cannot proceed without: scratch directory,
/// split part files, output directories and concat manifests.
pub async fn merge_segments<M: MediaTool>(
    segments: Vec<Segment>,
    media: &M,
    options: &MergeOptions,
    now: NaiveDateTime,
) -> Result<MergeReport, MergeError> {
    let mut report = MergeReport {
        scanned: segments.len(),
        ..MergeReport::default()
    };

    let eligible = filter_eligible(segments, now);
    report.eligible = eligible.len();
    info!("Found {} eligible segment(s)", eligible.len());
    if eligible.is_empty() {
        return Ok(report);
    }

    // Split parts live here until every group has been concatenated
    let scratch = tempfile::Builder::new()
        .prefix("segmerge-")
        .tempdir()
        .map_err(MergeError::ScratchDir)?;

    let (pending, settled) = if options.overwrite {
        (eligible, Vec::new())
    } else {
        settle_finished(eligible, &options.out_dir)
    };

    let split = split_cross_day(pending, media, scratch.path(), options.dry_run).await?;
    report.dropped = split.dropped;

    let failed_days: BTreeSet<(String, NaiveDate)> = split
        .failures
        .iter()
        .flat_map(|f| f.days.iter().map(move |day| (f.source_key.clone(), *day)))
        .collect();

    let mut groups = group_by_day(split.segments.into_iter().chain(settled).collect());
    for (source_key, day) in &failed_days {
        if !groups
            .iter()
            .any(|g| &g.source_key == source_key && g.day == *day)
        {
            groups.push(DayGroup {
                source_key: source_key.clone(),
                day: *day,
                segments: Vec::new(),
            });
        }
    }
    groups.sort_by(|a, b| (&a.source_key, a.day).cmp(&(&b.source_key, b.day)));

    for group in &groups {
        let key = (group.source_key.clone(), group.day);
        let output = output_path(&options.out_dir, group);

        let outcome = if failed_days.contains(&key) {
            GroupOutcome::Poisoned {
                reason: PoisonReason::SplitFailed,
            }
        } else {
            match (validate_group(group), &output) {
                (Err(reason), _) => GroupOutcome::Poisoned { reason },
                (Ok(()), None) => GroupOutcome::Poisoned {
                    reason: PoisonReason::CrossDay,
                },
                (Ok(()), Some(output)) => merge_group(group, output, media, options).await?,
            }
        };

        if let GroupOutcome::Poisoned { reason } = &outcome {
            error!(
                "Skipping day {} of source {:?}: {}",
                day_key(group.day),
                group.source_key,
                reason
            );
        }

        report.groups.push(GroupReport {
            source_key: group.source_key.clone(),
            day: day_key(group.day),
            segments: group.segments.len(),
            output,
            outcome,
        });
    }

    info!(
        "Merge finished: {} merged, {} failed, {} group(s) total",
        report.merged_count(),
        report.failed_count(),
        report.groups.len()
    );
    Ok(report)
}

/// Scans the configured input directory and merges every completed day.
pub async fn merge_by_day<M: MediaTool>(
    config: &Config,
    media: &M,
    now: NaiveDateTime,
) -> Result<MergeReport, MergeError> {
    let options = MergeOptions::from_config(config);
    let segments = collect_raw_segments(&config.dir, &options.out_dir)?;
    merge_segments(segments, media, &options, now).await
}
