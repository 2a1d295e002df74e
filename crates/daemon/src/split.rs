//! Day-boundary splitter.
//!
//! Rewrites every segment whose interval crosses local midnight into day-bounded
//! parts, so no segment handed to the merger spans more than one calendar day.
//! Parts are written into a scratch directory owned by the caller; dropping that
//! directory removes them.

use crate::classify::{format_timestamp, MERGED_EXTENSION};
use crate::media::{MediaError, MediaTool, TrimRequest};
use crate::segment::{end_of_day, start_of_day, Segment};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use log::{info, warn};
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for the splitter. Only filesystem failures abort a split pass.
#[derive(Debug, Error)]
pub enum SplitError {
    #[error("Failed to create temporary split file {path}: {source}")]
    TempFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One day-confined slice of a cross-day segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayPart {
    /// First instant of the part.
    pub start: NaiveDateTime,
    /// Last instant of the part: either the segment end or 23:59:59.999999999.
    pub end: NaiveDateTime,
    /// Seconds from the segment start at which this part begins.
    pub offset_secs: i64,
    /// Seconds covered; a part ending at midnight includes its boundary second.
    pub duration_secs: i64,
}

/// A segment whose parts could not be produced.
#[derive(Debug)]
pub struct SplitFailure {
    pub path: PathBuf,
    pub source_key: String,
    /// Calendar days the segment would have contributed to.
    pub days: Vec<NaiveDate>,
    pub error: MediaError,
}

/// Result of a split pass.
#[derive(Debug, Default)]
pub struct SplitOutput {
    /// Single-day segments: untouched originals plus freshly written parts.
    pub segments: Vec<Segment>,
    /// Cross-day segments whose trim failed.
    pub failures: Vec<SplitFailure>,
    /// Cross-day segments dropped for a non-positive duration.
    pub dropped: usize,
}

/// Splits `[start, end]` at every local midnight.
///
/// Returns an empty plan when the interval has no positive length.
pub fn plan_day_parts(start: NaiveDateTime, end: NaiveDateTime) -> Vec<DayPart> {
    let mut parts = Vec::new();
    if (end - start).num_seconds() <= 0 {
        return parts;
    }

    let mut cursor = start;
    let mut offset = 0i64;
    while cursor < end {
        let day_end = end_of_day(cursor.date());
        let (part_end, duration) = if day_end < end {
            let next_day = start_of_day(cursor.date()) + Duration::days(1);
            (day_end, (next_day - cursor).num_seconds())
        } else {
            (end, (end - cursor).num_seconds())
        };
        if duration <= 0 {
            break;
        }
        parts.push(DayPart {
            start: cursor,
            end: part_end,
            offset_secs: offset,
            duration_secs: duration,
        });
        offset += duration;
        cursor = start_of_day(cursor.date()) + Duration::days(1);
    }
    parts
}

/// Day-bounded views of `segment` with no file behind them.
///
/// Every part keeps the source path. They only serve to form and name day
/// groups whose output already exists, so nothing ever reads them.
pub fn planned_segments(segment: &Segment, parts: &[DayPart]) -> Vec<Segment> {
    parts
        .iter()
        .map(|part| Segment {
            path: segment.path.clone(),
            source_key: segment.source_key.clone(),
            start: part.start,
            end: part.end,
            extension: part_extension(segment),
        })
        .collect()
}

/// Extension given to parts; extensionless sources produce MP4 parts.
fn part_extension(segment: &Segment) -> String {
    if segment.extension.is_empty() {
        MERGED_EXTENSION.to_string()
    } else {
        segment.extension.clone()
    }
}

fn part_path(scratch: &Path, index: usize, part: &DayPart, extension: &str) -> PathBuf {
    scratch.join(format!(
        "split_{}_{}{}",
        index,
        format_timestamp(part.start),
        extension
    ))
}

/// Splits every cross-day segment in `segments`.
///
/// Single-day segments pass through without invoking the media tool. A trim
/// failure is recorded against the segment and processing continues; only a
/// failure to create a part file in `scratch` aborts.
pub async fn split_cross_day<M: MediaTool>(
    segments: Vec<Segment>,
    media: &M,
    scratch: &Path,
    dry_run: bool,
) -> Result<SplitOutput, SplitError> {
    let mut output = SplitOutput::default();
    let mut part_index = 0usize;

    for segment in segments {
        if !segment.spans_days() {
            output.segments.push(segment);
            continue;
        }

        let parts = plan_day_parts(segment.start, segment.end);
        if parts.is_empty() {
            warn!(
                "Skip invalid duration segment: {}",
                segment.path.display()
            );
            output.dropped += 1;
            continue;
        }

        let extension = part_extension(&segment);

        let mut produced = Vec::with_capacity(parts.len());
        let mut failure = None;
        for part in &parts {
            let path = part_path(scratch, part_index, part, &extension);
            part_index += 1;

            if dry_run {
                info!(
                    "[dry-run] would trim {} -> {} (off={}s dur={}s)",
                    segment.path.display(),
                    path.display(),
                    part.offset_secs,
                    part.duration_secs
                );
            } else {
                File::create(&path).map_err(|source| SplitError::TempFile {
                    path: path.clone(),
                    source,
                })?;

                let request = TrimRequest {
                    source: segment.path.clone(),
                    output: path.clone(),
                    offset_secs: part.offset_secs,
                    duration_secs: part.duration_secs,
                };
                if let Err(e) = media.trim(&request).await {
                    failure = Some(e);
                    break;
                }
            }

            produced.push(Segment {
                path,
                source_key: segment.source_key.clone(),
                start: part.start,
                end: part.end,
                extension: extension.clone(),
            });
        }

        match failure {
            Some(error) => {
                warn!(
                    "Split failed for {}: {}",
                    segment.path.display(),
                    error
                );
                output.failures.push(SplitFailure {
                    path: segment.path.clone(),
                    source_key: segment.source_key.clone(),
                    days: parts.iter().map(|p| p.start.date()).collect(),
                    error,
                });
            }
            None => output.segments.extend(produced),
        }
    }

    Ok(output)
}
