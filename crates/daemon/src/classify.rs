//! Classifier module for recognising segment file names.
//!
//! Two layouts are accepted:
//! - raw recordings: `00_<start>_<end>[.ext]`
//! - merged day files: `<start>_<end>[.ext]`
//!
//! Both timestamps are exactly 14 digits (`YYYYMMDDHHMMSS`, local time). Anything
//! else is silently rejected and excluded from further processing.

use chrono::{NaiveDate, NaiveDateTime};

/// Prefix the recorder puts in front of every raw segment name.
pub const RAW_PREFIX: &str = "00";

/// Extension of every merged output file.
pub const MERGED_EXTENSION: &str = ".mp4";

/// Timestamp layout embedded in file names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

const TIMESTAMP_LEN: usize = 14;

/// Interval and extension recovered from a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTimes {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Extension including the leading dot, or empty when the name has none.
    pub extension: String,
}

/// Which naming scheme a file name follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentName {
    /// Raw recorder output, `00_<start>_<end>[.ext]`.
    Raw(NameTimes),
    /// Merged day output, `<start>_<end>[.ext]`.
    Merged(NameTimes),
    /// Neither layout matched.
    Unrecognized,
}

impl SegmentName {
    /// Times of a raw name; `None` for any other scheme.
    pub fn into_raw(self) -> Option<NameTimes> {
        match self {
            SegmentName::Raw(times) => Some(times),
            _ => None,
        }
    }

    /// Times of a merged name; `None` for any other scheme.
    pub fn into_merged(self) -> Option<NameTimes> {
        match self {
            SegmentName::Merged(times) => Some(times),
            _ => None,
        }
    }
}

/// Classifies a bare file name (no directory components).
///
/// A name carrying the raw prefix is judged only against the raw layout; it never
/// falls through to the merged layout.
pub fn classify_name(name: &str) -> SegmentName {
    if let Some(rest) = name
        .strip_prefix(RAW_PREFIX)
        .and_then(|rest| rest.strip_prefix('_'))
    {
        return match parse_interval(rest) {
            Some(times) => SegmentName::Raw(times),
            None => SegmentName::Unrecognized,
        };
    }

    match parse_interval(name) {
        Some(times) => SegmentName::Merged(times),
        None => SegmentName::Unrecognized,
    }
}

/// Parses `<14 digits>_<14 digits>[.ext]`.
fn parse_interval(s: &str) -> Option<NameTimes> {
    let bytes = s.as_bytes();
    if bytes.len() < TIMESTAMP_LEN * 2 + 1 || bytes[TIMESTAMP_LEN] != b'_' {
        return None;
    }

    let start = parse_timestamp(s.get(..TIMESTAMP_LEN)?)?;
    let end = parse_timestamp(s.get(TIMESTAMP_LEN + 1..TIMESTAMP_LEN * 2 + 1)?)?;

    let extension = s.get(TIMESTAMP_LEN * 2 + 1..)?;
    if !extension.is_empty() && !extension.starts_with('.') {
        return None;
    }

    Some(NameTimes {
        start,
        end,
        extension: extension.to_string(),
    })
}

/// Parses exactly 14 ASCII digits as `YYYYMMDDHHMMSS`.
///
/// Calendar-invalid values (month 13, Feb 30, second 60) are rejected.
pub fn parse_timestamp(digits: &str) -> Option<NaiveDateTime> {
    if digits.len() != TIMESTAMP_LEN || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let field = |range: std::ops::Range<usize>| digits[range].parse::<u32>().ok();
    let year = digits[0..4].parse::<i32>().ok()?;
    let date = NaiveDate::from_ymd_opt(year, field(4..6)?, field(6..8)?)?;
    date.and_hms_opt(field(8..10)?, field(10..12)?, field(12..14)?)
}

/// Formats a timestamp in the 14-digit file name layout.
///
/// Sub-second precision is truncated.
pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Builds a raw segment name, e.g. `00_20240101100000_20240101100100.mp4`.
pub fn format_raw_name(start: NaiveDateTime, end: NaiveDateTime, extension: &str) -> String {
    format!(
        "{}_{}_{}{}",
        RAW_PREFIX,
        format_timestamp(start),
        format_timestamp(end),
        extension
    )
}

/// Builds a merged output name, e.g. `20240101000000_20240101235959.mp4`.
pub fn format_merged_name(start: NaiveDateTime, end: NaiveDateTime) -> String {
    format!(
        "{}_{}{}",
        format_timestamp(start),
        format_timestamp(end),
        MERGED_EXTENSION
    )
}
