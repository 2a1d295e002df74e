//! Segment model shared by the scanner, splitter, merger and retention sweeps.
//!
//! All timestamps are local wall-clock times as encoded in file names.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use std::path::PathBuf;

/// Calendar day format used in logs and group keys (`YYYYMMDD`).
pub const DAY_FORMAT: &str = "%Y%m%d";

/// One recorded file covering a contiguous time interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Location of the file on disk.
    pub path: PathBuf,
    /// Sub-directory of the input root identifying the camera; empty for the root itself.
    pub source_key: String,
    /// Start of the recorded interval.
    pub start: NaiveDateTime,
    /// End of the recorded interval.
    pub end: NaiveDateTime,
    /// File extension including the leading dot, or empty.
    pub extension: String,
}

impl Segment {
    pub fn start_day(&self) -> NaiveDate {
        self.start.date()
    }

    pub fn end_day(&self) -> NaiveDate {
        self.end.date()
    }

    /// Start must not be after end for any durable action on the segment.
    pub fn is_well_formed(&self) -> bool {
        self.start <= self.end
    }

    /// True when the interval touches more than one calendar day.
    pub fn spans_days(&self) -> bool {
        self.start_day() != self.end_day()
    }

    /// Whole seconds between start and end.
    pub fn duration_secs(&self) -> i64 {
        (self.end - self.start).num_seconds()
    }
}

/// Formats a calendar day as `YYYYMMDD`.
pub fn day_key(day: NaiveDate) -> String {
    day.format(DAY_FORMAT).to_string()
}

/// Local midnight at the start of `day`.
pub fn start_of_day(day: NaiveDate) -> NaiveDateTime {
    day.and_time(NaiveTime::MIN)
}

/// Last representable instant of `day` (23:59:59.999999999).
pub fn end_of_day(day: NaiveDate) -> NaiveDateTime {
    start_of_day(day) + Duration::days(1) - Duration::nanoseconds(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    fn segment(start: NaiveDateTime, end: NaiveDateTime) -> Segment {
        Segment {
            path: PathBuf::from("/cam/00_x.mp4"),
            source_key: String::new(),
            start,
            end,
            extension: ".mp4".to_string(),
        }
    }

    #[test]
    fn test_day_bounds() {
        let day = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(start_of_day(day), at(2024, 2, 29, 0, 0, 0));
        let end = end_of_day(day);
        assert_eq!(end.date(), day);
        assert_eq!(end + Duration::nanoseconds(1), at(2024, 3, 1, 0, 0, 0));
        assert_eq!(day_key(day), "20240229");
    }

    #[test]
    fn test_segment_span_and_duration() {
        let s = segment(at(2024, 1, 1, 23, 55, 0), at(2024, 1, 2, 0, 5, 0));
        assert!(s.spans_days());
        assert!(s.is_well_formed());
        assert_eq!(s.duration_secs(), 600);

        let s = segment(at(2024, 1, 1, 10, 0, 0), at(2024, 1, 1, 9, 0, 0));
        assert!(!s.spans_days());
        assert!(!s.is_well_formed());
    }
}
