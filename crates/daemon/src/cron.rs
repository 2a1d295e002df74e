//! Five-field cron expressions.
//!
//! `minute hour day-of-month month day-of-week`, each field a comma list of
//! `*`, `a`, `a-b` with an optional `/step`. Day-of-week runs 0-6 with 7 as an
//! alias for Sunday. When both day fields are restricted a day matches if either
//! does.

use chrono::{Datelike, Duration, NaiveDateTime, Timelike};
use thiserror::Error;

/// How far ahead a trigger is searched for before giving up.
const SEARCH_MONTHS: u32 = 13;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CronError {
    #[error("Expected 5 fields, got {0}")]
    FieldCount(usize),

    #[error("Invalid {field} field: {message}")]
    Field {
        field: &'static str,
        message: String,
    },

    #[error("No matching time within 13 months")]
    NoMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet {
    bits: u64,
    /// Field was exactly `*`.
    wildcard: bool,
}

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        value < 64 && self.bits & (1u64 << value) != 0
    }
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
};
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
};

impl FieldSpec {
    fn error(&self, message: impl Into<String>) -> CronError {
        CronError::Field {
            field: self.name,
            message: message.into(),
        }
    }

    fn number(&self, s: &str) -> Result<u32, CronError> {
        let value: u32 = s
            .parse()
            .map_err(|_| self.error(format!("'{}' is not a number", s)))?;
        if value < self.min || value > self.max {
            return Err(self.error(format!(
                "{} is outside {}-{}",
                value, self.min, self.max
            )));
        }
        Ok(value)
    }

    fn parse(&self, field: &str) -> Result<FieldSet, CronError> {
        let mut bits = 0u64;
        for item in field.split(',') {
            if item.is_empty() {
                return Err(self.error("empty list item"));
            }

            let (base, step) = match item.split_once('/') {
                Some((base, step)) => {
                    let step: u32 = step
                        .parse()
                        .map_err(|_| self.error(format!("invalid step '{}'", step)))?;
                    if step == 0 {
                        return Err(self.error("step must be positive"));
                    }
                    (base, Some(step))
                }
                None => (item, None),
            };

            let (lo, hi) = if base == "*" || base.is_empty() {
                (self.min, self.max)
            } else if let Some((a, b)) = base.split_once('-') {
                let (a, b) = (self.number(a)?, self.number(b)?);
                if a > b {
                    return Err(self.error(format!("range {}-{} is reversed", a, b)));
                }
                (a, b)
            } else {
                let a = self.number(base)?;
                match step {
                    Some(_) => (a, self.max),
                    None => (a, a),
                }
            };

            let step = step.unwrap_or(1);
            let mut value = lo;
            while value <= hi {
                bits |= 1u64 << value;
                match value.checked_add(step) {
                    Some(next) => value = next,
                    None => break,
                }
            }
        }
        Ok(FieldSet {
            bits,
            wildcard: field == "*",
        })
    }
}

/// A parsed schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
}

impl CronSchedule {
    /// Parses a whitespace-separated five-field expression.
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }

        let mut days_of_week = DAY_OF_WEEK.parse(fields[4])?;
        if days_of_week.contains(7) {
            days_of_week.bits = (days_of_week.bits & !(1u64 << 7)) | 1;
        }

        Ok(Self {
            minutes: MINUTE.parse(fields[0])?,
            hours: HOUR.parse(fields[1])?,
            days_of_month: DAY_OF_MONTH.parse(fields[2])?,
            months: MONTH.parse(fields[3])?,
            days_of_week,
        })
    }

    fn day_matches(&self, t: &NaiveDateTime) -> bool {
        let dom = self.days_of_month.contains(t.day());
        let dow = self
            .days_of_week
            .contains(t.weekday().num_days_from_sunday());
        match (self.days_of_month.wildcard, self.days_of_week.wildcard) {
            (false, false) => dom || dow,
            (false, true) => dom,
            (true, false) => dow,
            (true, true) => true,
        }
    }

    /// First matching minute strictly after `now`.
    ///
    /// # Errors
    /// [`CronError::NoMatch`] when nothing matches within the search window,
    /// e.g. `0 0 31 2 *`.
    pub fn next_after(&self, now: NaiveDateTime) -> Result<NaiveDateTime, CronError> {
        let truncated = now
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .ok_or(CronError::NoMatch)?;
        let mut t = truncated + Duration::minutes(1);
        let limit = now
            .checked_add_months(chrono::Months::new(SEARCH_MONTHS))
            .ok_or(CronError::NoMatch)?;

        while t <= limit {
            if !self.months.contains(t.month()) {
                t = first_of_next_month(t).ok_or(CronError::NoMatch)?;
                continue;
            }
            if !self.day_matches(&t) {
                t = next_day_start(t);
                continue;
            }
            if !self.hours.contains(t.hour()) {
                t = next_hour_start(t);
                continue;
            }
            if !self.minutes.contains(t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Ok(t);
        }
        Err(CronError::NoMatch)
    }
}

fn first_of_next_month(t: NaiveDateTime) -> Option<NaiveDateTime> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    chrono::NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

fn next_day_start(t: NaiveDateTime) -> NaiveDateTime {
    crate::segment::start_of_day(t.date()) + Duration::days(1)
}

fn next_hour_start(t: NaiveDateTime) -> NaiveDateTime {
    let hour_start = t - Duration::minutes(i64::from(t.minute()));
    hour_start + Duration::hours(1)
}

/// Parses `expr` and returns its next trigger after `now`.
pub fn next_trigger(expr: &str, now: NaiveDateTime) -> Result<NaiveDateTime, CronError> {
    CronSchedule::parse(expr)?.next_after(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    #[test]
    fn test_next_trigger_examples() {
        assert_eq!(
            next_trigger("0 10 * * *", at(2024, 1, 1, 9, 0)),
            Ok(at(2024, 1, 1, 10, 0))
        );
        assert_eq!(
            next_trigger("*/15 * * * *", at(2024, 1, 1, 10, 2)),
            Ok(at(2024, 1, 1, 10, 15))
        );
        assert_eq!(
            next_trigger("0 0 1 1 *", at(2024, 6, 1, 0, 0)),
            Ok(at(2025, 1, 1, 0, 0))
        );
    }

    #[test]
    fn test_next_is_strictly_after_now() {
        assert_eq!(
            next_trigger("0 10 * * *", at(2024, 1, 1, 10, 0)),
            Ok(at(2024, 1, 2, 10, 0))
        );
        let with_seconds = at(2024, 1, 1, 9, 59) + Duration::seconds(30);
        assert_eq!(
            next_trigger("0 10 * * *", with_seconds),
            Ok(at(2024, 1, 1, 10, 0))
        );
    }

    #[test]
    fn test_day_fields_or_rule() {
        // 2024-01-01 is a Monday. Day 15 OR any Friday: first hit is Fri 5th.
        assert_eq!(
            next_trigger("0 0 15 * 5", at(2024, 1, 1, 0, 0)),
            Ok(at(2024, 1, 5, 0, 0))
        );
        // Only day-of-week restricted
        assert_eq!(
            next_trigger("30 6 * * 0", at(2024, 1, 1, 0, 0)),
            Ok(at(2024, 1, 7, 6, 30))
        );
        // 7 is Sunday too
        assert_eq!(
            next_trigger("30 6 * * 7", at(2024, 1, 1, 0, 0)),
            Ok(at(2024, 1, 7, 6, 30))
        );
        // Only day-of-month restricted
        assert_eq!(
            next_trigger("0 12 20 * *", at(2024, 1, 1, 0, 0)),
            Ok(at(2024, 1, 20, 12, 0))
        );
    }

    #[test]
    fn test_step_forms() {
        // Step over a range
        assert_eq!(
            next_trigger("10-30/10 * * * *", at(2024, 1, 1, 10, 12)),
            Ok(at(2024, 1, 1, 10, 20))
        );
        // Single value with step runs to the field maximum
        assert_eq!(
            next_trigger("50/5 * * * *", at(2024, 1, 1, 10, 51)),
            Ok(at(2024, 1, 1, 10, 55))
        );
        // Lists
        assert_eq!(
            next_trigger("5,45 3 * * *", at(2024, 1, 1, 3, 10)),
            Ok(at(2024, 1, 1, 3, 45))
        );
    }

    #[test]
    fn test_leap_day_schedule() {
        assert_eq!(
            next_trigger("0 0 29 2 *", at(2024, 3, 1, 0, 0)),
            Err(CronError::NoMatch)
        );
        assert_eq!(
            next_trigger("0 0 29 2 *", at(2024, 1, 1, 0, 0)),
            Ok(at(2024, 2, 29, 0, 0))
        );
    }

    #[test]
    fn test_impossible_date_is_no_match() {
        assert_eq!(
            next_trigger("0 0 31 2 *", at(2024, 1, 1, 0, 0)),
            Err(CronError::NoMatch)
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            CronSchedule::parse("* * * *"),
            Err(CronError::FieldCount(4))
        );
        assert_eq!(CronSchedule::parse(""), Err(CronError::FieldCount(0)));
        for bad in [
            "60 * * * *",
            "* 24 * * *",
            "* * 0 * *",
            "* * * 13 *",
            "* * * * 8",
            "*/0 * * * *",
            "5-1 * * * *",
            "a * * * *",
            "1,,2 * * * *",
            "-1 * * * *",
        ] {
            assert!(
                matches!(CronSchedule::parse(bad), Err(CronError::Field { .. })),
                "expected field error for {:?}",
                bad
            );
        }
    }

    // *For any* minute and hour, a fixed daily schedule fires at that time within
    // the next 24 hours and never at or before `now`.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_daily_schedule_fires_within_a_day(
            minute in 0u32..60,
            hour in 0u32..24,
            offset in 0i64..(3 * 24 * 60),
        ) {
            let now = at(2024, 1, 1, 0, 0) + Duration::minutes(offset);
            let next = next_trigger(&format!("{} {} * * *", minute, hour), now).unwrap();

            prop_assert!(next > now);
            prop_assert!(next <= now + Duration::days(1));
            prop_assert_eq!(next.minute(), minute);
            prop_assert_eq!(next.hour(), hour);
        }

        #[test]
        fn prop_parse_never_panics(expr in "[0-9*/,\\- ]{0,20}") {
            let _ = CronSchedule::parse(&expr);
        }
    }
}
