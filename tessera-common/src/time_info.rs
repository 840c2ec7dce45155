//! Local date/time handling for time-dependent costing
//!
//! Time zone resolution happens upstream: callers hand over the local wall-clock
//! time of a location and everything here works on that local time.

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const SECONDS_PER_DAY: u32 = 86_400;
pub const SECONDS_PER_WEEK: u32 = 7 * SECONDS_PER_DAY;

/// Accepted text forms for local date-times
const DATE_TIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"];

/// Parse a local date-time, `YYYY-MM-DDTHH:MM[:SS]`
pub fn parse_local(text: &str) -> Result<NaiveDateTime> {
    DATE_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text.trim(), fmt).ok())
        .ok_or_else(|| Error::InvalidInput(format!("invalid local date-time '{text}'")))
}

/// Day of week of a second of the week, 0 = Sunday
#[inline]
pub const fn day_of_week(second_of_week: u32) -> u32 {
    second_of_week / SECONDS_PER_DAY
}

#[inline]
pub const fn second_of_day(second_of_week: u32) -> u32 {
    second_of_week % SECONDS_PER_DAY
}

/// Local time of a location plus the derived second of the week
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInfo {
    /// Local wall-clock time as seconds since 1970-01-01T00:00 (no offset applied)
    pub local_time: i64,
    /// Seconds since Sunday 00:00 local time
    pub second_of_week: u32,
}

impl TimeInfo {
    pub fn from_local(date_time: NaiveDateTime) -> Self {
        let day = date_time.weekday().num_days_from_sunday();
        Self {
            local_time: date_time.and_utc().timestamp(),
            second_of_week: day * SECONDS_PER_DAY + date_time.num_seconds_from_midnight(),
        }
    }

    /// Parse `YYYY-MM-DDTHH:MM[:SS]`
    pub fn parse(text: &str) -> Result<Self> {
        parse_local(text).map(Self::from_local)
    }

    /// Time after travelling `secs` seconds
    pub fn forward(&self, secs: f32) -> Self {
        self.offset(secs.round() as i64)
    }

    /// Time `secs` seconds earlier
    pub fn reverse(&self, secs: f32) -> Self {
        self.offset(-(secs.round() as i64))
    }

    fn offset(&self, delta: i64) -> Self {
        Self {
            local_time: self.local_time + delta,
            second_of_week: (i64::from(self.second_of_week) + delta)
                .rem_euclid(i64::from(SECONDS_PER_WEEK)) as u32,
        }
    }

    /// Local wall-clock date-time
    pub fn date_time(&self) -> Option<NaiveDateTime> {
        DateTime::from_timestamp(self.local_time, 0).map(|dt| dt.naive_utc())
    }
}

impl From<NaiveDateTime> for TimeInfo {
    fn from(date_time: NaiveDateTime) -> Self {
        Self::from_local(date_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monday_morning_second_of_week() {
        // 2024-05-06 is a Monday
        let info = TimeInfo::parse("2024-05-06T08:00").unwrap();
        assert_eq!(day_of_week(info.second_of_week), 1);
        assert_eq!(second_of_day(info.second_of_week), 8 * 3600);
        assert_eq!(info.second_of_week, SECONDS_PER_DAY + 8 * 3600);
    }

    #[test]
    fn forward_wraps_at_end_of_week() {
        // Saturday 23:59:50 + 20s => Sunday 00:00:10
        let info = TimeInfo::parse("2024-05-11T23:59:50").unwrap();
        let later = info.forward(20.0);
        assert_eq!(later.second_of_week, 10);
        assert_eq!(later.local_time - info.local_time, 20);
    }

    #[test]
    fn reverse_and_date_time() {
        let info = TimeInfo::parse("2024-05-06T08:00:00").unwrap();
        let earlier = info.reverse(90.0);
        assert_eq!(
            earlier.date_time().unwrap().format("%Y-%m-%dT%H:%M:%S").to_string(),
            "2024-05-06T07:58:30"
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(TimeInfo::parse("monday morning").is_err());
        assert!(parse_local("2024-13-01T08:00").is_err());
    }

    #[test]
    fn parse_local_accepts_optional_seconds() {
        let short = parse_local("2024-05-06T08:00").unwrap();
        let long = parse_local(" 2024-05-06T08:00:00 ").unwrap();
        assert_eq!(short, long);
        assert_eq!(TimeInfo::from_local(short).date_time(), Some(short));
    }
}
