//! Calendar primitives shared by validation, expansion and queries.
//!
//! # Responsibility
//! - Parse and format `HH:MM` time-of-day values and `YYYY-MM-DD` dates.
//! - Own the single weekday convention (1=Mon .. 7=Sun).
//! - Hold the process-wide center timezone handle.
//!
//! # Invariants
//! - `TimeOfDay` is minutes since local midnight in `0..=1440`; `24:00`
//!   only ever appears as the end of a split segment.
//! - Every weekday that crosses a boundary goes through
//!   `normalize_weekday` or `weekday_of`.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use chrono_tz::Tz;
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Zone used when no configuration set one.
pub const DEFAULT_CENTER_TIMEZONE: Tz = chrono_tz::Asia::Taipei;

/// Minutes in one calendar day.
pub const MINUTES_PER_DAY: u16 = 24 * 60;

const DATE_FORMAT: &str = "%Y-%m-%d";
const LOCAL_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

static TIME_OF_DAY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{2}):(\d{2})(?::(\d{2}))?$").expect("valid time-of-day regex")
});
static CENTER_TIMEZONE: OnceCell<Tz> = OnceCell::new();

/// Malformed calendar input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    InvalidTime(String),
    InvalidDate(String),
    InvalidDateTime(String),
    InvalidWeekday(i64),
    UnknownTimezone(String),
    TimezoneAlreadySet { active: String, requested: String },
}

impl Display for CalendarError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTime(value) => write!(f, "invalid time of day `{value}`, expected HH:MM"),
            Self::InvalidDate(value) => write!(f, "invalid date `{value}`, expected YYYY-MM-DD"),
            Self::InvalidDateTime(value) => write!(f, "invalid datetime `{value}`"),
            Self::InvalidWeekday(value) => {
                write!(f, "invalid weekday {value}, expected 1..7 (or 0 for Sunday)")
            }
            Self::UnknownTimezone(value) => write!(f, "unknown timezone `{value}`"),
            Self::TimezoneAlreadySet { active, requested } => write!(
                f,
                "center timezone already set to `{active}`; refusing to switch to `{requested}`"
            ),
        }
    }
}

impl Error for CalendarError {}

/// Local time of day with minute resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub const MIDNIGHT: Self = Self(0);
    /// `24:00`, the exclusive end of a day.
    pub const END_OF_DAY: Self = Self(MINUTES_PER_DAY);

    /// Builds a time from hour and minute; `None` when out of range.
    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self((hour * 60 + minute) as u16))
        } else {
            None
        }
    }

    /// Parses `HH:MM` or `HH:MM:SS` (seconds are dropped). Rejects `24:00`.
    pub fn parse(value: &str) -> Result<Self, CalendarError> {
        let parsed = Self::parse_segment_end(value)?;
        if parsed == Self::END_OF_DAY {
            return Err(CalendarError::InvalidTime(value.to_string()));
        }
        Ok(parsed)
    }

    /// Like [`TimeOfDay::parse`] but also accepts `24:00`.
    pub fn parse_segment_end(value: &str) -> Result<Self, CalendarError> {
        let invalid = || CalendarError::InvalidTime(value.to_string());
        let captures = TIME_OF_DAY_RE.captures(value.trim()).ok_or_else(invalid)?;
        let hour: u32 = captures[1].parse().map_err(|_| invalid())?;
        let minute: u32 = captures[2].parse().map_err(|_| invalid())?;
        let second: u32 = match captures.get(3) {
            Some(raw) => raw.as_str().parse().map_err(|_| invalid())?,
            None => 0,
        };
        if second >= 60 {
            return Err(invalid());
        }
        if hour == 24 && minute == 0 && second == 0 {
            return Ok(Self::END_OF_DAY);
        }
        Self::from_hm(hour, minute).ok_or_else(invalid)
    }

    pub fn from_naive_time(time: NaiveTime) -> Self {
        Self((time.hour() * 60 + time.minute()) as u16)
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    pub fn is_end_of_day(self) -> bool {
        self == Self::END_OF_DAY
    }

    /// Anchors this time on `date`; `24:00` becomes the next day's midnight.
    pub fn on(self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(NaiveTime::MIN) + Duration::minutes(i64::from(self.0))
    }
}

impl Display for TimeOfDay {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse_segment_end(&raw).map_err(serde::de::Error::custom)
    }
}

/// Parses `YYYY-MM-DD`.
pub fn parse_date(value: &str) -> Result<NaiveDate, CalendarError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|_| CalendarError::InvalidDate(value.to_string()))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// `yyyymmdd`, used inside synthetic occurrence ids.
pub fn compact_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Parses a datetime into center-local wall time.
///
/// Offsets (`2026-03-10T15:00:00+08:00`) are converted into the center zone;
/// values without an offset are taken as already local.
pub fn parse_local_datetime(value: &str) -> Result<NaiveDateTime, CalendarError> {
    let trimmed = value.trim();
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(with_offset.with_timezone(&center_timezone()).naive_local());
    }
    for format in [LOCAL_DATETIME_FORMAT, "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(parsed);
        }
    }
    Err(CalendarError::InvalidDateTime(value.to_string()))
}

pub fn format_local_datetime(value: NaiveDateTime) -> String {
    value.format(LOCAL_DATETIME_FORMAT).to_string()
}

/// Weekday of `date` as 1=Mon .. 7=Sun.
pub fn weekday_of(date: NaiveDate) -> u8 {
    date.weekday().number_from_monday() as u8
}

/// Canonicalises external weekday input; `0` (Sunday-zero encodings) maps to 7.
pub fn normalize_weekday(value: i64) -> Result<u8, CalendarError> {
    match value {
        0 => Ok(7),
        1..=7 => Ok(value as u8),
        other => Err(CalendarError::InvalidWeekday(other)),
    }
}

pub fn next_weekday(weekday: u8) -> u8 {
    weekday % 7 + 1
}

pub fn prev_weekday(weekday: u8) -> u8 {
    if weekday <= 1 {
        7
    } else {
        weekday - 1
    }
}

/// `true` when a slot ends before it starts, i.e. runs past midnight.
pub fn is_cross_midnight(start: TimeOfDay, end: TimeOfDay) -> bool {
    end < start
}

/// Half-open interval intersection on same-day minute ranges.
pub fn time_ranges_overlap(
    a_start: TimeOfDay,
    a_end: TimeOfDay,
    b_start: TimeOfDay,
    b_end: TimeOfDay,
) -> bool {
    a_start < b_end && a_end > b_start
}

/// Slot length in minutes, accounting for midnight crossing.
pub fn slot_minutes(start: TimeOfDay, end: TimeOfDay) -> u32 {
    let start = u32::from(start.minutes());
    let end = u32::from(end.minutes());
    if end > start {
        end - start
    } else {
        end + u32::from(MINUTES_PER_DAY) - start
    }
}

pub fn minutes_between(from: NaiveDateTime, to: NaiveDateTime) -> i64 {
    (to - from).num_minutes()
}

/// Inclusive day iterator; empty when `to < from`.
pub fn dates_between(from: NaiveDate, to: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    let days = (to - from).num_days();
    (0..=days.max(-1)).map(move |offset| from + Duration::days(offset))
}

/// First date on or after `date` that falls on `weekday`.
pub fn first_on_or_after(date: NaiveDate, weekday: u8) -> NaiveDate {
    let current = i64::from(weekday_of(date));
    let delta = (i64::from(weekday) - current).rem_euclid(7);
    date + Duration::days(delta)
}

/// Resolves an IANA zone name.
pub fn parse_timezone(name: &str) -> Result<Tz, CalendarError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| CalendarError::UnknownTimezone(name.to_string()))
}

/// Sets the process-wide center zone once.
///
/// Repeating the same zone is a no-op; a different zone is rejected.
pub fn init_center_timezone(name: &str) -> Result<Tz, CalendarError> {
    let requested = parse_timezone(name)?;
    let active = *CENTER_TIMEZONE.get_or_init(|| requested);
    if active != requested {
        return Err(CalendarError::TimezoneAlreadySet {
            active: active.name().to_string(),
            requested: requested.name().to_string(),
        });
    }
    Ok(active)
}

/// Center zone, falling back to `Asia/Taipei` on first use.
pub fn center_timezone() -> Tz {
    *CENTER_TIMEZONE.get_or_init(|| DEFAULT_CENTER_TIMEZONE)
}
