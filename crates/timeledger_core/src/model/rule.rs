//! Weekly recurring rule model.
//!
//! # Responsibility
//! - Describe one weekly slot (weekday + time-of-day pair) bound to an
//!   offering, room and optional teacher over an effective date range.
//! - Split cross-midnight slots into same-day segments.
//!
//! # Invariants
//! - `start_time != end_time`; `end_time < start_time` means the slot
//!   runs into the next day.
//! - `effective_range.end_date`, when set, is never before `start_date`.
//! - Only PLANNED and CONFIRMED rules that are not soft-deleted produce
//!   occurrences or block other rules.

use crate::calendar::{
    first_on_or_after, is_cross_midnight, next_weekday, slot_minutes, weekday_of, TimeOfDay,
};
use crate::model::tenancy::{CenterId, OfferingId, RoomId, TeacherId};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type RuleId = Uuid;

/// Rule lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleStatus {
    /// Draft slot; expands and blocks like a confirmed one.
    Planned,
    Confirmed,
    Suspended,
    Archived,
}

impl RuleStatus {
    /// Whether rules in this state produce occurrences.
    pub fn is_schedulable(self) -> bool {
        matches!(self, Self::Planned | Self::Confirmed)
    }
}

/// Teacher slot on a rule or occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "teacher_id", rename_all = "snake_case")]
pub enum TeacherAssignment {
    Assigned(TeacherId),
    Unassigned,
}

impl TeacherAssignment {
    pub fn from_option(value: Option<TeacherId>) -> Self {
        value.map_or(Self::Unassigned, Self::Assigned)
    }

    pub fn teacher_id(self) -> Option<TeacherId> {
        match self {
            Self::Assigned(id) => Some(id),
            Self::Unassigned => None,
        }
    }

    pub fn is_assigned_to(self, teacher_id: TeacherId) -> bool {
        self == Self::Assigned(teacher_id)
    }

    /// Two assignments collide only when both name the same teacher.
    pub fn shares_teacher_with(self, other: Self) -> bool {
        match (self, other) {
            (Self::Assigned(left), Self::Assigned(right)) => left == right,
            _ => false,
        }
    }
}

/// Closed date range; an unset `end_date` runs forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EffectiveRange {
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

impl EffectiveRange {
    pub fn new(start_date: NaiveDate, end_date: Option<NaiveDate>) -> Result<Self, RuleValidationError> {
        if let Some(end_date) = end_date {
            if end_date < start_date {
                return Err(RuleValidationError::InvalidRange {
                    start_date,
                    end_date,
                });
            }
        }
        Ok(Self {
            start_date,
            end_date,
        })
    }

    pub fn open_from(start_date: NaiveDate) -> Self {
        Self {
            start_date,
            end_date: None,
        }
    }

    pub fn single_day(date: NaiveDate) -> Self {
        Self {
            start_date: date,
            end_date: Some(date),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start_date && self.end_date.map_or(true, |end| date <= end)
    }

    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let start_date = self.start_date.max(other.start_date);
        let end_date = match (self.end_date, other.end_date) {
            (Some(left), Some(right)) => Some(left.min(right)),
            (Some(only), None) | (None, Some(only)) => Some(only),
            (None, None) => None,
        };
        match end_date {
            Some(end) if end < start_date => None,
            _ => Some(Self {
                start_date,
                end_date,
            }),
        }
    }

    /// Moves both ends by `days`.
    pub fn shifted(&self, days: i64) -> Self {
        Self {
            start_date: self.start_date + Duration::days(days),
            end_date: self.end_date.map(|end| end + Duration::days(days)),
        }
    }

    /// Whether some date in the range falls on `weekday`.
    pub fn includes_weekday(&self, weekday: u8) -> bool {
        self.contains(first_on_or_after(self.start_date, weekday))
    }

    /// Range ending the day before `date`; `None` when nothing would remain.
    pub fn truncated_before(&self, date: NaiveDate) -> Option<Self> {
        let last = date - Duration::days(1);
        if last < self.start_date {
            return None;
        }
        let end_date = Some(self.end_date.map_or(last, |end| end.min(last)));
        Some(Self {
            start_date: self.start_date,
            end_date,
        })
    }

    /// Last date to enumerate, capping open ranges at `horizon`.
    pub fn last_date_until(&self, horizon: NaiveDate) -> NaiveDate {
        self.end_date.map_or(horizon, |end| end.min(horizon))
    }
}

/// Malformed rule fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleValidationError {
    InvalidWeekday(u8),
    ZeroLengthSlot(TimeOfDay),
    /// `24:00` is only valid as a split segment end.
    EndOfDayBoundary,
    InvalidRange {
        start_date: NaiveDate,
        end_date: NaiveDate,
    },
}

impl Display for RuleValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidWeekday(value) => write!(f, "weekday must be 1..7, got {value}"),
            Self::ZeroLengthSlot(time) => {
                write!(f, "start_time and end_time must differ, both are {time}")
            }
            Self::EndOfDayBoundary => write!(f, "24:00 is not a valid rule time"),
            Self::InvalidRange {
                start_date,
                end_date,
            } => write!(f, "end_date {end_date} is before start_date {start_date}"),
        }
    }
}

impl Error for RuleValidationError {}

/// Which half of a cross-midnight occurrence an entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossPart {
    Start,
    End,
}

/// Same-day piece of a rule used by overlap checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleSegment {
    pub weekday: u8,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    /// Dates on which this segment occurs.
    pub range: EffectiveRange,
}

/// Splits a weekly slot per the cross-midnight convention.
pub fn split_slot(
    weekday: u8,
    start_time: TimeOfDay,
    end_time: TimeOfDay,
    range: EffectiveRange,
) -> Vec<RuleSegment> {
    if !is_cross_midnight(start_time, end_time) {
        return vec![RuleSegment {
            weekday,
            start_time,
            end_time,
            range,
        }];
    }
    vec![
        RuleSegment {
            weekday,
            start_time,
            end_time: TimeOfDay::END_OF_DAY,
            range,
        },
        RuleSegment {
            weekday: next_weekday(weekday),
            start_time: TimeOfDay::MIDNIGHT,
            end_time,
            range: range.shifted(1),
        },
    ]
}

/// Recurring weekly definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRule {
    pub id: RuleId,
    pub center_id: CenterId,
    pub offering_id: OfferingId,
    pub teacher: TeacherAssignment,
    pub room_id: RoomId,
    pub name: String,
    /// 1=Mon .. 7=Sun.
    pub weekday: u8,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub duration_minutes: u32,
    pub effective_range: EffectiveRange,
    pub status: RuleStatus,
    pub skip_holiday: bool,
    /// After this instant the rule no longer accepts exception proposals.
    pub lock_at: Option<DateTime<Utc>>,
    /// Dates skipped without an exception row.
    pub suspended_dates: Vec<NaiveDate>,
    pub is_deleted: bool,
}

impl ScheduleRule {
    /// Creates a CONFIRMED rule with a generated id.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        center_id: CenterId,
        offering_id: OfferingId,
        teacher: TeacherAssignment,
        room_id: RoomId,
        weekday: u8,
        start_time: TimeOfDay,
        end_time: TimeOfDay,
        effective_range: EffectiveRange,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            center_id,
            offering_id,
            teacher,
            room_id,
            name: String::new(),
            weekday,
            start_time,
            end_time,
            duration_minutes: slot_minutes(start_time, end_time),
            effective_range,
            status: RuleStatus::Confirmed,
            skip_holiday: true,
            lock_at: None,
            suspended_dates: Vec::new(),
            is_deleted: false,
        }
    }

    pub fn validate(&self) -> Result<(), RuleValidationError> {
        if !(1..=7).contains(&self.weekday) {
            return Err(RuleValidationError::InvalidWeekday(self.weekday));
        }
        if self.start_time == self.end_time {
            return Err(RuleValidationError::ZeroLengthSlot(self.start_time));
        }
        if self.start_time.is_end_of_day() || self.end_time.is_end_of_day() {
            return Err(RuleValidationError::EndOfDayBoundary);
        }
        EffectiveRange::new(
            self.effective_range.start_date,
            self.effective_range.end_date,
        )?;
        Ok(())
    }

    /// Re-derives `duration_minutes` after the slot changed.
    pub fn set_slot(&mut self, weekday: u8, start_time: TimeOfDay, end_time: TimeOfDay) {
        self.weekday = weekday;
        self.start_time = start_time;
        self.end_time = end_time;
        self.duration_minutes = slot_minutes(start_time, end_time);
    }

    pub fn is_cross_midnight(&self) -> bool {
        is_cross_midnight(self.start_time, self.end_time)
    }

    /// Not deleted and in a schedulable status.
    pub fn is_active(&self) -> bool {
        !self.is_deleted && self.status.is_schedulable()
    }

    pub fn segments(&self) -> Vec<RuleSegment> {
        split_slot(
            self.weekday,
            self.start_time,
            self.end_time,
            self.effective_range,
        )
    }

    /// Whether `date` is an occurrence start date of this rule.
    pub fn occurs_on(&self, date: NaiveDate) -> bool {
        weekday_of(date) == self.weekday && self.effective_range.contains(date)
    }

    pub fn is_suspended_on(&self, date: NaiveDate) -> bool {
        self.suspended_dates.contains(&date)
    }

    /// Occurrence start dates in `[from, to]`.
    pub fn occurrences_between(&self, from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
        let Some(window) = self.effective_range.intersect(&EffectiveRange {
            start_date: from,
            end_date: Some(to),
        }) else {
            return Vec::new();
        };
        let last = window.end_date.unwrap_or(to);
        let mut dates = Vec::new();
        let mut current = first_on_or_after(window.start_date, self.weekday);
        while current <= last {
            dates.push(current);
            current += Duration::days(7);
        }
        dates
    }

    /// Full local start/end of the occurrence starting on `date`.
    pub fn span_on(&self, date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
        let start = self.start_time.on(date);
        let end_date = if self.is_cross_midnight() {
            date + Duration::days(1)
        } else {
            date
        };
        (start, self.end_time.on(end_date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::parse_date;

    fn date(value: &str) -> NaiveDate {
        parse_date(value).unwrap()
    }

    fn time(value: &str) -> TimeOfDay {
        TimeOfDay::parse(value).unwrap()
    }

    fn rule(weekday: u8, start: &str, end: &str, range: EffectiveRange) -> ScheduleRule {
        ScheduleRule::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            TeacherAssignment::Unassigned,
            Uuid::new_v4(),
            weekday,
            time(start),
            time(end),
            range,
        )
    }

    #[test]
    fn cross_midnight_rule_splits_into_two_segments() {
        let friday = rule(5, "23:00", "02:00", EffectiveRange::open_from(date("2026-03-06")));
        let segments = friday.segments();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].weekday, 5);
        assert_eq!(segments[0].end_time, TimeOfDay::END_OF_DAY);
        assert_eq!(segments[1].weekday, 6);
        assert_eq!(segments[1].start_time, TimeOfDay::MIDNIGHT);
        assert_eq!(segments[1].range.start_date, date("2026-03-07"));
        assert_eq!(friday.duration_minutes, 180);
    }

    #[test]
    fn validate_rejects_zero_length_and_bad_weekday() {
        let mut same = rule(1, "10:00", "10:00", EffectiveRange::open_from(date("2026-01-05")));
        assert_eq!(
            same.validate(),
            Err(RuleValidationError::ZeroLengthSlot(time("10:00")))
        );
        same.set_slot(9, time("10:00"), time("11:00"));
        assert_eq!(same.validate(), Err(RuleValidationError::InvalidWeekday(9)));
    }

    #[test]
    fn truncation_before_first_day_leaves_nothing() {
        let range = EffectiveRange::new(date("2026-01-05"), Some(date("2026-12-28"))).unwrap();
        assert!(range.truncated_before(date("2026-01-05")).is_none());
        let kept = range.truncated_before(date("2026-03-02")).unwrap();
        assert_eq!(kept.end_date, Some(date("2026-03-01")));
    }

    #[test]
    fn occurrences_respect_range_and_weekday() {
        let range = EffectiveRange::new(date("2026-01-05"), Some(date("2026-01-26"))).unwrap();
        let monday = rule(1, "10:00", "11:00", range);
        let dates = monday.occurrences_between(date("2026-01-01"), date("2026-02-28"));
        assert_eq!(
            dates,
            vec![
                date("2026-01-05"),
                date("2026-01-12"),
                date("2026-01-19"),
                date("2026-01-26")
            ]
        );
    }

    #[test]
    fn range_weekday_inclusion_handles_short_ranges() {
        let tue_to_thu = EffectiveRange::new(date("2026-01-06"), Some(date("2026-01-08"))).unwrap();
        assert!(tue_to_thu.includes_weekday(3));
        assert!(!tue_to_thu.includes_weekday(1));
        assert!(EffectiveRange::open_from(date("2026-01-06")).includes_weekday(1));
    }

    #[test]
    fn teacher_assignment_only_collides_on_same_teacher() {
        let id = Uuid::new_v4();
        let assigned = TeacherAssignment::Assigned(id);
        assert!(assigned.shares_teacher_with(TeacherAssignment::Assigned(id)));
        assert!(!assigned.shares_teacher_with(TeacherAssignment::Unassigned));
        assert!(!TeacherAssignment::Unassigned.shares_teacher_with(TeacherAssignment::Unassigned));
    }
}
