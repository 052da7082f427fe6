//! Teacher-owned busy blocks read by validation.

use crate::calendar::TimeOfDay;
use crate::model::tenancy::TeacherId;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type PersonalEventId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventRecurrence {
    None,
    Daily,
    Weekly,
}

/// Busy block `[start_at, end_at)`, optionally repeating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalEvent {
    pub id: PersonalEventId,
    pub teacher_id: TeacherId,
    pub title: String,
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
    pub recurrence: EventRecurrence,
    /// Repeat every `interval` days or weeks.
    pub interval: u32,
    /// Last date an occurrence may start on.
    pub until: Option<NaiveDate>,
}

impl PersonalEvent {
    pub fn once(teacher_id: TeacherId, start_at: NaiveDateTime, end_at: NaiveDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            teacher_id,
            title: String::new(),
            start_at,
            end_at,
            recurrence: EventRecurrence::None,
            interval: 1,
            until: None,
        }
    }

    fn length(&self) -> Duration {
        self.end_at - self.start_at
    }

    /// Occurrence starting on `date`, if the recurrence produces one.
    pub fn occurrence_starting(&self, date: NaiveDate) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let first = self.start_at.date();
        if date < first || self.until.is_some_and(|until| date > until) {
            return None;
        }
        let offset_days = (date - first).num_days();
        let interval = i64::from(self.interval.max(1));
        let hits = match self.recurrence {
            EventRecurrence::None => offset_days == 0,
            EventRecurrence::Daily => offset_days % interval == 0,
            EventRecurrence::Weekly => offset_days % (7 * interval) == 0,
        };
        if !hits {
            return None;
        }
        let start = date.and_time(self.start_at.time());
        Some((start, start + self.length()))
    }

    /// Busy time-of-day segments clipped to `date`, including spill-over
    /// from occurrences that started on earlier days.
    pub fn busy_segments_on(&self, date: NaiveDate) -> Vec<(TimeOfDay, TimeOfDay)> {
        let day_start = date.and_time(NaiveTime::MIN);
        let day_end = day_start + Duration::days(1);
        let lookback = self.length().num_days().max(0) + 1;

        let mut segments = Vec::new();
        for back in (0..=lookback).rev() {
            let Some((start, end)) = self.occurrence_starting(date - Duration::days(back)) else {
                continue;
            };
            if end <= day_start || start >= day_end {
                continue;
            }
            let clipped_start = start.max(day_start);
            let clipped_end = end.min(day_end);
            let from = TimeOfDay::from_naive_time(clipped_start.time());
            let to = if clipped_end == day_end {
                TimeOfDay::END_OF_DAY
            } else {
                TimeOfDay::from_naive_time(clipped_end.time())
            };
            if from < to {
                segments.push((from, to));
            }
        }
        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn weekly_event_repeats_on_interval() {
        let mut event = PersonalEvent::once(Uuid::new_v4(), at(2, 9), at(2, 10));
        event.recurrence = EventRecurrence::Weekly;
        event.interval = 2;
        assert!(event.occurrence_starting(at(16, 0).date()).is_some());
        assert!(event.occurrence_starting(at(9, 0).date()).is_none());
        event.until = Some(at(10, 0).date());
        assert!(event.occurrence_starting(at(16, 0).date()).is_none());
    }

    #[test]
    fn overnight_event_spills_into_next_day() {
        let event = PersonalEvent::once(Uuid::new_v4(), at(6, 22), at(7, 1));
        let friday = event.busy_segments_on(at(6, 0).date());
        assert_eq!(friday, vec![(TimeOfDay::from_hm(22, 0).unwrap(), TimeOfDay::END_OF_DAY)]);
        let saturday = event.busy_segments_on(at(7, 0).date());
        assert_eq!(
            saturday,
            vec![(TimeOfDay::MIDNIGHT, TimeOfDay::from_hm(1, 0).unwrap())]
        );
    }
}
