//! Slot admissibility checks.
//!
//! # Responsibility
//! - Detect hard overlaps against other active rules (teacher or room),
//!   approved ADD sessions and a teacher's personal events.
//! - Detect per-course teacher/room buffer violations against the
//!   preceding session on the same weekday.
//!
//! # Invariants
//! - Cross-midnight slots are compared as their two same-day segments;
//!   candidates are loaded from the previous, same and next weekday.
//! - Overlap conflicts are never overridable; buffer conflicts always are.
//! - `valid` means no hard conflict and, unless overridden, no buffer
//!   conflict. Buffer conflicts stay in `conflicts` either way.

use crate::calendar::{
    first_on_or_after, is_cross_midnight, next_weekday, prev_weekday, time_ranges_overlap,
    weekday_of, TimeOfDay,
};
use crate::error::{EngineError, EngineResult};
use crate::model::exception::{ExceptionId, ExceptionStatus, ExceptionType, ScheduleException};
use crate::model::personal_event::PersonalEventId;
use crate::model::rule::{
    split_slot, EffectiveRange, RuleId, RuleSegment, RuleValidationError, ScheduleRule,
    TeacherAssignment,
};
use crate::model::tenancy::{CenterId, Course, CourseId, RoomId};
use crate::repo::{ScheduleRepository, Store};
use crate::service::EngineContext;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const DEFAULT_EVENT_HORIZON_DAYS: u32 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictKind {
    TeacherOverlap,
    RoomOverlap,
    TeacherBuffer,
    RoomBuffer,
}

impl ConflictKind {
    pub fn is_buffer(self) -> bool {
        matches!(self, Self::TeacherBuffer | Self::RoomBuffer)
    }
}

/// What the request collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictSource {
    Rule,
    /// Session added by an approved ADD exception.
    AddedSession,
    PersonalEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    #[serde(rename = "type")]
    pub kind: ConflictKind,
    pub source: ConflictSource,
    pub message: String,
    pub can_override: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_minutes: Option<u32>,
    /// Minutes missing to satisfy the buffer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_minutes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicting_rule_id: Option<RuleId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicting_exception_id: Option<ExceptionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personal_event_id: Option<PersonalEventId>,
}

impl Conflict {
    fn rule_overlap(kind: ConflictKind, candidate: &ScheduleRule, clash: &SegmentClash) -> Self {
        let subject = match kind {
            ConflictKind::TeacherOverlap => "teacher",
            _ => "room",
        };
        Self {
            kind,
            source: ConflictSource::Rule,
            message: format!(
                "{subject} already booked by rule {} ({}-{}) on weekday {} from {}",
                candidate.id,
                candidate.start_time,
                candidate.end_time,
                clash.weekday,
                clash.first_date
            ),
            can_override: false,
            required_minutes: None,
            diff_minutes: None,
            conflicting_rule_id: Some(candidate.id),
            conflicting_exception_id: None,
            personal_event_id: None,
        }
    }

    fn added_session(kind: ConflictKind, add: &ScheduleException, start: NaiveDateTime) -> Self {
        let subject = match kind {
            ConflictKind::TeacherOverlap => "teacher",
            _ => "room",
        };
        Self {
            kind,
            source: ConflictSource::AddedSession,
            message: format!(
                "{subject} already booked by approved exception {} at {}",
                add.id, start
            ),
            can_override: false,
            required_minutes: None,
            diff_minutes: None,
            conflicting_rule_id: Some(add.rule_id),
            conflicting_exception_id: Some(add.id),
            personal_event_id: None,
        }
    }

    fn personal_event(event_id: PersonalEventId, title: &str, date: NaiveDate) -> Self {
        Self {
            kind: ConflictKind::TeacherOverlap,
            source: ConflictSource::PersonalEvent,
            message: format!("teacher has personal event `{title}` on {date}"),
            can_override: false,
            required_minutes: None,
            diff_minutes: None,
            conflicting_rule_id: None,
            conflicting_exception_id: None,
            personal_event_id: Some(event_id),
        }
    }

    pub fn is_hard(&self) -> bool {
        !self.can_override
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub conflicts: Vec<Conflict>,
}

impl ValidationResult {
    pub fn from_conflicts(conflicts: Vec<Conflict>, allow_buffer_override: bool) -> Self {
        let hard = conflicts.iter().any(Conflict::is_hard);
        let buffer = conflicts.iter().any(|conflict| conflict.kind.is_buffer());
        Self {
            valid: !hard && (allow_buffer_override || !buffer),
            conflicts,
        }
    }

    pub fn has_hard_conflicts(&self) -> bool {
        self.conflicts.iter().any(Conflict::is_hard)
    }

    pub fn has_buffer_conflicts(&self) -> bool {
        self.conflicts.iter().any(|conflict| conflict.kind.is_buffer())
    }

    pub fn summary(&self) -> String {
        if self.conflicts.is_empty() {
            return "no conflicts".to_string();
        }
        self.conflicts
            .iter()
            .map(|conflict| conflict.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Maps an invalid result onto the caller-facing error for rule writes.
    pub fn into_rule_error(self) -> EngineResult<Self> {
        if self.valid {
            return Ok(self);
        }
        if self.has_hard_conflicts() {
            return Err(EngineError::Overlap(self));
        }
        Err(EngineError::Buffer(self))
    }
}

/// Proposed weekly slot, or a single dated occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotQuery {
    pub center_id: CenterId,
    pub teacher: TeacherAssignment,
    pub room_id: RoomId,
    pub weekday: u8,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    /// Occurrence start dates the slot covers.
    pub range: EffectiveRange,
    /// Rules ignored as candidates, e.g. the rule being edited.
    pub exclude_rules: Vec<RuleId>,
    /// Personal events are only scanned this far past `range.start_date`.
    pub horizon_days: u32,
}

impl SlotQuery {
    /// Slot of `rule`, excluding the rule itself.
    pub fn for_rule(rule: &ScheduleRule) -> Self {
        Self {
            center_id: rule.center_id,
            teacher: rule.teacher,
            room_id: rule.room_id,
            weekday: rule.weekday,
            start_time: rule.start_time,
            end_time: rule.end_time,
            range: rule.effective_range,
            exclude_rules: vec![rule.id],
            horizon_days: DEFAULT_EVENT_HORIZON_DAYS,
        }
    }

    /// One occurrence on `date`.
    pub fn on_date(
        center_id: CenterId,
        teacher: TeacherAssignment,
        room_id: RoomId,
        date: NaiveDate,
        start_time: TimeOfDay,
        end_time: TimeOfDay,
    ) -> Self {
        Self {
            center_id,
            teacher,
            room_id,
            weekday: weekday_of(date),
            start_time,
            end_time,
            range: EffectiveRange::single_day(date),
            exclude_rules: Vec::new(),
            horizon_days: DEFAULT_EVENT_HORIZON_DAYS,
        }
    }

    pub fn excluding(mut self, rule_id: RuleId) -> Self {
        if !self.exclude_rules.contains(&rule_id) {
            self.exclude_rules.push(rule_id);
        }
        self
    }

    pub fn with_assignment(mut self, teacher: TeacherAssignment, room_id: RoomId) -> Self {
        self.teacher = teacher;
        self.room_id = room_id;
        self
    }

    pub fn with_horizon(mut self, horizon_days: u32) -> Self {
        self.horizon_days = horizon_days;
        self
    }

    fn is_single_day(&self) -> bool {
        self.range.end_date == Some(self.range.start_date)
    }

    fn segments(&self) -> Vec<RuleSegment> {
        split_slot(self.weekday, self.start_time, self.end_time, self.range)
    }

    fn validate(&self) -> Result<(), RuleValidationError> {
        if !(1..=7).contains(&self.weekday) {
            return Err(RuleValidationError::InvalidWeekday(self.weekday));
        }
        if self.start_time == self.end_time {
            return Err(RuleValidationError::ZeroLengthSlot(self.start_time));
        }
        if self.start_time.is_end_of_day() || self.end_time.is_end_of_day() {
            return Err(RuleValidationError::EndOfDayBoundary);
        }
        EffectiveRange::new(self.range.start_date, self.range.end_date)?;
        Ok(())
    }
}

/// Caller-supplied end of the preceding session; inferred when absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferHints {
    pub teacher_prev_end: Option<TimeOfDay>,
    pub room_prev_end: Option<TimeOfDay>,
}

/// Where two segments first collide.
struct SegmentClash {
    weekday: u8,
    first_date: NaiveDate,
    /// Start date of the candidate occurrence owning the clashing segment.
    candidate_occurrence: NaiveDate,
}

/// Hard overlaps of `query` against active rules and personal events.
pub fn check_overlap(
    repo: &dyn ScheduleRepository,
    query: &SlotQuery,
) -> EngineResult<ValidationResult> {
    query.validate()?;
    let candidates = load_candidates(repo, query)?;
    let mut conflicts = rule_overlaps(repo, query, &candidates)?;
    conflicts.extend(added_session_overlaps(repo, query)?);
    conflicts.extend(personal_event_overlaps(repo, query)?);
    debug!(
        "event=check_overlap module=validation status=ok center_id={} weekday={} candidates={} conflicts={}",
        query.center_id,
        query.weekday,
        candidates.len(),
        conflicts.len()
    );
    Ok(ValidationResult::from_conflicts(conflicts, false))
}

pub fn check_teacher_buffer(
    course: &Course,
    prev_end: TimeOfDay,
    next_start: TimeOfDay,
) -> Option<Conflict> {
    buffer_conflict(
        ConflictKind::TeacherBuffer,
        course.teacher_buffer_min,
        prev_end,
        next_start,
    )
}

pub fn check_room_buffer(
    course: &Course,
    prev_end: TimeOfDay,
    next_start: TimeOfDay,
) -> Option<Conflict> {
    buffer_conflict(
        ConflictKind::RoomBuffer,
        course.room_buffer_min,
        prev_end,
        next_start,
    )
}

/// Overlap plus buffer checks for a slot of `course`.
pub fn validate_full(
    repo: &dyn ScheduleRepository,
    query: &SlotQuery,
    course: &Course,
    hints: BufferHints,
    allow_buffer_override: bool,
) -> EngineResult<ValidationResult> {
    let overlap = check_overlap(repo, query)?;
    let mut conflicts = overlap.conflicts;

    let wants_buffers = course.teacher_buffer_min > 0 || course.room_buffer_min > 0;
    let (inferred_teacher, inferred_room) =
        if wants_buffers && (hints.teacher_prev_end.is_none() || hints.room_prev_end.is_none()) {
            infer_prev_ends(repo, query)?
        } else {
            (None, None)
        };

    if let Some(prev_end) = hints.teacher_prev_end.or(inferred_teacher) {
        conflicts.extend(check_teacher_buffer(course, prev_end, query.start_time));
    }
    if let Some(prev_end) = hints.room_prev_end.or(inferred_room) {
        conflicts.extend(check_room_buffer(course, prev_end, query.start_time));
    }

    Ok(ValidationResult::from_conflicts(
        conflicts,
        allow_buffer_override,
    ))
}

fn buffer_conflict(
    kind: ConflictKind,
    required: u32,
    prev_end: TimeOfDay,
    next_start: TimeOfDay,
) -> Option<Conflict> {
    if required == 0 {
        return None;
    }
    let gap = i64::from(next_start.minutes()) - i64::from(prev_end.minutes());
    let required_i64 = i64::from(required);
    if gap >= required_i64 {
        return None;
    }
    let subject = match kind {
        ConflictKind::TeacherBuffer => "teacher",
        _ => "room",
    };
    Some(Conflict {
        kind,
        source: ConflictSource::Rule,
        message: format!(
            "{subject} buffer requires {required} minutes after {prev_end}, gap is {gap}"
        ),
        can_override: true,
        required_minutes: Some(required),
        diff_minutes: Some(required_i64 - gap),
        conflicting_rule_id: None,
        conflicting_exception_id: None,
        personal_event_id: None,
    })
}

fn load_candidates(
    repo: &dyn ScheduleRepository,
    query: &SlotQuery,
) -> EngineResult<Vec<ScheduleRule>> {
    let mut weekdays = vec![
        prev_weekday(query.weekday),
        query.weekday,
        next_weekday(query.weekday),
    ];
    weekdays.sort_unstable();
    weekdays.dedup();
    let rules = repo.list_active_rules_on_weekdays(query.center_id, &weekdays)?;
    Ok(rules
        .into_iter()
        .filter(|rule| !query.exclude_rules.contains(&rule.id) && rule.is_active())
        .collect())
}

fn rule_overlaps(
    repo: &dyn ScheduleRepository,
    query: &SlotQuery,
    candidates: &[ScheduleRule],
) -> EngineResult<Vec<Conflict>> {
    let query_segments = query.segments();
    let mut conflicts = Vec::new();
    for candidate in candidates {
        let shares_teacher = query.teacher.shares_teacher_with(candidate.teacher);
        let shares_room = query.room_id == candidate.room_id;
        if !shares_teacher && !shares_room {
            continue;
        }
        let Some(clash) = first_clash(&query_segments, candidate) else {
            continue;
        };
        if query.is_single_day()
            && approved_cancel_exists(repo, candidate.id, clash.candidate_occurrence)?
        {
            continue;
        }
        if shares_teacher {
            conflicts.push(Conflict::rule_overlap(
                ConflictKind::TeacherOverlap,
                candidate,
                &clash,
            ));
        }
        if shares_room {
            conflicts.push(Conflict::rule_overlap(
                ConflictKind::RoomOverlap,
                candidate,
                &clash,
            ));
        }
    }
    Ok(conflicts)
}

fn first_clash(query_segments: &[RuleSegment], candidate: &ScheduleRule) -> Option<SegmentClash> {
    let candidate_segments = candidate.segments();
    for query_segment in query_segments {
        for (index, candidate_segment) in candidate_segments.iter().enumerate() {
            if query_segment.weekday != candidate_segment.weekday {
                continue;
            }
            if !time_ranges_overlap(
                query_segment.start_time,
                query_segment.end_time,
                candidate_segment.start_time,
                candidate_segment.end_time,
            ) {
                continue;
            }
            let Some(shared) = query_segment.range.intersect(&candidate_segment.range) else {
                continue;
            };
            if !shared.includes_weekday(query_segment.weekday) {
                continue;
            }
            let first_date = first_on_or_after(shared.start_date, query_segment.weekday);
            let candidate_occurrence = first_date - Duration::days(index as i64);
            return Some(SegmentClash {
                weekday: query_segment.weekday,
                first_date,
                candidate_occurrence,
            });
        }
    }
    None
}

/// Occurrence dates of `query` up to its horizon.
fn query_dates(query: &SlotQuery) -> Vec<NaiveDate> {
    let first = first_on_or_after(query.range.start_date, query.weekday);
    let horizon = query.range.start_date + Duration::days(i64::from(query.horizon_days));
    let last = query.range.last_date_until(horizon);
    let mut dates = Vec::new();
    let mut date = first;
    while date <= last {
        dates.push(date);
        date += Duration::days(7);
    }
    dates
}

/// Hard overlaps against sessions added by approved ADD exceptions.
///
/// ADDs of excluded or inactive rules are ignored, as expansion does.
fn added_session_overlaps(
    repo: &dyn ScheduleRepository,
    query: &SlotQuery,
) -> EngineResult<Vec<Conflict>> {
    let dates = query_dates(query);
    let (Some(first), Some(last)) = (dates.first().copied(), dates.last().copied()) else {
        return Ok(Vec::new());
    };
    let rules: Vec<ScheduleRule> = repo
        .list_rules_by_center(query.center_id)?
        .into_iter()
        .filter(|rule| rule.is_active() && !query.exclude_rules.contains(&rule.id))
        .collect();
    if rules.is_empty() {
        return Ok(Vec::new());
    }
    let rule_ids: Vec<RuleId> = rules.iter().map(|rule| rule.id).collect();
    // An ADD starting the day before can run into the first occurrence.
    let adds: Vec<ScheduleException> = repo
        .batch_list_exceptions(&rule_ids, first - Duration::days(1), last + Duration::days(1))?
        .into_iter()
        .filter(|exception| {
            exception.exception_type == ExceptionType::Add
                && exception.status == ExceptionStatus::Approved
        })
        .collect();
    if adds.is_empty() {
        return Ok(Vec::new());
    }

    let spans: Vec<(NaiveDateTime, NaiveDateTime)> = dates
        .iter()
        .map(|date| {
            let end_date = if is_cross_midnight(query.start_time, query.end_time) {
                *date + Duration::days(1)
            } else {
                *date
            };
            (query.start_time.on(*date), query.end_time.on(end_date))
        })
        .collect();

    let mut conflicts = Vec::new();
    for add in &adds {
        let (Some(rule), Some((start, end))) = (
            rules.iter().find(|rule| rule.id == add.rule_id),
            add.new_slot(),
        ) else {
            continue;
        };
        if !spans
            .iter()
            .any(|(query_start, query_end)| start < *query_end && *query_start < end)
        {
            continue;
        }
        let teacher = add
            .new_teacher_id
            .map_or(rule.teacher, TeacherAssignment::Assigned);
        let room_id = add.new_room_id.unwrap_or(rule.room_id);
        if query.teacher.shares_teacher_with(teacher) {
            conflicts.push(Conflict::added_session(ConflictKind::TeacherOverlap, add, start));
        }
        if query.room_id == room_id {
            conflicts.push(Conflict::added_session(ConflictKind::RoomOverlap, add, start));
        }
    }
    Ok(conflicts)
}

fn approved_cancel_exists(
    repo: &dyn ScheduleRepository,
    rule_id: RuleId,
    date: NaiveDate,
) -> EngineResult<bool> {
    Ok(repo
        .list_exceptions_by_rule_date(rule_id, date)?
        .iter()
        .any(|exception| {
            exception.exception_type == ExceptionType::Cancel
                && exception.status == ExceptionStatus::Approved
        }))
}

fn personal_event_overlaps(
    repo: &dyn ScheduleRepository,
    query: &SlotQuery,
) -> EngineResult<Vec<Conflict>> {
    let TeacherAssignment::Assigned(teacher_id) = query.teacher else {
        return Ok(Vec::new());
    };
    let first = first_on_or_after(query.range.start_date, query.weekday);
    let horizon = query.range.start_date + Duration::days(i64::from(query.horizon_days));
    let last = query.range.last_date_until(horizon);
    if first > last {
        return Ok(Vec::new());
    }
    let events = repo.list_personal_events(teacher_id, first, last + Duration::days(1))?;
    if events.is_empty() {
        return Ok(Vec::new());
    }

    let mut seen = HashSet::new();
    let mut conflicts = Vec::new();
    let mut date = first;
    while date <= last {
        for segment in split_slot(
            query.weekday,
            query.start_time,
            query.end_time,
            EffectiveRange::single_day(date),
        ) {
            let segment_date = segment.range.start_date;
            for event in &events {
                if seen.contains(&event.id) {
                    continue;
                }
                let busy = event.busy_segments_on(segment_date);
                if busy.iter().any(|(busy_start, busy_end)| {
                    time_ranges_overlap(
                        segment.start_time,
                        segment.end_time,
                        *busy_start,
                        *busy_end,
                    )
                }) {
                    seen.insert(event.id);
                    conflicts.push(Conflict::personal_event(event.id, &event.title, segment_date));
                }
            }
        }
        date += Duration::days(7);
    }
    Ok(conflicts)
}

/// Latest same-weekday end at or before `query.start_time`, per teacher and room.
fn infer_prev_ends(
    repo: &dyn ScheduleRepository,
    query: &SlotQuery,
) -> EngineResult<(Option<TimeOfDay>, Option<TimeOfDay>)> {
    let rules = repo.list_active_rules_on_weekdays(query.center_id, &[query.weekday])?;
    let mut teacher_prev: Option<TimeOfDay> = None;
    let mut room_prev: Option<TimeOfDay> = None;
    for rule in rules {
        if query.exclude_rules.contains(&rule.id)
            || !rule.is_active()
            || rule.is_cross_midnight()
            || rule.end_time > query.start_time
        {
            continue;
        }
        let Some(shared) = rule.effective_range.intersect(&query.range) else {
            continue;
        };
        if !shared.includes_weekday(query.weekday) {
            continue;
        }
        if query.is_single_day()
            && approved_cancel_exists(repo, rule.id, query.range.start_date)?
        {
            continue;
        }
        if query.teacher.shares_teacher_with(rule.teacher) {
            teacher_prev = teacher_prev.max(Some(rule.end_time));
        }
        if rule.room_id == query.room_id {
            room_prev = room_prev.max(Some(rule.end_time));
        }
    }
    Ok((teacher_prev, room_prev))
}

/// Read-side entry points bound to an engine context.
pub struct ValidationService<'a, S: Store> {
    ctx: &'a EngineContext<S>,
}

impl<'a, S: Store> ValidationService<'a, S> {
    pub fn new(ctx: &'a EngineContext<S>) -> Self {
        Self { ctx }
    }

    pub fn check_overlap(&self, query: &SlotQuery) -> EngineResult<ValidationResult> {
        let query = query
            .clone()
            .with_horizon(self.ctx.config.recurrence_horizon_days);
        self.ctx
            .store
            .with_reader(|repo| check_overlap(repo, &query))
    }

    pub fn validate_full(
        &self,
        query: &SlotQuery,
        course_id: CourseId,
        hints: BufferHints,
        allow_buffer_override: bool,
    ) -> EngineResult<ValidationResult> {
        let query = query
            .clone()
            .with_horizon(self.ctx.config.recurrence_horizon_days);
        self.ctx.store.with_reader(|repo| {
            let course = repo
                .get_course(course_id)?
                .ok_or_else(|| EngineError::not_found("course", course_id))?;
            validate_full(repo, &query, &course, hints, allow_buffer_override)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn time(value: &str) -> TimeOfDay {
        TimeOfDay::parse(value).unwrap()
    }

    fn course(teacher_buffer: u32, room_buffer: u32) -> Course {
        let mut course = Course::new(Uuid::new_v4(), "Piano");
        course.teacher_buffer_min = teacher_buffer;
        course.room_buffer_min = room_buffer;
        course
    }

    #[test]
    fn short_gap_yields_overridable_buffer_conflict() {
        let conflict = check_teacher_buffer(&course(10, 0), time("11:00"), time("11:05")).unwrap();
        assert_eq!(conflict.kind, ConflictKind::TeacherBuffer);
        assert!(conflict.can_override);
        assert_eq!(conflict.required_minutes, Some(10));
        assert_eq!(conflict.diff_minutes, Some(5));
    }

    #[test]
    fn zero_buffer_and_wide_gap_pass() {
        assert!(check_room_buffer(&course(10, 0), time("11:00"), time("11:01")).is_none());
        assert!(check_teacher_buffer(&course(10, 0), time("11:00"), time("11:10")).is_none());
    }

    #[test]
    fn override_only_lifts_buffer_conflicts() {
        let buffer = check_room_buffer(&course(0, 15), time("09:00"), time("09:05")).unwrap();
        let result = ValidationResult::from_conflicts(vec![buffer.clone()], true);
        assert!(result.valid);
        assert!(result.has_buffer_conflicts());

        let mut hard = buffer;
        hard.kind = ConflictKind::RoomOverlap;
        hard.can_override = false;
        let result = ValidationResult::from_conflicts(vec![hard], true);
        assert!(!result.valid);
        assert!(matches!(
            result.into_rule_error(),
            Err(EngineError::Overlap(_))
        ));
    }

    #[test]
    fn conflict_serializes_type_field() {
        let conflict = check_teacher_buffer(&course(10, 0), time("11:00"), time("11:05")).unwrap();
        let json = serde_json::to_value(&conflict).unwrap();
        assert_eq!(json["type"], "TEACHER_BUFFER");
        assert_eq!(json["source"], "RULE");
        assert!(json.get("personal_event_id").is_none());
    }
}
