//! Rule expansion into dated sessions.
//!
//! # Responsibility
//! - Turn weekly rules plus overlays (holidays, suspensions, exceptions)
//!   into an ordered session list for a date window.
//! - Report the dates on which an offering's effective rule changes.
//!
//! # Invariants
//! - Holidays and exceptions are fetched once per call, never per
//!   `(rule, date)`.
//! - Output order is `(date, start_time, end_time, rule_id, origin)`, so
//!   the same inputs always expand to the same list.
//! - A cross-midnight occurrence starting on `d` yields a `start` part on
//!   `d` and an `end` part on `d + 1`, even when `d + 1` is past the window.
//! - An approved ADD identical in offering and span to an emitted rule
//!   occurrence is not emitted twice.

use crate::calendar::TimeOfDay;
use crate::error::{EngineError, EngineResult};
use crate::model::exception::{ExceptionId, ExceptionStatus, ExceptionType, ScheduleException};
use crate::model::rule::{CrossPart, RuleId, RuleStatus, ScheduleRule, TeacherAssignment};
use crate::model::tenancy::{CenterId, Holiday, OfferingId, RoomId, TeacherId};
use crate::repo::ScheduleRepository;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Whether an entry comes from the weekly rule or an approved ADD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOrigin {
    Rule,
    Added,
}

/// Full local start/end of the session an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionSpan {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    pub exception_id: ExceptionId,
    pub exception_type: ExceptionType,
    pub status: ExceptionStatus,
    pub new_start_at: Option<NaiveDateTime>,
    pub new_end_at: Option<NaiveDateTime>,
    pub new_teacher_id: Option<TeacherId>,
    pub new_room_id: Option<RoomId>,
    pub reason: String,
}

impl From<&ScheduleException> for ExceptionInfo {
    fn from(exception: &ScheduleException) -> Self {
        Self {
            exception_id: exception.id,
            exception_type: exception.exception_type,
            status: exception.status,
            new_start_at: exception.new_start_at,
            new_end_at: exception.new_end_at,
            new_teacher_id: exception.new_teacher_id,
            new_room_id: exception.new_room_id,
            reason: exception.reason.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandedSession {
    pub rule_id: RuleId,
    pub center_id: CenterId,
    pub offering_id: OfferingId,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub span: SessionSpan,
    pub room_id: RoomId,
    pub teacher: TeacherAssignment,
    pub is_holiday: bool,
    pub has_exception: bool,
    pub exception_info: Option<ExceptionInfo>,
    pub rule_status: RuleStatus,
    pub cross_part: Option<CrossPart>,
    pub origin: SessionOrigin,
}

impl ExpandedSession {
    /// Entries that open a session (not the `end` half of a split).
    pub fn is_session_start(&self) -> bool {
        self.cross_part != Some(CrossPart::End)
    }
}

/// Change of an offering's effective rule between two occurrences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub date: NaiveDate,
    pub prev_rule_id: Option<RuleId>,
    pub prev_room_id: Option<RoomId>,
    pub prev_teacher: Option<TeacherAssignment>,
    pub prev_start_time: Option<TimeOfDay>,
    pub prev_end_time: Option<TimeOfDay>,
    pub next_rule_id: Option<RuleId>,
    pub next_room_id: Option<RoomId>,
    pub next_teacher: Option<TeacherAssignment>,
    pub next_start_time: Option<TimeOfDay>,
    pub next_end_time: Option<TimeOfDay>,
    /// A week or more passed without an occurrence.
    pub has_gap: bool,
}

struct Overlay<'e> {
    by_occurrence: HashMap<(RuleId, NaiveDate), Vec<&'e ScheduleException>>,
    approved_adds: Vec<&'e ScheduleException>,
}

impl<'e> Overlay<'e> {
    fn build(exceptions: &'e [ScheduleException], from: NaiveDate, to: NaiveDate) -> Self {
        let mut by_occurrence: HashMap<(RuleId, NaiveDate), Vec<&ScheduleException>> =
            HashMap::new();
        let mut approved_adds = Vec::new();
        for exception in exceptions {
            if !exception.status.is_visible() {
                continue;
            }
            if exception.original_date >= from && exception.original_date <= to {
                by_occurrence
                    .entry((exception.rule_id, exception.original_date))
                    .or_default()
                    .push(exception);
            }
            if exception.exception_type == ExceptionType::Add
                && exception.status == ExceptionStatus::Approved
            {
                if let Some((start, _)) = exception.new_slot() {
                    if start.date() >= from && start.date() <= to {
                        approved_adds.push(exception);
                    }
                }
            }
        }
        Self {
            by_occurrence,
            approved_adds,
        }
    }

    fn for_occurrence(&self, rule_id: RuleId, date: NaiveDate) -> &[&'e ScheduleException] {
        self.by_occurrence
            .get(&(rule_id, date))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn approved(exceptions: &[&ScheduleException], kind: ExceptionType) -> Option<ExceptionInfo> {
    exceptions
        .iter()
        .find(|exception| {
            exception.exception_type == kind && exception.status == ExceptionStatus::Approved
        })
        .map(|exception| ExceptionInfo::from(*exception))
}

/// Expands `rules` over `[from, to]` for one center.
pub fn expand_rules(
    repo: &dyn ScheduleRepository,
    center_id: CenterId,
    rules: &[ScheduleRule],
    from: NaiveDate,
    to: NaiveDate,
) -> EngineResult<Vec<ExpandedSession>> {
    if to < from {
        return Err(EngineError::InvalidParams(format!(
            "window end {to} is before start {from}"
        )));
    }
    let active: Vec<&ScheduleRule> = rules
        .iter()
        .filter(|rule| rule.center_id == center_id && rule.is_active())
        .collect();
    if active.is_empty() {
        return Ok(Vec::new());
    }

    // Cross-midnight end parts may land on `to + 1`.
    let holidays: HashMap<NaiveDate, Holiday> = repo
        .list_holidays(center_id, from, to + Duration::days(1))?
        .into_iter()
        .map(|holiday| (holiday.date, holiday))
        .collect();
    let rule_ids: Vec<RuleId> = active.iter().map(|rule| rule.id).collect();
    let exceptions = repo.batch_list_exceptions(&rule_ids, from, to)?;
    let overlay = Overlay::build(&exceptions, from, to);

    let mut sessions = Vec::new();
    for rule in &active {
        for date in rule.occurrences_between(from, to) {
            let holiday = holidays.get(&date);
            if holiday.is_some_and(|holiday| holiday.cancels(rule.skip_holiday)) {
                continue;
            }
            if rule.is_suspended_on(date) {
                continue;
            }
            let found = overlay.for_occurrence(rule.id, date);
            if approved(found, ExceptionType::Cancel).is_some() {
                continue;
            }

            let mut teacher = rule.teacher;
            let mut room_id = rule.room_id;
            let replacement = approved(found, ExceptionType::ReplaceTeacher);
            if let Some(replacement) = &replacement {
                if let Some(new_teacher) = replacement.new_teacher_id {
                    teacher = TeacherAssignment::Assigned(new_teacher);
                }
                room_id = replacement.new_room_id.unwrap_or(room_id);
            }
            let exception_info = approved(found, ExceptionType::Reschedule)
                .or_else(|| {
                    found
                        .iter()
                        .find(|exception| exception.status == ExceptionStatus::Pending)
                        .map(|exception| ExceptionInfo::from(*exception))
                })
                .or(replacement);

            let (start, end) = rule.span_on(date);
            let template = ExpandedSession {
                rule_id: rule.id,
                center_id,
                offering_id: rule.offering_id,
                date,
                start_time: rule.start_time,
                end_time: rule.end_time,
                span: SessionSpan { start, end },
                room_id,
                teacher,
                is_holiday: holiday.is_some(),
                has_exception: !found.is_empty(),
                exception_info,
                rule_status: rule.status,
                cross_part: None,
                origin: SessionOrigin::Rule,
            };
            push_parts(&mut sessions, template, &holidays);
        }
    }

    let rules_by_id: HashMap<RuleId, &ScheduleRule> =
        active.iter().map(|rule| (rule.id, *rule)).collect();
    let covered: HashSet<(OfferingId, NaiveDateTime, NaiveDateTime)> = sessions
        .iter()
        .filter(|session| session.is_session_start())
        .map(|session| (session.offering_id, session.span.start, session.span.end))
        .collect();
    for add in &overlay.approved_adds {
        let (Some(rule), Some((start, end))) = (rules_by_id.get(&add.rule_id), add.new_slot())
        else {
            continue;
        };
        // Already produced by a successor rule of the same offering.
        if covered.contains(&(rule.offering_id, start, end)) {
            continue;
        }
        let date = start.date();
        let template = ExpandedSession {
            rule_id: rule.id,
            center_id,
            offering_id: rule.offering_id,
            date,
            start_time: TimeOfDay::from_naive_time(start.time()),
            end_time: TimeOfDay::from_naive_time(end.time()),
            span: SessionSpan { start, end },
            room_id: add.new_room_id.unwrap_or(rule.room_id),
            teacher: add
                .new_teacher_id
                .map_or(rule.teacher, TeacherAssignment::Assigned),
            is_holiday: holidays.contains_key(&date),
            has_exception: true,
            exception_info: Some(ExceptionInfo::from(*add)),
            rule_status: rule.status,
            cross_part: None,
            origin: SessionOrigin::Added,
        };
        push_parts(&mut sessions, template, &holidays);
    }

    sort_sessions(&mut sessions);
    debug!(
        "event=expand_rules module=expansion status=ok center_id={} from={} to={} rules={} exceptions={} sessions={}",
        center_id,
        from,
        to,
        active.len(),
        exceptions.len(),
        sessions.len()
    );
    Ok(sessions)
}

/// Expands every rule of `center_id`.
pub fn expand_center(
    repo: &dyn ScheduleRepository,
    center_id: CenterId,
    from: NaiveDate,
    to: NaiveDate,
) -> EngineResult<Vec<ExpandedSession>> {
    let rules = repo.list_rules_by_center(center_id)?;
    expand_rules(repo, center_id, &rules, from, to)
}

pub fn sort_sessions(sessions: &mut [ExpandedSession]) {
    sessions.sort_by(|left, right| {
        (left.date, left.start_time, left.end_time, left.rule_id, left.origin).cmp(&(
            right.date,
            right.start_time,
            right.end_time,
            right.rule_id,
            right.origin,
        ))
    });
}

/// Pushes `template` as one entry, or as start/end parts when its span
/// runs past midnight.
fn push_parts(
    sessions: &mut Vec<ExpandedSession>,
    template: ExpandedSession,
    holidays: &HashMap<NaiveDate, Holiday>,
) {
    let span = template.span;
    let next_midnight = (span.start.date() + Duration::days(1)).and_time(NaiveTime::MIN);
    if span.end <= next_midnight {
        let mut single = template;
        single.end_time = if span.end == next_midnight {
            TimeOfDay::END_OF_DAY
        } else {
            TimeOfDay::from_naive_time(span.end.time())
        };
        sessions.push(single);
        return;
    }

    let mut start_part = template.clone();
    start_part.end_time = TimeOfDay::END_OF_DAY;
    start_part.cross_part = Some(CrossPart::Start);

    let mut end_part = template;
    end_part.date = next_midnight.date();
    end_part.start_time = TimeOfDay::MIDNIGHT;
    end_part.end_time = TimeOfDay::from_naive_time(span.end.time());
    end_part.is_holiday = holidays.contains_key(&end_part.date);
    end_part.cross_part = Some(CrossPart::End);

    sessions.push(start_part);
    sessions.push(end_part);
}

/// Walks an offering's occurrences in `[from, to]` and reports changes.
///
/// The first occurrence in the window opens a phase. A later occurrence
/// opens a new phase when rule, room, teacher or times differ from the
/// previous one, or when more than a week passed since it. A trailing
/// stretch of more than a week without occurrences closes the last phase.
pub fn detect_phase_transitions(
    repo: &dyn ScheduleRepository,
    center_id: CenterId,
    offering_id: OfferingId,
    from: NaiveDate,
    to: NaiveDate,
) -> EngineResult<Vec<PhaseTransition>> {
    if to < from {
        return Err(EngineError::InvalidParams(format!(
            "window end {to} is before start {from}"
        )));
    }
    let rules: Vec<ScheduleRule> = repo
        .list_rules_by_offering(center_id, offering_id)?
        .into_iter()
        .filter(ScheduleRule::is_active)
        .collect();

    let mut occurrences: Vec<(NaiveDate, &ScheduleRule)> = rules
        .iter()
        .flat_map(|rule| {
            rule.occurrences_between(from, to)
                .into_iter()
                .map(move |date| (date, rule))
        })
        .collect();
    occurrences.sort_by(|(left_date, left), (right_date, right)| {
        (left_date, left.start_time, left.id).cmp(&(right_date, right.start_time, right.id))
    });
    occurrences.dedup_by(|(later, _), (earlier, _)| later == earlier);

    let mut transitions = Vec::new();
    let mut previous: Option<(NaiveDate, &ScheduleRule)> = None;
    for (date, rule) in occurrences {
        match previous {
            None => transitions.push(opening(date, rule)),
            Some((prev_date, prev_rule)) => {
                let has_gap = date - prev_date > Duration::days(7);
                let changed = prev_rule.id != rule.id
                    || prev_rule.room_id != rule.room_id
                    || prev_rule.teacher != rule.teacher
                    || prev_rule.start_time != rule.start_time
                    || prev_rule.end_time != rule.end_time;
                if changed || has_gap {
                    let mut transition = opening(date, rule);
                    transition.prev_rule_id = Some(prev_rule.id);
                    transition.prev_room_id = Some(prev_rule.room_id);
                    transition.prev_teacher = Some(prev_rule.teacher);
                    transition.prev_start_time = Some(prev_rule.start_time);
                    transition.prev_end_time = Some(prev_rule.end_time);
                    transition.has_gap = has_gap;
                    transitions.push(transition);
                }
            }
        }
        previous = Some((date, rule));
    }

    if let Some((last_date, last_rule)) = previous {
        let closes_at = last_date + Duration::days(7);
        if closes_at <= to {
            transitions.push(PhaseTransition {
                date: closes_at,
                prev_rule_id: Some(last_rule.id),
                prev_room_id: Some(last_rule.room_id),
                prev_teacher: Some(last_rule.teacher),
                prev_start_time: Some(last_rule.start_time),
                prev_end_time: Some(last_rule.end_time),
                next_rule_id: None,
                next_room_id: None,
                next_teacher: None,
                next_start_time: None,
                next_end_time: None,
                has_gap: true,
            });
        }
    }
    Ok(transitions)
}

fn opening(date: NaiveDate, rule: &ScheduleRule) -> PhaseTransition {
    PhaseTransition {
        date,
        prev_rule_id: None,
        prev_room_id: None,
        prev_teacher: None,
        prev_start_time: None,
        prev_end_time: None,
        next_rule_id: Some(rule.id),
        next_room_id: Some(rule.room_id),
        next_teacher: Some(rule.teacher),
        next_start_time: Some(rule.start_time),
        next_end_time: Some(rule.end_time),
        has_gap: false,
    }
}
