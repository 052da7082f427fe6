//! Edits and deletions of a recurring rule anchored on one occurrence.
//!
//! # Responsibility
//! - SINGLE: propose a linked CANCEL + ADD pair (edit) or a CANCEL (delete).
//! - FUTURE: end the rule before the anchor date and, for edits, continue
//!   it as a successor rule.
//! - ALL: rewrite or soft-delete the rule in place.
//!
//! # Invariants
//! - Every mode runs in one transaction; nothing is half-applied.
//! - Open-ended rules are enumerated at most `recurrence_horizon_days`
//!   past the anchor.
//! - Teachers may only use SINGLE, on rules they own.

use crate::calendar::TimeOfDay;
use crate::error::{EngineError, EngineResult};
use crate::model::audit::{Actor, AuditAction, AuditEntry, AuditTarget};
use crate::model::exception::{ExceptionType, ScheduleException};
use crate::model::rule::{EffectiveRange, RuleId, ScheduleRule, TeacherAssignment};
use crate::model::tenancy::{CenterId, RoomId};
use crate::repo::{ScheduleRepository, Store};
use crate::service::exception_service::{
    cascade_pending, check_proposal, ensure_active_member, ensure_owns_rule, evaluate_lock,
    invalidate_rule_writes, load_center, load_rule,
};
use crate::service::validation::{validate_full, BufferHints, SlotQuery};
use crate::service::{EngineContext, PostCommit};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateMode {
    Single,
    Future,
    All,
}

/// Fields to change; `None` keeps the rule's value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleChanges {
    pub weekday: Option<u8>,
    pub start_time: Option<TimeOfDay>,
    pub end_time: Option<TimeOfDay>,
    pub teacher: Option<TeacherAssignment>,
    pub room_id: Option<RoomId>,
    pub name: Option<String>,
}

impl RuleChanges {
    pub fn slot(start_time: TimeOfDay, end_time: TimeOfDay) -> Self {
        Self {
            start_time: Some(start_time),
            end_time: Some(end_time),
            ..Self::default()
        }
    }

    fn apply(&self, rule: &mut ScheduleRule) {
        rule.set_slot(
            self.weekday.unwrap_or(rule.weekday),
            self.start_time.unwrap_or(rule.start_time),
            self.end_time.unwrap_or(rule.end_time),
        );
        if let Some(teacher) = self.teacher {
            rule.teacher = teacher;
        }
        if let Some(room_id) = self.room_id {
            rule.room_id = room_id;
        }
        if let Some(name) = &self.name {
            rule.name = name.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceEditRequest {
    pub center_id: CenterId,
    pub rule_id: RuleId,
    /// Anchor occurrence.
    pub date: NaiveDate,
    pub mode: UpdateMode,
    pub changes: RuleChanges,
    pub actor: Actor,
    pub allow_buffer_override: bool,
    pub reason: String,
    pub deadline: Option<Instant>,
}

impl RecurrenceEditRequest {
    pub fn new(
        center_id: CenterId,
        rule_id: RuleId,
        date: NaiveDate,
        mode: UpdateMode,
        changes: RuleChanges,
        actor: Actor,
    ) -> Self {
        Self {
            center_id,
            rule_id,
            date,
            mode,
            changes,
            actor,
            allow_buffer_override: false,
            reason: String::new(),
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceDeleteRequest {
    pub center_id: CenterId,
    pub rule_id: RuleId,
    pub date: NaiveDate,
    pub mode: UpdateMode,
    pub actor: Actor,
    pub reason: String,
    pub deadline: Option<Instant>,
}

impl RecurrenceDeleteRequest {
    pub fn new(
        center_id: CenterId,
        rule_id: RuleId,
        date: NaiveDate,
        mode: UpdateMode,
        actor: Actor,
    ) -> Self {
        Self {
            center_id,
            rule_id,
            date,
            mode,
            actor,
            reason: String::new(),
            deadline: None,
        }
    }
}

/// Occurrence dates a mode would touch, computed without writing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrencePreview {
    pub mode: UpdateMode,
    pub rule_id: RuleId,
    pub affected_dates: Vec<NaiveDate>,
    /// New `end_date` of the rule for FUTURE; `None` otherwise.
    pub truncated_end: Option<NaiveDate>,
    /// Enumeration stopped at the horizon of an open-ended rule.
    pub horizon_capped: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecurrenceOutcome {
    pub mode: UpdateMode,
    pub affected_dates: Vec<NaiveDate>,
    /// Rule after the change; `None` when it was soft-deleted.
    pub rule: Option<ScheduleRule>,
    /// Rule continuing a FUTURE edit.
    pub successor: Option<ScheduleRule>,
    /// Exception rows created or cancelled.
    pub exceptions: Vec<ScheduleException>,
}

pub struct RecurrenceService<'a, S: Store> {
    ctx: &'a EngineContext<S>,
}

impl<'a, S: Store> RecurrenceService<'a, S> {
    pub fn new(ctx: &'a EngineContext<S>) -> Self {
        Self { ctx }
    }

    pub fn preview(
        &self,
        center_id: CenterId,
        rule_id: RuleId,
        date: NaiveDate,
        mode: UpdateMode,
    ) -> EngineResult<RecurrencePreview> {
        let today = self.ctx.clock.today();
        let horizon_days = self.ctx.config.recurrence_horizon_days;
        self.ctx.store.with_reader(|repo| {
            let rule = load_rule(repo, center_id, rule_id)?;
            plan(&rule, date, mode, today, horizon_days)
        })
    }

    pub fn edit(&self, request: &RecurrenceEditRequest) -> EngineResult<RecurrenceOutcome> {
        let now = self.ctx.clock.now();
        let horizon_days = self.ctx.config.recurrence_horizon_days;
        let default_lead = self.ctx.config.default_exception_lead_days;
        let env = TxEnv {
            now,
            horizon_days,
            default_lead,
        };

        let result = self.ctx.store.in_transaction_until(request.deadline, |repo| {
            let rule = load_rule(repo, request.center_id, request.rule_id)?;
            authorize(repo, &rule, request.actor, request.mode)?;
            let preview = plan(&rule, request.date, request.mode, now.date_naive(), horizon_days)?;
            match request.mode {
                UpdateMode::Single => edit_single(repo, request, &env, rule, preview),
                UpdateMode::Future => edit_future(repo, request, &env, rule, preview),
                UpdateMode::All => edit_all(repo, request, &env, rule, preview),
            }
        });
        finish(self.ctx, "recurrence_edit", request.mode, request.rule_id, result)
    }

    pub fn delete(&self, request: &RecurrenceDeleteRequest) -> EngineResult<RecurrenceOutcome> {
        let now = self.ctx.clock.now();
        let horizon_days = self.ctx.config.recurrence_horizon_days;
        let default_lead = self.ctx.config.default_exception_lead_days;

        let result = self.ctx.store.in_transaction_until(request.deadline, |repo| {
            let rule = load_rule(repo, request.center_id, request.rule_id)?;
            authorize(repo, &rule, request.actor, request.mode)?;
            let preview = plan(&rule, request.date, request.mode, now.date_naive(), horizon_days)?;
            let at = now.with_timezone(&Utc);
            let mut post = vec![invalidate_rule_writes(repo, rule.center_id, [&rule])?];

            let (remaining, exceptions) = match request.mode {
                UpdateMode::Single => {
                    ensure_unlocked(repo, request.actor, &rule, request.date, now, default_lead)?;
                    let mut cancel = ScheduleException::proposal(
                        rule.center_id,
                        rule.id,
                        request.date,
                        ExceptionType::Cancel,
                    );
                    cancel.reason = request.reason.clone();
                    check_proposal(&cancel)?;
                    let cancel = repo.create_exception(&cancel)?;
                    post.push(PostCommit::ExceptionSubmitted(cancel.clone()));
                    (Some(rule.clone()), vec![cancel])
                }
                UpdateMode::Future => {
                    let remaining = truncate_or_delete(repo, &rule, request.date)?;
                    let cancelled = cascade_pending(repo, rule.id, request.date, &[], at)?;
                    (remaining, cancelled)
                }
                UpdateMode::All => {
                    repo.soft_delete_rule(rule.id)?;
                    let cancelled = cascade_pending(
                        repo,
                        rule.id,
                        rule.effective_range.start_date,
                        &[],
                        at,
                    )?;
                    (None, cancelled)
                }
            };

            repo.write_audit(
                &AuditEntry::new(
                    rule.center_id,
                    request.actor,
                    AuditAction::DeleteRecurringSchedule,
                    AuditTarget::Rule,
                    rule.id,
                )
                .with_before(&rule)
                .with_after(json!({
                    "mode": request.mode,
                    "date": request.date,
                    "rule": remaining,
                    "exception_ids": exceptions.iter().map(|row| row.id).collect::<Vec<_>>(),
                })),
            )?;

            let outcome = RecurrenceOutcome {
                mode: request.mode,
                affected_dates: preview.affected_dates,
                rule: remaining,
                successor: None,
                exceptions,
            };
            Ok((outcome, post))
        });
        finish(self.ctx, "recurrence_delete", request.mode, request.rule_id, result)
    }
}

struct TxEnv {
    now: DateTime<Tz>,
    horizon_days: u32,
    default_lead: u32,
}

type Planned = (RecurrenceOutcome, Vec<PostCommit>);

fn edit_single(
    repo: &dyn ScheduleRepository,
    request: &RecurrenceEditRequest,
    env: &TxEnv,
    rule: ScheduleRule,
    preview: RecurrencePreview,
) -> EngineResult<Planned> {
    ensure_unlocked(repo, request.actor, &rule, request.date, env.now, env.default_lead)?;

    let mut moved = rule.clone();
    request.changes.apply(&mut moved);
    moved.validate()?;
    let shift = i64::from(moved.weekday) - i64::from(rule.weekday);
    let new_date = request.date + Duration::days(shift);
    let (new_start, new_end) = moved.span_on(new_date);

    let mut cancel =
        ScheduleException::proposal(rule.center_id, rule.id, request.date, ExceptionType::Cancel);
    let mut add =
        ScheduleException::proposal(rule.center_id, rule.id, request.date, ExceptionType::Add);
    add.new_start_at = Some(new_start);
    add.new_end_at = Some(new_end);
    add.new_teacher_id = request
        .changes
        .teacher
        .and_then(TeacherAssignment::teacher_id);
    add.new_room_id = request.changes.room_id;
    for row in [&mut cancel, &mut add] {
        row.reason = request.reason.clone();
    }
    cancel.linked_exception_id = Some(add.id);
    add.linked_exception_id = Some(cancel.id);
    check_proposal(&cancel)?;
    check_proposal(&add)?;

    let cancel = repo.create_exception(&cancel)?;
    let add = repo.create_exception(&add)?;
    repo.write_audit(
        &AuditEntry::new(
            rule.center_id,
            request.actor,
            AuditAction::EditSingleOccurrence,
            AuditTarget::Rule,
            rule.id,
        )
        .with_before(&rule)
        .with_after(json!({
            "date": request.date,
            "cancel_exception_id": cancel.id,
            "add_exception_id": add.id,
            "new_start_at": new_start,
            "new_end_at": new_end,
        })),
    )?;

    let post = vec![
        PostCommit::invalidate_rules(rule.center_id, [&rule, &moved]),
        PostCommit::ExceptionSubmitted(cancel.clone()),
        PostCommit::ExceptionSubmitted(add.clone()),
    ];
    let outcome = RecurrenceOutcome {
        mode: UpdateMode::Single,
        affected_dates: preview.affected_dates,
        rule: Some(rule),
        successor: None,
        exceptions: vec![cancel, add],
    };
    Ok((outcome, post))
}

fn edit_future(
    repo: &dyn ScheduleRepository,
    request: &RecurrenceEditRequest,
    env: &TxEnv,
    rule: ScheduleRule,
    preview: RecurrencePreview,
) -> EngineResult<Planned> {
    let mut successor = rule.clone();
    successor.id = uuid::Uuid::new_v4();
    successor.suspended_dates.retain(|date| *date >= request.date);
    request.changes.apply(&mut successor);
    successor.effective_range = EffectiveRange::new(request.date, rule.effective_range.end_date)?;
    successor.validate()?;

    let query = SlotQuery::for_rule(&successor)
        .excluding(rule.id)
        .with_horizon(env.horizon_days);
    validate_successor(repo, &successor, &query, request.allow_buffer_override)?;

    let remaining = truncate_or_delete(repo, &rule, request.date)?;
    repo.create_rule(&successor)?;
    let at = env.now.with_timezone(&Utc);
    let mut exceptions = cascade_pending(repo, rule.id, request.date, &[], at)?;

    // Pairs let views built from the old rule reconcile each moved date.
    for date in &preview.affected_dates {
        let shift = i64::from(successor.weekday) - i64::from(rule.weekday);
        let (new_start, new_end) = successor.span_on(*date + Duration::days(shift));
        let mut cancel =
            ScheduleException::proposal(rule.center_id, rule.id, *date, ExceptionType::Cancel);
        let mut add = ScheduleException::proposal(rule.center_id, rule.id, *date, ExceptionType::Add);
        add.new_start_at = Some(new_start);
        add.new_end_at = Some(new_end);
        add.new_teacher_id = successor.teacher.teacher_id();
        add.new_room_id = Some(successor.room_id);
        cancel.linked_exception_id = Some(add.id);
        add.linked_exception_id = Some(cancel.id);
        check_proposal(&add)?;
        exceptions.push(repo.create_exception(&cancel)?);
        exceptions.push(repo.create_exception(&add)?);
    }

    repo.write_audit(
        &AuditEntry::new(
            rule.center_id,
            request.actor,
            AuditAction::EditFutureOccurrences,
            AuditTarget::Rule,
            rule.id,
        )
        .with_before(&rule)
        .with_after(json!({
            "date": request.date,
            "rule": remaining,
            "successor": successor,
            "pairs": preview.affected_dates.len(),
        })),
    )?;

    let post = vec![invalidate_rule_writes(repo, rule.center_id, [&rule, &successor])?];
    let outcome = RecurrenceOutcome {
        mode: UpdateMode::Future,
        affected_dates: preview.affected_dates,
        rule: remaining,
        successor: Some(successor),
        exceptions,
    };
    Ok((outcome, post))
}

fn edit_all(
    repo: &dyn ScheduleRepository,
    request: &RecurrenceEditRequest,
    env: &TxEnv,
    rule: ScheduleRule,
    preview: RecurrencePreview,
) -> EngineResult<Planned> {
    let mut updated = rule.clone();
    request.changes.apply(&mut updated);
    updated.validate()?;
    let query = SlotQuery::for_rule(&updated).with_horizon(env.horizon_days);
    validate_successor(repo, &updated, &query, request.allow_buffer_override)?;

    repo.update_rule(&updated)?;
    repo.write_audit(
        &AuditEntry::new(
            rule.center_id,
            request.actor,
            AuditAction::EditAllOccurrences,
            AuditTarget::Rule,
            rule.id,
        )
        .with_before(&rule)
        .with_after(&updated),
    )?;

    let post = vec![invalidate_rule_writes(repo, rule.center_id, [&rule, &updated])?];
    let outcome = RecurrenceOutcome {
        mode: UpdateMode::All,
        affected_dates: preview.affected_dates,
        rule: Some(updated),
        successor: None,
        exceptions: Vec::new(),
    };
    Ok((outcome, post))
}

fn validate_successor(
    repo: &dyn ScheduleRepository,
    rule: &ScheduleRule,
    query: &SlotQuery,
    requested_override: bool,
) -> EngineResult<()> {
    let offering = repo
        .get_offering(rule.offering_id)?
        .ok_or_else(|| EngineError::not_found("offering", rule.offering_id))?;
    let course = repo
        .get_course(offering.course_id)?
        .ok_or_else(|| EngineError::not_found("course", offering.course_id))?;
    let allow = requested_override && offering.allow_buffer_override;
    validate_full(repo, query, &course, BufferHints::default(), allow)?.into_rule_error()?;
    Ok(())
}

fn truncate_or_delete(
    repo: &dyn ScheduleRepository,
    rule: &ScheduleRule,
    date: NaiveDate,
) -> EngineResult<Option<ScheduleRule>> {
    match rule.effective_range.truncated_before(date) {
        Some(range) => {
            let mut truncated = rule.clone();
            truncated.effective_range = range;
            repo.update_rule(&truncated)?;
            Ok(Some(truncated))
        }
        None => {
            repo.soft_delete_rule(rule.id)?;
            Ok(None)
        }
    }
}

/// Dates touched by `mode` anchored at `date`.
fn plan(
    rule: &ScheduleRule,
    date: NaiveDate,
    mode: UpdateMode,
    today: NaiveDate,
    horizon_days: u32,
) -> EngineResult<RecurrencePreview> {
    if mode != UpdateMode::All && !rule.occurs_on(date) {
        return Err(EngineError::InvalidParams(format!(
            "{date} is not an occurrence of rule {}",
            rule.id
        )));
    }
    let horizon = Duration::days(i64::from(horizon_days));
    let (from, cap) = match mode {
        UpdateMode::Single => (date, date),
        UpdateMode::Future => (date, date + horizon),
        UpdateMode::All => {
            let from = rule.effective_range.start_date.max(today);
            (from, from + horizon)
        }
    };
    let last = rule.effective_range.last_date_until(cap);
    let horizon_capped = mode != UpdateMode::Single
        && rule.effective_range.end_date.map_or(true, |end| end > cap);
    let truncated_end = match mode {
        UpdateMode::Future => rule
            .effective_range
            .truncated_before(date)
            .and_then(|range| range.end_date),
        _ => None,
    };
    Ok(RecurrencePreview {
        mode,
        rule_id: rule.id,
        affected_dates: rule.occurrences_between(from, last),
        truncated_end,
        horizon_capped,
    })
}

fn authorize(
    repo: &dyn ScheduleRepository,
    rule: &ScheduleRule,
    actor: Actor,
    mode: UpdateMode,
) -> EngineResult<()> {
    let Actor::Teacher(teacher_id) = actor else {
        return Ok(());
    };
    if mode != UpdateMode::Single {
        return Err(EngineError::Forbidden(format!(
            "teachers may only edit single occurrences, got {mode:?}"
        )));
    }
    ensure_active_member(repo, rule.center_id, teacher_id)?;
    ensure_owns_rule(rule, teacher_id)
}

/// Teachers are bound by the same lead time as direct proposals.
fn ensure_unlocked(
    repo: &dyn ScheduleRepository,
    actor: Actor,
    rule: &ScheduleRule,
    date: NaiveDate,
    now: DateTime<Tz>,
    default_lead: u32,
) -> EngineResult<()> {
    if !matches!(actor, Actor::Teacher(_)) {
        return Ok(());
    }
    let center = load_center(repo, rule.center_id)?;
    match evaluate_lock(now, &center, rule, date, default_lead).lock_reason {
        Some(reason) => Err(EngineError::DeadlineExceeded {
            rule_id: rule.id,
            original_date: date,
            reason: reason.as_code().to_string(),
        }),
        None => Ok(()),
    }
}

fn finish<S: Store>(
    ctx: &EngineContext<S>,
    event: &str,
    mode: UpdateMode,
    rule_id: RuleId,
    result: EngineResult<Planned>,
) -> EngineResult<RecurrenceOutcome> {
    match result {
        Ok((outcome, post)) => {
            ctx.run_post_commit(post);
            info!(
                "event={} module=recurrence status=ok rule_id={} mode={:?} dates={} exceptions={}",
                event,
                rule_id,
                mode,
                outcome.affected_dates.len(),
                outcome.exceptions.len()
            );
            Ok(outcome)
        }
        Err(err) => {
            warn!(
                "event={} module=recurrence status=error rule_id={} mode={:?} error_code={}",
                event,
                rule_id,
                mode,
                err.code().name()
            );
            Err(err)
        }
    }
}
