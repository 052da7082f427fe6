//! Exception lifecycle: proposal, revocation and review.
//!
//! # Responsibility
//! - Gate teacher proposals by rule lock and center lead time.
//! - Review proposals and apply approved ones to the rule set inside the
//!   same transaction as the status change.
//!
//! # Invariants
//! - Status is re-read inside the write transaction; a row that left
//!   PENDING yields `EXCEPTION_ALREADY_PROCESSED`.
//! - At most one approved exception per `(rule, original_date)`, except a
//!   CANCEL and ADD pair.
//! - Rejecting one half of a linked pair rejects the other half while it
//!   is still pending.

use crate::calendar::{weekday_of, TimeOfDay};
use crate::error::{EngineError, EngineResult};
use crate::model::audit::{Actor, AuditAction, AuditEntry, AuditTarget};
use crate::model::exception::{
    ExceptionId, ExceptionStatus, ExceptionType, ScheduleException,
};
use crate::model::rule::{EffectiveRange, RuleId, ScheduleRule, TeacherAssignment};
use crate::model::tenancy::{AdminId, Center, CenterId, LeadTime, RoomId, TeacherId};
use crate::repo::{ScheduleRepository, Store};
use crate::service::validation::{validate_full, BufferHints, SlotQuery, ValidationResult};
use crate::service::{EngineContext, PostCommit};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockReason {
    LockAtPassed,
    DeadlinePassed,
}

impl LockReason {
    pub fn as_code(self) -> &'static str {
        match self {
            Self::LockAtPassed => "LOCK_AT_PASSED",
            Self::DeadlinePassed => "DEADLINE_PASSED",
        }
    }
}

/// Whether proposals for one occurrence are still accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleLockStatus {
    pub is_locked: bool,
    pub lock_reason: Option<LockReason>,
    pub lock_at: Option<DateTime<Utc>>,
    /// Last local instant a proposal is accepted; `None` when unlimited.
    pub deadline: Option<NaiveDateTime>,
    pub days_remaining: Option<i64>,
}

/// Lock decision for the occurrence of `rule` on `date` at `now`.
///
/// Once locked at `now`, the result stays locked for every later `now`.
pub fn evaluate_lock(
    now: DateTime<Tz>,
    center: &Center,
    rule: &ScheduleRule,
    date: NaiveDate,
    default_lead_days: u32,
) -> RuleLockStatus {
    let local_now = now.naive_local();
    let lead = center.settings.lead_time(default_lead_days);
    let deadline = match lead {
        LeadTime::Unlimited => None,
        LeadTime::Days(days) => {
            Some((date - Duration::days(i64::from(days))).and_time(NaiveTime::MIN))
        }
    };
    let days_remaining =
        deadline.map(|deadline| (deadline.date() - local_now.date()).num_days().max(0));

    let lock_reason = if rule
        .lock_at
        .is_some_and(|lock_at| now.with_timezone(&Utc) > lock_at)
    {
        Some(LockReason::LockAtPassed)
    } else if deadline.is_some_and(|deadline| local_now > deadline) {
        Some(LockReason::DeadlinePassed)
    } else {
        None
    };

    RuleLockStatus {
        is_locked: lock_reason.is_some(),
        lock_reason,
        lock_at: rule.lock_at,
        deadline,
        days_remaining,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateExceptionRequest {
    pub center_id: CenterId,
    pub teacher_id: TeacherId,
    pub rule_id: RuleId,
    pub original_date: NaiveDate,
    pub exception_type: ExceptionType,
    pub new_start_at: Option<NaiveDateTime>,
    pub new_end_at: Option<NaiveDateTime>,
    pub new_teacher_id: Option<TeacherId>,
    pub new_room_id: Option<RoomId>,
    pub reason: String,
}

impl CreateExceptionRequest {
    pub fn new(
        center_id: CenterId,
        teacher_id: TeacherId,
        rule_id: RuleId,
        original_date: NaiveDate,
        exception_type: ExceptionType,
    ) -> Self {
        Self {
            center_id,
            teacher_id,
            rule_id,
            original_date,
            exception_type,
            new_start_at: None,
            new_end_at: None,
            new_teacher_id: None,
            new_room_id: None,
            reason: String::new(),
        }
    }

    pub fn with_new_slot(mut self, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        self.new_start_at = Some(start);
        self.new_end_at = Some(end);
        self
    }

    pub fn with_new_teacher(mut self, teacher_id: TeacherId) -> Self {
        self.new_teacher_id = Some(teacher_id);
        self
    }

    fn to_proposal(&self) -> EngineResult<ScheduleException> {
        let mut proposal = ScheduleException::proposal(
            self.center_id,
            self.rule_id,
            self.original_date,
            self.exception_type,
        );
        proposal.new_start_at = self.new_start_at;
        proposal.new_end_at = self.new_end_at;
        proposal.new_teacher_id = self.new_teacher_id;
        proposal.new_room_id = self.new_room_id;
        proposal.reason = self.reason.clone();
        check_proposal(&proposal)?;
        Ok(proposal)
    }
}

/// Field checks shared by every path that creates exception rows.
pub(crate) fn check_proposal(proposal: &ScheduleException) -> EngineResult<()> {
    proposal.validate()?;
    if let Some((start, end)) = proposal.new_slot() {
        if end - start > Duration::days(1) {
            return Err(EngineError::InvalidParams(
                "new slot may not be longer than 24 hours".to_string(),
            ));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewAction {
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRequest {
    pub center_id: CenterId,
    pub exception_id: ExceptionId,
    pub admin_id: AdminId,
    pub action: ReviewAction,
    /// Accept buffer conflicts when the offering permits it.
    pub override_buffer: bool,
    /// For REPLACE_TEACHER: rewrite the rule's teacher instead of the
    /// single occurrence.
    pub apply_to_all: bool,
    pub note: String,
    pub deadline: Option<Instant>,
}

impl ReviewRequest {
    pub fn approve(center_id: CenterId, exception_id: ExceptionId, admin_id: AdminId) -> Self {
        Self {
            center_id,
            exception_id,
            admin_id,
            action: ReviewAction::Approve,
            override_buffer: false,
            apply_to_all: false,
            note: String::new(),
            deadline: None,
        }
    }

    pub fn reject(center_id: CenterId, exception_id: ExceptionId, admin_id: AdminId) -> Self {
        Self {
            action: ReviewAction::Reject,
            ..Self::approve(center_id, exception_id, admin_id)
        }
    }
}

pub struct ExceptionService<'a, S: Store> {
    ctx: &'a EngineContext<S>,
}

impl<'a, S: Store> ExceptionService<'a, S> {
    pub fn new(ctx: &'a EngineContext<S>) -> Self {
        Self { ctx }
    }

    /// `true` when a proposal for `(rule, date)` is still accepted now.
    pub fn check_exception_deadline(
        &self,
        center_id: CenterId,
        rule_id: RuleId,
        date: NaiveDate,
    ) -> EngineResult<bool> {
        Ok(!self.rule_lock_status(center_id, rule_id, date)?.is_locked)
    }

    pub fn rule_lock_status(
        &self,
        center_id: CenterId,
        rule_id: RuleId,
        date: NaiveDate,
    ) -> EngineResult<RuleLockStatus> {
        let now = self.ctx.clock.now();
        let default_lead = self.ctx.config.default_exception_lead_days;
        self.ctx.store.with_reader(|repo| {
            let center = load_center(repo, center_id)?;
            let rule = load_rule(repo, center_id, rule_id)?;
            Ok(evaluate_lock(now, &center, &rule, date, default_lead))
        })
    }

    /// Stores a PENDING proposal from a teacher.
    pub fn create_exception(
        &self,
        request: &CreateExceptionRequest,
    ) -> EngineResult<ScheduleException> {
        let proposal = request.to_proposal()?;
        let now = self.ctx.clock.now();
        let default_lead = self.ctx.config.default_exception_lead_days;

        let result = self.ctx.store.in_transaction(|repo| {
            ensure_active_member(repo, request.center_id, request.teacher_id)?;
            let rule = load_rule(repo, request.center_id, request.rule_id)?;
            ensure_owns_rule(&rule, request.teacher_id)?;
            if !rule.occurs_on(request.original_date) {
                return Err(EngineError::InvalidParams(format!(
                    "{} is not an occurrence of rule {}",
                    request.original_date, rule.id
                )));
            }
            let center = load_center(repo, request.center_id)?;
            let lock = evaluate_lock(now, &center, &rule, request.original_date, default_lead);
            if let Some(reason) = lock.lock_reason {
                return Err(EngineError::DeadlineExceeded {
                    rule_id: rule.id,
                    original_date: request.original_date,
                    reason: reason.as_code().to_string(),
                });
            }

            let created = repo.create_exception(&proposal)?;
            repo.write_audit(
                &AuditEntry::new(
                    request.center_id,
                    Actor::Teacher(request.teacher_id),
                    AuditAction::CreateException,
                    AuditTarget::Exception,
                    created.id,
                )
                .with_after(&created),
            )?;
            let post = vec![
                PostCommit::invalidate_rules(request.center_id, [&rule]),
                PostCommit::ExceptionSubmitted(created.clone()),
            ];
            Ok((created, post))
        });

        match result {
            Ok((created, post)) => {
                self.ctx.run_post_commit(post);
                info!(
                    "event=exception_create module=exception status=ok center_id={} exception_id={} rule_id={} type={}",
                    created.center_id,
                    created.id,
                    created.rule_id,
                    created.exception_type.as_code()
                );
                Ok(created)
            }
            Err(err) => {
                warn!(
                    "event=exception_create module=exception status=error center_id={} rule_id={} error_code={}",
                    request.center_id,
                    request.rule_id,
                    err.code().name()
                );
                Err(err)
            }
        }
    }

    /// Withdraws a teacher's own PENDING proposal.
    pub fn revoke_exception(
        &self,
        center_id: CenterId,
        exception_id: ExceptionId,
        teacher_id: TeacherId,
    ) -> EngineResult<ScheduleException> {
        let (revoked, post) = self.ctx.store.in_transaction(|repo| {
            let mut exception = load_exception(repo, center_id, exception_id)?;
            ensure_active_member(repo, center_id, teacher_id)?;
            let rule = load_rule_any(repo, exception.rule_id)?;
            ensure_owns_rule(&rule, teacher_id)?;
            let before = exception.clone();
            move_status(&mut exception, ExceptionStatus::Revoked)?;
            repo.update_exception(&exception)?;
            repo.write_audit(
                &AuditEntry::new(
                    center_id,
                    Actor::Teacher(teacher_id),
                    AuditAction::RevokeException,
                    AuditTarget::Exception,
                    exception.id,
                )
                .with_before(&before)
                .with_after(&exception),
            )?;
            Ok((exception, vec![PostCommit::invalidate_rules(center_id, [&rule])]))
        })?;
        self.ctx.run_post_commit(post);
        info!(
            "event=exception_revoke module=exception status=ok center_id={} exception_id={}",
            center_id, exception_id
        );
        Ok(revoked)
    }

    /// Approves or rejects a PENDING exception.
    pub fn review_exception(&self, request: &ReviewRequest) -> EngineResult<ScheduleException> {
        let reviewed_at = self.ctx.clock.now().with_timezone(&Utc);
        let horizon_days = self.ctx.config.recurrence_horizon_days;

        let result = self
            .ctx
            .store
            .in_transaction_until(request.deadline, |repo| match request.action {
                ReviewAction::Reject => reject_in_tx(repo, request, reviewed_at),
                ReviewAction::Approve => approve_in_tx(repo, request, reviewed_at, horizon_days),
            });

        match result {
            Ok((reviewed, post)) => {
                self.ctx.run_post_commit(post);
                info!(
                    "event=exception_review module=exception status=ok center_id={} exception_id={} action={:?} result={}",
                    request.center_id,
                    request.exception_id,
                    request.action,
                    reviewed.status.as_code()
                );
                Ok(reviewed)
            }
            Err(err) => {
                warn!(
                    "event=exception_review module=exception status=error center_id={} exception_id={} action={:?} error_code={}",
                    request.center_id,
                    request.exception_id,
                    request.action,
                    err.code().name()
                );
                Err(err)
            }
        }
    }

    pub fn get_exception(
        &self,
        center_id: CenterId,
        exception_id: ExceptionId,
    ) -> EngineResult<ScheduleException> {
        self.ctx
            .store
            .with_reader(|repo| load_exception(repo, center_id, exception_id))
    }

    pub fn list_pending(&self, center_id: CenterId) -> EngineResult<Vec<ScheduleException>> {
        self.ctx
            .store
            .with_reader(|repo| Ok(repo.list_pending(center_id)?))
    }

    pub fn list_by_status(
        &self,
        center_id: CenterId,
        status: Option<ExceptionStatus>,
    ) -> EngineResult<Vec<ScheduleException>> {
        self.ctx
            .store
            .with_reader(|repo| Ok(repo.list_by_status(center_id, status)?))
    }

    pub fn list_by_date_range(
        &self,
        center_id: CenterId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<Vec<ScheduleException>> {
        if to < from {
            return Err(EngineError::InvalidParams(format!(
                "range end {to} is before start {from}"
            )));
        }
        self.ctx
            .store
            .with_reader(|repo| Ok(repo.list_by_date_range(center_id, from, to)?))
    }

    pub fn list_for_rule(
        &self,
        center_id: CenterId,
        rule_id: RuleId,
    ) -> EngineResult<Vec<ScheduleException>> {
        self.ctx.store.with_reader(|repo| {
            load_rule_any(repo, rule_id).and_then(|rule| {
                if rule.center_id != center_id {
                    return Err(EngineError::Forbidden(format!(
                        "rule {rule_id} belongs to another center"
                    )));
                }
                Ok(repo.list_exceptions_by_rule(rule_id)?)
            })
        })
    }
}

type Reviewed = (ScheduleException, Vec<PostCommit>);

fn reject_in_tx(
    repo: &dyn ScheduleRepository,
    request: &ReviewRequest,
    reviewed_at: DateTime<Utc>,
) -> EngineResult<Reviewed> {
    let mut exception = load_exception(repo, request.center_id, request.exception_id)?;
    let before = exception.clone();
    mark_reviewed(&mut exception, ExceptionStatus::Rejected, request, reviewed_at)?;
    repo.update_exception(&exception)?;

    let mut post = Vec::new();
    if let Some(partner_id) = exception.linked_exception_id {
        if let Some(mut partner) = repo.get_exception(partner_id)? {
            if partner.status == ExceptionStatus::Pending {
                mark_reviewed(&mut partner, ExceptionStatus::Rejected, request, reviewed_at)?;
                repo.update_exception(&partner)?;
                post.push(PostCommit::ExceptionReviewed(partner));
            }
        }
    }

    repo.write_audit(
        &AuditEntry::new(
            request.center_id,
            Actor::Admin(request.admin_id),
            AuditAction::ReviewExceptionReject,
            AuditTarget::Exception,
            exception.id,
        )
        .with_before(&before)
        .with_after(&exception),
    )?;

    let rule = load_rule_any(repo, exception.rule_id)?;
    post.insert(0, PostCommit::ExceptionReviewed(exception.clone()));
    post.push(PostCommit::invalidate_rules(request.center_id, [&rule]));
    Ok((exception, post))
}

fn approve_in_tx(
    repo: &dyn ScheduleRepository,
    request: &ReviewRequest,
    reviewed_at: DateTime<Utc>,
    horizon_days: u32,
) -> EngineResult<Reviewed> {
    let mut exception = load_exception(repo, request.center_id, request.exception_id)?;
    if exception.status != ExceptionStatus::Pending {
        return Err(EngineError::AlreadyProcessed {
            exception_id: exception.id,
            status: exception.status,
        });
    }
    let rule = load_rule_any(repo, exception.rule_id)?;
    if rule.is_deleted {
        return Err(EngineError::RuleConflict(format!(
            "rule {} was deleted",
            rule.id
        )));
    }
    ensure_single_approval(repo, &exception)?;

    let offering = repo
        .get_offering(rule.offering_id)?
        .ok_or_else(|| EngineError::not_found("offering", rule.offering_id))?;
    let course = repo
        .get_course(offering.course_id)?
        .ok_or_else(|| EngineError::not_found("course", offering.course_id))?;
    let allow_override = request.override_buffer && offering.allow_buffer_override;

    if let Some(query) = approval_query(repo, &exception, &rule, request.apply_to_all)? {
        let query = query.with_horizon(horizon_days);
        let result = validate_full(repo, &query, &course, BufferHints::default(), allow_override)?;
        reject_invalid(result)?;
    }

    let before = exception.clone();
    let mut touched = vec![rule.clone()];
    let mut cascaded = Vec::new();
    let mut created_rule_id = None;
    match exception.exception_type {
        ExceptionType::Cancel | ExceptionType::Add => {}
        ExceptionType::ReplaceTeacher => {
            if request.apply_to_all {
                let mut updated = rule.clone();
                updated.teacher = TeacherAssignment::from_option(exception.new_teacher_id);
                repo.update_rule(&updated)?;
                touched.push(updated);
            }
        }
        ExceptionType::Reschedule => {
            let successor = apply_reschedule(repo, &exception, &rule)?;
            cascaded = cascade_pending(
                repo,
                rule.id,
                exception.original_date,
                &[exception.id],
                reviewed_at,
            )?;
            created_rule_id = Some(successor.id);
            touched.push(successor);
        }
    }

    mark_reviewed(&mut exception, ExceptionStatus::Approved, request, reviewed_at)?;
    repo.update_exception(&exception)?;
    let mut audit = AuditEntry::new(
        request.center_id,
        Actor::Admin(request.admin_id),
        AuditAction::ReviewExceptionApprove,
        AuditTarget::Exception,
        exception.id,
    )
    .with_before(&before)
    .with_after(&exception);
    if let (Some(after), Some(rule_id)) = (audit.after.as_mut(), created_rule_id) {
        after["created_rule_id"] = serde_json::Value::String(rule_id.to_string());
    }
    repo.write_audit(&audit)?;

    let mut post = vec![PostCommit::ExceptionReviewed(exception.clone())];
    post.extend(cascaded.into_iter().map(PostCommit::ExceptionReviewed));
    // Runs after the status update so the approved row's teacher is included.
    post.push(invalidate_rule_writes(repo, request.center_id, &touched)?);
    Ok((exception, post))
}

/// Slot the approved change would occupy; `None` for CANCEL.
fn approval_query(
    repo: &dyn ScheduleRepository,
    exception: &ScheduleException,
    rule: &ScheduleRule,
    apply_to_all: bool,
) -> EngineResult<Option<SlotQuery>> {
    let teacher = exception
        .new_teacher_id
        .map_or(rule.teacher, TeacherAssignment::Assigned);
    let room_id = exception.new_room_id.unwrap_or(rule.room_id);
    let query = match exception.exception_type {
        ExceptionType::Cancel => return Ok(None),
        ExceptionType::ReplaceTeacher if apply_to_all => {
            let mut replaced = rule.clone();
            replaced.teacher = teacher;
            replaced.room_id = room_id;
            SlotQuery::for_rule(&replaced)
        }
        ExceptionType::ReplaceTeacher => SlotQuery::on_date(
            rule.center_id,
            teacher,
            room_id,
            exception.original_date,
            rule.start_time,
            rule.end_time,
        )
        .excluding(rule.id),
        ExceptionType::Add => {
            let (start, end) = new_slot(exception)?;
            let mut query = SlotQuery::on_date(
                rule.center_id,
                teacher,
                room_id,
                start.date(),
                TimeOfDay::from_naive_time(start.time()),
                TimeOfDay::from_naive_time(end.time()),
            )
            .excluding(rule.id);
            for sibling in repo.list_rules_by_offering(rule.center_id, rule.offering_id)? {
                if sibling.occurs_on(start.date()) && sibling.span_on(start.date()) == (start, end)
                {
                    query = query.excluding(sibling.id);
                }
            }
            query
        }
        ExceptionType::Reschedule => {
            let (start, end) = new_slot(exception)?;
            let range = EffectiveRange::new(start.date(), rule.effective_range.end_date)?;
            SlotQuery {
                weekday: weekday_of(start.date()),
                start_time: TimeOfDay::from_naive_time(start.time()),
                end_time: TimeOfDay::from_naive_time(end.time()),
                range,
                ..SlotQuery::for_rule(rule)
            }
            .with_assignment(teacher, room_id)
        }
    };
    Ok(Some(query))
}

fn reject_invalid(result: ValidationResult) -> EngineResult<()> {
    if result.has_hard_conflicts() {
        return Err(EngineError::RescheduleConflict(result));
    }
    if !result.valid {
        return Err(EngineError::Buffer(result));
    }
    Ok(())
}

/// Ends the old rule before the rescheduled date and starts its successor.
fn apply_reschedule(
    repo: &dyn ScheduleRepository,
    exception: &ScheduleException,
    rule: &ScheduleRule,
) -> EngineResult<ScheduleRule> {
    let (start, end) = new_slot(exception)?;
    let mut successor = ScheduleRule::new(
        rule.center_id,
        rule.offering_id,
        exception
            .new_teacher_id
            .map_or(rule.teacher, TeacherAssignment::Assigned),
        exception.new_room_id.unwrap_or(rule.room_id),
        weekday_of(start.date()),
        TimeOfDay::from_naive_time(start.time()),
        TimeOfDay::from_naive_time(end.time()),
        EffectiveRange::new(start.date(), rule.effective_range.end_date)?,
    );
    successor.name = rule.name.clone();
    successor.status = rule.status;
    successor.skip_holiday = rule.skip_holiday;
    successor.validate()?;

    match rule.effective_range.truncated_before(exception.original_date) {
        Some(range) => {
            let mut truncated = rule.clone();
            truncated.effective_range = range;
            repo.update_rule(&truncated)?;
        }
        None => repo.soft_delete_rule(rule.id)?,
    }
    repo.create_rule(&successor)?;
    Ok(successor)
}

/// Invalidation for writes to `rules`: their own teachers plus every
/// teacher an approved ADD or REPLACE_TEACHER on them assigns.
pub(crate) fn invalidate_rule_writes<'r>(
    repo: &dyn ScheduleRepository,
    center_id: CenterId,
    rules: impl IntoIterator<Item = &'r ScheduleRule>,
) -> EngineResult<PostCommit> {
    let mut teachers = BTreeSet::new();
    for rule in rules {
        teachers.extend(rule.teacher.teacher_id());
        for exception in repo.list_exceptions_by_rule(rule.id)? {
            if exception.status == ExceptionStatus::Approved {
                teachers.extend(exception.new_teacher_id);
            }
        }
    }
    Ok(PostCommit::Invalidate {
        center_id,
        teachers,
    })
}

/// Moves PENDING exceptions of `rule_id` on or after `from` to CANCELLED.
pub(crate) fn cascade_pending(
    repo: &dyn ScheduleRepository,
    rule_id: RuleId,
    from: NaiveDate,
    keep: &[ExceptionId],
    at: DateTime<Utc>,
) -> EngineResult<Vec<ScheduleException>> {
    let mut cancelled = Vec::new();
    for mut pending in repo.list_exceptions_by_rule(rule_id)? {
        if pending.status != ExceptionStatus::Pending
            || pending.original_date < from
            || keep.contains(&pending.id)
        {
            continue;
        }
        move_status(&mut pending, ExceptionStatus::Cancelled)?;
        pending.reviewed_at = Some(at);
        repo.update_exception(&pending)?;
        cancelled.push(pending);
    }
    Ok(cancelled)
}

fn ensure_single_approval(
    repo: &dyn ScheduleRepository,
    exception: &ScheduleException,
) -> EngineResult<()> {
    let pair_compatible = |other: ExceptionType| {
        matches!(
            (exception.exception_type, other),
            (ExceptionType::Cancel, ExceptionType::Add) | (ExceptionType::Add, ExceptionType::Cancel)
        )
    };
    let clash = repo
        .list_exceptions_by_rule_date(exception.rule_id, exception.original_date)?
        .into_iter()
        .find(|other| {
            other.id != exception.id
                && other.status == ExceptionStatus::Approved
                && !pair_compatible(other.exception_type)
        });
    match clash {
        Some(other) => Err(EngineError::RuleConflict(format!(
            "exception {} is already approved for rule {} on {}",
            other.id, exception.rule_id, exception.original_date
        ))),
        None => Ok(()),
    }
}

fn mark_reviewed(
    exception: &mut ScheduleException,
    status: ExceptionStatus,
    request: &ReviewRequest,
    reviewed_at: DateTime<Utc>,
) -> EngineResult<()> {
    move_status(exception, status)?;
    exception.reviewed_by = Some(request.admin_id);
    exception.reviewed_at = Some(reviewed_at);
    exception.review_note = request.note.clone();
    Ok(())
}

fn move_status(exception: &mut ScheduleException, next: ExceptionStatus) -> EngineResult<()> {
    let current = exception.status;
    exception
        .transition(next)
        .map_err(|_| EngineError::AlreadyProcessed {
            exception_id: exception.id,
            status: current,
        })
}

fn new_slot(exception: &ScheduleException) -> EngineResult<(NaiveDateTime, NaiveDateTime)> {
    exception.validate()?;
    exception.new_slot().ok_or_else(|| {
        EngineError::InvalidParams(format!("exception {} has no new slot", exception.id))
    })
}

pub(crate) fn load_center(repo: &dyn ScheduleRepository, center_id: CenterId) -> EngineResult<Center> {
    repo.get_center(center_id)?
        .ok_or_else(|| EngineError::not_found("center", center_id))
}

/// Active, non-deleted rule of `center_id`.
pub(crate) fn load_rule(
    repo: &dyn ScheduleRepository,
    center_id: CenterId,
    rule_id: RuleId,
) -> EngineResult<ScheduleRule> {
    let rule = load_rule_any(repo, rule_id)?;
    if rule.is_deleted {
        return Err(EngineError::not_found("rule", rule_id));
    }
    if rule.center_id != center_id {
        return Err(EngineError::Forbidden(format!(
            "rule {rule_id} belongs to another center"
        )));
    }
    Ok(rule)
}

fn load_rule_any(repo: &dyn ScheduleRepository, rule_id: RuleId) -> EngineResult<ScheduleRule> {
    repo.get_rule(rule_id)?
        .ok_or_else(|| EngineError::not_found("rule", rule_id))
}

fn load_exception(
    repo: &dyn ScheduleRepository,
    center_id: CenterId,
    exception_id: ExceptionId,
) -> EngineResult<ScheduleException> {
    let exception = repo
        .get_exception(exception_id)?
        .ok_or_else(|| EngineError::not_found("exception", exception_id))?;
    if exception.center_id != center_id {
        return Err(EngineError::Forbidden(format!(
            "exception {exception_id} belongs to another center"
        )));
    }
    Ok(exception)
}

pub(crate) fn ensure_active_member(
    repo: &dyn ScheduleRepository,
    center_id: CenterId,
    teacher_id: TeacherId,
) -> EngineResult<()> {
    match repo.get_membership(center_id, teacher_id)? {
        Some(membership) if membership.is_active() => Ok(()),
        _ => Err(EngineError::Forbidden(format!(
            "teacher {teacher_id} is not an active member of center {center_id}"
        ))),
    }
}

/// Teachers may act on their own rules and on unassigned ones.
pub(crate) fn ensure_owns_rule(rule: &ScheduleRule, teacher_id: TeacherId) -> EngineResult<()> {
    match rule.teacher {
        TeacherAssignment::Assigned(owner) if owner != teacher_id => Err(EngineError::Forbidden(
            format!("rule {} is assigned to another teacher", rule.id),
        )),
        _ => Ok(()),
    }
}
