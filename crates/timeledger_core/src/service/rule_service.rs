//! Rule writes validated against the rest of the center.
//!
//! # Invariants
//! - Validation runs inside the write transaction, so two concurrent
//!   writers cannot both pass against the same snapshot.
//! - Buffer override applies only when requested and the offering allows it.

use crate::error::{EngineError, EngineResult};
use crate::model::audit::{Actor, AuditAction, AuditEntry, AuditTarget};
use crate::model::rule::{RuleId, ScheduleRule};
use crate::model::tenancy::{AdminId, CenterId, Course, Offering};
use crate::repo::{ScheduleRepository, Store};
use crate::service::exception_service::{
    cascade_pending, ensure_active_member, invalidate_rule_writes, load_rule,
};
use crate::service::validation::{validate_full, BufferHints, SlotQuery, ValidationResult};
use crate::service::{EngineContext, PostCommit};
use chrono::Utc;
use log::{info, warn};
use std::time::Instant;

/// Who writes and how strictly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleWriteOptions {
    pub admin_id: AdminId,
    pub allow_buffer_override: bool,
    pub deadline: Option<Instant>,
}

impl RuleWriteOptions {
    pub fn new(admin_id: AdminId) -> Self {
        Self {
            admin_id,
            allow_buffer_override: false,
            deadline: None,
        }
    }

    pub fn with_buffer_override(mut self) -> Self {
        self.allow_buffer_override = true;
        self
    }
}

/// Stored rule plus the validation that admitted it; buffer conflicts
/// accepted by override remain listed.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleWrite {
    pub rule: ScheduleRule,
    pub validation: ValidationResult,
}

pub struct RuleService<'a, S: Store> {
    ctx: &'a EngineContext<S>,
}

impl<'a, S: Store> RuleService<'a, S> {
    pub fn new(ctx: &'a EngineContext<S>) -> Self {
        Self { ctx }
    }

    pub fn create_rule(
        &self,
        rule: ScheduleRule,
        options: &RuleWriteOptions,
    ) -> EngineResult<RuleWrite> {
        rule.validate()?;
        let horizon_days = self.ctx.config.recurrence_horizon_days;
        let result = self.ctx.store.in_transaction_until(options.deadline, |repo| {
            let (_, course, allow) = load_placement(repo, &rule, options)?;
            let query = SlotQuery::for_rule(&rule).with_horizon(horizon_days);
            let validation = validate_full(repo, &query, &course, BufferHints::default(), allow)?
                .into_rule_error()?;

            repo.create_rule(&rule)?;
            repo.write_audit(
                &AuditEntry::new(
                    rule.center_id,
                    Actor::Admin(options.admin_id),
                    AuditAction::CreateRule,
                    AuditTarget::Rule,
                    rule.id,
                )
                .with_after(&rule),
            )?;
            let post = vec![PostCommit::invalidate_rules(rule.center_id, [&rule])];
            Ok((validation, post))
        });
        let (validation, post) = log_write("rule_create", &rule, result)?;
        self.ctx.run_post_commit(post);
        Ok(RuleWrite { rule, validation })
    }

    /// Replaces every field of the stored rule with `rule`.
    pub fn update_rule(
        &self,
        mut rule: ScheduleRule,
        options: &RuleWriteOptions,
    ) -> EngineResult<RuleWrite> {
        rule.set_slot(rule.weekday, rule.start_time, rule.end_time);
        rule.validate()?;
        let horizon_days = self.ctx.config.recurrence_horizon_days;
        let result = self.ctx.store.in_transaction_until(options.deadline, |repo| {
            let before = load_rule(repo, rule.center_id, rule.id)?;
            let (_, course, allow) = load_placement(repo, &rule, options)?;
            let query = SlotQuery::for_rule(&rule).with_horizon(horizon_days);
            let validation = validate_full(repo, &query, &course, BufferHints::default(), allow)?
                .into_rule_error()?;

            repo.update_rule(&rule)?;
            repo.write_audit(
                &AuditEntry::new(
                    rule.center_id,
                    Actor::Admin(options.admin_id),
                    AuditAction::UpdateRule,
                    AuditTarget::Rule,
                    rule.id,
                )
                .with_before(&before)
                .with_after(&rule),
            )?;
            let post = vec![invalidate_rule_writes(repo, rule.center_id, [&before, &rule])?];
            Ok((validation, post))
        });
        let (validation, post) = log_write("rule_update", &rule, result)?;
        self.ctx.run_post_commit(post);
        Ok(RuleWrite { rule, validation })
    }

    /// Soft-deletes the rule and cancels its pending exceptions.
    pub fn delete_rule(
        &self,
        center_id: CenterId,
        rule_id: RuleId,
        options: &RuleWriteOptions,
    ) -> EngineResult<()> {
        let now = self.ctx.clock.now().with_timezone(&Utc);
        let (post, cancelled) = self.ctx.store.in_transaction_until(options.deadline, |repo| {
            let rule = load_rule(repo, center_id, rule_id)?;
            repo.soft_delete_rule(rule.id)?;
            let cancelled = cascade_pending(
                repo,
                rule.id,
                rule.effective_range.start_date,
                &[],
                now,
            )?;
            repo.write_audit(
                &AuditEntry::new(
                    center_id,
                    Actor::Admin(options.admin_id),
                    AuditAction::DeleteRule,
                    AuditTarget::Rule,
                    rule.id,
                )
                .with_before(&rule),
            )?;
            Ok((
                vec![invalidate_rule_writes(repo, center_id, [&rule])?],
                cancelled.len(),
            ))
        })?;
        self.ctx.run_post_commit(post);
        info!(
            "event=rule_delete module=rule status=ok center_id={} rule_id={} cancelled_exceptions={}",
            center_id, rule_id, cancelled
        );
        Ok(())
    }

    pub fn get_rule(&self, center_id: CenterId, rule_id: RuleId) -> EngineResult<ScheduleRule> {
        self.ctx
            .store
            .with_reader(|repo| load_rule(repo, center_id, rule_id))
    }

    /// Non-deleted rules of the center in every status.
    pub fn list_rules(&self, center_id: CenterId) -> EngineResult<Vec<ScheduleRule>> {
        self.ctx
            .store
            .with_reader(|repo| Ok(repo.list_rules_by_center(center_id)?))
    }
}

/// Offering, course and effective override for `rule`, checked against its center.
fn load_placement(
    repo: &dyn ScheduleRepository,
    rule: &ScheduleRule,
    options: &RuleWriteOptions,
) -> EngineResult<(Offering, Course, bool)> {
    let offering = repo
        .get_offering(rule.offering_id)?
        .ok_or_else(|| EngineError::not_found("offering", rule.offering_id))?;
    if offering.center_id != rule.center_id {
        return Err(EngineError::Forbidden(format!(
            "offering {} belongs to another center",
            offering.id
        )));
    }
    let room = repo
        .get_room(rule.room_id)?
        .ok_or_else(|| EngineError::not_found("room", rule.room_id))?;
    if room.center_id != rule.center_id {
        return Err(EngineError::Forbidden(format!(
            "room {} belongs to another center",
            room.id
        )));
    }
    if let Some(teacher_id) = rule.teacher.teacher_id() {
        ensure_active_member(repo, rule.center_id, teacher_id)?;
    }
    let course = repo
        .get_course(offering.course_id)?
        .ok_or_else(|| EngineError::not_found("course", offering.course_id))?;
    let allow = options.allow_buffer_override && offering.allow_buffer_override;
    Ok((offering, course, allow))
}

fn log_write<T>(event: &str, rule: &ScheduleRule, result: EngineResult<T>) -> EngineResult<T> {
    match &result {
        Ok(_) => info!(
            "event={} module=rule status=ok center_id={} rule_id={} weekday={} start={} end={}",
            event, rule.center_id, rule.id, rule.weekday, rule.start_time, rule.end_time
        ),
        Err(err) => warn!(
            "event={} module=rule status=error center_id={} rule_id={} error_code={} conflicts={}",
            event,
            rule.center_id,
            rule.id,
            err.code().name(),
            err.conflicts().len()
        ),
    }
    result
}
