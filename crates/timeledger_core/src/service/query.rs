//! Read façade over expansion.
//!
//! # Responsibility
//! - Serve center and teacher schedules through the cache.
//! - Summarize today's sessions of a center.
//!
//! # Invariants
//! - A cache miss, a cache fault and an undecodable entry all fall back
//!   to a fresh expansion; results never depend on cache state.

use crate::cache::{center_expand_key, teacher_expand_key};
use crate::calendar::{compact_date, TimeOfDay};
use crate::error::{EngineError, EngineResult};
use crate::model::exception::{ExceptionStatus, ExceptionType};
use crate::model::rule::{CrossPart, RuleId, TeacherAssignment};
use crate::model::tenancy::{CenterId, OfferingId, RoomId, TeacherId};
use crate::repo::Store;
use crate::service::expansion::{
    detect_phase_transitions, expand_center, sort_sessions, ExceptionInfo, ExpandedSession,
    PhaseTransition, SessionOrigin, SessionSpan,
};
use crate::service::EngineContext;
use chrono::{Duration, NaiveDate};
use log::{debug, warn};
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;

/// Display status of one teacher-facing occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccurrenceStatus {
    Normal,
    Pending(ExceptionType),
    Rescheduled,
}

impl OccurrenceStatus {
    pub fn as_code(self) -> String {
        match self {
            Self::Normal => "NORMAL".to_string(),
            Self::Pending(kind) => format!("PENDING_{}", kind.as_code()),
            Self::Rescheduled => "RESCHEDULED".to_string(),
        }
    }

    /// Sessions produced by an approved ADD count as moved occurrences.
    /// An approved substitution keeps the occurrence NORMAL.
    fn of(session: &ExpandedSession) -> Self {
        if session.origin == SessionOrigin::Added {
            return Self::Rescheduled;
        }
        match &session.exception_info {
            Some(info) if info.status == ExceptionStatus::Pending => Self::Pending(info.exception_type),
            Some(info)
                if info.status == ExceptionStatus::Approved
                    && info.exception_type == ExceptionType::Reschedule =>
            {
                Self::Rescheduled
            }
            _ => Self::Normal,
        }
    }
}

impl Serialize for OccurrenceStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_code())
    }
}

/// Flat entry of a teacher's cross-center schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeacherScheduleItem {
    /// `center_<c>_rule_<r>_<yyyymmdd>_<start|end|normal>`.
    pub id: String,
    pub center_id: CenterId,
    pub rule_id: RuleId,
    pub offering_id: OfferingId,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub span: SessionSpan,
    pub room_id: RoomId,
    pub status: OccurrenceStatus,
    pub cross_part: Option<CrossPart>,
    pub exception_info: Option<ExceptionInfo>,
}

impl TeacherScheduleItem {
    fn from_session(session: ExpandedSession) -> Self {
        let part = match session.cross_part {
            Some(CrossPart::Start) => "start",
            Some(CrossPart::End) => "end",
            None => "normal",
        };
        Self {
            id: format!(
                "center_{}_rule_{}_{}_{}",
                session.center_id,
                session.rule_id,
                compact_date(session.date),
                part
            ),
            status: OccurrenceStatus::of(&session),
            center_id: session.center_id,
            rule_id: session.rule_id,
            offering_id: session.offering_id,
            date: session.date,
            start_time: session.start_time,
            end_time: session.end_time,
            span: session.span,
            room_id: session.room_id,
            cross_part: session.cross_part,
            exception_info: session.exception_info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TodaySummary {
    pub center_id: CenterId,
    pub date: NaiveDate,
    pub total_sessions: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub upcoming: usize,
    pub in_progress_teacher_ids: Vec<TeacherId>,
    /// Center-wide PENDING exceptions, any date.
    pub pending_exceptions: usize,
    /// Visible exceptions whose original date is today.
    pub changes_count: usize,
    pub has_schedule_changes: bool,
}

pub struct QueryService<'a, S: Store> {
    ctx: &'a EngineContext<S>,
}

impl<'a, S: Store> QueryService<'a, S> {
    pub fn new(ctx: &'a EngineContext<S>) -> Self {
        Self { ctx }
    }

    /// Center schedule over `[from, to]`, served through the cache.
    pub fn expand(
        &self,
        center_id: CenterId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<Vec<ExpandedSession>> {
        check_window(from, to)?;
        let key = center_expand_key(center_id, from, to);
        self.cached(&key, || {
            self.ctx
                .store
                .with_reader(|repo| expand_center(repo, center_id, from, to))
        })
    }

    /// Sessions of `teacher_id` across every center with an active membership.
    pub fn get_teacher_schedule(
        &self,
        teacher_id: TeacherId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<Vec<TeacherScheduleItem>> {
        check_window(from, to)?;
        let memberships = self
            .ctx
            .store
            .with_reader(|repo| Ok(repo.list_active_memberships(teacher_id)?))?;

        let mut sessions = Vec::new();
        for membership in &memberships {
            let center_id = membership.center_id;
            let key = teacher_expand_key(teacher_id, center_id, from, to);
            let own = self.cached(&key, || {
                Ok(self
                    .expand(center_id, from, to)?
                    .into_iter()
                    .filter(|session| session.teacher.is_assigned_to(teacher_id))
                    .collect())
            })?;
            sessions.extend(own);
        }
        sort_sessions(&mut sessions);

        let items: Vec<TeacherScheduleItem> = sessions
            .into_iter()
            .map(TeacherScheduleItem::from_session)
            .collect();
        debug!(
            "event=teacher_schedule module=query status=ok teacher_id={} centers={} items={}",
            teacher_id,
            memberships.len(),
            items.len()
        );
        Ok(items)
    }

    pub fn today_summary(&self, center_id: CenterId) -> EngineResult<TodaySummary> {
        let now = self.ctx.clock.local_now();
        let today = now.date();
        let window_start = today - Duration::days(1);
        let day_start = today.and_time(chrono::NaiveTime::MIN);

        let sessions: Vec<ExpandedSession> = self
            .expand(center_id, window_start, today)?
            .into_iter()
            .filter(|session| session.is_session_start())
            .filter(|session| session.date == today || session.span.end > day_start)
            .collect();

        let mut summary = TodaySummary {
            center_id,
            date: today,
            total_sessions: sessions.len(),
            completed: 0,
            in_progress: 0,
            upcoming: 0,
            in_progress_teacher_ids: Vec::new(),
            pending_exceptions: 0,
            changes_count: 0,
            has_schedule_changes: false,
        };
        let mut active_teachers = BTreeSet::new();
        for session in &sessions {
            if now >= session.span.end {
                summary.completed += 1;
            } else if now >= session.span.start {
                summary.in_progress += 1;
                if let TeacherAssignment::Assigned(teacher_id) = session.teacher {
                    active_teachers.insert(teacher_id);
                }
            } else {
                summary.upcoming += 1;
            }
        }
        summary.in_progress_teacher_ids = active_teachers.into_iter().collect();

        let (pending, changes) = self.ctx.store.with_reader(|repo| {
            let pending = repo.list_pending(center_id)?.len();
            let changes = repo
                .list_by_date_range(center_id, today, today)?
                .into_iter()
                .filter(|exception| exception.status.is_visible())
                .count();
            Ok((pending, changes))
        })?;
        summary.pending_exceptions = pending;
        summary.changes_count = changes;
        summary.has_schedule_changes = changes > 0;
        Ok(summary)
    }

    pub fn detect_phase_transitions(
        &self,
        center_id: CenterId,
        offering_id: OfferingId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<Vec<PhaseTransition>> {
        check_window(from, to)?;
        self.ctx.store.with_reader(|repo| {
            detect_phase_transitions(repo, center_id, offering_id, from, to)
        })
    }

    fn cached<F>(&self, key: &str, compute: F) -> EngineResult<Vec<ExpandedSession>>
    where
        F: FnOnce() -> EngineResult<Vec<ExpandedSession>>,
    {
        match self.ctx.cache.get(key) {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(sessions) => return Ok(sessions),
                Err(err) => warn!(
                    "event=cache_decode module=query status=error key={} error={}",
                    key, err
                ),
            },
            Ok(None) => {}
            Err(err) => warn!(
                "event=cache_get module=query status=error key={} error={}",
                key, err
            ),
        }

        let sessions = compute()?;
        match serde_json::to_string(&sessions) {
            Ok(raw) => {
                if let Err(err) = self.ctx.cache.set_with_ttl(key, raw, self.ctx.config.cache_ttl()) {
                    warn!(
                        "event=cache_set module=query status=error key={} error={}",
                        key, err
                    );
                }
            }
            Err(err) => warn!(
                "event=cache_encode module=query status=error key={} error={}",
                key, err
            ),
        }
        Ok(sessions)
    }
}

fn check_window(from: NaiveDate, to: NaiveDate) -> EngineResult<()> {
    if to < from {
        return Err(EngineError::InvalidParams(format!(
            "window end {to} is before start {from}"
        )));
    }
    Ok(())
}
