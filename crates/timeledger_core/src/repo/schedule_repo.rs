//! Scheduling repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Load and store rules, exceptions, overlays, tenancy rows and audit
//!   entries.
//! - Keep SQL, column encodings and row decoding inside this file.
//!
//! # Invariants
//! - Dates are stored as `YYYY-MM-DD`, times as `HH:MM`, local datetimes as
//!   `YYYY-MM-DDTHH:MM:SS`; string order equals chronological order.
//! - Exception listings are ordered by insertion within one date, so the
//!   "first pending" exception is stable.

use super::{RepoError, RepoResult};
use crate::calendar::{format_date, format_local_datetime, parse_date, parse_local_datetime, TimeOfDay};
use crate::model::audit::{AuditEntry, AuditRecord};
use crate::model::exception::{
    ExceptionId, ExceptionStatus, ExceptionType, ScheduleException,
};
use crate::model::personal_event::{EventRecurrence, PersonalEvent};
use crate::model::rule::{EffectiveRange, RuleId, RuleStatus, ScheduleRule, TeacherAssignment};
use crate::model::tenancy::{
    Center, CenterId, CenterMembership, CenterSettings, Course, CourseId, Holiday,
    MembershipStatus, Offering, OfferingId, Room, RoomId, Teacher, TeacherId,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Params, Row};
use uuid::Uuid;

const RULE_SELECT_SQL: &str = "SELECT
    id,
    center_id,
    offering_id,
    teacher_id,
    room_id,
    name,
    weekday,
    start_time,
    end_time,
    duration_min,
    start_date,
    end_date,
    status,
    skip_holiday,
    lock_at,
    suspended_dates,
    is_deleted
FROM schedule_rules";

const EXCEPTION_SELECT_SQL: &str = "SELECT
    id,
    center_id,
    rule_id,
    original_date,
    exception_type,
    status,
    new_start_at,
    new_end_at,
    new_teacher_id,
    new_room_id,
    reason,
    linked_exception_id,
    reviewed_by,
    reviewed_at,
    review_note,
    created_at
FROM schedule_exceptions";

const PERSONAL_EVENT_SELECT_SQL: &str = "SELECT
    id,
    teacher_id,
    title,
    start_at,
    end_at,
    recurrence,
    recurrence_interval,
    recurrence_until
FROM personal_events";

/// Rule ids bound per batched exception query.
const EXCEPTION_BATCH_SIZE: usize = 400;

/// Data access for every engine operation.
///
/// Implementations handed out by `Store::in_transaction` must make all
/// reads and writes part of that one transaction.
pub trait ScheduleRepository {
    fn get_center(&self, id: CenterId) -> RepoResult<Option<Center>>;
    fn get_course(&self, id: CourseId) -> RepoResult<Option<Course>>;
    fn get_offering(&self, id: OfferingId) -> RepoResult<Option<Offering>>;
    fn get_teacher(&self, id: TeacherId) -> RepoResult<Option<Teacher>>;
    fn get_room(&self, id: RoomId) -> RepoResult<Option<Room>>;
    fn get_membership(
        &self,
        center_id: CenterId,
        teacher_id: TeacherId,
    ) -> RepoResult<Option<CenterMembership>>;
    fn list_active_memberships(&self, teacher_id: TeacherId) -> RepoResult<Vec<CenterMembership>>;

    /// Non-deleted rules of a center in any status.
    fn list_rules_by_center(&self, center_id: CenterId) -> RepoResult<Vec<ScheduleRule>>;
    fn list_rules_by_offering(
        &self,
        center_id: CenterId,
        offering_id: OfferingId,
    ) -> RepoResult<Vec<ScheduleRule>>;
    /// Non-deleted PLANNED/CONFIRMED rules on the given weekdays.
    fn list_active_rules_on_weekdays(
        &self,
        center_id: CenterId,
        weekdays: &[u8],
    ) -> RepoResult<Vec<ScheduleRule>>;
    /// Loads a rule including soft-deleted ones.
    fn get_rule(&self, id: RuleId) -> RepoResult<Option<ScheduleRule>>;
    fn create_rule(&self, rule: &ScheduleRule) -> RepoResult<()>;
    fn update_rule(&self, rule: &ScheduleRule) -> RepoResult<()>;
    fn soft_delete_rule(&self, id: RuleId) -> RepoResult<()>;

    fn list_exceptions_by_rule_date(
        &self,
        rule_id: RuleId,
        date: NaiveDate,
    ) -> RepoResult<Vec<ScheduleException>>;
    /// Exceptions of `rule_ids` whose original date, or ADD target date,
    /// falls in `[from, to]`.
    fn batch_list_exceptions(
        &self,
        rule_ids: &[RuleId],
        from: NaiveDate,
        to: NaiveDate,
    ) -> RepoResult<Vec<ScheduleException>>;
    fn list_exceptions_by_rule(&self, rule_id: RuleId) -> RepoResult<Vec<ScheduleException>>;
    fn get_exception(&self, id: ExceptionId) -> RepoResult<Option<ScheduleException>>;
    /// Inserts and returns the stored row.
    fn create_exception(&self, exception: &ScheduleException) -> RepoResult<ScheduleException>;
    /// Persists status and review fields.
    fn update_exception(&self, exception: &ScheduleException) -> RepoResult<()>;
    fn list_pending(&self, center_id: CenterId) -> RepoResult<Vec<ScheduleException>>;
    fn list_by_status(
        &self,
        center_id: CenterId,
        status: Option<ExceptionStatus>,
    ) -> RepoResult<Vec<ScheduleException>>;
    fn list_by_date_range(
        &self,
        center_id: CenterId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> RepoResult<Vec<ScheduleException>>;

    fn list_holidays(
        &self,
        center_id: CenterId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> RepoResult<Vec<Holiday>>;
    /// Events of a teacher that may produce busy time in `[from, to]`.
    fn list_personal_events(
        &self,
        teacher_id: TeacherId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> RepoResult<Vec<PersonalEvent>>;

    fn write_audit(&self, entry: &AuditEntry) -> RepoResult<()>;
    fn list_audit(&self, center_id: CenterId) -> RepoResult<Vec<AuditRecord>>;

    fn insert_center(&self, center: &Center) -> RepoResult<()>;
    fn insert_course(&self, course: &Course) -> RepoResult<()>;
    fn insert_offering(&self, offering: &Offering) -> RepoResult<()>;
    fn insert_teacher(&self, teacher: &Teacher) -> RepoResult<()>;
    fn upsert_membership(&self, membership: &CenterMembership) -> RepoResult<()>;
    fn insert_room(&self, room: &Room) -> RepoResult<()>;
    fn insert_holiday(&self, holiday: &Holiday) -> RepoResult<()>;
    fn insert_personal_event(&self, event: &PersonalEvent) -> RepoResult<()>;
}

/// SQLite-backed repository over a plain connection or an open transaction.
pub struct SqliteScheduleRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteScheduleRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn collect<T, P: Params>(
        &self,
        sql: &str,
        params: P,
        parse: fn(&Row<'_>) -> RepoResult<T>,
    ) -> RepoResult<Vec<T>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse(row)?);
        }
        Ok(items)
    }

    fn first<T, P: Params>(
        &self,
        sql: &str,
        params: P,
        parse: fn(&Row<'_>) -> RepoResult<T>,
    ) -> RepoResult<Option<T>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        match rows.next()? {
            Some(row) => Ok(Some(parse(row)?)),
            None => Ok(None),
        }
    }
}

impl ScheduleRepository for SqliteScheduleRepository<'_> {
    fn get_center(&self, id: CenterId) -> RepoResult<Option<Center>> {
        self.first(
            "SELECT id, name, exception_lead_days FROM centers WHERE id = ?1;",
            [id.to_string()],
            parse_center_row,
        )
    }

    fn get_course(&self, id: CourseId) -> RepoResult<Option<Course>> {
        self.first(
            "SELECT id, center_id, name, teacher_buffer_min, room_buffer_min
             FROM courses
             WHERE id = ?1 AND is_deleted = 0;",
            [id.to_string()],
            parse_course_row,
        )
    }

    fn get_offering(&self, id: OfferingId) -> RepoResult<Option<Offering>> {
        self.first(
            "SELECT id, center_id, course_id, name, default_room_id, default_teacher_id,
                    allow_buffer_override
             FROM offerings
             WHERE id = ?1 AND is_deleted = 0;",
            [id.to_string()],
            parse_offering_row,
        )
    }

    fn get_teacher(&self, id: TeacherId) -> RepoResult<Option<Teacher>> {
        self.first(
            "SELECT id, name, line_user_id FROM teachers WHERE id = ?1;",
            [id.to_string()],
            parse_teacher_row,
        )
    }

    fn get_room(&self, id: RoomId) -> RepoResult<Option<Room>> {
        self.first(
            "SELECT id, center_id, name, capacity FROM rooms WHERE id = ?1 AND is_deleted = 0;",
            [id.to_string()],
            parse_room_row,
        )
    }

    fn get_membership(
        &self,
        center_id: CenterId,
        teacher_id: TeacherId,
    ) -> RepoResult<Option<CenterMembership>> {
        self.first(
            "SELECT center_id, teacher_id, status
             FROM center_memberships
             WHERE center_id = ?1 AND teacher_id = ?2;",
            [center_id.to_string(), teacher_id.to_string()],
            parse_membership_row,
        )
    }

    fn list_active_memberships(&self, teacher_id: TeacherId) -> RepoResult<Vec<CenterMembership>> {
        self.collect(
            "SELECT center_id, teacher_id, status
             FROM center_memberships
             WHERE teacher_id = ?1 AND status = 'active'
             ORDER BY center_id ASC;",
            [teacher_id.to_string()],
            parse_membership_row,
        )
    }

    fn list_rules_by_center(&self, center_id: CenterId) -> RepoResult<Vec<ScheduleRule>> {
        self.collect(
            &format!(
                "{RULE_SELECT_SQL}
                 WHERE center_id = ?1 AND is_deleted = 0
                 ORDER BY weekday ASC, start_time ASC, id ASC;"
            ),
            [center_id.to_string()],
            parse_rule_row,
        )
    }

    fn list_rules_by_offering(
        &self,
        center_id: CenterId,
        offering_id: OfferingId,
    ) -> RepoResult<Vec<ScheduleRule>> {
        self.collect(
            &format!(
                "{RULE_SELECT_SQL}
                 WHERE center_id = ?1 AND offering_id = ?2 AND is_deleted = 0
                 ORDER BY start_date ASC, weekday ASC, start_time ASC, id ASC;"
            ),
            [center_id.to_string(), offering_id.to_string()],
            parse_rule_row,
        )
    }

    fn list_active_rules_on_weekdays(
        &self,
        center_id: CenterId,
        weekdays: &[u8],
    ) -> RepoResult<Vec<ScheduleRule>> {
        if weekdays.is_empty() {
            return Ok(Vec::new());
        }
        let weekday_list = weekdays
            .iter()
            .map(|weekday| weekday.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        self.collect(
            &format!(
                "{RULE_SELECT_SQL}
                 WHERE center_id = ?1
                   AND is_deleted = 0
                   AND status IN ('planned', 'confirmed')
                   AND weekday IN ({weekday_list})
                 ORDER BY weekday ASC, start_time ASC, id ASC;"
            ),
            [center_id.to_string()],
            parse_rule_row,
        )
    }

    fn get_rule(&self, id: RuleId) -> RepoResult<Option<ScheduleRule>> {
        self.first(
            &format!("{RULE_SELECT_SQL} WHERE id = ?1;"),
            [id.to_string()],
            parse_rule_row,
        )
    }

    fn create_rule(&self, rule: &ScheduleRule) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO schedule_rules (
                id,
                center_id,
                offering_id,
                teacher_id,
                room_id,
                name,
                weekday,
                start_time,
                end_time,
                duration_min,
                start_date,
                end_date,
                status,
                skip_holiday,
                lock_at,
                suspended_dates,
                is_deleted
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17);",
            params![
                rule.id.to_string(),
                rule.center_id.to_string(),
                rule.offering_id.to_string(),
                rule.teacher.teacher_id().map(|id| id.to_string()),
                rule.room_id.to_string(),
                rule.name,
                rule.weekday,
                rule.start_time.to_string(),
                rule.end_time.to_string(),
                rule.duration_minutes,
                format_date(rule.effective_range.start_date),
                rule.effective_range.end_date.map(format_date),
                rule_status_to_db(rule.status),
                bool_to_int(rule.skip_holiday),
                rule.lock_at.map(|at| at.timestamp_millis()),
                encode_dates(&rule.suspended_dates)?,
                bool_to_int(rule.is_deleted),
            ],
        )?;
        Ok(())
    }

    fn update_rule(&self, rule: &ScheduleRule) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE schedule_rules
             SET offering_id = ?2,
                 teacher_id = ?3,
                 room_id = ?4,
                 name = ?5,
                 weekday = ?6,
                 start_time = ?7,
                 end_time = ?8,
                 duration_min = ?9,
                 start_date = ?10,
                 end_date = ?11,
                 status = ?12,
                 skip_holiday = ?13,
                 lock_at = ?14,
                 suspended_dates = ?15,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1
               AND is_deleted = 0;",
            params![
                rule.id.to_string(),
                rule.offering_id.to_string(),
                rule.teacher.teacher_id().map(|id| id.to_string()),
                rule.room_id.to_string(),
                rule.name,
                rule.weekday,
                rule.start_time.to_string(),
                rule.end_time.to_string(),
                rule.duration_minutes,
                format_date(rule.effective_range.start_date),
                rule.effective_range.end_date.map(format_date),
                rule_status_to_db(rule.status),
                bool_to_int(rule.skip_holiday),
                rule.lock_at.map(|at| at.timestamp_millis()),
                encode_dates(&rule.suspended_dates)?,
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "rule",
                id: rule.id,
            });
        }
        Ok(())
    }

    fn soft_delete_rule(&self, id: RuleId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE schedule_rules
             SET is_deleted = 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1
               AND is_deleted = 0;",
            [id.to_string()],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound { entity: "rule", id });
        }
        Ok(())
    }

    fn list_exceptions_by_rule_date(
        &self,
        rule_id: RuleId,
        date: NaiveDate,
    ) -> RepoResult<Vec<ScheduleException>> {
        self.collect(
            &format!(
                "{EXCEPTION_SELECT_SQL}
                 WHERE rule_id = ?1 AND original_date = ?2
                 ORDER BY created_at ASC, rowid ASC;"
            ),
            [rule_id.to_string(), format_date(date)],
            parse_exception_row,
        )
    }

    fn batch_list_exceptions(
        &self,
        rule_ids: &[RuleId],
        from: NaiveDate,
        to: NaiveDate,
    ) -> RepoResult<Vec<ScheduleException>> {
        let from_text = format_date(from);
        let to_text = format_date(to);
        let mut items = Vec::new();
        for chunk in rule_ids.chunks(EXCEPTION_BATCH_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "{EXCEPTION_SELECT_SQL}
                 WHERE rule_id IN ({placeholders})
                   AND (
                     original_date BETWEEN ? AND ?
                     OR (exception_type = 'add' AND substr(new_start_at, 1, 10) BETWEEN ? AND ?)
                   )
                 ORDER BY original_date ASC, created_at ASC, rowid ASC;"
            );
            let mut values = chunk.iter().map(|id| id.to_string()).collect::<Vec<_>>();
            values.extend([
                from_text.clone(),
                to_text.clone(),
                from_text.clone(),
                to_text.clone(),
            ]);
            items.extend(self.collect(&sql, params_from_iter(values.iter()), parse_exception_row)?);
        }
        Ok(items)
    }

    fn list_exceptions_by_rule(&self, rule_id: RuleId) -> RepoResult<Vec<ScheduleException>> {
        self.collect(
            &format!(
                "{EXCEPTION_SELECT_SQL}
                 WHERE rule_id = ?1
                 ORDER BY original_date ASC, created_at ASC, rowid ASC;"
            ),
            [rule_id.to_string()],
            parse_exception_row,
        )
    }

    fn get_exception(&self, id: ExceptionId) -> RepoResult<Option<ScheduleException>> {
        self.first(
            &format!("{EXCEPTION_SELECT_SQL} WHERE id = ?1;"),
            [id.to_string()],
            parse_exception_row,
        )
    }

    fn create_exception(&self, exception: &ScheduleException) -> RepoResult<ScheduleException> {
        self.conn.execute(
            "INSERT INTO schedule_exceptions (
                id,
                center_id,
                rule_id,
                original_date,
                exception_type,
                status,
                new_start_at,
                new_end_at,
                new_teacher_id,
                new_room_id,
                reason,
                linked_exception_id,
                reviewed_by,
                reviewed_at,
                review_note
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15);",
            params![
                exception.id.to_string(),
                exception.center_id.to_string(),
                exception.rule_id.to_string(),
                format_date(exception.original_date),
                exception_type_to_db(exception.exception_type),
                exception_status_to_db(exception.status),
                exception.new_start_at.map(format_local_datetime),
                exception.new_end_at.map(format_local_datetime),
                exception.new_teacher_id.map(|id| id.to_string()),
                exception.new_room_id.map(|id| id.to_string()),
                exception.reason,
                exception.linked_exception_id.map(|id| id.to_string()),
                exception.reviewed_by.map(|id| id.to_string()),
                exception.reviewed_at.map(|at| at.timestamp_millis()),
                exception.review_note,
            ],
        )?;
        self.get_exception(exception.id)?
            .ok_or(RepoError::NotFound {
                entity: "exception",
                id: exception.id,
            })
    }

    fn update_exception(&self, exception: &ScheduleException) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE schedule_exceptions
             SET status = ?2,
                 reviewed_by = ?3,
                 reviewed_at = ?4,
                 review_note = ?5,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![
                exception.id.to_string(),
                exception_status_to_db(exception.status),
                exception.reviewed_by.map(|id| id.to_string()),
                exception.reviewed_at.map(|at| at.timestamp_millis()),
                exception.review_note,
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "exception",
                id: exception.id,
            });
        }
        Ok(())
    }

    fn list_pending(&self, center_id: CenterId) -> RepoResult<Vec<ScheduleException>> {
        self.list_by_status(center_id, Some(ExceptionStatus::Pending))
    }

    fn list_by_status(
        &self,
        center_id: CenterId,
        status: Option<ExceptionStatus>,
    ) -> RepoResult<Vec<ScheduleException>> {
        match status {
            Some(status) => self.collect(
                &format!(
                    "{EXCEPTION_SELECT_SQL}
                     WHERE center_id = ?1 AND status = ?2
                     ORDER BY original_date ASC, created_at ASC, rowid ASC;"
                ),
                [center_id.to_string(), exception_status_to_db(status).to_string()],
                parse_exception_row,
            ),
            None => self.collect(
                &format!(
                    "{EXCEPTION_SELECT_SQL}
                     WHERE center_id = ?1
                     ORDER BY original_date ASC, created_at ASC, rowid ASC;"
                ),
                [center_id.to_string()],
                parse_exception_row,
            ),
        }
    }

    fn list_by_date_range(
        &self,
        center_id: CenterId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> RepoResult<Vec<ScheduleException>> {
        self.collect(
            &format!(
                "{EXCEPTION_SELECT_SQL}
                 WHERE center_id = ?1 AND original_date BETWEEN ?2 AND ?3
                 ORDER BY original_date ASC, created_at ASC, rowid ASC;"
            ),
            [center_id.to_string(), format_date(from), format_date(to)],
            parse_exception_row,
        )
    }

    fn list_holidays(
        &self,
        center_id: CenterId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> RepoResult<Vec<Holiday>> {
        self.collect(
            "SELECT id, center_id, holiday_date, name, force_cancel
             FROM center_holidays
             WHERE center_id = ?1
               AND holiday_date BETWEEN ?2 AND ?3
               AND is_deleted = 0
             ORDER BY holiday_date ASC, id ASC;",
            [center_id.to_string(), format_date(from), format_date(to)],
            parse_holiday_row,
        )
    }

    fn list_personal_events(
        &self,
        teacher_id: TeacherId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> RepoResult<Vec<PersonalEvent>> {
        self.collect(
            &format!(
                "{PERSONAL_EVENT_SELECT_SQL}
                 WHERE teacher_id = ?1
                   AND is_deleted = 0
                   AND substr(start_at, 1, 10) <= ?3
                   AND (
                     (recurrence = 'none' AND end_at >= ?2)
                     OR (recurrence <> 'none' AND (recurrence_until IS NULL OR recurrence_until >= date(?2, '-1 day')))
                   )
                 ORDER BY start_at ASC, id ASC;"
            ),
            [teacher_id.to_string(), format_date(from), format_date(to)],
            parse_personal_event_row,
        )
    }

    fn write_audit(&self, entry: &AuditEntry) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO audit_logs (
                center_id,
                actor_type,
                actor_id,
                action,
                target_type,
                target_id,
                before_json,
                after_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                entry.center_id.to_string(),
                entry.actor.kind(),
                entry.actor.id().map(|id| id.to_string()),
                entry.action.as_str(),
                entry.target.as_str(),
                entry.target_id.to_string(),
                entry.before.as_ref().map(|value| value.to_string()),
                entry.after.as_ref().map(|value| value.to_string()),
            ],
        )?;
        Ok(())
    }

    fn list_audit(&self, center_id: CenterId) -> RepoResult<Vec<AuditRecord>> {
        self.collect(
            "SELECT seq, center_id, actor_type, actor_id, action, target_type, target_id,
                    before_json, after_json, created_at
             FROM audit_logs
             WHERE center_id = ?1
             ORDER BY seq ASC;",
            [center_id.to_string()],
            parse_audit_row,
        )
    }

    fn insert_center(&self, center: &Center) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO centers (id, name, exception_lead_days) VALUES (?1, ?2, ?3);",
            params![
                center.id.to_string(),
                center.name,
                center.settings.exception_lead_days
            ],
        )?;
        Ok(())
    }

    fn insert_course(&self, course: &Course) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO courses (id, center_id, name, teacher_buffer_min, room_buffer_min)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                course.id.to_string(),
                course.center_id.to_string(),
                course.name,
                course.teacher_buffer_min,
                course.room_buffer_min,
            ],
        )?;
        Ok(())
    }

    fn insert_offering(&self, offering: &Offering) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO offerings (
                id,
                center_id,
                course_id,
                name,
                default_room_id,
                default_teacher_id,
                allow_buffer_override
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                offering.id.to_string(),
                offering.center_id.to_string(),
                offering.course_id.to_string(),
                offering.name,
                offering.default_room_id.map(|id| id.to_string()),
                offering.default_teacher.teacher_id().map(|id| id.to_string()),
                bool_to_int(offering.allow_buffer_override),
            ],
        )?;
        Ok(())
    }

    fn insert_teacher(&self, teacher: &Teacher) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO teachers (id, name, line_user_id) VALUES (?1, ?2, ?3);",
            params![teacher.id.to_string(), teacher.name, teacher.line_user_id],
        )?;
        Ok(())
    }

    fn upsert_membership(&self, membership: &CenterMembership) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO center_memberships (center_id, teacher_id, status)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(center_id, teacher_id) DO UPDATE SET status = excluded.status;",
            params![
                membership.center_id.to_string(),
                membership.teacher_id.to_string(),
                membership_status_to_db(membership.status),
            ],
        )?;
        Ok(())
    }

    fn insert_room(&self, room: &Room) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO rooms (id, center_id, name, capacity) VALUES (?1, ?2, ?3, ?4);",
            params![
                room.id.to_string(),
                room.center_id.to_string(),
                room.name,
                room.capacity
            ],
        )?;
        Ok(())
    }

    fn insert_holiday(&self, holiday: &Holiday) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO center_holidays (id, center_id, holiday_date, name, force_cancel)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                holiday.id.to_string(),
                holiday.center_id.to_string(),
                format_date(holiday.date),
                holiday.name,
                bool_to_int(holiday.force_cancel),
            ],
        )?;
        Ok(())
    }

    fn insert_personal_event(&self, event: &PersonalEvent) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO personal_events (
                id,
                teacher_id,
                title,
                start_at,
                end_at,
                recurrence,
                recurrence_interval,
                recurrence_until
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                event.id.to_string(),
                event.teacher_id.to_string(),
                event.title,
                format_local_datetime(event.start_at),
                format_local_datetime(event.end_at),
                recurrence_to_db(event.recurrence),
                event.interval.max(1),
                event.until.map(format_date),
            ],
        )?;
        Ok(())
    }
}

/// Existence check used by store bootstrap.
pub(crate) fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1;",
            [table],
            |row| row.get(0),
        )
        .optional()?;
    Ok(exists.is_some())
}

fn parse_center_row(row: &Row<'_>) -> RepoResult<Center> {
    Ok(Center {
        id: parse_uuid(&row.get::<_, String>("id")?, "centers.id")?,
        name: row.get("name")?,
        settings: CenterSettings {
            exception_lead_days: row.get("exception_lead_days")?,
        },
    })
}

fn parse_course_row(row: &Row<'_>) -> RepoResult<Course> {
    Ok(Course {
        id: parse_uuid(&row.get::<_, String>("id")?, "courses.id")?,
        center_id: parse_uuid(&row.get::<_, String>("center_id")?, "courses.center_id")?,
        name: row.get("name")?,
        teacher_buffer_min: row.get("teacher_buffer_min")?,
        room_buffer_min: row.get("room_buffer_min")?,
    })
}

fn parse_offering_row(row: &Row<'_>) -> RepoResult<Offering> {
    Ok(Offering {
        id: parse_uuid(&row.get::<_, String>("id")?, "offerings.id")?,
        center_id: parse_uuid(&row.get::<_, String>("center_id")?, "offerings.center_id")?,
        course_id: parse_uuid(&row.get::<_, String>("course_id")?, "offerings.course_id")?,
        name: row.get("name")?,
        default_room_id: parse_optional_uuid(
            row.get("default_room_id")?,
            "offerings.default_room_id",
        )?,
        default_teacher: TeacherAssignment::from_option(parse_optional_uuid(
            row.get("default_teacher_id")?,
            "offerings.default_teacher_id",
        )?),
        allow_buffer_override: row.get::<_, i64>("allow_buffer_override")? == 1,
    })
}

fn parse_teacher_row(row: &Row<'_>) -> RepoResult<Teacher> {
    Ok(Teacher {
        id: parse_uuid(&row.get::<_, String>("id")?, "teachers.id")?,
        name: row.get("name")?,
        line_user_id: row.get("line_user_id")?,
    })
}

fn parse_room_row(row: &Row<'_>) -> RepoResult<Room> {
    Ok(Room {
        id: parse_uuid(&row.get::<_, String>("id")?, "rooms.id")?,
        center_id: parse_uuid(&row.get::<_, String>("center_id")?, "rooms.center_id")?,
        name: row.get("name")?,
        capacity: row.get("capacity")?,
    })
}

fn parse_membership_row(row: &Row<'_>) -> RepoResult<CenterMembership> {
    let status_text: String = row.get("status")?;
    let status = parse_membership_status(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid membership status `{status_text}` in center_memberships.status"
        ))
    })?;
    Ok(CenterMembership {
        center_id: parse_uuid(
            &row.get::<_, String>("center_id")?,
            "center_memberships.center_id",
        )?,
        teacher_id: parse_uuid(
            &row.get::<_, String>("teacher_id")?,
            "center_memberships.teacher_id",
        )?,
        status,
    })
}

fn parse_rule_row(row: &Row<'_>) -> RepoResult<ScheduleRule> {
    let status_text: String = row.get("status")?;
    let status = parse_rule_status(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid rule status `{status_text}` in schedule_rules.status"
        ))
    })?;
    let start_date = parse_stored_date(&row.get::<_, String>("start_date")?, "schedule_rules.start_date")?;
    let end_date = match row.get::<_, Option<String>>("end_date")? {
        Some(value) => Some(parse_stored_date(&value, "schedule_rules.end_date")?),
        None => None,
    };
    let lock_at = match row.get::<_, Option<i64>>("lock_at")? {
        Some(millis) => Some(millis_to_utc(millis, "schedule_rules.lock_at")?),
        None => None,
    };

    Ok(ScheduleRule {
        id: parse_uuid(&row.get::<_, String>("id")?, "schedule_rules.id")?,
        center_id: parse_uuid(&row.get::<_, String>("center_id")?, "schedule_rules.center_id")?,
        offering_id: parse_uuid(
            &row.get::<_, String>("offering_id")?,
            "schedule_rules.offering_id",
        )?,
        teacher: TeacherAssignment::from_option(parse_optional_uuid(
            row.get("teacher_id")?,
            "schedule_rules.teacher_id",
        )?),
        room_id: parse_uuid(&row.get::<_, String>("room_id")?, "schedule_rules.room_id")?,
        name: row.get("name")?,
        weekday: row.get("weekday")?,
        start_time: parse_stored_time(&row.get::<_, String>("start_time")?, "schedule_rules.start_time")?,
        end_time: parse_stored_time(&row.get::<_, String>("end_time")?, "schedule_rules.end_time")?,
        duration_minutes: row.get("duration_min")?,
        effective_range: EffectiveRange {
            start_date,
            end_date,
        },
        status,
        skip_holiday: row.get::<_, i64>("skip_holiday")? == 1,
        lock_at,
        suspended_dates: decode_dates(&row.get::<_, String>("suspended_dates")?)?,
        is_deleted: row.get::<_, i64>("is_deleted")? == 1,
    })
}

fn parse_exception_row(row: &Row<'_>) -> RepoResult<ScheduleException> {
    let type_text: String = row.get("exception_type")?;
    let exception_type = parse_exception_type(&type_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid exception type `{type_text}` in schedule_exceptions.exception_type"
        ))
    })?;
    let status_text: String = row.get("status")?;
    let status = parse_exception_status(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid exception status `{status_text}` in schedule_exceptions.status"
        ))
    })?;
    let reviewed_at = match row.get::<_, Option<i64>>("reviewed_at")? {
        Some(millis) => Some(millis_to_utc(millis, "schedule_exceptions.reviewed_at")?),
        None => None,
    };

    Ok(ScheduleException {
        id: parse_uuid(&row.get::<_, String>("id")?, "schedule_exceptions.id")?,
        center_id: parse_uuid(
            &row.get::<_, String>("center_id")?,
            "schedule_exceptions.center_id",
        )?,
        rule_id: parse_uuid(&row.get::<_, String>("rule_id")?, "schedule_exceptions.rule_id")?,
        original_date: parse_stored_date(
            &row.get::<_, String>("original_date")?,
            "schedule_exceptions.original_date",
        )?,
        exception_type,
        status,
        new_start_at: parse_optional_datetime(
            row.get("new_start_at")?,
            "schedule_exceptions.new_start_at",
        )?,
        new_end_at: parse_optional_datetime(row.get("new_end_at")?, "schedule_exceptions.new_end_at")?,
        new_teacher_id: parse_optional_uuid(
            row.get("new_teacher_id")?,
            "schedule_exceptions.new_teacher_id",
        )?,
        new_room_id: parse_optional_uuid(row.get("new_room_id")?, "schedule_exceptions.new_room_id")?,
        reason: row.get("reason")?,
        linked_exception_id: parse_optional_uuid(
            row.get("linked_exception_id")?,
            "schedule_exceptions.linked_exception_id",
        )?,
        reviewed_by: parse_optional_uuid(row.get("reviewed_by")?, "schedule_exceptions.reviewed_by")?,
        reviewed_at,
        review_note: row.get("review_note")?,
        created_at: row.get("created_at")?,
    })
}

fn parse_holiday_row(row: &Row<'_>) -> RepoResult<Holiday> {
    Ok(Holiday {
        id: parse_uuid(&row.get::<_, String>("id")?, "center_holidays.id")?,
        center_id: parse_uuid(&row.get::<_, String>("center_id")?, "center_holidays.center_id")?,
        date: parse_stored_date(
            &row.get::<_, String>("holiday_date")?,
            "center_holidays.holiday_date",
        )?,
        name: row.get("name")?,
        force_cancel: row.get::<_, i64>("force_cancel")? == 1,
    })
}

fn parse_personal_event_row(row: &Row<'_>) -> RepoResult<PersonalEvent> {
    let recurrence_text: String = row.get("recurrence")?;
    let recurrence = parse_recurrence(&recurrence_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid recurrence `{recurrence_text}` in personal_events.recurrence"
        ))
    })?;
    let until = match row.get::<_, Option<String>>("recurrence_until")? {
        Some(value) => Some(parse_stored_date(&value, "personal_events.recurrence_until")?),
        None => None,
    };
    Ok(PersonalEvent {
        id: parse_uuid(&row.get::<_, String>("id")?, "personal_events.id")?,
        teacher_id: parse_uuid(&row.get::<_, String>("teacher_id")?, "personal_events.teacher_id")?,
        title: row.get("title")?,
        start_at: parse_stored_datetime(&row.get::<_, String>("start_at")?, "personal_events.start_at")?,
        end_at: parse_stored_datetime(&row.get::<_, String>("end_at")?, "personal_events.end_at")?,
        recurrence,
        interval: row.get("recurrence_interval")?,
        until,
    })
}

fn parse_audit_row(row: &Row<'_>) -> RepoResult<AuditRecord> {
    Ok(AuditRecord {
        seq: row.get("seq")?,
        center_id: parse_uuid(&row.get::<_, String>("center_id")?, "audit_logs.center_id")?,
        actor_type: row.get("actor_type")?,
        actor_id: parse_optional_uuid(row.get("actor_id")?, "audit_logs.actor_id")?,
        action: row.get("action")?,
        target_type: row.get("target_type")?,
        target_id: parse_uuid(&row.get::<_, String>("target_id")?, "audit_logs.target_id")?,
        before: parse_optional_json(row.get("before_json")?, "audit_logs.before_json")?,
        after: parse_optional_json(row.get("after_json")?, "audit_logs.after_json")?,
        created_at: row.get("created_at")?,
    })
}

fn parse_uuid(value: &str, column: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

fn parse_optional_uuid(value: Option<String>, column: &str) -> RepoResult<Option<Uuid>> {
    value.map(|text| parse_uuid(&text, column)).transpose()
}

fn parse_stored_date(value: &str, column: &str) -> RepoResult<NaiveDate> {
    parse_date(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid date `{value}` in {column}")))
}

fn parse_stored_time(value: &str, column: &str) -> RepoResult<TimeOfDay> {
    TimeOfDay::parse(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid time `{value}` in {column}")))
}

fn parse_stored_datetime(value: &str, column: &str) -> RepoResult<NaiveDateTime> {
    parse_local_datetime(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid datetime `{value}` in {column}")))
}

fn parse_optional_datetime(value: Option<String>, column: &str) -> RepoResult<Option<NaiveDateTime>> {
    value
        .map(|text| parse_stored_datetime(&text, column))
        .transpose()
}

fn parse_optional_json(value: Option<String>, column: &str) -> RepoResult<Option<serde_json::Value>> {
    value
        .map(|text| {
            serde_json::from_str(&text)
                .map_err(|err| RepoError::InvalidData(format!("invalid json in {column}: {err}")))
        })
        .transpose()
}

fn millis_to_utc(millis: i64, column: &str) -> RepoResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| RepoError::InvalidData(format!("invalid timestamp `{millis}` in {column}")))
}

fn encode_dates(dates: &[NaiveDate]) -> RepoResult<String> {
    let texts = dates.iter().copied().map(format_date).collect::<Vec<_>>();
    serde_json::to_string(&texts)
        .map_err(|err| RepoError::InvalidData(format!("cannot encode suspended dates: {err}")))
}

fn decode_dates(value: &str) -> RepoResult<Vec<NaiveDate>> {
    let texts: Vec<String> = serde_json::from_str(value).map_err(|err| {
        RepoError::InvalidData(format!("invalid schedule_rules.suspended_dates: {err}"))
    })?;
    texts
        .iter()
        .map(|text| parse_stored_date(text, "schedule_rules.suspended_dates"))
        .collect()
}

fn rule_status_to_db(status: RuleStatus) -> &'static str {
    match status {
        RuleStatus::Planned => "planned",
        RuleStatus::Confirmed => "confirmed",
        RuleStatus::Suspended => "suspended",
        RuleStatus::Archived => "archived",
    }
}

fn parse_rule_status(value: &str) -> Option<RuleStatus> {
    match value {
        "planned" => Some(RuleStatus::Planned),
        "confirmed" => Some(RuleStatus::Confirmed),
        "suspended" => Some(RuleStatus::Suspended),
        "archived" => Some(RuleStatus::Archived),
        _ => None,
    }
}

fn exception_type_to_db(kind: ExceptionType) -> &'static str {
    match kind {
        ExceptionType::Cancel => "cancel",
        ExceptionType::Reschedule => "reschedule",
        ExceptionType::ReplaceTeacher => "replace_teacher",
        ExceptionType::Add => "add",
    }
}

fn parse_exception_type(value: &str) -> Option<ExceptionType> {
    match value {
        "cancel" => Some(ExceptionType::Cancel),
        "reschedule" => Some(ExceptionType::Reschedule),
        "replace_teacher" => Some(ExceptionType::ReplaceTeacher),
        "add" => Some(ExceptionType::Add),
        _ => None,
    }
}

fn exception_status_to_db(status: ExceptionStatus) -> &'static str {
    match status {
        ExceptionStatus::Pending => "pending",
        ExceptionStatus::Approved => "approved",
        ExceptionStatus::Rejected => "rejected",
        ExceptionStatus::Revoked => "revoked",
        ExceptionStatus::Cancelled => "cancelled",
    }
}

fn parse_exception_status(value: &str) -> Option<ExceptionStatus> {
    match value {
        "pending" => Some(ExceptionStatus::Pending),
        "approved" => Some(ExceptionStatus::Approved),
        "rejected" => Some(ExceptionStatus::Rejected),
        "revoked" => Some(ExceptionStatus::Revoked),
        "cancelled" => Some(ExceptionStatus::Cancelled),
        _ => None,
    }
}

fn membership_status_to_db(status: MembershipStatus) -> &'static str {
    match status {
        MembershipStatus::Active => "active",
        MembershipStatus::Invited => "invited",
        MembershipStatus::Inactive => "inactive",
    }
}

fn parse_membership_status(value: &str) -> Option<MembershipStatus> {
    match value {
        "active" => Some(MembershipStatus::Active),
        "invited" => Some(MembershipStatus::Invited),
        "inactive" => Some(MembershipStatus::Inactive),
        _ => None,
    }
}

fn recurrence_to_db(recurrence: EventRecurrence) -> &'static str {
    match recurrence {
        EventRecurrence::None => "none",
        EventRecurrence::Daily => "daily",
        EventRecurrence::Weekly => "weekly",
    }
}

fn parse_recurrence(value: &str) -> Option<EventRecurrence> {
    match value {
        "none" => Some(EventRecurrence::None),
        "daily" => Some(EventRecurrence::Daily),
        "weekly" => Some(EventRecurrence::Weekly),
        _ => None,
    }
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
