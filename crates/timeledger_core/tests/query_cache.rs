mod common;

use common::{at, context_at, context_with_store, date, Fixture};
use timeledger_core::cache::center_expand_key;
use timeledger_core::model::audit::Actor;
use timeledger_core::model::tenancy::{Center, CenterMembership, MembershipStatus, Room};
use timeledger_core::{
    Cache, CreateExceptionRequest, ExceptionStatus, ExceptionType, NoopCache,
    RecurrenceDeleteRequest, RecurrenceEditRequest, ReviewRequest, RuleChanges,
    ScheduleException, ScheduleRule, SqliteStore, Store, TeacherAssignment, UpdateMode,
};

#[test]
fn cached_results_match_uncached_across_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let cached = context_with_store(SqliteStore::open(&path).unwrap(), "2026-01-01 09:00");
    let plain = context_with_store(SqliteStore::open(&path).unwrap(), "2026-01-01 09:00")
        .with_cache(Box::new(NoopCache));
    let fx = Fixture::seed(&cached.store);
    let tuesday = fx.rule(2, "14:00", "15:00", &fx.room1, "2026-03-03", None);
    let friday = fx.rule(5, "23:00", "01:00", &fx.room2, "2026-03-06", None);
    fx.insert_rule(&cached.store, &tuesday);
    fx.insert_rule(&cached.store, &friday);
    let (from, to) = (date("2026-03-01"), date("2026-03-31"));

    let assert_same = |step: &str| {
        assert_eq!(
            cached.queries().expand(fx.center.id, from, to).unwrap(),
            plain.queries().expand(fx.center.id, from, to).unwrap(),
            "center schedule diverged after {step}"
        );
        assert_eq!(
            cached.queries().get_teacher_schedule(fx.teacher.id, from, to).unwrap(),
            plain.queries().get_teacher_schedule(fx.teacher.id, from, to).unwrap(),
            "teacher schedule diverged after {step}"
        );
    };

    assert_same("seed");
    assert_same("warm cache");

    let proposal = cached
        .exceptions()
        .create_exception(&CreateExceptionRequest::new(
            fx.center.id,
            fx.teacher.id,
            tuesday.id,
            date("2026-03-17"),
            ExceptionType::Cancel,
        ))
        .unwrap();
    assert_same("proposal");

    cached.cache.delete_by_pattern("schedule:*").unwrap();
    assert_same("cache cleared");

    cached
        .exceptions()
        .review_exception(&ReviewRequest::approve(fx.center.id, proposal.id, fx.admin))
        .unwrap();
    assert_same("approval");

    cached
        .recurrence()
        .edit(&RecurrenceEditRequest::new(
            fx.center.id,
            tuesday.id,
            date("2026-03-24"),
            UpdateMode::Future,
            RuleChanges::slot(common::time("16:00"), common::time("17:00")),
            Actor::Admin(fx.admin),
        ))
        .unwrap();
    assert_same("future edit");

    cached.cache.delete_by_pattern("schedule:expand:center:*").unwrap();
    assert_same("center keys cleared");
}

#[test]
fn reassigned_teacher_schedule_tracks_approvals() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reassign.db");
    let cached = context_with_store(SqliteStore::open(&path).unwrap(), "2026-01-01 09:00");
    let plain = context_with_store(SqliteStore::open(&path).unwrap(), "2026-01-01 09:00")
        .with_cache(Box::new(NoopCache));
    let fx = Fixture::seed(&cached.store);
    let tuesday = fx.rule(2, "14:00", "15:00", &fx.room1, "2026-03-03", None);
    let thursday = fx.rule(4, "10:00", "11:00", &fx.room2, "2026-03-05", None);
    fx.insert_rule(&cached.store, &tuesday);
    fx.insert_rule(&cached.store, &thursday);
    let (from, to) = (date("2026-03-01"), date("2026-03-31"));
    let substitute = fx.other_teacher.id;

    let assert_same = |step: &str| {
        assert_eq!(
            cached.queries().get_teacher_schedule(substitute, from, to).unwrap(),
            plain.queries().get_teacher_schedule(substitute, from, to).unwrap(),
            "substitute schedule diverged after {step}"
        );
    };

    let outcome = cached
        .recurrence()
        .edit(&RecurrenceEditRequest::new(
            fx.center.id,
            tuesday.id,
            date("2026-03-10"),
            UpdateMode::Single,
            RuleChanges {
                teacher: Some(TeacherAssignment::Assigned(substitute)),
                ..RuleChanges::slot(common::time("15:00"), common::time("16:00"))
            },
            Actor::Admin(fx.admin),
        ))
        .unwrap();
    assert!(cached
        .queries()
        .get_teacher_schedule(substitute, from, to)
        .unwrap()
        .is_empty());
    assert_same("single edit");

    for row in &outcome.exceptions {
        cached
            .exceptions()
            .review_exception(&ReviewRequest::approve(fx.center.id, row.id, fx.admin))
            .unwrap();
        assert_same(row.exception_type.as_code());
    }
    let items = cached.queries().get_teacher_schedule(substitute, from, to).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].date, date("2026-03-10"));
    assert_eq!(items[0].start_time, common::time("15:00"));
    assert_eq!(items[0].status.as_code(), "RESCHEDULED");

    let replace = cached
        .exceptions()
        .create_exception(
            &CreateExceptionRequest::new(
                fx.center.id,
                fx.teacher.id,
                thursday.id,
                date("2026-03-12"),
                ExceptionType::ReplaceTeacher,
            )
            .with_new_teacher(substitute),
        )
        .unwrap();
    cached
        .exceptions()
        .review_exception(&ReviewRequest::approve(fx.center.id, replace.id, fx.admin))
        .unwrap();
    assert_same("substitution");
    let items = cached.queries().get_teacher_schedule(substitute, from, to).unwrap();
    let statuses: Vec<(String, String)> = items
        .iter()
        .map(|item| (item.date.to_string(), item.status.as_code()))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("2026-03-10".to_string(), "RESCHEDULED".to_string()),
            ("2026-03-12".to_string(), "NORMAL".to_string()),
        ]
    );

    for (rule_id, first) in [(tuesday.id, "2026-03-03"), (thursday.id, "2026-03-05")] {
        cached
            .recurrence()
            .delete(&RecurrenceDeleteRequest::new(
                fx.center.id,
                rule_id,
                date(first),
                UpdateMode::All,
                Actor::Admin(fx.admin),
            ))
            .unwrap();
    }
    assert_same("rule removal");
    assert!(plain
        .queries()
        .get_teacher_schedule(substitute, from, to)
        .unwrap()
        .is_empty());
}

#[test]
fn writes_invalidate_cached_expansion() {
    let ctx = context_at("2026-01-01 09:00");
    let fx = Fixture::seed(&ctx.store);
    let tuesday = fx.rule(2, "14:00", "15:00", &fx.room1, "2026-03-03", None);
    fx.insert_rule(&ctx.store, &tuesday);
    let (from, to) = (date("2026-03-01"), date("2026-03-31"));
    let key = center_expand_key(fx.center.id, from, to);

    ctx.queries().expand(fx.center.id, from, to).unwrap();
    assert!(ctx.cache.get(&key).unwrap().is_some());

    ctx.exceptions()
        .create_exception(&CreateExceptionRequest::new(
            fx.center.id,
            fx.teacher.id,
            tuesday.id,
            date("2026-03-17"),
            ExceptionType::Cancel,
        ))
        .unwrap();
    assert!(ctx.cache.get(&key).unwrap().is_none());
}

#[test]
fn corrupt_cache_entry_falls_back_to_expansion() {
    let ctx = context_at("2026-01-01 09:00");
    let fx = Fixture::seed(&ctx.store);
    let tuesday = fx.rule(2, "14:00", "15:00", &fx.room1, "2026-03-03", None);
    fx.insert_rule(&ctx.store, &tuesday);
    let (from, to) = (date("2026-03-01"), date("2026-03-10"));
    ctx.cache
        .set_with_ttl(
            &center_expand_key(fx.center.id, from, to),
            "not json".to_string(),
            std::time::Duration::from_secs(60),
        )
        .unwrap();

    let sessions = ctx.queries().expand(fx.center.id, from, to).unwrap();
    assert_eq!(sessions.len(), 2);
}

#[test]
fn teacher_schedule_spans_active_memberships_with_statuses() {
    let ctx = context_at("2026-01-01 09:00");
    let fx = Fixture::seed(&ctx.store);
    let tuesday = fx.rule(2, "14:00", "15:00", &fx.room1, "2026-03-03", Some("2026-03-17"));
    fx.insert_rule(&ctx.store, &tuesday);

    let inactive = Center::new("Closed branch");
    let inactive_room = Room::new(inactive.id, "Hall", 20);
    let inactive_course = timeledger_core::model::tenancy::Course::new(inactive.id, "K");
    let inactive_offering =
        timeledger_core::model::tenancy::Offering::new(inactive.id, inactive_course.id, "K");
    let elsewhere = ScheduleRule::new(
        inactive.id,
        inactive_offering.id,
        TeacherAssignment::Assigned(fx.teacher.id),
        inactive_room.id,
        3,
        common::time("09:00"),
        common::time("10:00"),
        timeledger_core::EffectiveRange::open_from(date("2026-03-04")),
    );
    ctx.store
        .in_transaction(|repo| {
            repo.insert_center(&inactive)?;
            repo.insert_course(&inactive_course)?;
            repo.insert_room(&inactive_room)?;
            repo.insert_offering(&inactive_offering)?;
            repo.upsert_membership(&CenterMembership {
                center_id: inactive.id,
                teacher_id: fx.teacher.id,
                status: MembershipStatus::Inactive,
            })?;
            repo.create_rule(&elsewhere)?;
            Ok(())
        })
        .unwrap();

    let pending =
        ScheduleException::proposal(fx.center.id, tuesday.id, date("2026-03-10"), ExceptionType::Cancel);
    let mut cancel =
        ScheduleException::proposal(fx.center.id, tuesday.id, date("2026-03-17"), ExceptionType::Cancel);
    cancel.status = ExceptionStatus::Approved;
    let mut add =
        ScheduleException::proposal(fx.center.id, tuesday.id, date("2026-03-17"), ExceptionType::Add);
    add.new_start_at = Some(at("2026-03-18 10:00"));
    add.new_end_at = Some(at("2026-03-18 11:00"));
    add.status = ExceptionStatus::Approved;
    ctx.store
        .in_transaction(|repo| {
            repo.create_exception(&pending)?;
            repo.create_exception(&cancel)?;
            repo.create_exception(&add)?;
            Ok(())
        })
        .unwrap();

    let items = ctx
        .queries()
        .get_teacher_schedule(fx.teacher.id, date("2026-03-01"), date("2026-03-31"))
        .unwrap();
    let summary: Vec<(String, String)> = items
        .iter()
        .map(|item| (item.date.to_string(), item.status.as_code()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("2026-03-03".to_string(), "NORMAL".to_string()),
            ("2026-03-10".to_string(), "PENDING_CANCEL".to_string()),
            ("2026-03-18".to_string(), "RESCHEDULED".to_string()),
        ]
    );
    assert_eq!(
        items[0].id,
        format!("center_{}_rule_{}_20260303_normal", fx.center.id, tuesday.id)
    );
    assert!(items.iter().all(|item| item.center_id == fx.center.id));
}

#[test]
fn today_summary_classifies_sessions_against_now() {
    let ctx = context_at("2026-03-10 14:30");
    let fx = Fixture::seed(&ctx.store);
    let morning = fx.rule(2, "09:00", "10:00", &fx.room1, "2026-03-03", None);
    let mut afternoon = fx.rule(2, "14:00", "15:00", &fx.room2, "2026-03-03", None);
    afternoon.teacher = TeacherAssignment::Assigned(fx.other_teacher.id);
    let evening = fx.rule(2, "18:00", "19:00", &fx.room1, "2026-03-03", None);
    let overnight = fx.rule(1, "23:00", "01:00", &fx.room2, "2026-03-02", None);
    for rule in [&morning, &afternoon, &evening, &overnight] {
        fx.insert_rule(&ctx.store, rule);
    }

    let today_change =
        ScheduleException::proposal(fx.center.id, evening.id, date("2026-03-10"), ExceptionType::Cancel);
    let next_week =
        ScheduleException::proposal(fx.center.id, evening.id, date("2026-03-17"), ExceptionType::Cancel);
    ctx.store
        .in_transaction(|repo| {
            repo.create_exception(&today_change)?;
            repo.create_exception(&next_week)?;
            Ok(())
        })
        .unwrap();

    let summary = ctx.queries().today_summary(fx.center.id).unwrap();
    assert_eq!(summary.date, date("2026-03-10"));
    assert_eq!(summary.total_sessions, 4);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.in_progress, 1);
    assert_eq!(summary.upcoming, 1);
    assert_eq!(summary.in_progress_teacher_ids, vec![fx.other_teacher.id]);
    assert_eq!(summary.pending_exceptions, 2);
    assert_eq!(summary.changes_count, 1);
    assert!(summary.has_schedule_changes);
}
