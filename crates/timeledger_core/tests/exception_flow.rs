mod common;

use chrono::{Duration, TimeZone, Utc};
use common::{at, context_at, context_with_store, date, Fixture};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use timeledger_core::calendar::center_timezone;
use timeledger_core::model::tenancy::Center;
use timeledger_core::notify::NotifyError;
use timeledger_core::service::exception_service::evaluate_lock;
use timeledger_core::service::expansion::expand_center;
use timeledger_core::{
    CreateExceptionRequest, EngineError, ErrorCode, ExceptionStatus, ExceptionType, LockReason,
    Notifier, ReviewRequest, ScheduleException, SqliteStore, Store, TeacherAssignment,
};

fn cancel_request(fx: &Fixture, rule_id: uuid::Uuid, on: &str) -> CreateExceptionRequest {
    CreateExceptionRequest::new(
        fx.center.id,
        fx.teacher.id,
        rule_id,
        date(on),
        ExceptionType::Cancel,
    )
}

#[test]
fn proposal_inside_lead_time_is_rejected() {
    let ctx = context_at("2026-01-20 09:00");
    let fx = Fixture::seed_with_lead(&ctx.store, 14);
    let sunday = fx.rule(7, "10:00", "11:00", &fx.room1, "2026-01-04", None);
    fx.insert_rule(&ctx.store, &sunday);

    let err = ctx
        .exceptions()
        .create_exception(&cancel_request(&fx, sunday.id, "2026-01-25"))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ExceptionDeadlineExceeded);
    assert!(!ctx
        .exceptions()
        .check_exception_deadline(fx.center.id, sunday.id, date("2026-01-25"))
        .unwrap());
}

#[test]
fn unlimited_lead_time_accepts_proposal() {
    let ctx = context_at("2026-01-20 09:00");
    let fx = Fixture::seed_with_lead(&ctx.store, 0);
    let sunday = fx.rule(7, "10:00", "11:00", &fx.room1, "2026-01-04", None);
    fx.insert_rule(&ctx.store, &sunday);

    let created = ctx
        .exceptions()
        .create_exception(&cancel_request(&fx, sunday.id, "2026-01-25"))
        .unwrap();
    assert_eq!(created.status, ExceptionStatus::Pending);

    let status = ctx
        .exceptions()
        .rule_lock_status(fx.center.id, sunday.id, date("2026-01-25"))
        .unwrap();
    assert!(!status.is_locked);
    assert_eq!(status.deadline, None);
}

#[test]
fn passed_lock_at_locks_even_with_unlimited_lead() {
    let ctx = context_at("2026-01-20 09:00");
    let fx = Fixture::seed_with_lead(&ctx.store, 0);
    let mut sunday = fx.rule(7, "10:00", "11:00", &fx.room1, "2026-01-04", None);
    sunday.lock_at = Some(Utc.with_ymd_and_hms(2026, 1, 19, 0, 0, 0).unwrap());
    fx.insert_rule(&ctx.store, &sunday);

    let status = ctx
        .exceptions()
        .rule_lock_status(fx.center.id, sunday.id, date("2026-03-01"))
        .unwrap();
    assert_eq!(status.lock_reason, Some(LockReason::LockAtPassed));
}

#[test]
fn proposal_requires_membership_ownership_and_occurrence() {
    let ctx = context_at("2026-01-01 09:00");
    let fx = Fixture::seed(&ctx.store);
    let monday = fx.rule(1, "10:00", "11:00", &fx.room1, "2026-01-05", None);
    fx.insert_rule(&ctx.store, &monday);

    let mut stranger = cancel_request(&fx, monday.id, "2026-03-02");
    stranger.teacher_id = uuid::Uuid::new_v4();
    let err = ctx.exceptions().create_exception(&stranger).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Forbidden);

    let mut colleague = cancel_request(&fx, monday.id, "2026-03-02");
    colleague.teacher_id = fx.other_teacher.id;
    let err = ctx.exceptions().create_exception(&colleague).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Forbidden);

    let err = ctx
        .exceptions()
        .create_exception(&cancel_request(&fx, monday.id, "2026-03-03"))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ParamsValidate);
}

#[test]
fn concurrent_approvals_commit_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("race.db");
    let ctx = context_with_store(SqliteStore::open(&path).unwrap(), "2026-01-01 09:00");
    let fx = Fixture::seed(&ctx.store);
    let monday = fx.rule(1, "10:00", "11:00", &fx.room1, "2026-01-05", None);
    fx.insert_rule(&ctx.store, &monday);
    let pending = ctx
        .exceptions()
        .create_exception(&cancel_request(&fx, monday.id, "2026-03-02"))
        .unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            let request = ReviewRequest::approve(fx.center.id, pending.id, uuid::Uuid::new_v4());
            std::thread::spawn(move || {
                let ctx = context_with_store(SqliteStore::open(&path).unwrap(), "2026-01-01 09:00");
                barrier.wait();
                ctx.exceptions().review_exception(&request)
            })
        })
        .collect();
    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    let loser = results.into_iter().find_map(Result::err).unwrap();
    match loser {
        EngineError::AlreadyProcessed { status, .. } => {
            assert_eq!(status, ExceptionStatus::Approved)
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn approved_reschedule_rewrites_rule_atomically() {
    let ctx = context_at("2026-01-01 09:00");
    let fx = Fixture::seed(&ctx.store);
    let tuesday = fx.rule(2, "14:00", "15:00", &fx.room1, "2026-01-06", Some("2026-06-30"));
    fx.insert_rule(&ctx.store, &tuesday);
    let later = ctx
        .exceptions()
        .create_exception(&cancel_request(&fx, tuesday.id, "2026-04-14"))
        .unwrap();

    let request = CreateExceptionRequest::new(
        fx.center.id,
        fx.teacher.id,
        tuesday.id,
        date("2026-03-10"),
        ExceptionType::Reschedule,
    )
    .with_new_slot(at("2026-03-12 16:00"), at("2026-03-12 17:00"));
    let proposal = ctx.exceptions().create_exception(&request).unwrap();

    let approved = ctx
        .exceptions()
        .review_exception(&ReviewRequest::approve(fx.center.id, proposal.id, fx.admin))
        .unwrap();
    assert_eq!(approved.status, ExceptionStatus::Approved);
    assert_eq!(approved.reviewed_by, Some(fx.admin));

    let rules = ctx.rules().list_rules(fx.center.id).unwrap();
    assert_eq!(rules.len(), 2);
    let old = rules.iter().find(|rule| rule.id == tuesday.id).unwrap();
    assert_eq!(old.effective_range.end_date, Some(date("2026-03-09")));
    let successor = rules.iter().find(|rule| rule.id != tuesday.id).unwrap();
    assert_eq!(successor.weekday, 4);
    assert_eq!(successor.effective_range.start_date, date("2026-03-12"));
    assert_eq!(successor.effective_range.end_date, Some(date("2026-06-30")));

    let cascaded = ctx.exceptions().get_exception(fx.center.id, later.id).unwrap();
    assert_eq!(cascaded.status, ExceptionStatus::Cancelled);
}

#[test]
fn failed_approval_changes_nothing() {
    let ctx = context_at("2026-01-01 09:00");
    let fx = Fixture::seed(&ctx.store);
    let tuesday = fx.rule(2, "14:00", "15:00", &fx.room1, "2026-01-06", None);
    let mut blocker = fx.rule(4, "16:00", "17:00", &fx.room1, "2026-01-08", None);
    blocker.teacher = TeacherAssignment::Assigned(fx.other_teacher.id);
    fx.insert_rule(&ctx.store, &tuesday);
    fx.insert_rule(&ctx.store, &blocker);

    let request = CreateExceptionRequest::new(
        fx.center.id,
        fx.teacher.id,
        tuesday.id,
        date("2026-03-10"),
        ExceptionType::Reschedule,
    )
    .with_new_slot(at("2026-03-12 16:00"), at("2026-03-12 17:00"));
    let proposal = ctx.exceptions().create_exception(&request).unwrap();

    let err = ctx
        .exceptions()
        .review_exception(&ReviewRequest::approve(fx.center.id, proposal.id, fx.admin))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ExceptionRescheduleConflict);
    assert!(!err.conflicts().is_empty());

    let stored = ctx.exceptions().get_exception(fx.center.id, proposal.id).unwrap();
    assert_eq!(stored.status, ExceptionStatus::Pending);
    let rules = ctx.rules().list_rules(fx.center.id).unwrap();
    assert_eq!(rules.len(), 2);
    let unchanged = rules.iter().find(|rule| rule.id == tuesday.id).unwrap();
    assert_eq!(unchanged.effective_range.end_date, None);
}

#[test]
fn second_approval_for_same_occurrence_conflicts() {
    let ctx = context_at("2026-01-01 09:00");
    let fx = Fixture::seed(&ctx.store);
    let monday = fx.rule(1, "10:00", "11:00", &fx.room1, "2026-01-05", None);
    fx.insert_rule(&ctx.store, &monday);
    let first = ctx
        .exceptions()
        .create_exception(&cancel_request(&fx, monday.id, "2026-03-02"))
        .unwrap();
    let replace = ctx
        .exceptions()
        .create_exception(
            &CreateExceptionRequest::new(
                fx.center.id,
                fx.teacher.id,
                monday.id,
                date("2026-03-02"),
                ExceptionType::ReplaceTeacher,
            )
            .with_new_teacher(fx.other_teacher.id),
        )
        .unwrap();

    ctx.exceptions()
        .review_exception(&ReviewRequest::approve(fx.center.id, first.id, fx.admin))
        .unwrap();
    let err = ctx
        .exceptions()
        .review_exception(&ReviewRequest::approve(fx.center.id, replace.id, fx.admin))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::SchedRuleConflict);
}

#[test]
fn approved_replacement_changes_only_that_occurrence() {
    let ctx = context_at("2026-01-01 09:00");
    let fx = Fixture::seed(&ctx.store);
    let monday = fx.rule(1, "10:00", "11:00", &fx.room1, "2026-01-05", None);
    fx.insert_rule(&ctx.store, &monday);
    let replace = ctx
        .exceptions()
        .create_exception(
            &CreateExceptionRequest::new(
                fx.center.id,
                fx.teacher.id,
                monday.id,
                date("2026-03-02"),
                ExceptionType::ReplaceTeacher,
            )
            .with_new_teacher(fx.other_teacher.id),
        )
        .unwrap();
    ctx.exceptions()
        .review_exception(&ReviewRequest::approve(fx.center.id, replace.id, fx.admin))
        .unwrap();

    let sessions = ctx
        .store
        .with_reader(|repo| expand_center(repo, fx.center.id, date("2026-03-02"), date("2026-03-09")))
        .unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].teacher, TeacherAssignment::Assigned(fx.other_teacher.id));
    assert_eq!(sessions[1].teacher, TeacherAssignment::Assigned(fx.teacher.id));
    let stored = ctx.rules().get_rule(fx.center.id, monday.id).unwrap();
    assert_eq!(stored.teacher, TeacherAssignment::Assigned(fx.teacher.id));
}

#[test]
fn approved_add_blocks_later_add_into_same_room() {
    let ctx = context_at("2026-01-01 09:00");
    let fx = Fixture::seed(&ctx.store);
    let monday = fx.rule(1, "10:00", "11:00", &fx.room1, "2026-01-05", None);
    let mut tuesday = fx.rule(2, "10:00", "11:00", &fx.room1, "2026-01-06", None);
    tuesday.teacher = TeacherAssignment::Assigned(fx.other_teacher.id);
    fx.insert_rule(&ctx.store, &monday);
    fx.insert_rule(&ctx.store, &tuesday);

    let move_to_wednesday = |teacher_id, rule_id, on: &str| CreateExceptionRequest {
        new_room_id: Some(fx.room2.id),
        ..CreateExceptionRequest::new(fx.center.id, teacher_id, rule_id, date(on), ExceptionType::Add)
            .with_new_slot(at("2026-03-04 14:00"), at("2026-03-04 15:00"))
    };
    let first = ctx
        .exceptions()
        .create_exception(&move_to_wednesday(fx.teacher.id, monday.id, "2026-03-02"))
        .unwrap();
    let second = ctx
        .exceptions()
        .create_exception(&move_to_wednesday(fx.other_teacher.id, tuesday.id, "2026-03-03"))
        .unwrap();

    ctx.exceptions()
        .review_exception(&ReviewRequest::approve(fx.center.id, first.id, fx.admin))
        .unwrap();
    let err = ctx
        .exceptions()
        .review_exception(&ReviewRequest::approve(fx.center.id, second.id, fx.admin))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ExceptionRescheduleConflict);
    assert!(err
        .conflicts()
        .iter()
        .any(|conflict| conflict.conflicting_exception_id == Some(first.id)));

    let second = ctx.exceptions().get_exception(fx.center.id, second.id).unwrap();
    assert_eq!(second.status, ExceptionStatus::Pending);
    let wednesday = ctx
        .queries()
        .expand(fx.center.id, date("2026-03-04"), date("2026-03-04"))
        .unwrap();
    assert_eq!(wednesday.len(), 1);
    assert_eq!(wednesday[0].room_id, fx.room2.id);
}

#[test]
fn revoke_is_only_possible_while_pending() {
    let ctx = context_at("2026-01-01 09:00");
    let fx = Fixture::seed(&ctx.store);
    let monday = fx.rule(1, "10:00", "11:00", &fx.room1, "2026-01-05", None);
    fx.insert_rule(&ctx.store, &monday);
    let pending = ctx
        .exceptions()
        .create_exception(&cancel_request(&fx, monday.id, "2026-03-02"))
        .unwrap();

    let revoked = ctx
        .exceptions()
        .revoke_exception(fx.center.id, pending.id, fx.teacher.id)
        .unwrap();
    assert_eq!(revoked.status, ExceptionStatus::Revoked);

    let err = ctx
        .exceptions()
        .revoke_exception(fx.center.id, pending.id, fx.teacher.id)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ExceptionAlreadyProcessed);
    let err = ctx
        .exceptions()
        .review_exception(&ReviewRequest::reject(fx.center.id, pending.id, fx.admin))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ExceptionAlreadyProcessed);
}

#[test]
fn rejecting_one_half_rejects_linked_partner() {
    let ctx = context_at("2026-01-01 09:00");
    let fx = Fixture::seed(&ctx.store);
    let tuesday = fx.rule(2, "14:00", "15:00", &fx.room1, "2026-01-06", None);
    fx.insert_rule(&ctx.store, &tuesday);

    let mut cancel =
        ScheduleException::proposal(fx.center.id, tuesday.id, date("2026-03-10"), ExceptionType::Cancel);
    let mut add =
        ScheduleException::proposal(fx.center.id, tuesday.id, date("2026-03-10"), ExceptionType::Add);
    add.new_start_at = Some(at("2026-03-10 15:00"));
    add.new_end_at = Some(at("2026-03-10 16:00"));
    cancel.linked_exception_id = Some(add.id);
    add.linked_exception_id = Some(cancel.id);
    ctx.store
        .in_transaction(|repo| {
            repo.create_exception(&cancel)?;
            repo.create_exception(&add)?;
            Ok(())
        })
        .unwrap();

    let mut review = ReviewRequest::reject(fx.center.id, cancel.id, fx.admin);
    review.note = "room booked".to_string();
    ctx.exceptions().review_exception(&review).unwrap();

    let partner = ctx.exceptions().get_exception(fx.center.id, add.id).unwrap();
    assert_eq!(partner.status, ExceptionStatus::Rejected);
    assert_eq!(partner.review_note, "room booked");
    assert!(ctx.exceptions().list_pending(fx.center.id).unwrap().is_empty());
}

#[derive(Default)]
struct CountingNotifier {
    submitted: Arc<AtomicUsize>,
    reviewed: Arc<AtomicUsize>,
}

impl Notifier for CountingNotifier {
    fn on_exception_submitted(&self, _exception: &ScheduleException) -> Result<(), NotifyError> {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        Err(NotifyError("gateway down".to_string()))
    }

    fn on_exception_reviewed(&self, _exception: &ScheduleException) -> Result<(), NotifyError> {
        self.reviewed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn notifier_failures_do_not_fail_the_operation() {
    let notifier = CountingNotifier::default();
    let submitted = Arc::clone(&notifier.submitted);
    let reviewed = Arc::clone(&notifier.reviewed);
    let ctx = context_at("2026-01-01 09:00").with_notifier(Box::new(notifier));
    let fx = Fixture::seed(&ctx.store);
    let monday = fx.rule(1, "10:00", "11:00", &fx.room1, "2026-01-05", None);
    fx.insert_rule(&ctx.store, &monday);

    let pending = ctx
        .exceptions()
        .create_exception(&cancel_request(&fx, monday.id, "2026-03-02"))
        .unwrap();
    ctx.exceptions()
        .review_exception(&ReviewRequest::approve(fx.center.id, pending.id, fx.admin))
        .unwrap();
    assert_eq!(submitted.load(Ordering::SeqCst), 1);
    assert_eq!(reviewed.load(Ordering::SeqCst), 1);
}

proptest! {
    #[test]
    fn lock_never_reopens(
        lead in -3i64..30,
        lock_offset_hours in proptest::option::of(-500i64..500),
        start_hours in 0i64..2000,
        later_hours in 0i64..2000,
    ) {
        let mut center = Center::new("C");
        center.settings.exception_lead_days = lead;
        let fx_rule = {
            let mut rule = timeledger_core::ScheduleRule::new(
                center.id,
                uuid::Uuid::new_v4(),
                TeacherAssignment::Unassigned,
                uuid::Uuid::new_v4(),
                7,
                common::time("10:00"),
                common::time("11:00"),
                timeledger_core::EffectiveRange::open_from(date("2026-01-04")),
            );
            let base = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
            rule.lock_at = lock_offset_hours.map(|hours| base + Duration::hours(hours));
            rule
        };
        let occurrence = date("2026-03-01");
        let tz = center_timezone();
        let t = tz.from_utc_datetime(&at("2026-01-01 00:00")) + Duration::hours(start_hours);
        let later = t + Duration::hours(later_hours);

        let first = evaluate_lock(t, &center, &fx_rule, occurrence, 14);
        let second = evaluate_lock(later, &center, &fx_rule, occurrence, 14);
        if first.is_locked {
            prop_assert!(second.is_locked);
        }
    }
}
