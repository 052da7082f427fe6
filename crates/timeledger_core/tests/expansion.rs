mod common;

use common::{context_at, date, time, Fixture};
use proptest::prelude::*;
use timeledger_core::model::rule::CrossPart;
use timeledger_core::model::tenancy::Holiday;
use timeledger_core::service::expansion::{expand_center, SessionOrigin};
use timeledger_core::{ExceptionStatus, ExceptionType, ScheduleException, Store};

fn stored_exception(
    ctx: &timeledger_core::EngineContext<timeledger_core::SqliteStore>,
    exception: &ScheduleException,
) {
    ctx.store
        .in_transaction(|repo| Ok(repo.create_exception(exception)?))
        .unwrap();
}

#[test]
fn approved_cancel_removes_only_occurrence_in_window() {
    let ctx = context_at("2026-01-01 09:00");
    let fx = Fixture::seed(&ctx.store);
    let rule = fx.rule(1, "10:00", "11:00", &fx.room1, "2026-01-05", Some("2026-12-28"));
    fx.insert_rule(&ctx.store, &rule);

    let mut cancel =
        ScheduleException::proposal(fx.center.id, rule.id, date("2026-02-02"), ExceptionType::Cancel);
    cancel.status = ExceptionStatus::Approved;
    stored_exception(&ctx, &cancel);

    let sessions = ctx
        .queries()
        .expand(fx.center.id, date("2026-02-01"), date("2026-02-08"))
        .unwrap();
    assert!(sessions.is_empty());

    let next_week = ctx
        .queries()
        .expand(fx.center.id, date("2026-02-09"), date("2026-02-15"))
        .unwrap();
    assert_eq!(next_week.len(), 1);
    assert_eq!(next_week[0].date, date("2026-02-09"));
}

#[test]
fn cross_midnight_rule_emits_start_and_end_parts() {
    let ctx = context_at("2026-01-01 09:00");
    let fx = Fixture::seed(&ctx.store);
    let friday = fx.rule(5, "23:00", "02:00", &fx.room1, "2026-03-06", None);
    fx.insert_rule(&ctx.store, &friday);

    let sessions = ctx
        .queries()
        .expand(fx.center.id, date("2026-03-06"), date("2026-03-07"))
        .unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].date, date("2026-03-06"));
    assert_eq!(sessions[0].start_time, time("23:00"));
    assert!(sessions[0].end_time.is_end_of_day());
    assert_eq!(sessions[0].cross_part, Some(CrossPart::Start));
    assert_eq!(sessions[1].date, date("2026-03-07"));
    assert_eq!(sessions[1].start_time, time("00:00"));
    assert_eq!(sessions[1].end_time, time("02:00"));
    assert_eq!(sessions[1].cross_part, Some(CrossPart::End));
    assert_eq!(sessions[0].span, sessions[1].span);
}

#[test]
fn exception_visibility_tracks_non_terminal_rows() {
    let ctx = context_at("2026-01-01 09:00");
    let fx = Fixture::seed(&ctx.store);
    let rule = fx.rule(2, "14:00", "15:00", &fx.room1, "2026-03-03", None);
    fx.insert_rule(&ctx.store, &rule);

    let mut rejected =
        ScheduleException::proposal(fx.center.id, rule.id, date("2026-03-10"), ExceptionType::Cancel);
    rejected.status = ExceptionStatus::Rejected;
    stored_exception(&ctx, &rejected);
    let pending =
        ScheduleException::proposal(fx.center.id, rule.id, date("2026-03-17"), ExceptionType::Cancel);
    stored_exception(&ctx, &pending);

    let sessions = ctx
        .store
        .with_reader(|repo| expand_center(repo, fx.center.id, date("2026-03-09"), date("2026-03-22")))
        .unwrap();
    assert_eq!(sessions.len(), 2);
    assert!(!sessions[0].has_exception);
    assert!(sessions[1].has_exception);
    let info = sessions[1].exception_info.as_ref().unwrap();
    assert_eq!(info.status, ExceptionStatus::Pending);
    assert_eq!(info.exception_type, ExceptionType::Cancel);
}

#[test]
fn holidays_skip_unless_rule_opts_out() {
    let ctx = context_at("2026-01-01 09:00");
    let fx = Fixture::seed(&ctx.store);
    let skipping = fx.rule(3, "09:00", "10:00", &fx.room1, "2026-04-01", Some("2026-04-08"));
    let mut keeping = fx.rule(3, "11:00", "12:00", &fx.room2, "2026-04-01", Some("2026-04-08"));
    keeping.skip_holiday = false;
    fx.insert_rule(&ctx.store, &skipping);
    fx.insert_rule(&ctx.store, &keeping);
    let holiday = Holiday::new(fx.center.id, date("2026-04-01"), false);
    ctx.store
        .in_transaction(|repo| Ok(repo.insert_holiday(&holiday)?))
        .unwrap();

    let sessions = ctx
        .queries()
        .expand(fx.center.id, date("2026-04-01"), date("2026-04-01"))
        .unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].rule_id, keeping.id);
    assert!(sessions[0].is_holiday);
}

#[test]
fn cross_midnight_end_part_flags_next_day_holiday() {
    let ctx = context_at("2026-01-01 09:00");
    let fx = Fixture::seed(&ctx.store);
    let friday = fx.rule(5, "23:00", "02:00", &fx.room1, "2026-03-06", None);
    fx.insert_rule(&ctx.store, &friday);
    let holiday = Holiday::new(fx.center.id, date("2026-03-07"), false);
    ctx.store
        .in_transaction(|repo| Ok(repo.insert_holiday(&holiday)?))
        .unwrap();

    let sessions = ctx
        .queries()
        .expand(fx.center.id, date("2026-03-06"), date("2026-03-06"))
        .unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].cross_part, Some(CrossPart::Start));
    assert!(!sessions[0].is_holiday);
    assert_eq!(sessions[1].date, date("2026-03-07"));
    assert_eq!(sessions[1].cross_part, Some(CrossPart::End));
    assert!(sessions[1].is_holiday);
}

#[test]
fn approved_add_appears_as_added_session() {
    let ctx = context_at("2026-01-01 09:00");
    let fx = Fixture::seed(&ctx.store);
    let rule = fx.rule(2, "14:00", "15:00", &fx.room1, "2026-03-03", None);
    fx.insert_rule(&ctx.store, &rule);

    let mut add =
        ScheduleException::proposal(fx.center.id, rule.id, date("2026-03-10"), ExceptionType::Add);
    add.new_start_at = Some(common::at("2026-03-12 18:00"));
    add.new_end_at = Some(common::at("2026-03-12 19:00"));
    add.status = ExceptionStatus::Approved;
    stored_exception(&ctx, &add);

    let sessions = ctx
        .queries()
        .expand(fx.center.id, date("2026-03-10"), date("2026-03-12"))
        .unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].origin, SessionOrigin::Rule);
    assert_eq!(sessions[1].origin, SessionOrigin::Added);
    assert_eq!(sessions[1].date, date("2026-03-12"));
    assert_eq!(sessions[1].start_time, time("18:00"));
}

#[test]
fn phase_transitions_report_room_change_and_close() {
    let ctx = context_at("2026-01-01 09:00");
    let fx = Fixture::seed(&ctx.store);
    let first = fx.rule(1, "10:00", "11:00", &fx.room1, "2026-01-05", Some("2026-01-26"));
    let second = fx.rule(1, "10:00", "11:00", &fx.room2, "2026-02-02", Some("2026-02-23"));
    fx.insert_rule(&ctx.store, &first);
    fx.insert_rule(&ctx.store, &second);

    let transitions = ctx
        .queries()
        .detect_phase_transitions(fx.center.id, fx.offering.id, date("2026-01-01"), date("2026-03-31"))
        .unwrap();
    assert_eq!(transitions.len(), 3);

    assert_eq!(transitions[0].date, date("2026-01-05"));
    assert_eq!(transitions[0].prev_rule_id, None);
    assert_eq!(transitions[0].next_room_id, Some(fx.room1.id));

    assert_eq!(transitions[1].date, date("2026-02-02"));
    assert_eq!(transitions[1].prev_room_id, Some(fx.room1.id));
    assert_eq!(transitions[1].next_room_id, Some(fx.room2.id));
    assert!(!transitions[1].has_gap);

    assert_eq!(transitions[2].date, date("2026-03-02"));
    assert_eq!(transitions[2].prev_rule_id, Some(second.id));
    assert_eq!(transitions[2].next_rule_id, None);
}

#[test]
fn inverted_window_is_invalid() {
    let ctx = context_at("2026-01-01 09:00");
    let fx = Fixture::seed(&ctx.store);
    let err = ctx
        .queries()
        .expand(fx.center.id, date("2026-02-08"), date("2026-02-01"))
        .unwrap_err();
    assert_eq!(err.code(), timeledger_core::ErrorCode::ParamsValidate);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn expansion_is_repeatable(offset in 0i64..60, length in 0i64..45, cancel_week in 0i64..10) {
        let ctx = context_at("2026-01-01 09:00");
        let fx = Fixture::seed(&ctx.store);
        let monday = fx.rule(1, "10:00", "11:00", &fx.room1, "2026-01-05", None);
        let friday = fx.rule(5, "23:00", "01:00", &fx.room2, "2026-01-09", None);
        fx.insert_rule(&ctx.store, &monday);
        fx.insert_rule(&ctx.store, &friday);
        let mut cancel = ScheduleException::proposal(
            fx.center.id,
            monday.id,
            date("2026-01-05") + chrono::Duration::weeks(cancel_week),
            ExceptionType::Cancel,
        );
        cancel.status = ExceptionStatus::Approved;
        stored_exception(&ctx, &cancel);

        let from = date("2026-01-01") + chrono::Duration::days(offset);
        let to = from + chrono::Duration::days(length);
        let first = ctx
            .store
            .with_reader(|repo| expand_center(repo, fx.center.id, from, to))
            .unwrap();
        let second = ctx
            .store
            .with_reader(|repo| expand_center(repo, fx.center.id, from, to))
            .unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert!(first.iter().all(|session| session.date != cancel.original_date
            || session.rule_id != monday.id));
    }
}
