#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use timeledger_core::calendar::{parse_date, parse_local_datetime, TimeOfDay};
use timeledger_core::model::tenancy::{
    Center, CenterMembership, Course, MembershipStatus, Offering, Room, Teacher,
};
use timeledger_core::{
    EffectiveRange, EngineConfig, EngineContext, FixedClock, ScheduleRule, SqliteStore, Store,
    TeacherAssignment,
};
use uuid::Uuid;

pub fn date(value: &str) -> NaiveDate {
    parse_date(value).unwrap()
}

pub fn time(value: &str) -> TimeOfDay {
    TimeOfDay::parse(value).unwrap()
}

pub fn at(value: &str) -> NaiveDateTime {
    parse_local_datetime(value).unwrap()
}

pub fn context_at(now: &str) -> EngineContext<SqliteStore> {
    context_with_store(SqliteStore::open_in_memory().unwrap(), now)
}

pub fn context_with_store(store: SqliteStore, now: &str) -> EngineContext<SqliteStore> {
    EngineContext::new(store, EngineConfig::default())
        .with_clock(Box::new(FixedClock::at_local(at(now))))
}

/// Center C, course K (teacher buffer 10), offering, teacher T, rooms R1 and R2.
pub struct Fixture {
    pub center: Center,
    pub course: Course,
    pub offering: Offering,
    pub teacher: Teacher,
    pub other_teacher: Teacher,
    pub room1: Room,
    pub room2: Room,
    pub admin: Uuid,
}

impl Fixture {
    pub fn seed(store: &SqliteStore) -> Self {
        Self::seed_with_lead(store, 14)
    }

    pub fn seed_with_lead(store: &SqliteStore, lead_days: i64) -> Self {
        let mut center = Center::new("C");
        center.settings.exception_lead_days = lead_days;
        let mut course = Course::new(center.id, "K");
        course.teacher_buffer_min = 10;
        let mut offering = Offering::new(center.id, course.id, "K-2026");
        offering.allow_buffer_override = true;
        let teacher = Teacher::new("T");
        let other_teacher = Teacher::new("U");
        let room1 = Room::new(center.id, "R1", 8);
        let room2 = Room::new(center.id, "R2", 8);

        store
            .in_transaction(|repo| {
                repo.insert_center(&center)?;
                repo.insert_course(&course)?;
                repo.insert_teacher(&teacher)?;
                repo.insert_teacher(&other_teacher)?;
                repo.insert_room(&room1)?;
                repo.insert_room(&room2)?;
                repo.insert_offering(&offering)?;
                for member in [&teacher, &other_teacher] {
                    repo.upsert_membership(&CenterMembership {
                        center_id: center.id,
                        teacher_id: member.id,
                        status: MembershipStatus::Active,
                    })?;
                }
                Ok(())
            })
            .unwrap();

        Self {
            center,
            course,
            offering,
            teacher,
            other_teacher,
            room1,
            room2,
            admin: Uuid::new_v4(),
        }
    }

    /// Rule for teacher T over `[start, end]`.
    pub fn rule(
        &self,
        weekday: u8,
        start: &str,
        end: &str,
        room: &Room,
        from: &str,
        until: Option<&str>,
    ) -> ScheduleRule {
        ScheduleRule::new(
            self.center.id,
            self.offering.id,
            TeacherAssignment::Assigned(self.teacher.id),
            room.id,
            weekday,
            time(start),
            time(end),
            EffectiveRange::new(date(from), until.map(date)).unwrap(),
        )
    }

    /// Stores `rule` without validation.
    pub fn insert_rule(&self, store: &SqliteStore, rule: &ScheduleRule) {
        store
            .in_transaction(|repo| Ok(repo.create_rule(rule)?))
            .unwrap();
    }
}
