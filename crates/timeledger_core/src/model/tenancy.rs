//! Tenant-owned entities referenced by rules.
//!
//! Only the attributes the engine consumes are modelled; CRUD policy for
//! these rows lives outside the engine.

use crate::model::rule::TeacherAssignment;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type CenterId = Uuid;
pub type CourseId = Uuid;
pub type OfferingId = Uuid;
pub type TeacherId = Uuid;
pub type RoomId = Uuid;
pub type HolidayId = Uuid;
pub type AdminId = Uuid;

/// Lead time a teacher must respect before proposing an exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadTime {
    Unlimited,
    Days(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CenterSettings {
    /// `0` means unlimited; negative values fall back to the configured default.
    pub exception_lead_days: i64,
}

impl CenterSettings {
    pub fn lead_time(&self, default_days: u32) -> LeadTime {
        match self.exception_lead_days {
            0 => LeadTime::Unlimited,
            days if days < 0 => LeadTime::Days(default_days),
            days => LeadTime::Days(u32::try_from(days).unwrap_or(u32::MAX)),
        }
    }
}

impl Default for CenterSettings {
    fn default() -> Self {
        Self {
            exception_lead_days: 14,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Center {
    pub id: CenterId,
    pub name: String,
    pub settings: CenterSettings,
}

impl Center {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            settings: CenterSettings::default(),
        }
    }
}

/// Course template; buffers apply to every offering of the course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub center_id: CenterId,
    pub name: String,
    pub teacher_buffer_min: u32,
    pub room_buffer_min: u32,
}

impl Course {
    pub fn new(center_id: CenterId, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            center_id,
            name: name.into(),
            teacher_buffer_min: 0,
            room_buffer_min: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offering {
    pub id: OfferingId,
    pub center_id: CenterId,
    pub course_id: CourseId,
    pub name: String,
    pub default_room_id: Option<RoomId>,
    pub default_teacher: TeacherAssignment,
    /// Whether reviewers may accept buffer-level conflicts for this offering.
    pub allow_buffer_override: bool,
}

impl Offering {
    pub fn new(center_id: CenterId, course_id: CourseId, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            center_id,
            course_id,
            name: name.into(),
            default_room_id: None,
            default_teacher: TeacherAssignment::Unassigned,
            allow_buffer_override: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Teacher {
    pub id: TeacherId,
    pub name: String,
    /// Messaging binding; carried but never interpreted by the engine.
    pub line_user_id: Option<String>,
}

impl Teacher {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            line_user_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MembershipStatus {
    Active,
    Invited,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CenterMembership {
    pub center_id: CenterId,
    pub teacher_id: TeacherId,
    pub status: MembershipStatus,
}

impl CenterMembership {
    pub fn is_active(&self) -> bool {
        self.status == MembershipStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub center_id: CenterId,
    pub name: String,
    pub capacity: u32,
}

impl Room {
    pub fn new(center_id: CenterId, name: impl Into<String>, capacity: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            center_id,
            name: name.into(),
            capacity,
        }
    }
}

/// Center closure day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holiday {
    pub id: HolidayId,
    pub center_id: CenterId,
    pub date: chrono::NaiveDate,
    pub name: String,
    /// Cancels every rule on this date, ignoring `skip_holiday`.
    pub force_cancel: bool,
}

impl Holiday {
    pub fn new(center_id: CenterId, date: chrono::NaiveDate, force_cancel: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            center_id,
            date,
            name: String::new(),
            force_cancel,
        }
    }

    /// Whether a rule with the given `skip_holiday` flag loses this date.
    pub fn cancels(&self, skip_holiday: bool) -> bool {
        self.force_cancel || skip_holiday
    }
}
