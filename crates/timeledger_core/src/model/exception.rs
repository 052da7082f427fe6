//! Per-date override over a rule occurrence.
//!
//! # Invariants
//! - Status moves only out of PENDING; every other status is final.
//! - RESCHEDULE and ADD carry `new_start_at` and `new_end_at`;
//!   REPLACE_TEACHER carries `new_teacher_id`.

use crate::model::rule::RuleId;
use crate::model::tenancy::{AdminId, CenterId, RoomId, TeacherId};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type ExceptionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExceptionType {
    Cancel,
    Reschedule,
    ReplaceTeacher,
    Add,
}

impl ExceptionType {
    /// Upper-case name used in statuses and audit actions.
    pub fn as_code(self) -> &'static str {
        match self {
            Self::Cancel => "CANCEL",
            Self::Reschedule => "RESCHEDULE",
            Self::ReplaceTeacher => "REPLACE_TEACHER",
            Self::Add => "ADD",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExceptionStatus {
    Pending,
    Approved,
    Rejected,
    Revoked,
    /// Withdrawn by the system when a recurrence edit removed the occurrence.
    Cancelled,
}

impl ExceptionStatus {
    pub fn is_final(self) -> bool {
        self != Self::Pending
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        self == Self::Pending && next != Self::Pending
    }

    /// Statuses expansion still looks at.
    pub fn is_visible(self) -> bool {
        matches!(self, Self::Pending | Self::Approved)
    }

    pub fn as_code(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Revoked => "REVOKED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

/// Rejected status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: ExceptionStatus,
    pub to: ExceptionStatus,
}

impl Display for InvalidTransition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "exception status cannot move from {} to {}",
            self.from.as_code(),
            self.to.as_code()
        )
    }
}

impl Error for InvalidTransition {}

/// Missing or inconsistent target fields for an exception type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExceptionValidationError {
    MissingNewSlot(ExceptionType),
    EmptyNewSlot,
    MissingNewTeacher,
}

impl Display for ExceptionValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingNewSlot(kind) => write!(
                f,
                "{} requires new_start_at and new_end_at",
                kind.as_code()
            ),
            Self::EmptyNewSlot => write!(f, "new_end_at must be after new_start_at"),
            Self::MissingNewTeacher => write!(f, "REPLACE_TEACHER requires new_teacher_id"),
        }
    }
}

impl Error for ExceptionValidationError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleException {
    pub id: ExceptionId,
    pub center_id: CenterId,
    pub rule_id: RuleId,
    /// Start date of the targeted occurrence.
    pub original_date: NaiveDate,
    pub exception_type: ExceptionType,
    pub status: ExceptionStatus,
    pub new_start_at: Option<NaiveDateTime>,
    pub new_end_at: Option<NaiveDateTime>,
    pub new_teacher_id: Option<TeacherId>,
    pub new_room_id: Option<RoomId>,
    pub reason: String,
    /// Partner row of a CANCEL+ADD pair.
    pub linked_exception_id: Option<ExceptionId>,
    pub reviewed_by: Option<AdminId>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_note: String,
    /// Epoch ms; assigned by the store.
    pub created_at: i64,
}

impl ScheduleException {
    /// Creates a PENDING proposal with no target fields.
    pub fn proposal(
        center_id: CenterId,
        rule_id: RuleId,
        original_date: NaiveDate,
        exception_type: ExceptionType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            center_id,
            rule_id,
            original_date,
            exception_type,
            status: ExceptionStatus::Pending,
            new_start_at: None,
            new_end_at: None,
            new_teacher_id: None,
            new_room_id: None,
            reason: String::new(),
            linked_exception_id: None,
            reviewed_by: None,
            reviewed_at: None,
            review_note: String::new(),
            created_at: 0,
        }
    }

    pub fn validate(&self) -> Result<(), ExceptionValidationError> {
        match self.exception_type {
            ExceptionType::Reschedule | ExceptionType::Add => {
                let (Some(start), Some(end)) = (self.new_start_at, self.new_end_at) else {
                    return Err(ExceptionValidationError::MissingNewSlot(self.exception_type));
                };
                if end <= start {
                    return Err(ExceptionValidationError::EmptyNewSlot);
                }
                Ok(())
            }
            ExceptionType::ReplaceTeacher => {
                if self.new_teacher_id.is_none() {
                    return Err(ExceptionValidationError::MissingNewTeacher);
                }
                Ok(())
            }
            ExceptionType::Cancel => Ok(()),
        }
    }

    pub fn transition(&mut self, next: ExceptionStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Target slot for RESCHEDULE/ADD.
    pub fn new_slot(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        self.new_start_at.zip(self.new_end_at)
    }
}
