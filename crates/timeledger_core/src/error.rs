//! Engine-wide error type and stable caller-facing codes.
//!
//! # Responsibility
//! - Collapse layered failures (calendar parsing, model validation,
//!   persistence, scheduling conflicts) into one `EngineError`.
//! - Map every variant onto the integer taxonomy callers switch on.
//!
//! # Invariants
//! - Codes never change once published.
//! - Validation failures keep their structured conflict detail.

use crate::calendar::CalendarError;
use crate::model::exception::{ExceptionId, ExceptionStatus, ExceptionValidationError};
use crate::model::rule::{RuleId, RuleValidationError};
use crate::repo::RepoError;
use crate::service::validation::{Conflict, ValidationResult};
use chrono::NaiveDate;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type EngineResult<T> = Result<T, EngineError>;

/// Stable integer error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ParamsValidate = 10002,
    Sql = 20001,
    TxFailed = 20002,
    NotFound = 30001,
    Forbidden = 30002,
    SchedOverlap = 50001,
    SchedBuffer = 50002,
    SchedRuleConflict = 50003,
    ExceptionDeadlineExceeded = 50101,
    ExceptionAlreadyProcessed = 50102,
    ExceptionRescheduleConflict = 50103,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ParamsValidate => "PARAMS_VALIDATE_ERROR",
            Self::Sql => "SQL_ERROR",
            Self::TxFailed => "ERR_TX_FAILED",
            Self::NotFound => "NOT_FOUND",
            Self::Forbidden => "FORBIDDEN",
            Self::SchedOverlap => "SCHED_OVERLAP",
            Self::SchedBuffer => "SCHED_BUFFER",
            Self::SchedRuleConflict => "SCHED_RULE_CONFLICT",
            Self::ExceptionDeadlineExceeded => "EXCEPTION_DEADLINE_EXCEEDED",
            Self::ExceptionAlreadyProcessed => "EXCEPTION_ALREADY_PROCESSED",
            Self::ExceptionRescheduleConflict => "EXCEPTION_RESCHEDULE_CONFLICT",
        }
    }
}

/// Failures surfaced by engine operations.
#[derive(Debug)]
pub enum EngineError {
    /// Malformed date, time, weekday or request field.
    InvalidParams(String),
    NotFound { entity: &'static str, id: Uuid },
    /// Caller is not authorised for the center or rule.
    Forbidden(String),
    /// Hard overlap with another rule or a personal event.
    Overlap(ValidationResult),
    /// Buffer violation that was not overridden.
    Buffer(ValidationResult),
    /// Rule or exception state changed under the request.
    RuleConflict(String),
    DeadlineExceeded {
        rule_id: RuleId,
        original_date: NaiveDate,
        reason: String,
    },
    AlreadyProcessed {
        exception_id: ExceptionId,
        status: ExceptionStatus,
    },
    /// Approval re-validation found a hard conflict.
    RescheduleConflict(ValidationResult),
    /// Transaction aborted by the store; nothing was written.
    TxFailed(String),
    Store(RepoError),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidParams(_) => ErrorCode::ParamsValidate,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::Overlap(_) => ErrorCode::SchedOverlap,
            Self::Buffer(_) => ErrorCode::SchedBuffer,
            Self::RuleConflict(_) => ErrorCode::SchedRuleConflict,
            Self::DeadlineExceeded { .. } => ErrorCode::ExceptionDeadlineExceeded,
            Self::AlreadyProcessed { .. } => ErrorCode::ExceptionAlreadyProcessed,
            Self::RescheduleConflict(_) => ErrorCode::ExceptionRescheduleConflict,
            Self::TxFailed(_) => ErrorCode::TxFailed,
            Self::Store(_) => ErrorCode::Sql,
        }
    }

    /// Conflict detail carried by validation failures.
    pub fn conflicts(&self) -> &[Conflict] {
        match self {
            Self::Overlap(result) | Self::Buffer(result) | Self::RescheduleConflict(result) => {
                &result.conflicts
            }
            _ => &[],
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.code().as_i32(),
            message: self.to_string(),
            conflicts: self.conflicts().to_vec(),
        }
    }
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidParams(message) => write!(f, "invalid parameters: {message}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::Forbidden(message) => write!(f, "forbidden: {message}"),
            Self::Overlap(result) => write!(f, "schedule overlap: {}", result.summary()),
            Self::Buffer(result) => write!(f, "buffer time violated: {}", result.summary()),
            Self::RuleConflict(message) => write!(f, "rule conflict: {message}"),
            Self::DeadlineExceeded {
                rule_id,
                original_date,
                reason,
            } => write!(
                f,
                "exception deadline exceeded for rule {rule_id} on {original_date}: {reason}"
            ),
            Self::AlreadyProcessed {
                exception_id,
                status,
            } => write!(
                f,
                "exception {exception_id} already processed with status {}",
                status.as_code()
            ),
            Self::RescheduleConflict(result) => {
                write!(f, "approved change conflicts: {}", result.summary())
            }
            Self::TxFailed(message) => write!(f, "transaction failed: {message}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for EngineError {
    fn from(value: RepoError) -> Self {
        Self::Store(value)
    }
}

impl From<CalendarError> for EngineError {
    fn from(value: CalendarError) -> Self {
        Self::InvalidParams(value.to_string())
    }
}

impl From<RuleValidationError> for EngineError {
    fn from(value: RuleValidationError) -> Self {
        Self::InvalidParams(value.to_string())
    }
}

impl From<ExceptionValidationError> for EngineError {
    fn from(value: ExceptionValidationError) -> Self {
        Self::InvalidParams(value.to_string())
    }
}

/// Transport-agnostic `{code, message}` shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Conflict>,
}
