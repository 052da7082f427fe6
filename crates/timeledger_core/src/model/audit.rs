//! Append-only audit rows written inside the mutating transaction.

use crate::model::tenancy::{AdminId, CenterId, TeacherId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Who triggered a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Actor {
    Teacher(TeacherId),
    Admin(AdminId),
    System,
}

impl Actor {
    pub fn kind(self) -> &'static str {
        match self {
            Self::Teacher(_) => "teacher",
            Self::Admin(_) => "admin",
            Self::System => "system",
        }
    }

    pub fn id(self) -> Option<Uuid> {
        match self {
            Self::Teacher(id) | Self::Admin(id) => Some(id),
            Self::System => None,
        }
    }
}

/// Audited operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    CreateRule,
    UpdateRule,
    DeleteRule,
    CreateException,
    RevokeException,
    ReviewExceptionApprove,
    ReviewExceptionReject,
    EditSingleOccurrence,
    EditFutureOccurrences,
    EditAllOccurrences,
    DeleteRecurringSchedule,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateRule => "CREATE_RULE",
            Self::UpdateRule => "UPDATE_RULE",
            Self::DeleteRule => "DELETE_RULE",
            Self::CreateException => "CREATE_EXCEPTION",
            Self::RevokeException => "REVOKE_EXCEPTION",
            Self::ReviewExceptionApprove => "REVIEW_EXCEPTION_APPROVE",
            Self::ReviewExceptionReject => "REVIEW_EXCEPTION_REJECT",
            Self::EditSingleOccurrence => "EDIT_SINGLE_OCCURRENCE",
            Self::EditFutureOccurrences => "EDIT_FUTURE_OCCURRENCES",
            Self::EditAllOccurrences => "EDIT_ALL_OCCURRENCES",
            Self::DeleteRecurringSchedule => "DELETE_RECURRING_SCHEDULE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditTarget {
    Rule,
    Exception,
}

impl AuditTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::Exception => "exception",
        }
    }
}

/// Audit row to append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub center_id: CenterId,
    pub actor: Actor,
    pub action: AuditAction,
    pub target: AuditTarget,
    pub target_id: Uuid,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

impl AuditEntry {
    pub fn new(
        center_id: CenterId,
        actor: Actor,
        action: AuditAction,
        target: AuditTarget,
        target_id: Uuid,
    ) -> Self {
        Self {
            center_id,
            actor,
            action,
            target,
            target_id,
            before: None,
            after: None,
        }
    }

    pub fn with_before(mut self, before: impl Serialize) -> Self {
        self.before = serde_json::to_value(before).ok();
        self
    }

    pub fn with_after(mut self, after: impl Serialize) -> Self {
        self.after = serde_json::to_value(after).ok();
        self
    }
}

/// Persisted audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub seq: i64,
    pub center_id: CenterId,
    pub actor_type: String,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub target_type: String,
    pub target_id: Uuid,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub created_at: i64,
}
