//! Core scheduling engine for multi-center class timetables.
//! This crate is the single source of truth for scheduling invariants.

pub mod cache;
pub mod calendar;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod notify;
pub mod repo;
pub mod service;

pub use cache::{Cache, CacheError, MemoryCache, NoopCache};
pub use calendar::{TimeOfDay, DEFAULT_CENTER_TIMEZONE};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, EngineConfig};
pub use db::{open_db, open_db_in_memory, DbError};
pub use error::{EngineError, EngineResult, ErrorCode, ErrorPayload};
pub use logging::{default_log_level, init_logging, init_logging_from_config, logging_status};
pub use model::exception::{ExceptionStatus, ExceptionType, ScheduleException};
pub use model::rule::{EffectiveRange, RuleStatus, ScheduleRule, TeacherAssignment};
pub use notify::{NoopNotifier, Notifier, NotifyError};
pub use repo::{RepoError, RepoResult, ScheduleRepository, SqliteStore, Store};
pub use service::exception_service::{
    CreateExceptionRequest, LockReason, ReviewAction, ReviewRequest, RuleLockStatus,
};
pub use service::expansion::{ExpandedSession, PhaseTransition};
pub use service::query::{OccurrenceStatus, TeacherScheduleItem, TodaySummary};
pub use service::recurrence::{
    RecurrenceDeleteRequest, RecurrenceEditRequest, RecurrenceOutcome, RecurrencePreview,
    RuleChanges, UpdateMode,
};
pub use service::rule_service::{RuleWrite, RuleWriteOptions};
pub use service::validation::{Conflict, ConflictKind, SlotQuery, ValidationResult};
pub use service::{EngineContext, PostCommit};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
