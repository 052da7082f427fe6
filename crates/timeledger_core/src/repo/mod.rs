//! Persistence contracts and the SQLite store.
//!
//! # Responsibility
//! - Define the repository every engine operation reads and writes through.
//! - Provide `Store`, the transactional boundary handing a repository to
//!   one unit of work.
//!
//! # Invariants
//! - Soft-deleted rows are never returned by list queries.
//! - Writes made through a transactional repository become visible only
//!   after the enclosing `in_transaction` commits.

pub mod schedule_repo;
pub mod store;

use crate::db::DbError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub use schedule_repo::{ScheduleRepository, SqliteScheduleRepository};
pub use store::{SqliteStore, Store};

pub type RepoResult<T> = Result<T, RepoError>;

/// Persistence failures.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    /// Update targeted a row that does not exist or is soft-deleted.
    NotFound { entity: &'static str, id: Uuid },
    /// Stored value cannot be decoded into the model.
    InvalidData(String),
    /// Connection schema is not at the version this binary expects.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} row not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted schedule data: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "schedule store requires schema version {expected_version}, got {actual_version}"
            ),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}
