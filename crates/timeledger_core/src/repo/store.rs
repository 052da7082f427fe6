//! Transactional store boundary.
//!
//! # Responsibility
//! - Hand one repository to a unit of work and commit or roll back the
//!   whole unit.
//!
//! # Invariants
//! - Mutating units run inside `BEGIN IMMEDIATE`; concurrent writers on the
//!   same database file serialize on the write lock.
//! - A unit that fails, or whose deadline elapsed before commit, leaves no
//!   rows behind.

use super::schedule_repo::table_exists;
use super::{RepoError, RepoResult, ScheduleRepository, SqliteScheduleRepository};
use crate::db::migrations::latest_version;
use crate::db::{open_db, open_db_in_memory};
use crate::error::{EngineError, EngineResult};
use log::{debug, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Instant;

const REQUIRED_TABLES: [&str; 11] = [
    "centers",
    "courses",
    "teachers",
    "center_memberships",
    "rooms",
    "offerings",
    "schedule_rules",
    "schedule_exceptions",
    "center_holidays",
    "personal_events",
    "audit_logs",
];

/// Unit-of-work boundary used by every engine operation.
pub trait Store {
    /// Runs read-only work outside any explicit transaction.
    fn with_reader<T, F>(&self, work: F) -> EngineResult<T>
    where
        F: FnOnce(&dyn ScheduleRepository) -> EngineResult<T>;

    /// Runs `work` atomically; aborts with `TxFailed` once `deadline` passed.
    fn in_transaction_until<T, F>(&self, deadline: Option<Instant>, work: F) -> EngineResult<T>
    where
        F: FnOnce(&dyn ScheduleRepository) -> EngineResult<T>;

    fn in_transaction<T, F>(&self, work: F) -> EngineResult<T>
    where
        F: FnOnce(&dyn ScheduleRepository) -> EngineResult<T>,
    {
        self.in_transaction_until(None, work)
    }
}

/// Store over one SQLite connection.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> RepoResult<Self> {
        Self::from_connection(open_db(path)?)
    }

    pub fn open_in_memory() -> RepoResult<Self> {
        Self::from_connection(open_db_in_memory()?)
    }

    /// Wraps an already migrated connection.
    pub fn from_connection(conn: Connection) -> RepoResult<Self> {
        ensure_schema_ready(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Store for SqliteStore {
    fn with_reader<T, F>(&self, work: F) -> EngineResult<T>
    where
        F: FnOnce(&dyn ScheduleRepository) -> EngineResult<T>,
    {
        let repo = SqliteScheduleRepository::new(&self.conn);
        work(&repo)
    }

    fn in_transaction_until<T, F>(&self, deadline: Option<Instant>, work: F) -> EngineResult<T>
    where
        F: FnOnce(&dyn ScheduleRepository) -> EngineResult<T>,
    {
        let started_at = Instant::now();
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .map_err(|err| {
                warn!("event=tx_begin module=store status=error error={err}");
                EngineError::TxFailed(err.to_string())
            })?;

        let outcome = {
            let repo = SqliteScheduleRepository::new(&tx);
            work(&repo)
        };

        let value = match outcome {
            Ok(value) => value,
            Err(err) => {
                rollback(tx, "work_failed");
                return Err(into_abort_error(err));
            }
        };

        if deadline.is_some_and(|deadline| Instant::now() > deadline) {
            rollback(tx, "deadline_elapsed");
            return Err(EngineError::TxFailed(
                "transaction deadline elapsed before commit".to_string(),
            ));
        }

        tx.commit().map_err(|err| {
            warn!("event=tx_commit module=store status=error error={err}");
            EngineError::TxFailed(err.to_string())
        })?;
        debug!(
            "event=tx_commit module=store status=ok duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(value)
    }
}

fn rollback(tx: Transaction<'_>, reason: &str) {
    if let Err(err) = tx.rollback() {
        warn!("event=tx_rollback module=store status=error reason={reason} error={err}");
        return;
    }
    debug!("event=tx_rollback module=store status=ok reason={reason}");
}

/// Persistence failures inside a unit surface as `TxFailed`; domain
/// failures keep their own code.
fn into_abort_error(err: EngineError) -> EngineError {
    match err {
        EngineError::Store(RepoError::NotFound { entity, id }) => EngineError::NotFound { entity, id },
        EngineError::Store(inner) => EngineError::TxFailed(inner.to_string()),
        other => other,
    }
}

fn ensure_schema_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }
    for table in REQUIRED_TABLES {
        if !table_exists(conn, table)? {
            return Err(RepoError::InvalidData(format!(
                "required table `{table}` is missing"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{SqliteStore, Store};
    use crate::error::{EngineError, ErrorCode};
    use crate::model::tenancy::Center;
    use crate::repo::RepoError;
    use rusqlite::Connection;
    use std::time::{Duration, Instant};

    #[test]
    fn failed_unit_leaves_no_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        let center = Center::new("North");
        let err = store
            .in_transaction(|repo| -> Result<(), EngineError> {
                repo.insert_center(&center)?;
                Err(EngineError::Forbidden("stop".to_string()))
            })
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);
        let found = store.with_reader(|repo| Ok(repo.get_center(center.id)?)).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn elapsed_deadline_aborts_before_commit() {
        let store = SqliteStore::open_in_memory().unwrap();
        let center = Center::new("North");
        let deadline = Instant::now() - Duration::from_millis(1);
        let err = store
            .in_transaction_until(Some(deadline), |repo| Ok(repo.insert_center(&center)?))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TxFailed);
        let found = store.with_reader(|repo| Ok(repo.get_center(center.id)?)).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn unmigrated_connection_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        let err = SqliteStore::from_connection(conn).err().unwrap();
        assert!(matches!(
            err,
            RepoError::UninitializedConnection {
                actual_version: 0,
                ..
            }
        ));
    }
}
