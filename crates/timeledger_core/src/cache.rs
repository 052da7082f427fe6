//! Expansion cache contract and in-process implementations.
//!
//! # Responsibility
//! - Define the opaque key-value cache read paths may consult.
//! - Build the expansion keys and invalidation patterns write paths clear.
//!
//! # Invariants
//! - Cache failures never change results; callers log and fall through.
//! - Patterns support one trailing `*`; anything else matches exactly.

use crate::model::tenancy::{CenterId, TeacherId};
use chrono::NaiveDate;
use log::warn;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    Unavailable(String),
    InvalidPattern(String),
}

impl Display for CacheError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(message) => write!(f, "cache unavailable: {message}"),
            Self::InvalidPattern(pattern) => write!(f, "invalid cache pattern `{pattern}`"),
        }
    }
}

impl Error for CacheError {}

/// Key-value cache with TTL and prefix delete.
pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> CacheResult<Option<String>>;
    fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()>;
    fn delete(&self, key: &str) -> CacheResult<()>;
    /// Deletes matching keys and returns how many were removed.
    fn delete_by_pattern(&self, pattern: &str) -> CacheResult<usize>;
}

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// Process-local TTL map.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        self.entries.lock().insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn delete_by_pattern(&self, pattern: &str) -> CacheResult<usize> {
        let matcher = PatternMatcher::parse(pattern)?;
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !matcher.matches(key));
        Ok(before - entries.len())
    }
}

/// Cache that stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl Cache for NoopCache {
    fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        Ok(None)
    }

    fn set_with_ttl(&self, _key: &str, _value: String, _ttl: Duration) -> CacheResult<()> {
        Ok(())
    }

    fn delete(&self, _key: &str) -> CacheResult<()> {
        Ok(())
    }

    fn delete_by_pattern(&self, _pattern: &str) -> CacheResult<usize> {
        Ok(0)
    }
}

enum PatternMatcher<'a> {
    Exact(&'a str),
    Prefix(&'a str),
}

impl<'a> PatternMatcher<'a> {
    fn parse(pattern: &'a str) -> CacheResult<Self> {
        match pattern.find('*') {
            None => Ok(Self::Exact(pattern)),
            Some(index) if index == pattern.len() - 1 => Ok(Self::Prefix(&pattern[..index])),
            Some(_) => Err(CacheError::InvalidPattern(pattern.to_string())),
        }
    }

    fn matches(&self, key: &str) -> bool {
        match self {
            Self::Exact(expected) => key == *expected,
            Self::Prefix(prefix) => key.starts_with(prefix),
        }
    }
}

pub fn center_expand_key(center_id: CenterId, from: NaiveDate, to: NaiveDate) -> String {
    format!("schedule:expand:center:{center_id}:start:{from}:end:{to}")
}

pub fn teacher_expand_key(
    teacher_id: TeacherId,
    center_id: CenterId,
    from: NaiveDate,
    to: NaiveDate,
) -> String {
    format!("schedule:expand:teacher:{teacher_id}:center:{center_id}:start:{from}:end:{to}")
}

pub fn center_pattern(center_id: CenterId) -> String {
    format!("schedule:expand:center:{center_id}:*")
}

pub fn teacher_pattern(teacher_id: TeacherId, center_id: CenterId) -> String {
    format!("schedule:expand:teacher:{teacher_id}:center:{center_id}:*")
}

/// Clears the center-wide keys and the per-teacher keys of `teachers`.
pub fn invalidate_schedule<'t>(
    cache: &dyn Cache,
    center_id: CenterId,
    teachers: impl IntoIterator<Item = &'t TeacherId>,
) {
    let mut patterns = vec![center_pattern(center_id)];
    patterns.extend(
        teachers
            .into_iter()
            .map(|teacher_id| teacher_pattern(*teacher_id, center_id)),
    );
    for pattern in patterns {
        if let Err(err) = cache.delete_by_pattern(&pattern) {
            warn!(
                "event=cache_invalidate module=cache status=error center_id={} pattern={} error={}",
                center_id, pattern, err
            );
        }
    }
}
