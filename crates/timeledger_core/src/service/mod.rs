//! Scheduling use-case services.
//!
//! # Responsibility
//! - Own the collaborators every operation needs (`EngineContext`).
//! - Run post-commit work (cache invalidation, notifications) only after
//!   the transaction that produced it committed.
//!
//! # Invariants
//! - No service touches the cache or notifier inside a transaction.
//! - Cache and notifier failures are logged and never surfaced.

pub mod exception_service;
pub mod expansion;
pub mod query;
pub mod recurrence;
pub mod rule_service;
pub mod validation;

use crate::cache::{invalidate_schedule, Cache, MemoryCache};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::model::exception::ScheduleException;
use crate::model::rule::ScheduleRule;
use crate::model::tenancy::{CenterId, TeacherId};
use crate::notify::{NoopNotifier, Notifier};
use crate::repo::Store;
use log::warn;
use std::collections::BTreeSet;

use exception_service::ExceptionService;
use query::QueryService;
use recurrence::RecurrenceService;
use rule_service::RuleService;
use validation::ValidationService;

/// Work deferred until the enclosing transaction committed.
#[derive(Debug, Clone, PartialEq)]
pub enum PostCommit {
    Invalidate {
        center_id: CenterId,
        teachers: BTreeSet<TeacherId>,
    },
    ExceptionSubmitted(ScheduleException),
    ExceptionReviewed(ScheduleException),
}

impl PostCommit {
    /// Invalidation covering the teachers of `rules`.
    pub fn invalidate_rules<'r>(
        center_id: CenterId,
        rules: impl IntoIterator<Item = &'r ScheduleRule>,
    ) -> Self {
        Self::Invalidate {
            center_id,
            teachers: rules
                .into_iter()
                .filter_map(|rule| rule.teacher.teacher_id())
                .collect(),
        }
    }
}

/// Shared collaborators for every service.
pub struct EngineContext<S: Store> {
    pub store: S,
    pub cache: Box<dyn Cache>,
    pub notifier: Box<dyn Notifier>,
    pub clock: Box<dyn Clock>,
    pub config: EngineConfig,
}

impl<S: Store> EngineContext<S> {
    /// In-memory cache, no-op notifier and wall clock in the configured zone.
    pub fn new(store: S, config: EngineConfig) -> Self {
        let tz = config.tz();
        Self {
            store,
            cache: Box::new(MemoryCache::new()),
            notifier: Box::new(NoopNotifier),
            clock: Box::new(SystemClock::new(tz)),
            config,
        }
    }

    pub fn with_cache(mut self, cache: Box<dyn Cache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn validation(&self) -> ValidationService<'_, S> {
        ValidationService::new(self)
    }

    pub fn rules(&self) -> RuleService<'_, S> {
        RuleService::new(self)
    }

    pub fn exceptions(&self) -> ExceptionService<'_, S> {
        ExceptionService::new(self)
    }

    pub fn recurrence(&self) -> RecurrenceService<'_, S> {
        RecurrenceService::new(self)
    }

    pub fn queries(&self) -> QueryService<'_, S> {
        QueryService::new(self)
    }

    pub(crate) fn run_post_commit(&self, actions: Vec<PostCommit>) {
        for action in actions {
            match action {
                PostCommit::Invalidate {
                    center_id,
                    teachers,
                } => invalidate_schedule(self.cache.as_ref(), center_id, &teachers),
                PostCommit::ExceptionSubmitted(exception) => {
                    if let Err(err) = self.notifier.on_exception_submitted(&exception) {
                        warn!(
                            "event=notify_submitted module=notify status=error exception_id={} error={}",
                            exception.id, err
                        );
                    }
                }
                PostCommit::ExceptionReviewed(exception) => {
                    if let Err(err) = self.notifier.on_exception_reviewed(&exception) {
                        warn!(
                            "event=notify_reviewed module=notify status=error exception_id={} error={}",
                            exception.id, err
                        );
                    }
                }
            }
        }
    }
}
