//! Notification hand-off invoked after commit.
//!
//! Delivery transport lives outside the engine; implementations receive
//! the committed exception and report failures that callers only log.

use crate::model::exception::ScheduleException;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyError(pub String);

impl Display for NotifyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "notification failed: {}", self.0)
    }
}

impl Error for NotifyError {}

pub trait Notifier: Send + Sync {
    fn on_exception_submitted(&self, exception: &ScheduleException) -> Result<(), NotifyError>;
    fn on_exception_reviewed(&self, exception: &ScheduleException) -> Result<(), NotifyError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn on_exception_submitted(&self, _exception: &ScheduleException) -> Result<(), NotifyError> {
        Ok(())
    }

    fn on_exception_reviewed(&self, _exception: &ScheduleException) -> Result<(), NotifyError> {
        Ok(())
    }
}
