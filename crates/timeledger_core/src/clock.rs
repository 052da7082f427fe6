//! Time source abstraction.
//!
//! Deadline gates and "today" summaries read the current instant only
//! through [`Clock`], so tests can pin it.

use crate::calendar::center_timezone;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;

/// Timezone-aware "now".
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Tz>;

    /// Center-local wall time.
    fn local_now(&self) -> NaiveDateTime {
        self.now().naive_local()
    }

    /// Center-local calendar date.
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall clock in a fixed zone.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(center_timezone())
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }
}

/// Manually driven clock.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Tz>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Tz>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Pins the clock at a center-local wall time.
    pub fn at_local(local: NaiveDateTime) -> Self {
        Self::new(localize(local))
    }

    pub fn set_local(&self, local: NaiveDateTime) {
        *self.now.lock() = localize(local);
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Tz> {
        *self.now.lock()
    }
}

fn localize(local: NaiveDateTime) -> DateTime<Tz> {
    let tz = center_timezone();
    tz.from_local_datetime(&local)
        .earliest()
        .unwrap_or_else(|| tz.from_utc_datetime(&local))
}
