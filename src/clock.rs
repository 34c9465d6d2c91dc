//! Defines the [`Clock`] trait so authoring actions can be driven by a fixed
//! or stepping clock in tests.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// A source of "now" for lifecycle transitions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Every reading advances it by
/// `step`, so consecutive actions get distinct instants.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    step: Duration,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>, step: Duration) -> ManualClock {
        ManualClock {
            now: Mutex::new(start),
            step,
        }
    }

    /// Moves the clock forward by `by` without reading it.
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let mut now = self.now.lock();
        let current = *now;
        *now += self.step;
        current
    }
}
