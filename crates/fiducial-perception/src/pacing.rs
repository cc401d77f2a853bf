//! Fixed-rate pacing without catch-up.

use std::thread;
use std::time::{Duration, Instant};

/// Time left in this period, zero on overrun.
pub fn sleep_budget(period: Duration, elapsed: Duration) -> Duration {
    period.saturating_sub(elapsed)
}

/// Holds each iteration to at least `period`, measured from a fresh stamp
/// every time. An overrun is not paid back by later iterations.
#[derive(Clone, Copy, Debug)]
pub struct Pacer {
    period: Duration,
}

impl Pacer {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sleep out the rest of the period that began at `started`. Returns the
    /// time slept.
    pub fn wait(&self, started: Instant) -> Duration {
        let budget = sleep_budget(self.period, started.elapsed());
        if !budget.is_zero() {
            thread::sleep(budget);
        }
        budget
    }
}
