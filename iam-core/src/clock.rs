//! Time source abstraction.
//!
//! Audit timestamps, access bookkeeping and the event-tail horizon all read
//! the current time through [`Clock`] so tests can pin or step it.

use crate::model::Timestamp;
use std::sync::atomic::{AtomicI64, Ordering};

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Production clock using system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now()
    }
}

/// Fixed clock for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub Timestamp);

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        self.0
    }
}

/// Clock that advances by a fixed step on every read.
///
/// Two reads never return the same instant, which keeps audit timestamps
/// strictly ordered in tests.
#[derive(Debug)]
pub struct SteppingClock {
    start: Timestamp,
    step_ms: i64,
    ticks: AtomicI64,
}

impl SteppingClock {
    pub fn new(start: Timestamp, step: chrono::Duration) -> Self {
        Self {
            start,
            step_ms: step.num_milliseconds().max(1),
            ticks: AtomicI64::new(0),
        }
    }

    /// Instant the next call to [`Clock::now`] will return, without consuming it.
    pub fn peek(&self) -> Timestamp {
        self.start + chrono::Duration::milliseconds(self.ticks.load(Ordering::SeqCst) * self.step_ms)
    }

    /// Skip ahead without producing a reading.
    pub fn advance(&self, by: chrono::Duration) {
        let steps = (by.num_milliseconds() / self.step_ms).max(1);
        self.ticks.fetch_add(steps, Ordering::SeqCst);
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> Timestamp {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst);
        self.start + chrono::Duration::milliseconds(tick * self.step_ms)
    }
}
