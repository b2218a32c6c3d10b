//! Deadline-based countdown computation.
//!
//! Remaining time is always recomputed from the deadline and the current
//! instant, so skipped or throttled ticks never cause drift.

use chrono::{DateTime, Utc};
#[cfg(test)]
use chrono::Duration;
#[cfg(test)]
use std::sync::{Arc, Mutex};

/// A point-in-time view of a countdown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Countdown {
    pub minutes: u32,
    pub seconds: u32,
    /// Milliseconds left, never negative.
    pub remaining_ms: i64,
    /// Elapsed share of the phase, in [0, 100].
    pub progress_percent: f32,
}

impl Countdown {
    /// Computes the countdown for a phase ending at `deadline` that lasts `total_ms`.
    pub fn at(deadline: DateTime<Utc>, total_ms: i64, now: DateTime<Utc>) -> Self {
        Self::from_remaining((deadline - now).num_milliseconds(), total_ms)
    }

    /// Builds a countdown from a raw remaining value; negatives count as zero.
    pub fn from_remaining(remaining_ms: i64, total_ms: i64) -> Self {
        let remaining_ms = remaining_ms.max(0);
        let total_secs = (remaining_ms / 1000) as u32;
        let progress_percent = if total_ms <= 0 {
            100.0
        } else {
            let elapsed = (total_ms - remaining_ms) as f64;
            ((elapsed / total_ms as f64) * 100.0).clamp(0.0, 100.0) as f32
        };
        Self {
            minutes: total_secs / 60,
            seconds: total_secs % 60,
            remaining_ms,
            progress_percent,
        }
    }

    /// True once the deadline has been reached.
    pub fn is_complete(&self) -> bool {
        self.remaining_ms <= 0
    }
}

/// Converts whole minutes to milliseconds.
pub fn minutes_to_ms(minutes: u32) -> i64 {
    i64::from(minutes) * 60_000
}

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Clones share the same instant.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = instant;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
