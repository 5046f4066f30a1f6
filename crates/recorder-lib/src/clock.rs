//! Row timestamp source
//!
//! Workers stamp readings through a [`Clock`] so tests can drive time with
//! tokio's paused clock instead of the wall clock.

use crate::models::format_timestamp;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Current time formatted for storage
    fn timestamp(&self) -> String {
        format_timestamp(self.now())
    }
}

/// Wall-clock UTC
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// UTC time advanced by the tokio clock from a fixed origin
///
/// Follows `tokio::time::pause`/`advance`, so it is deterministic in tests.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin_utc: DateTime<Utc>,
    origin: Instant,
}

impl MonotonicClock {
    pub fn starting_at(origin_utc: DateTime<Utc>) -> Self {
        Self {
            origin_utc,
            origin: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.origin);
        match chrono::Duration::from_std(elapsed) {
            Ok(elapsed) => self.origin_utc + elapsed,
            Err(_) => self.origin_utc,
        }
    }
}
