//! Failure backoff schedule for tracked apps.
//!
//! After a failed run the app becomes ineligible for automatic re-ingestion
//! until `next_retry_at` elapses. The delay escalates with the consecutive
//! failure count along a fixed table and caps at the last entry.

use chrono::{DateTime, TimeDelta, Utc};

/// Escalating delay table applied after consecutive run failures.
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    delays: Vec<TimeDelta>,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            delays: vec![
                TimeDelta::minutes(5),
                TimeDelta::minutes(15),
                TimeDelta::hours(1),
                TimeDelta::hours(6),
                TimeDelta::hours(24),
            ],
        }
    }
}

impl BackoffSchedule {
    /// Creates a schedule from an explicit delay table.
    ///
    /// The table must be non-empty and non-decreasing; violating either is
    /// a configuration bug and panics.
    pub fn new(delays: Vec<TimeDelta>) -> Self {
        assert!(!delays.is_empty(), "backoff schedule must not be empty");
        assert!(
            delays.windows(2).all(|w| w[0] <= w[1]),
            "backoff schedule must be non-decreasing"
        );
        Self { delays }
    }

    /// Returns the delay for the given consecutive failure count.
    ///
    /// `failures` is the count *after* incrementing for the current failure,
    /// so it is always at least 1. Counts beyond the table length stay at
    /// the last entry.
    pub fn delay_for(&self, failures: u32) -> TimeDelta {
        let index = (failures.max(1) as usize).min(self.delays.len()) - 1;
        self.delays[index]
    }

    /// Computes the next eligible retry timestamp.
    pub fn next_retry_at(&self, now: DateTime<Utc>, failures: u32) -> DateTime<Utc> {
        now + self.delay_for(failures)
    }
}
