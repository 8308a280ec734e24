//! Periodic backup schedule parameters.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::backup::BackupError;

/// Interval and run state of one session's backup timer.
///
/// Passed to [`BackupController::start`](super::BackupController::start)
/// to configure the timer, and returned by
/// [`BackupController::schedule`](super::BackupController::schedule) as a
/// snapshot of the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSchedule {
    pub(super) interval: Duration,
    /// Completion time of the most recent cycle, successful or not.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Whether a pack/save cycle is running right now.
    pub in_flight: bool,
}

impl BackupSchedule {
    /// A schedule that fires every `interval`.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::InvalidInterval`] for a zero interval.
    pub fn new(interval: Duration) -> Result<Self, BackupError> {
        if interval.is_zero() {
            return Err(BackupError::InvalidInterval);
        }
        Ok(Self {
            interval,
            last_run_at: None,
            in_flight: false,
        })
    }

    /// Convenience constructor taking milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::InvalidInterval`] for zero.
    pub fn from_millis(interval_ms: u64) -> Result<Self, BackupError> {
        Self::new(Duration::from_millis(interval_ms))
    }

    /// Time between ticks.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }
}
