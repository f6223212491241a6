//! Scheduler state management.
//!
//! Nothing here is persisted: after a restart the scheduler starts idle
//! and contacts become due again purely from their stored timestamps.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle of the periodic driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Created, not yet running.
    #[default]
    Idle,
    /// Ticking.
    Running,
    /// Shut down; will not tick again.
    Stopped,
}

/// Counters for one pass of the delivery loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Active accounts the tick looked at.
    pub accounts_processed: usize,
    /// Accounts skipped because their channel could not be used.
    pub accounts_failed: usize,
    /// Messages delivered and recorded.
    pub sent: usize,
    /// Sends that failed; contacts left untouched.
    pub failed: usize,
    /// Due contacts whose current step has no message.
    pub skipped_no_step: usize,
    /// Sends that succeeded but found the contact already advanced.
    pub stale: usize,
}

impl TickReport {
    /// Whether the tick did anything worth logging at info level.
    #[must_use]
    pub const fn is_quiet(&self) -> bool {
        self.sent == 0 && self.failed == 0 && self.accounts_failed == 0
    }
}

/// State of the scheduler.
#[derive(Debug, Default)]
pub struct SchedulerState {
    /// Current lifecycle phase.
    pub phase: Phase,

    /// Number of ticks that ran to completion.
    pub ticks_completed: u64,

    /// Number of ticks aborted by a store failure.
    pub ticks_aborted: u64,

    /// When the last tick started.
    pub last_tick_at: Option<DateTime<Utc>>,

    /// How long the last tick took.
    pub last_tick_duration: Option<Duration>,

    /// Outcome of the last completed tick.
    pub last_report: Option<TickReport>,
}

impl SchedulerState {
    /// Creates a new idle scheduler state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the scheduler as running.
    pub fn start(&mut self) {
        self.phase = Phase::Running;
    }

    /// Marks the scheduler as stopped.
    pub fn stop(&mut self) {
        self.phase = Phase::Stopped;
    }

    /// Whether the scheduler may still tick.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    /// Records a completed tick.
    pub fn record_tick(&mut self, started_at: DateTime<Utc>, took: Duration, report: TickReport) {
        self.ticks_completed += 1;
        self.last_tick_at = Some(started_at);
        self.last_tick_duration = Some(took);
        self.last_report = Some(report);
    }

    /// Records a tick that was aborted before completion.
    pub fn record_abort(&mut self, started_at: DateTime<Utc>) {
        self.ticks_aborted += 1;
        self.last_tick_at = Some(started_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        let state = SchedulerState::default();
        assert_eq!(state.phase, Phase::Idle);
        assert_eq!(state.ticks_completed, 0);
        assert!(state.last_report.is_none());
        assert!(!state.is_running());
    }

    #[test]
    fn test_phase_transitions() {
        let mut state = SchedulerState::new();
        state.start();
        assert!(state.is_running());
        state.stop();
        assert_eq!(state.phase, Phase::Stopped);
    }

    #[test]
    fn test_record_tick() {
        let mut state = SchedulerState::new();
        let report = TickReport {
            accounts_processed: 2,
            sent: 3,
            ..TickReport::default()
        };
        state.record_tick(Utc::now(), Duration::from_millis(40), report.clone());
        state.record_abort(Utc::now());

        assert_eq!(state.ticks_completed, 1);
        assert_eq!(state.ticks_aborted, 1);
        assert_eq!(state.last_report, Some(report));
        assert!(TickReport::default().is_quiet());
        assert!(!state.last_report.unwrap().is_quiet());
    }
}
