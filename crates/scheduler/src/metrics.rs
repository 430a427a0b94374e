use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Scheduler counters, updated under the scheduler lock.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerMetrics {
    /// Tasks accepted by `at`/`after`.
    pub submitted: u64,
    /// Tasks handed to the executor.
    pub dispatched: u64,
    /// Tasks whose body returned.
    pub finished: u64,
    /// Tasks whose body panicked.
    pub failed: u64,
    /// Tasks cancelled before dispatch.
    pub cancelled: u64,
    /// Tasks currently in the due-time queue.
    pub pending: usize,
    /// Mean body run time over finished and failed tasks.
    pub avg_run_duration: Duration,
    /// When the last dispatch pass handed out a task.
    pub last_dispatch: Option<DateTime<Utc>>,
}

impl SchedulerMetrics {
    pub fn record_submission(&mut self) {
        self.submitted += 1;
    }

    pub fn record_dispatch(&mut self, at: DateTime<Utc>) {
        self.dispatched += 1;
        self.last_dispatch = Some(at);
    }

    pub fn record_cancellation(&mut self) {
        self.cancelled += 1;
    }

    /// Record a completed body and fold its run time into the rolling average.
    pub fn record_completion(&mut self, duration: Duration, failed: bool) {
        if failed {
            self.failed += 1;
        } else {
            self.finished += 1;
        }

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let count = self.finished + self.failed;
        self.avg_run_duration = if count == 1 {
            duration
        } else {
            let prev_nanos = self.avg_run_duration.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
    }

    /// Tasks dispatched but not yet completed.
    pub fn in_flight(&self) -> u64 {
        self.dispatched.saturating_sub(self.finished + self.failed)
    }
}
