use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tempo_core::TaskHandle;
use tracing::{debug, trace, warn};

use crate::executor::Job;
use crate::registry::Completion;
use crate::types::{TaskBody, TaskFailure, TaskStatus, TimedTask};

use super::core::{SchedulerState, Shared};

impl<T> SchedulerState<T> {
    /// Apply buffered cancellations, then buffered submissions.
    ///
    /// Cancellations go first so a task cancelled before the loop ever saw it
    /// is never queued.
    pub(super) fn drain_intake(&mut self) {
        let cancellations = std::mem::take(&mut self.cancellations);
        let submissions = std::mem::take(&mut self.submissions);
        if !cancellations.is_empty() || !submissions.is_empty() {
            trace!(
                cancellations = cancellations.len(),
                submissions = submissions.len(),
                "draining intake"
            );
        }

        for handle in &cancellations {
            self.cancel_task(handle);
        }
        for task in submissions {
            self.enqueue_task(task);
        }
        self.metrics.pending = self.queue.len();
    }

    fn cancel_task(&mut self, handle: &TaskHandle) {
        match self.registry.cancel(handle) {
            Some(TaskStatus::Pending) => {
                self.queue.remove(handle);
            }
            Some(_) => {}
            None => return,
        }
        self.metrics.record_cancellation();
        debug!(handle = %handle, "task cancelled");
    }

    fn enqueue_task(&mut self, task: TimedTask<T>) {
        if !self.registry.mark_pending(&task.handle) {
            trace!(handle = %task.handle, "dropping submission cancelled before scheduling");
            return;
        }
        self.queue.insert(task);
    }

    /// Time to sleep before the next due task, capped at `idle`.
    fn sleep_interval(&self, now: DateTime<Utc>, idle: Duration) -> Duration {
        match self.queue.next_due() {
            // Negative (overdue) converts to zero.
            Some(due) => due.signed_duration_since(now).to_std().unwrap_or_default().min(idle),
            None => idle,
        }
    }
}

impl<T: Send + 'static> Shared<T> {
    /// Scheduler loop body. Returns once `running` is cleared or a later
    /// `start` has taken over.
    pub(super) fn run(self: Arc<Self>, generation: u64) {
        let idle = self.config.idle_timeout();
        debug!("Scheduler loop running");

        let mut state = self.lock();
        while self.is_current(generation) {
            state.drain_intake();

            let now = Utc::now();
            let jobs = self.dispatch_due(&mut state, now, generation);
            if !jobs.is_empty() {
                drop(state);
                for job in jobs {
                    self.executor.execute(job);
                }
                // Re-drain before sleeping: wake-ups sent while unlocked are not replayed.
                state = self.lock();
                continue;
            }

            let sleep = state.sleep_interval(now, idle);
            trace!(?sleep, pending = state.queue.len(), "scheduler sleeping");
            state = match self.wakeup.wait_timeout(state, sleep) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }

        state.drain_intake();
        debug!("Scheduler loop exited");
    }

    /// Mark every task due at `now` as running and build its job, earliest first.
    ///
    /// Stops early if the scheduler is being shut down; the rest stay queued
    /// for the shutdown cancellation.
    fn dispatch_due(
        self: &Arc<Self>,
        state: &mut SchedulerState<T>,
        now: DateTime<Utc>,
        generation: u64,
    ) -> Vec<Job> {
        let mut jobs = Vec::new();
        while self.is_current(generation) {
            let Some(task) = state.queue.pop_due(now) else {
                break;
            };
            if let Some(job) = self.dispatch(state, task, now) {
                jobs.push(job);
            }
        }
        state.metrics.pending = state.queue.len();
        jobs
    }

    fn dispatch(
        self: &Arc<Self>,
        state: &mut SchedulerState<T>,
        task: TimedTask<T>,
        now: DateTime<Utc>,
    ) -> Option<Job> {
        if !state.registry.mark_running(&task.handle) {
            return None;
        }
        state.metrics.record_dispatch(now);
        debug!(handle = %task.handle, due_time = %task.due_time, "dispatching task");

        let shared = Arc::clone(self);
        let TimedTask { handle, body, .. } = task;
        Some(Box::new(move || shared.complete(handle, body)))
    }

    /// Run a body and write its outcome back to the registry.
    fn complete(&self, handle: TaskHandle, body: TaskBody<T>) {
        let started = Instant::now();
        let output = panic::catch_unwind(AssertUnwindSafe(body)).map_err(TaskFailure::from_panic);
        let elapsed = started.elapsed();
        if let Err(failure) = &output {
            warn!(handle = %handle, error = %failure, "task body panicked");
        }

        let mut state = self.lock();
        state.metrics.record_completion(elapsed, output.is_err());
        match state.registry.complete(&handle, output) {
            Completion::Missing => debug!(handle = %handle, "completed task no longer tracked"),
            completion => trace!(handle = %handle, ?completion, ?elapsed, "task completed"),
        }
    }
}
