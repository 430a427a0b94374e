use std::time::Duration;

use chrono::{DateTime, Utc};
use tempo_core::{TaskHandle, TempoError};
use tracing::{debug, warn};

use crate::types::{TaskOptions, TaskResult, TimedTask};

use super::Scheduler;

impl<T: Clone + Send + 'static> Scheduler<T> {
    /// Schedule `body` to run at `due_time`.
    ///
    /// Returns as soon as the task is registered (status `Unscheduled`); the
    /// loop picks it up on its next cycle. Fails with
    /// [`TempoError::DuplicateHandle`] if the handle is still tracked.
    pub fn at<F>(
        &self,
        due_time: DateTime<Utc>,
        options: TaskOptions,
        body: F,
    ) -> Result<TaskHandle, TempoError>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let handle = match options.name {
            Some(name) => TaskHandle::new(name),
            None => self.handles.generate(),
        };

        {
            let mut state = self.shared.lock();
            if let Err(e) = state.registry.register(handle.clone(), options.keep_result) {
                warn!(handle = %handle, "rejected duplicate task handle");
                return Err(e);
            }
            state
                .submissions
                .push(TimedTask::new(handle.clone(), due_time, body));
            state.metrics.record_submission();
        }
        self.shared.wakeup.notify_one();

        debug!(handle = %handle, due_time = %due_time, keep_result = options.keep_result, "task submitted");
        Ok(handle)
    }

    /// Schedule `body` to run `delay` from now.
    pub fn after<F>(
        &self,
        delay: Duration,
        options: TaskOptions,
        body: F,
    ) -> Result<TaskHandle, TempoError>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let due_time = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.at(due_time, options, body)
    }

    /// Request cancellation. Unknown, running and finished handles are ignored.
    pub fn cancel(&self, handle: &TaskHandle) {
        self.shared.lock().cancellations.push(handle.clone());
        self.shared.wakeup.notify_one();
        debug!(handle = %handle, "cancellation requested");
    }

    /// Snapshot of the task's entry, or `None` if unknown or already reclaimed.
    pub fn get_result(&self, handle: &TaskHandle) -> Option<TaskResult<T>> {
        self.shared.lock().registry.get(handle)
    }

    /// Like [`get_result`](Self::get_result), but removes the entry if the task
    /// is finished or cancelled.
    pub fn pop_result(&self, handle: &TaskHandle) -> Option<TaskResult<T>> {
        self.shared.lock().registry.pop_terminal(handle)
    }
}
