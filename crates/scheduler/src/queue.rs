//! Due-time queue: tasks waiting for their due time, earliest first.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tempo_core::TaskHandle;

use crate::types::TimedTask;

/// Pending tasks sorted ascending by due time. Equal due times keep arrival order.
pub struct DueQueue<T> {
    tasks: VecDeque<TimedTask<T>>,
}

impl<T> DueQueue<T> {
    pub fn new() -> Self {
        Self { tasks: VecDeque::new() }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Insert after every task due at or before `task.due_time`.
    pub fn insert(&mut self, task: TimedTask<T>) {
        let index = self.tasks.partition_point(|t| t.due_time <= task.due_time);
        self.tasks.insert(index, task);
    }

    /// Remove the task with `handle`, if queued.
    pub fn remove(&mut self, handle: &TaskHandle) -> Option<TimedTask<T>> {
        let index = self.tasks.iter().position(|t| &t.handle == handle)?;
        self.tasks.remove(index)
    }

    #[cfg(test)]
    pub fn contains(&self, handle: &TaskHandle) -> bool {
        self.tasks.iter().any(|t| &t.handle == handle)
    }

    /// Due time of the earliest task.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.tasks.front().map(|t| t.due_time)
    }

    /// Pop the earliest task if it is due at `now`.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<TimedTask<T>> {
        if self.tasks.front()?.due_time <= now {
            self.tasks.pop_front()
        } else {
            None
        }
    }

    #[cfg(test)]
    pub fn handles(&self) -> impl Iterator<Item = &TaskHandle> {
        self.tasks.iter().map(|t| &t.handle)
    }
}

impl<T> Default for DueQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
