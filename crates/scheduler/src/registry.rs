//! Task registry: the lifecycle record for every live handle.

use std::collections::HashMap;

use tempo_core::{TaskHandle, TempoError};

use crate::types::{TaskOutput, TaskResult, TaskStatus};

/// How a completion was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Entry marked Finished with its output stored.
    Recorded,
    /// Fire-and-forget entry deleted.
    Discarded,
    /// No running entry for the handle.
    Missing,
}

/// One entry per live handle. Not synchronized; the scheduler guards it.
pub struct Registry<T> {
    entries: HashMap<TaskHandle, TaskResult<T>>,
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub fn contains(&self, handle: &TaskHandle) -> bool {
        self.entries.contains_key(handle)
    }

    #[cfg(test)]
    pub fn status(&self, handle: &TaskHandle) -> Option<TaskStatus> {
        self.entries.get(handle).map(|e| e.status)
    }

    pub fn handles(&self) -> Vec<TaskHandle> {
        self.entries.keys().cloned().collect()
    }

    /// Create an Unscheduled entry. Fails if the handle is already tracked.
    pub fn register(&mut self, handle: TaskHandle, keep_result: bool) -> Result<(), TempoError> {
        if self.entries.contains_key(&handle) {
            return Err(TempoError::DuplicateHandle(handle.into_inner()));
        }
        self.entries
            .insert(handle.clone(), TaskResult::unscheduled(handle, keep_result));
        Ok(())
    }

    /// Unscheduled -> Pending. Returns false for any other state.
    pub fn mark_pending(&mut self, handle: &TaskHandle) -> bool {
        self.transition(handle, TaskStatus::Unscheduled, TaskStatus::Pending)
    }

    /// Pending -> Running. Returns false for any other state.
    pub fn mark_running(&mut self, handle: &TaskHandle) -> bool {
        self.transition(handle, TaskStatus::Pending, TaskStatus::Running)
    }

    fn transition(&mut self, handle: &TaskHandle, from: TaskStatus, to: TaskStatus) -> bool {
        match self.entries.get_mut(handle) {
            Some(entry) if entry.status == from => {
                entry.status = to;
                true
            }
            _ => false,
        }
    }

    /// Cancel a task that has not started.
    ///
    /// Returns the status it was cancelled from, or `None` if the handle is
    /// unknown or already running/terminal. Fire-and-forget entries are deleted.
    pub fn cancel(&mut self, handle: &TaskHandle) -> Option<TaskStatus> {
        let entry = self.entries.get_mut(handle)?;
        let previous = entry.status;
        match previous {
            TaskStatus::Unscheduled | TaskStatus::Pending => entry.status = TaskStatus::Cancelled,
            _ => return None,
        }
        if !entry.keep_result {
            self.entries.remove(handle);
        }
        Some(previous)
    }

    /// Record the output of a running task.
    pub fn complete(&mut self, handle: &TaskHandle, output: TaskOutput<T>) -> Completion {
        let Some(entry) = self.entries.get_mut(handle) else {
            return Completion::Missing;
        };
        if entry.status != TaskStatus::Running {
            return Completion::Missing;
        }
        if entry.keep_result {
            entry.status = TaskStatus::Finished;
            entry.result = Some(output);
            Completion::Recorded
        } else {
            self.entries.remove(handle);
            Completion::Discarded
        }
    }
}

impl<T: Clone> Registry<T> {
    /// Snapshot of the entry.
    pub fn get(&self, handle: &TaskHandle) -> Option<TaskResult<T>> {
        self.entries.get(handle).cloned()
    }

    /// Snapshot of the entry; the entry is removed if it is terminal.
    pub fn pop_terminal(&mut self, handle: &TaskHandle) -> Option<TaskResult<T>> {
        if self.entries.get(handle)?.is_terminal() {
            self.entries.remove(handle)
        } else {
            self.get(handle)
        }
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
