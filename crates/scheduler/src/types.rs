use std::any::Any;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempo_core::TaskHandle;

/// Lifecycle state of a submitted task.
///
/// `Unscheduled -> Pending -> Running -> Finished`, or `Unscheduled | Pending -> Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Submitted, not yet picked up by the scheduler loop.
    Unscheduled,
    /// In the due-time queue, waiting for its due time.
    Pending,
    /// Handed to the executor.
    Running,
    /// Body returned (or panicked).
    Finished,
    /// Cancelled before it was dispatched.
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Finished | TaskStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Unscheduled => "UNSCHEDULED",
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Finished => "FINISHED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task body that panicked instead of returning.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("task body panicked: {message}")]
pub struct TaskFailure {
    pub message: String,
}

impl TaskFailure {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { message }
    }
}

/// What a finished task produced.
pub type TaskOutput<T> = Result<T, TaskFailure>;

pub(crate) type TaskBody<T> = Box<dyn FnOnce() -> T + Send + 'static>;

/// Per-submission options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOptions {
    /// Caller-chosen handle. Generated when `None`.
    pub name: Option<String>,
    /// Keep the registry entry after completion so the result can be fetched.
    pub keep_result: bool,
}

impl TaskOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            keep_result: false,
        }
    }

    pub fn keep_result(mut self) -> Self {
        self.keep_result = true;
        self
    }
}

/// Immutable submission record: what to run and when.
pub struct TimedTask<T> {
    pub handle: TaskHandle,
    pub due_time: DateTime<Utc>,
    pub(crate) body: TaskBody<T>,
}

impl<T> TimedTask<T> {
    pub fn new<F>(handle: TaskHandle, due_time: DateTime<Utc>, body: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self {
            handle,
            due_time,
            body: Box::new(body),
        }
    }
}

impl<T> fmt::Debug for TimedTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedTask")
            .field("handle", &self.handle)
            .field("due_time", &self.due_time)
            .finish_non_exhaustive()
    }
}

/// Registry entry for one handle. Callers only ever see clones of it.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult<T> {
    pub handle: TaskHandle,
    pub status: TaskStatus,
    pub keep_result: bool,
    /// Set once, when a kept task finishes.
    pub result: Option<TaskOutput<T>>,
}

impl<T> TaskResult<T> {
    pub(crate) fn unscheduled(handle: TaskHandle, keep_result: bool) -> Self {
        Self {
            handle,
            status: TaskStatus::Unscheduled,
            keep_result,
            result: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The body's return value, if it finished without panicking.
    pub fn value(&self) -> Option<&T> {
        self.result.as_ref().and_then(|r| r.as_ref().ok())
    }

    pub fn failure(&self) -> Option<&TaskFailure> {
        self.result.as_ref().and_then(|r| r.as_ref().err())
    }
}
