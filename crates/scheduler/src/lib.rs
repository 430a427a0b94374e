//! In-process deferred-task scheduler.
//!
//! Callers submit closures to run at (or after) a point in time, optionally under
//! a chosen name, and later query, pop, or cancel them. One background thread
//! keeps pending tasks ordered by due time and hands due ones to an
//! [`Executor`]; task bodies never run under the scheduler lock.
//!
//! ```no_run
//! use std::time::Duration;
//! use tempo_scheduler::{Scheduler, SchedulerConfig, TaskOptions};
//!
//! let scheduler: Scheduler<u64> = Scheduler::new(SchedulerConfig::default())?;
//! scheduler.start()?;
//! let handle = scheduler.after(Duration::from_secs(1), TaskOptions::default().keep_result(), || 42)?;
//! std::thread::sleep(Duration::from_millis(1100));
//! let done = scheduler.pop_result(&handle).expect("kept result");
//! assert_eq!(done.value(), Some(&42));
//! # Ok::<(), tempo_scheduler::TempoError>(())
//! ```

pub mod executor;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod types;

pub use executor::{Executor, InlineExecutor, Job, PoolExecutor, ThreadExecutor, executor_for};
pub use metrics::SchedulerMetrics;
pub use runner::Scheduler;
pub use tempo_core::{ExecutorKind, SchedulerConfig, TaskHandle, TempoError};
pub use types::{TaskFailure, TaskOptions, TaskOutput, TaskResult, TaskStatus, TimedTask};
