//! Execution strategies for dispatched task bodies.
//!
//! The scheduler loop only decides *when* a task runs; an [`Executor`] decides
//! *where*. Slow bodies therefore never delay timing decisions, as long as the
//! executor returns without waiting for the job.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tempo_core::{ExecutorKind, SchedulerConfig, TempoError};
use tracing::{error, warn};

/// A dispatched unit of work, already wrapped with its completion bookkeeping.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs handed over by the scheduler loop.
///
/// Implementations must run every job exactly once and should return without
/// waiting for it to finish.
pub trait Executor: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &str;

    fn execute(&self, job: Job);
}

/// Runs each job on a fresh, named OS thread.
pub struct ThreadExecutor {
    thread_name: String,
}

impl ThreadExecutor {
    pub fn new(thread_name: impl Into<String>) -> Self {
        Self {
            thread_name: thread_name.into(),
        }
    }
}

impl Default for ThreadExecutor {
    fn default() -> Self {
        Self::new("tempo-worker")
    }
}

fn take_job(slot: &Mutex<Option<Job>>) -> Option<Job> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

impl Executor for ThreadExecutor {
    fn name(&self) -> &str {
        "thread"
    }

    fn execute(&self, job: Job) {
        // The slot lets us get the job back if the OS refuses a new thread.
        let slot = Arc::new(Mutex::new(Some(job)));
        let worker_slot = Arc::clone(&slot);
        let spawned = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || {
                if let Some(job) = take_job(&worker_slot) {
                    job();
                }
            });

        if let Err(e) = spawned {
            warn!(error = %e, "failed to spawn task thread, running job inline");
            if let Some(job) = take_job(&slot) {
                job();
            }
        }
    }
}

/// Runs jobs on a bounded `rayon` worker pool.
pub struct PoolExecutor {
    pool: rayon::ThreadPool,
}

impl PoolExecutor {
    pub fn new(num_workers: usize, thread_name: impl Into<String>) -> Result<Self, TempoError> {
        let thread_name = thread_name.into();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers)
            .thread_name(move |i| format!("{thread_name}-{i}"))
            .panic_handler(|_| error!("task job panicked outside its body"))
            .build()
            .map_err(|e| TempoError::Spawn(format!("rayon thread pool: {e}")))?;
        Ok(Self { pool })
    }

    pub fn num_workers(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Executor for PoolExecutor {
    fn name(&self) -> &str {
        "pool"
    }

    fn execute(&self, job: Job) {
        self.pool.spawn(job);
    }
}

/// Runs each job synchronously on the caller's thread.
///
/// Blocks the scheduler loop for the duration of the body; meant for tests
/// and deterministic embedding.
#[derive(Debug, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn name(&self) -> &str {
        "inline"
    }

    fn execute(&self, job: Job) {
        job();
    }
}

/// Build the executor selected by `config.executor`.
pub fn executor_for(config: &SchedulerConfig) -> Result<Arc<dyn Executor>, TempoError> {
    let executor: Arc<dyn Executor> = match config.executor {
        ExecutorKind::Thread => Arc::new(ThreadExecutor::new(config.worker_thread_name())),
        ExecutorKind::Pool => Arc::new(PoolExecutor::new(
            config.resolved_worker_threads(),
            config.worker_thread_name(),
        )?),
        ExecutorKind::Inline => Arc::new(InlineExecutor),
    };
    Ok(executor)
}
