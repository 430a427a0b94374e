use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tempo_core::{HandleGenerator, SchedulerConfig, TaskHandle, TempoError};
use tracing::{debug, error, info};

use crate::executor::{Executor, executor_for};
use crate::metrics::SchedulerMetrics;
use crate::queue::DueQueue;
use crate::registry::Registry;
use crate::types::TimedTask;

/// Everything guarded by the scheduler lock.
pub(super) struct SchedulerState<T> {
    pub(super) registry: Registry<T>,
    pub(super) queue: DueQueue<T>,
    /// Submissions not yet moved into the queue.
    pub(super) submissions: Vec<TimedTask<T>>,
    /// Cancellation requests not yet applied.
    pub(super) cancellations: Vec<TaskHandle>,
    pub(super) metrics: SchedulerMetrics,
}

/// State shared between the facade, the loop thread and completion jobs.
pub(super) struct Shared<T> {
    pub(super) state: Mutex<SchedulerState<T>>,
    /// Paired with `state`; the loop sleeps on it between cycles.
    pub(super) wakeup: Condvar,
    /// Read without the lock so a stop is seen mid-dispatch.
    pub(super) running: AtomicBool,
    /// Bumped by every `stop`; a loop exits once its generation is stale.
    pub(super) generation: AtomicU64,
    pub(super) config: SchedulerConfig,
    pub(super) executor: Arc<dyn Executor>,
}

impl<T> Shared<T> {
    pub(super) fn lock(&self) -> MutexGuard<'_, SchedulerState<T>> {
        // Bodies run outside the lock and panics are caught, so poisoning can
        // only come from the bookkeeping itself; keep going with the data.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the loop started as `generation` should keep going.
    pub(super) fn is_current(&self, generation: u64) -> bool {
        self.running.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }
}

/// The deferred-task scheduler. Runs closures returning `T` at or after their
/// due time on the configured [`Executor`].
///
/// All methods take `&self`; share the scheduler across threads with an `Arc`.
/// Dropping it stops the loop.
pub struct Scheduler<T: Send + 'static> {
    pub(super) shared: Arc<Shared<T>>,
    pub(super) handles: HandleGenerator,
    /// Join handle of the loop thread while running.
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> Scheduler<T> {
    /// Create a stopped scheduler using the executor named in `config`.
    pub fn new(config: SchedulerConfig) -> Result<Self, TempoError> {
        config.validate()?;
        let executor = executor_for(&config)?;
        Ok(Self::from_parts(config, executor))
    }

    /// Create a stopped scheduler with a caller-provided executor.
    pub fn with_executor(
        config: SchedulerConfig,
        executor: Arc<dyn Executor>,
    ) -> Result<Self, TempoError> {
        config.validate()?;
        Ok(Self::from_parts(config, executor))
    }

    fn from_parts(config: SchedulerConfig, executor: Arc<dyn Executor>) -> Self {
        let handles = HandleGenerator::new(config.handle_length);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState {
                    registry: Registry::new(),
                    queue: DueQueue::new(),
                    submissions: Vec::new(),
                    cancellations: Vec::new(),
                    metrics: SchedulerMetrics::default(),
                }),
                wakeup: Condvar::new(),
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                config,
                executor,
            }),
            handles,
            worker: Mutex::new(None),
        }
    }

    /// Launch the loop thread. No-op if already running.
    pub fn start(&self) -> Result<(), TempoError> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.shared.config.log_summary();
        let generation = self.shared.generation.load(Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(self.shared.config.thread_name.clone())
            .spawn(move || shared.run(generation));

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                info!(
                    executor = self.shared.executor.name(),
                    idle_timeout_ms = self.shared.config.idle_timeout_ms,
                    "Scheduler started"
                );
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                Err(TempoError::Spawn(format!("scheduler loop: {e}")))
            }
        }
    }

    /// Stop the loop and cancel every task that has not started. No-op if not running.
    ///
    /// Waits for the loop thread to exit, unless called from that thread (a
    /// body run by the [`InlineExecutor`](crate::InlineExecutor)); that loop
    /// exits once the body returns, even if the scheduler was restarted meanwhile.
    /// Bodies already running are left to finish.
    pub fn stop(&self) {
        let worker = {
            let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
            if !self.shared.running.swap(false, Ordering::SeqCst) {
                return;
            }
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            worker.take()
        };
        info!("Scheduler shutdown requested");

        {
            let mut state = self.shared.lock();
            let handles = state.registry.handles();
            state.cancellations.extend(handles);
        }
        self.shared.wakeup.notify_all();

        // Joined without holding `worker`: a body on the loop thread may call
        // `stop` itself.
        if let Some(handle) = worker {
            if handle.thread().id() == thread::current().id() {
                debug!("stop called on the scheduler thread; loop exits after this job");
                return;
            }
            if handle.join().is_err() {
                error!("Scheduler thread panicked");
            }
        }

        // The loop drains on exit, but a cancellation pushed after its last
        // drain would otherwise wait for the next start.
        self.shared.lock().drain_intake();
        info!("Scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Number of registry entries (live tasks plus kept results).
    pub fn len(&self) -> usize {
        self.shared.lock().registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the scheduler metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        self.shared.lock().metrics.clone()
    }

    pub fn executor_name(&self) -> &str {
        self.shared.executor.name()
    }
}

impl<T: Send + 'static> Drop for Scheduler<T> {
    fn drop(&mut self) {
        self.stop();
    }
}
