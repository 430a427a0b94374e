use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tempo_core::{ExecutorKind, SchedulerConfig, TaskHandle, TempoError};

use crate::executor::InlineExecutor;
use crate::runner::Scheduler;
use crate::types::{TaskOptions, TaskStatus};

const TIMEOUT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        idle_timeout_ms: 50,
        ..SchedulerConfig::default()
    }
}

fn inline_scheduler<T: Clone + Send + 'static>() -> Scheduler<T> {
    init_tracing();
    Scheduler::with_executor(test_config(), Arc::new(InlineExecutor)).unwrap()
}

/// Poll `check` every few milliseconds until it holds or `timeout` elapses.
fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}

fn past() -> chrono::DateTime<Utc> {
    Utc::now() - chrono::Duration::seconds(1)
}

#[test]
fn scheduler_creation() {
    let scheduler: Scheduler<()> = Scheduler::new(test_config()).unwrap();
    assert!(!scheduler.is_running());
    assert!(scheduler.is_empty());
    assert_eq!(scheduler.executor_name(), "thread");
    assert_eq!(scheduler.metrics().submitted, 0);
}

#[test]
fn creation_rejects_invalid_config() {
    let config = SchedulerConfig {
        handle_length: 3,
        ..SchedulerConfig::default()
    };
    let result: Result<Scheduler<()>, _> = Scheduler::new(config);
    assert!(matches!(result, Err(TempoError::Config(_))));
}

#[test]
fn with_executor_rejects_invalid_config() {
    let bad = [
        SchedulerConfig {
            handle_length: 0,
            ..test_config()
        },
        SchedulerConfig {
            idle_timeout_ms: 0,
            ..test_config()
        },
        SchedulerConfig {
            thread_name: String::new(),
            ..test_config()
        },
    ];
    for config in bad {
        let result: Result<Scheduler<()>, _> =
            Scheduler::with_executor(config.clone(), Arc::new(InlineExecutor));
        assert!(
            matches!(result, Err(TempoError::Config(_))),
            "accepted {config:?}"
        );
    }
}

#[test]
fn start_and_stop_are_idempotent() {
    let scheduler: Scheduler<()> = inline_scheduler();
    scheduler.stop();
    scheduler.start().unwrap();
    scheduler.start().unwrap();
    assert!(scheduler.is_running());
    scheduler.stop();
    scheduler.stop();
    assert!(!scheduler.is_running());

    // Restart after a stop.
    scheduler.start().unwrap();
    assert!(scheduler.is_running());
}

#[test]
fn kept_result_is_popped_exactly_once() {
    let scheduler = inline_scheduler();
    scheduler.start().unwrap();
    let handle = scheduler
        .at(past(), TaskOptions::default().keep_result(), || 42u32)
        .unwrap();

    assert!(wait_until(TIMEOUT, || {
        scheduler.get_result(&handle).map(|r| r.status) == Some(TaskStatus::Finished)
    }));

    let result = scheduler.pop_result(&handle).unwrap();
    assert_eq!(result.handle, handle);
    assert_eq!(result.status, TaskStatus::Finished);
    assert_eq!(result.value(), Some(&42));
    assert!(scheduler.pop_result(&handle).is_none());
    assert!(scheduler.get_result(&handle).is_none());
}

#[test]
fn fire_and_forget_task_leaves_no_entry() {
    let scheduler = inline_scheduler();
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    scheduler.start().unwrap();
    let handle = scheduler
        .at(past(), TaskOptions::default(), move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    assert!(wait_until(TIMEOUT, || count.load(Ordering::SeqCst) == 1));
    assert!(wait_until(TIMEOUT, || scheduler.get_result(&handle).is_none()));
    assert!(scheduler.is_empty());
}

#[test]
fn pop_result_keeps_unfinished_entries() {
    let scheduler: Scheduler<u32> = inline_scheduler();
    scheduler.start().unwrap();
    let handle = scheduler
        .after(Duration::from_secs(60), TaskOptions::default().keep_result(), || 1)
        .unwrap();

    assert!(wait_until(TIMEOUT, || {
        scheduler.get_result(&handle).map(|r| r.status) == Some(TaskStatus::Pending)
    }));
    let snapshot = scheduler.pop_result(&handle).unwrap();
    assert_eq!(snapshot.status, TaskStatus::Pending);
    assert!(snapshot.result.is_none());
    assert!(scheduler.get_result(&handle).is_some(), "pending entry must survive pop");
}

#[test]
fn duplicate_name_is_rejected_while_live() {
    let scheduler: Scheduler<u32> = inline_scheduler();
    scheduler
        .after(Duration::from_secs(60), TaskOptions::named("x"), || 1)
        .unwrap();

    let err = scheduler
        .after(Duration::from_secs(60), TaskOptions::named("x"), || 2)
        .unwrap_err();
    assert!(matches!(err, TempoError::DuplicateHandle(ref name) if name == "x"));
    assert_eq!(scheduler.len(), 1);
}

#[test]
fn name_is_reusable_after_reclamation() {
    let scheduler = inline_scheduler();
    scheduler.start().unwrap();
    let handle = scheduler
        .at(past(), TaskOptions::named("report").keep_result(), || 1u32)
        .unwrap();
    assert!(wait_until(TIMEOUT, || {
        scheduler.get_result(&handle).is_some_and(|r| r.is_terminal())
    }));

    // Still tracked: a kept result blocks the name until popped.
    assert!(scheduler.at(past(), TaskOptions::named("report"), || 2).is_err());
    scheduler.pop_result(&handle).unwrap();
    assert!(scheduler.at(past(), TaskOptions::named("report"), || 2).is_ok());
}

#[test]
fn generated_handles_use_configured_length() {
    let scheduler: Scheduler<()> = inline_scheduler();
    let handle = scheduler
        .after(Duration::from_secs(60), TaskOptions::default(), || ())
        .unwrap();
    assert_eq!(handle.as_str().len(), 16);
}

#[test]
fn cancel_before_due_prevents_execution() {
    let scheduler = inline_scheduler();
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    scheduler.start().unwrap();
    let handle = scheduler
        .after(Duration::from_millis(200), TaskOptions::default().keep_result(), move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    scheduler.cancel(&handle);
    assert!(wait_until(TIMEOUT, || {
        scheduler.get_result(&handle).map(|r| r.status) == Some(TaskStatus::Cancelled)
    }));
    thread::sleep(Duration::from_millis(300));
    assert_eq!(count.load(Ordering::SeqCst), 0);

    let popped = scheduler.pop_result(&handle).unwrap();
    assert_eq!(popped.status, TaskStatus::Cancelled);
    assert!(popped.result.is_none());
}

#[test]
fn cancel_wins_over_submission_in_same_cycle() {
    let scheduler = inline_scheduler();
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);

    // Both land in the intake buffers before the loop exists.
    let handle = scheduler
        .at(past(), TaskOptions::default().keep_result(), move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    scheduler.cancel(&handle);
    assert_eq!(
        scheduler.get_result(&handle).map(|r| r.status),
        Some(TaskStatus::Unscheduled)
    );

    scheduler.start().unwrap();
    assert!(wait_until(TIMEOUT, || {
        scheduler.get_result(&handle).map(|r| r.status) == Some(TaskStatus::Cancelled)
    }));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn cancelling_unknown_handle_is_noop() {
    let scheduler: Scheduler<()> = inline_scheduler();
    scheduler.start().unwrap();
    scheduler.cancel(&TaskHandle::from("never-submitted"));
    scheduler.cancel(&TaskHandle::from("never-submitted"));
    thread::sleep(Duration::from_millis(50));
    assert!(scheduler.is_empty());
    assert_eq!(scheduler.metrics().cancelled, 0);
}

#[test]
fn cancel_after_finish_keeps_result() {
    let scheduler = inline_scheduler();
    scheduler.start().unwrap();
    let handle = scheduler
        .at(past(), TaskOptions::default().keep_result(), || "done".to_string())
        .unwrap();
    assert!(wait_until(TIMEOUT, || {
        scheduler.get_result(&handle).map(|r| r.status) == Some(TaskStatus::Finished)
    }));

    scheduler.cancel(&handle);
    thread::sleep(Duration::from_millis(50));
    let result = scheduler.get_result(&handle).unwrap();
    assert_eq!(result.status, TaskStatus::Finished);
    assert_eq!(result.value().map(String::as_str), Some("done"));
}

#[test]
fn due_tasks_dispatch_in_due_time_order() {
    let scheduler = inline_scheduler();
    let order = Arc::new(Mutex::new(Vec::new()));
    let base = Utc::now() - chrono::Duration::seconds(10);

    // Submitted out of order before start so one pass sees all of them.
    for (name, offset) in [("c", 3), ("a", 1), ("tie-1", 2), ("b", 2), ("tie-2", 2)] {
        let order = Arc::clone(&order);
        scheduler
            .at(
                base + chrono::Duration::seconds(offset),
                TaskOptions::named(name),
                move || order.lock().unwrap().push(name),
            )
            .unwrap();
    }
    scheduler.start().unwrap();

    assert!(wait_until(TIMEOUT, || order.lock().unwrap().len() == 5));
    assert_eq!(*order.lock().unwrap(), vec!["a", "tie-1", "b", "tie-2", "c"]);
}

#[test]
fn panicking_body_finishes_with_failure() {
    let scheduler = inline_scheduler();
    scheduler.start().unwrap();
    let handle = scheduler
        .at(past(), TaskOptions::default().keep_result(), || -> u32 {
            panic!("task exploded")
        })
        .unwrap();

    assert!(wait_until(TIMEOUT, || {
        scheduler.get_result(&handle).map(|r| r.status) == Some(TaskStatus::Finished)
    }));
    let result = scheduler.pop_result(&handle).unwrap();
    assert!(result.value().is_none());
    assert_eq!(result.failure().map(|f| f.message.as_str()), Some("task exploded"));

    // The loop survives the panic.
    let next = scheduler
        .at(past(), TaskOptions::default().keep_result(), || 7)
        .unwrap();
    assert!(wait_until(TIMEOUT, || {
        scheduler.get_result(&next).and_then(|r| r.value().copied()) == Some(7)
    }));
    assert_eq!(scheduler.metrics().failed, 1);
}

#[test]
fn stop_cancels_pending_tasks() {
    let scheduler = inline_scheduler();
    let count = Arc::new(AtomicUsize::new(0));
    scheduler.start().unwrap();

    let mut kept = Vec::new();
    for i in 0..20 {
        let c = Arc::clone(&count);
        let options = if i % 2 == 0 {
            TaskOptions::default().keep_result()
        } else {
            TaskOptions::default()
        };
        let handle = scheduler
            .after(Duration::from_secs(60), options, move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        if i % 2 == 0 {
            kept.push(handle);
        }
    }
    scheduler.stop();

    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.len(), kept.len(), "fire-and-forget entries are gone");
    for handle in &kept {
        assert_eq!(
            scheduler.get_result(handle).map(|r| r.status),
            Some(TaskStatus::Cancelled)
        );
    }
    assert_eq!(scheduler.metrics().cancelled, 20);
    assert_eq!(scheduler.metrics().pending, 0);
}

#[test]
fn new_earlier_task_wakes_idle_loop() {
    init_tracing();
    let config = SchedulerConfig {
        idle_timeout_ms: 60_000,
        ..SchedulerConfig::default()
    };
    let scheduler = Scheduler::with_executor(config, Arc::new(InlineExecutor)).unwrap();
    scheduler.start().unwrap();
    // Let the loop reach its long idle sleep.
    thread::sleep(Duration::from_millis(50));

    let handle = scheduler
        .after(Duration::from_millis(20), TaskOptions::default().keep_result(), || 1u8)
        .unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        scheduler.get_result(&handle).map(|r| r.status) == Some(TaskStatus::Finished)
    }));
}

#[test]
fn pool_executor_runs_scheduled_tasks() {
    init_tracing();
    let config = SchedulerConfig {
        idle_timeout_ms: 50,
        executor: ExecutorKind::Pool,
        worker_threads: 2,
        ..SchedulerConfig::default()
    };
    let scheduler = Scheduler::new(config).unwrap();
    assert_eq!(scheduler.executor_name(), "pool");
    scheduler.start().unwrap();

    let handles: Vec<_> = (0..10u64)
        .map(|i| {
            scheduler
                .at(past(), TaskOptions::default().keep_result(), move || i * 2)
                .unwrap()
        })
        .collect();

    for (i, handle) in handles.iter().enumerate() {
        assert!(wait_until(TIMEOUT, || {
            scheduler.get_result(handle).and_then(|r| r.value().copied()) == Some(i as u64 * 2)
        }));
    }
}

#[test]
fn metrics_track_lifecycle() {
    let scheduler = inline_scheduler();
    scheduler.start().unwrap();
    let done = scheduler
        .at(past(), TaskOptions::default().keep_result(), || 1u32)
        .unwrap();
    let waiting = scheduler
        .after(Duration::from_secs(60), TaskOptions::default(), || 2u32)
        .unwrap();

    assert!(wait_until(TIMEOUT, || {
        scheduler.get_result(&done).is_some_and(|r| r.is_terminal())
            && scheduler.metrics().pending == 1
    }));
    scheduler.cancel(&waiting);
    assert!(wait_until(TIMEOUT, || scheduler.metrics().cancelled == 1));

    let metrics = scheduler.metrics();
    assert_eq!(metrics.submitted, 2);
    assert_eq!(metrics.dispatched, 1);
    assert_eq!(metrics.finished, 1);
    assert_eq!(metrics.in_flight(), 0);
    assert_eq!(metrics.pending, 0);
    assert!(metrics.last_dispatch.is_some());
}

#[test]
fn concurrent_submitters_each_run_once() {
    init_tracing();
    let scheduler = Arc::new(Scheduler::new(test_config()).unwrap());
    let count = Arc::new(AtomicUsize::new(0));
    scheduler.start().unwrap();

    let submitters: Vec<_> = (0..4)
        .map(|_| {
            let scheduler = Arc::clone(&scheduler);
            let count = Arc::clone(&count);
            thread::spawn(move || {
                for _ in 0..50 {
                    let c = Arc::clone(&count);
                    scheduler
                        .after(Duration::from_millis(10), TaskOptions::default(), move || {
                            c.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for s in submitters {
        s.join().unwrap();
    }

    assert!(wait_until(TIMEOUT, || count.load(Ordering::SeqCst) == 200 && scheduler.is_empty()));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(count.load(Ordering::SeqCst), 200);
}

#[test]
fn stop_races_submit_cancel_and_pop() {
    init_tracing();
    for _ in 0..5 {
        let scheduler: Arc<Scheduler<()>> = Arc::new(Scheduler::new(test_config()).unwrap());
        let ran = Arc::new(AtomicUsize::new(0));
        scheduler.start().unwrap();

        let submitters: Vec<_> = (0..4)
            .map(|_| {
                let scheduler = Arc::clone(&scheduler);
                let ran = Arc::clone(&ran);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let r = Arc::clone(&ran);
                        let handle = scheduler
                            .after(Duration::from_secs(60), TaskOptions::default(), move || {
                                r.fetch_add(1, Ordering::SeqCst);
                            })
                            .unwrap();
                        scheduler.cancel(&handle);
                        assert!(scheduler.pop_result(&handle).map_or(true, |r| r.is_terminal()));
                    }
                })
            })
            .collect();

        let stopper = {
            let scheduler = Arc::clone(&scheduler);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(2));
                scheduler.stop();
            })
        };
        stopper.join().unwrap();
        for s in submitters {
            s.join().unwrap();
        }
        assert!(!scheduler.is_running());

        // Requests made after the stop are applied by the next loop.
        scheduler.start().unwrap();
        assert!(wait_until(TIMEOUT, || scheduler.is_empty()));
        scheduler.stop();

        let metrics = scheduler.metrics();
        assert_eq!(metrics.submitted, 800);
        assert_eq!(metrics.cancelled, 800, "every task cancelled exactly once");
        assert_eq!(metrics.pending, 0);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}

#[test]
fn stop_from_inline_body_then_restart_leaves_one_loop() {
    let scheduler: Arc<Scheduler<()>> = Arc::new(inline_scheduler());
    let (stopped_tx, stopped_rx) = mpsc::channel();
    let (restarted_tx, restarted_rx) = mpsc::channel::<()>();
    scheduler.start().unwrap();

    let inner = Arc::clone(&scheduler);
    scheduler
        .at(past(), TaskOptions::default(), move || {
            inner.stop();
            stopped_tx.send(()).unwrap();
            // Hold the old loop until the scheduler has been restarted.
            restarted_rx.recv().unwrap();
        })
        .unwrap();

    stopped_rx.recv_timeout(TIMEOUT).unwrap();
    assert!(!scheduler.is_running());
    scheduler.start().unwrap();
    restarted_tx.send(()).unwrap();

    // One reference held by the scheduler, one by the current loop thread.
    assert!(wait_until(TIMEOUT, || Arc::strong_count(&scheduler.shared) == 2));

    let handle = scheduler
        .at(past(), TaskOptions::default().keep_result(), || ())
        .unwrap();
    assert!(wait_until(TIMEOUT, || {
        scheduler.get_result(&handle).map(|r| r.status) == Some(TaskStatus::Finished)
    }));
    scheduler.stop();
    assert!(wait_until(TIMEOUT, || Arc::strong_count(&scheduler.shared) == 1));
}
