//! The work-stealing dispatcher and its shutdown sequence.
//!
//! A [`Dispatcher`] is created once per scheduling context and shared by
//! every scene. [`DispatcherHandle`] is the cheap, clonable submit-only
//! view handed to task graphs and continuation tasks.
//!
//! # Failure contract
//!
//! Tasks are expected not to panic. A panic escaping [`Task::run`] is
//! caught at the worker boundary, logged, and poisons the dispatcher:
//! every later [`submit`](Dispatcher::submit) fails with
//! [`DispatchError::Poisoned`], and [`shutdown`](Dispatcher::shutdown)
//! re-raises the original panic on the calling thread. Nothing is
//! retried; a task graph that depended on the panicking task can never
//! complete.

use std::any::Any;
use std::sync::atomic::{fence, AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use crossbeam_utils::sync::Parker;
use crossbeam_utils::CachePadded;

use cadence_core::{ConfigError, DispatchError};

use crate::config::DispatcherConfig;
use crate::pool::{EntryPool, QueueEntry};
use crate::signal::WakeSignal;
use crate::stats::{DispatcherStats, WorkerCounters};
use crate::task::TaskRef;
use crate::worker::{self, WorkerThread};

/// Counter for unique dispatcher IDs, used to match worker threads to
/// the dispatcher that owns them.
static NEXT_DISPATCHER_ID: AtomicU64 = AtomicU64::new(1);

/// Index of the calling thread within its dispatcher's worker set, or
/// `None` if the caller is not a worker thread.
pub fn current_worker() -> Option<usize> {
    worker::current_index()
}

// ── Shared state ───────────────────────────────────────────────────

type PanicPayload = Box<dyn Any + Send + 'static>;

pub(crate) struct Shared {
    pub(crate) id: u64,
    pub(crate) injector: Injector<Box<QueueEntry>>,
    pub(crate) stealers: Vec<Stealer<Box<QueueEntry>>>,
    pub(crate) pool: EntryPool,
    pub(crate) signal: WakeSignal,
    pub(crate) shutdown: AtomicBool,
    poisoned: AtomicBool,
    panic: Mutex<Option<(String, PanicPayload)>>,
    pub(crate) counters: Vec<CachePadded<WorkerCounters>>,
    submitted: AtomicU64,
    pub(crate) park_timeout: Duration,
}

impl Shared {
    fn submit(&self, task: TaskRef) -> Result<(), DispatchError> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(DispatchError::Poisoned {
                task: task.name().to_string(),
            });
        }
        if self.shutdown.load(Ordering::Acquire) {
            return Err(DispatchError::ShutDown {
                task: task.name().to_string(),
            });
        }

        let entry = self.pool.acquire(task);
        self.submitted.fetch_add(1, Ordering::Relaxed);
        if let Err(entry) = worker::push_local(self.id, entry) {
            self.injector.push(entry);
        }
        fence(Ordering::SeqCst);
        self.signal.notify_one();
        Ok(())
    }

    pub(crate) fn poison(&self, task: &str, payload: PanicPayload) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "<non-string panic payload>".to_string());
        log::error!("task '{task}' panicked: {message}; dispatcher is poisoned");

        self.poisoned.store(true, Ordering::Release);
        let mut slot = self.panic.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some((task.to_string(), payload));
        }
    }

    /// Free anything left in the injector after every worker has exited.
    fn discard_queued(&self) -> usize {
        let mut discarded = 0;
        loop {
            match self.injector.steal() {
                Steal::Success(entry) => {
                    log::warn!(
                        "discarding task '{}' submitted during shutdown",
                        entry.task_name()
                    );
                    self.pool.release(entry);
                    discarded += 1;
                }
                Steal::Retry => continue,
                Steal::Empty => break,
            }
        }
        discarded
    }

    fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            workers: self.counters.iter().map(|c| c.snapshot()).collect(),
            submitted: self.submitted.load(Ordering::Relaxed),
            pool_fallback_allocations: self.pool.fallback_allocations(),
        }
    }
}

// ── ShutdownReport ─────────────────────────────────────────────────

/// Report from [`Dispatcher::shutdown`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Wall time spent draining and joining workers.
    pub total_ms: u64,
    /// Workers joined cleanly.
    pub workers_joined: usize,
    /// Tasks executed over the dispatcher's lifetime.
    pub tasks_executed: u64,
    /// Tasks that raced with shutdown and were dropped unrun.
    pub tasks_discarded: usize,
}

// ── DispatcherHandle ───────────────────────────────────────────────

/// Clonable submit-only handle to a [`Dispatcher`].
///
/// Handles keep the shared queues alive but not the worker threads;
/// submitting after the owning dispatcher shut down fails with
/// [`DispatchError::ShutDown`].
#[derive(Clone)]
pub struct DispatcherHandle {
    shared: Arc<Shared>,
}

impl DispatcherHandle {
    /// Queue `task` for execution on a worker thread.
    ///
    /// From a worker of this dispatcher the task goes to that worker's
    /// own deque; from any other thread it goes to the global injector.
    /// One idle worker is woken either way.
    pub fn submit(&self, task: TaskRef) -> Result<(), DispatchError> {
        self.shared.submit(task)
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.shared.stealers.len()
    }

    /// Whether shutdown has begun.
    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Whether a task has panicked.
    pub fn is_poisoned(&self) -> bool {
        self.shared.poisoned.load(Ordering::Acquire)
    }

    /// Whether the calling thread is one of this dispatcher's workers.
    pub fn is_worker_thread(&self) -> bool {
        worker::is_worker_of(self.shared.id)
    }
}

impl std::fmt::Debug for DispatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherHandle")
            .field("id", &self.shared.id)
            .field("workers", &self.worker_count())
            .finish()
    }
}

// ── Dispatcher ─────────────────────────────────────────────────────

/// Work-stealing thread pool.
///
/// `Dispatcher` is `Send + Sync`; share it behind an `Arc` and call
/// [`shutdown`](Self::shutdown) from any non-worker thread. Dropping it
/// shuts it down.
pub struct Dispatcher {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Validate `config`, then spawn the worker threads.
    pub fn new(config: DispatcherConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let workers = config.resolved_worker_count();

        let deques: Vec<Worker<Box<QueueEntry>>> =
            (0..workers).map(|_| Worker::new_lifo()).collect();
        let parkers: Vec<Parker> = (0..workers).map(|_| Parker::new()).collect();

        let shared = Arc::new(Shared {
            id: NEXT_DISPATCHER_ID.fetch_add(1, Ordering::Relaxed),
            injector: Injector::new(),
            stealers: deques.iter().map(Worker::stealer).collect(),
            pool: EntryPool::new(config.entry_pool_capacity),
            signal: WakeSignal::new(parkers.iter().map(|p| p.unparker().clone()).collect()),
            shutdown: AtomicBool::new(false),
            poisoned: AtomicBool::new(false),
            panic: Mutex::new(None),
            counters: (0..workers)
                .map(|_| CachePadded::new(WorkerCounters::default()))
                .collect(),
            submitted: AtomicU64::new(0),
            park_timeout: config.park_timeout,
        });

        let mut threads = Vec::with_capacity(workers);
        for (index, (deque, parker)) in deques.into_iter().zip(parkers).enumerate() {
            let worker = WorkerThread::new(index, Arc::clone(&shared), parker);
            let spawned = thread::Builder::new()
                .name(format!("{}-{index}", config.thread_name_prefix))
                .spawn(move || worker.run(deque));
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    shared.shutdown.store(true, Ordering::SeqCst);
                    shared.signal.notify_all();
                    for handle in threads {
                        let _ = handle.join();
                    }
                    return Err(ConfigError::ThreadSpawnFailed {
                        reason: format!("worker {index}: {e}"),
                    });
                }
            }
        }

        log::info!("dispatcher {} started with {workers} worker(s)", shared.id);
        Ok(Self {
            shared,
            threads: Mutex::new(threads),
        })
    }

    /// A clonable submit-only handle.
    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Queue `task` for execution. See [`DispatcherHandle::submit`].
    pub fn submit(&self, task: TaskRef) -> Result<(), DispatchError> {
        self.shared.submit(task)
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.shared.stealers.len()
    }

    /// Whether a task has panicked.
    pub fn is_poisoned(&self) -> bool {
        self.shared.poisoned.load(Ordering::Acquire)
    }

    /// Whether shutdown has begun.
    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Snapshot of the dispatcher's counters.
    pub fn stats(&self) -> DispatcherStats {
        self.shared.stats()
    }

    /// Stop accepting work, let workers drain every queued task, and
    /// join them. Idempotent.
    ///
    /// If any task panicked, the first panic is re-raised here after the
    /// workers have been joined.
    pub fn shutdown(&self) -> ShutdownReport {
        let (report, panic) = self.shutdown_inner();
        if let Some((task, payload)) = panic {
            log::error!("re-raising panic from task '{task}' on shutdown");
            std::panic::resume_unwind(payload);
        }
        report
    }

    fn shutdown_inner(&self) -> (ShutdownReport, Option<(String, PanicPayload)>) {
        let start = Instant::now();
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.signal.notify_all();

        if worker::is_worker_of(self.shared.id) {
            log::error!("dispatcher shutdown requested from its own worker; not joining");
            return (ShutdownReport::default(), None);
        }

        let handles = std::mem::take(
            &mut *self.threads.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if handles.is_empty() {
            return (ShutdownReport::default(), None);
        }

        let mut workers_joined = 0;
        for handle in handles {
            if handle.join().is_ok() {
                workers_joined += 1;
            }
        }
        let tasks_discarded = self.shared.discard_queued();

        let report = ShutdownReport {
            total_ms: start.elapsed().as_millis() as u64,
            workers_joined,
            tasks_executed: self.shared.stats().executed(),
            tasks_discarded,
        };
        log::info!(
            "dispatcher {} shut down in {} ms ({} task(s) executed, {} discarded)",
            self.shared.id,
            report.total_ms,
            report.tasks_executed,
            report.tasks_discarded
        );

        let panic = self
            .shared
            .panic
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        (report, panic)
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let (_, panic) = self.shutdown_inner();
        if let Some((task, _)) = panic {
            log::error!("dispatcher dropped after task '{task}' panicked");
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("id", &self.shared.id)
            .field("workers", &self.worker_count())
            .field("shut_down", &self.is_shut_down())
            .field("poisoned", &self.is_poisoned())
            .finish()
    }
}

// Compile-time assertion: Dispatcher and its handle are shared across threads.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<Dispatcher>();
    assert::<DispatcherHandle>();
};
