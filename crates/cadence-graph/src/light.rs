//! Re-armable continuation tasks that live outside the task table.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use cadence_dispatch::{DispatcherHandle, Task};

use crate::hold::Hold;

type LightBody = Box<dyn Fn(&Arc<LightTask>) + Send + Sync>;

/// A reference-counted task submitted to the dispatcher each time its
/// count drops to zero.
///
/// The count starts at zero. Callers gate the task by taking
/// [`hold`](LightTask::hold)s; the last release submits it. The body may
/// take a new hold on its own task to run again later, which is how the
/// substep loop re-arms itself. An optional continuation hold is released
/// after each run.
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use cadence_dispatch::{Dispatcher, DispatcherConfig};
/// use cadence_graph::LightTask;
///
/// let dispatcher = Dispatcher::new(DispatcherConfig::with_workers(1)).unwrap();
/// let hits = Arc::new(AtomicUsize::new(0));
/// let h = Arc::clone(&hits);
/// let task = LightTask::new("tally", dispatcher.handle(), move |_| {
///     h.fetch_add(1, Ordering::Relaxed);
/// });
/// let a = task.hold();
/// let b = task.hold();
/// a.release();
/// b.release(); // count reaches zero: submitted
/// dispatcher.shutdown();
/// assert_eq!(hits.load(Ordering::Relaxed), 1);
/// ```
pub struct LightTask {
    name: String,
    body: LightBody,
    ref_count: AtomicUsize,
    runs: AtomicU64,
    continuation: Mutex<Option<Hold>>,
    dispatcher: DispatcherHandle,
}

impl LightTask {
    /// Create a light task with a zero reference count.
    pub fn new<F>(name: impl Into<String>, dispatcher: DispatcherHandle, body: F) -> Arc<Self>
    where
        F: Fn(&Arc<LightTask>) + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.into(),
            body: Box::new(body),
            ref_count: AtomicUsize::new(0),
            runs: AtomicU64::new(0),
            continuation: Mutex::new(None),
            dispatcher,
        })
    }

    /// The task's name.
    pub fn label(&self) -> &str {
        &self.name
    }

    /// Take one reference; the task cannot run until it is released.
    pub fn hold(self: &Arc<Self>) -> Hold {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
        Hold::light(Arc::clone(self))
    }

    /// Submit the task now, unless other holds are outstanding.
    pub fn submit(self: &Arc<Self>) {
        self.hold().release();
    }

    /// Set the hold released after the next run. Replacing an unreleased
    /// continuation releases the old one.
    pub fn set_continuation(&self, continuation: Hold) {
        let old = self
            .continuation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(continuation);
        if let Some(old) = old {
            log::warn!(
                "light task '{}' replaced continuation on '{}' before it ran",
                self.name,
                old.target_name()
            );
        }
    }

    /// Outstanding references.
    pub fn reference_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Completed runs since creation.
    pub fn run_count(&self) -> u64 {
        self.runs.load(Ordering::Acquire)
    }

    pub(crate) fn release_reference(self: Arc<Self>) {
        if self.ref_count.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let dispatcher = self.dispatcher.clone();
        if let Err(e) = dispatcher.submit(self) {
            log::error!("light task lost: {e}");
        }
    }
}

impl Task for LightTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(self: Arc<Self>) {
        (self.body)(&self);
        self.runs.fetch_add(1, Ordering::AcqRel);
        let continuation = self
            .continuation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(continuation);
    }
}

impl fmt::Debug for LightTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LightTask")
            .field("name", &self.name)
            .field("ref_count", &self.reference_count())
            .field("runs", &self.run_count())
            .finish()
    }
}
