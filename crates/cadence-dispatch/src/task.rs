//! The unit of work accepted by the dispatcher.

use std::fmt;
use std::sync::Arc;

/// A schedulable unit of work.
///
/// The dispatcher calls [`run`](Task::run) exactly once per successful
/// submission, on one of its worker threads. Tasks must be infallible or
/// handle their own errors: a panic escaping `run` poisons the
/// dispatcher (see [`Dispatcher`](crate::Dispatcher)).
///
/// `run` consumes an `Arc` so that a task can re-submit or re-arm itself
/// without a separate self-reference.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use cadence_dispatch::Task;
///
/// struct Tally(AtomicUsize);
///
/// impl Task for Tally {
///     fn name(&self) -> &str { "tally" }
///     fn run(self: Arc<Self>) {
///         self.0.fetch_add(1, Ordering::Relaxed);
///     }
/// }
///
/// let t = Arc::new(Tally(AtomicUsize::new(0)));
/// t.clone().run();
/// assert_eq!(t.0.load(Ordering::Relaxed), 1);
/// ```
pub trait Task: Send + Sync + 'static {
    /// Human-readable name used in logs and diagnostics.
    fn name(&self) -> &str;

    /// Execute the task body.
    fn run(self: Arc<Self>);
}

/// Shared, type-erased task handle as stored in dispatcher queues.
pub type TaskRef = Arc<dyn Task>;

/// A [`Task`] built from a name and a closure.
pub struct FnTask<F> {
    name: String,
    body: F,
}

impl<F> FnTask<F>
where
    F: Fn() + Send + Sync + 'static,
{
    /// Wrap `body` as a task named `name`.
    pub fn new(name: impl Into<String>, body: F) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            body,
        })
    }
}

impl<F> Task for FnTask<F>
where
    F: Fn() + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(self: Arc<Self>) {
        (self.body)()
    }
}

impl<F> fmt::Debug for FnTask<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTask").field("name", &self.name).finish()
    }
}
