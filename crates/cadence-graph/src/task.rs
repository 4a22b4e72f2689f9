//! Tasks registered in a [`TaskManager`](crate::TaskManager) and the
//! context they run with.

use std::fmt;
use std::sync::Arc;

use cadence_core::{GraphError, TaskId};
use cadence_dispatch::DispatcherHandle;

use crate::hold::Hold;
use crate::manager::GraphShared;

/// A unit of work in a per-step task graph.
///
/// The task manager runs it at most once per graph, on a dispatcher
/// worker, after every predecessor completed. Completion is signalled
/// to dependents when `run` returns. Like dispatcher tasks, graph tasks
/// must not panic.
pub trait GraphTask: Send + Sync + 'static {
    /// Human-readable name used in logs and diagnostics.
    fn name(&self) -> &str;

    /// Execute the task body.
    fn run(&self, ctx: &TaskContext<'_>);
}

/// Execution context of a running graph task.
pub struct TaskContext<'a> {
    pub(crate) graph: &'a Arc<GraphShared>,
    pub(crate) id: TaskId,
    pub(crate) epoch: u64,
}

impl TaskContext<'_> {
    /// ID of the running task.
    pub fn task_id(&self) -> TaskId {
        self.id
    }

    /// Take a hold on one of this task's dependents, keeping it from
    /// running until the hold is released.
    ///
    /// This is the only way to gate another task once the graph has been
    /// launched. It is restricted to dependents because the running
    /// task's own edge still gates them, so their count cannot already
    /// have reached zero.
    pub fn hold(&self, dependent: TaskId) -> Result<Hold, GraphError> {
        self.graph.hold_dependent(self.id, dependent, self.epoch)
    }

    /// Handle to the dispatcher the graph runs on.
    pub fn dispatcher(&self) -> &DispatcherHandle {
        self.graph.dispatcher()
    }
}

impl fmt::Debug for TaskContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("id", &self.id)
            .field("epoch", &self.epoch)
            .finish()
    }
}

/// A [`GraphTask`] built from a name and a closure.
pub struct FnGraphTask<F> {
    name: String,
    body: F,
}

impl<F> FnGraphTask<F>
where
    F: Fn(&TaskContext<'_>) + Send + Sync + 'static,
{
    /// Wrap `body` as a graph task named `name`.
    pub fn new(name: impl Into<String>, body: F) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            body,
        })
    }
}

impl<F> GraphTask for FnGraphTask<F>
where
    F: Fn(&TaskContext<'_>) + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: &TaskContext<'_>) {
        (self.body)(ctx)
    }
}

impl<F> fmt::Debug for FnGraphTask<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnGraphTask").field("name", &self.name).finish()
    }
}
