//! The per-step task table.
//!
//! # Rows and counts
//!
//! Every row starts with a reference count of one, the *build hold*.
//! Edges add one to the gated row. [`TaskManager::start_simulation`]
//! releases every build hold; a row whose count reaches zero is
//! dispatched, and when it completes each of its dependents is
//! decremented in turn. Rows referenced by name before any task is
//! registered for them are *placeholders*: they resolve immediately when
//! their count reaches zero, so a module can order itself against a
//! named task that another module never submits.
//!
//! # Epochs
//!
//! Each reset advances the graph epoch. Holds and in-flight node runs
//! carry the epoch they were created in; anything from an older epoch is
//! ignored, so a stale hold can never release a row of the next step.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use smallvec::SmallVec;

use cadence_core::{DispatchError, GraphError, TaskId};
use cadence_dispatch::{DispatcherHandle, Task};

use crate::hold::Hold;
use crate::task::{GraphTask, TaskContext};

/// Construction phase of a task graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphPhase {
    /// Tasks, edges and holds may be added.
    Building,
    /// Launched and frozen; rows run as their counts reach zero.
    Running,
}

// ── Rows ───────────────────────────────────────────────────────────

struct TaskRow {
    name: String,
    task: Option<Arc<dyn GraphTask>>,
    ref_count: AtomicI64,
    dependents: SmallVec<[TaskId; 4]>,
    dispatched: AtomicBool,
}

impl TaskRow {
    fn new(name: String, task: Option<Arc<dyn GraphTask>>) -> Self {
        Self {
            name,
            task,
            ref_count: AtomicI64::new(1),
            dependents: SmallVec::new(),
            dispatched: AtomicBool::new(false),
        }
    }
}

struct GraphState {
    phase: GraphPhase,
    rows: Vec<TaskRow>,
    names: IndexMap<String, TaskId>,
}

impl GraphState {
    fn row(&self, id: TaskId) -> Result<&TaskRow, GraphError> {
        self.rows
            .get(id.index())
            .ok_or(GraphError::UnknownTask { id })
    }

    fn ensure_building(&self, task: &str) -> Result<(), GraphError> {
        match self.phase {
            GraphPhase::Building => Ok(()),
            GraphPhase::Running => Err(GraphError::Frozen {
                task: task.to_string(),
            }),
        }
    }

    /// Kahn's algorithm over the dependent lists; returns a row on a
    /// cycle if there is one.
    fn find_cycle(&self) -> Option<TaskId> {
        let mut indegree = vec![0usize; self.rows.len()];
        for row in &self.rows {
            for dep in &row.dependents {
                indegree[dep.index()] += 1;
            }
        }
        let mut ready: Vec<usize> = (0..self.rows.len()).filter(|&i| indegree[i] == 0).collect();
        let mut visited = 0;
        while let Some(i) = ready.pop() {
            visited += 1;
            for dep in &self.rows[i].dependents {
                let d = dep.index();
                indegree[d] -= 1;
                if indegree[d] == 0 {
                    ready.push(d);
                }
            }
        }
        if visited == self.rows.len() {
            return None;
        }
        indegree
            .iter()
            .position(|&n| n > 0)
            .map(|i| TaskId(i as u32))
    }
}

// ── Shared graph ───────────────────────────────────────────────────

pub(crate) struct GraphShared {
    label: String,
    dispatcher: DispatcherHandle,
    state: RwLock<GraphState>,
    epoch: AtomicU64,
    pending: AtomicUsize,
    idle_lock: Mutex<()>,
    idle: Condvar,
}

impl GraphShared {
    fn read(&self) -> RwLockReadGuard<'_, GraphState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, GraphState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn dispatcher(&self) -> &DispatcherHandle {
        &self.dispatcher
    }

    pub(crate) fn row_name(&self, id: TaskId) -> String {
        self.read()
            .rows
            .get(id.index())
            .map_or_else(|| format!("<task {id}>"), |r| r.name.clone())
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::Acquire) == epoch
    }

    /// Release one reference on `id`, dispatching it at zero.
    pub(crate) fn release(self: &Arc<Self>, id: TaskId, epoch: u64) {
        let state = self.read();
        if !self.is_current(epoch) {
            log::warn!(
                "graph '{}': ignoring hold on task {id} from retired epoch {epoch}",
                self.label
            );
            return;
        }
        let Some(row) = state.rows.get(id.index()) else {
            log::warn!("graph '{}': hold on unknown task {id}", self.label);
            return;
        };
        let prev = row.ref_count.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 && state.phase == GraphPhase::Running {
            // Failures are logged; the releasing thread has no caller to tell.
            let _ = self.dispatch_ready(&state, vec![id], epoch);
        } else if prev <= 0 {
            log::warn!(
                "graph '{}': reference count underflow on '{}'",
                self.label,
                row.name
            );
        }
    }

    pub(crate) fn hold_dependent(
        self: &Arc<Self>,
        running: TaskId,
        dependent: TaskId,
        epoch: u64,
    ) -> Result<Hold, GraphError> {
        let state = self.read();
        let row = state.row(running)?;
        let target = state.row(dependent)?;
        if !self.is_current(epoch) || !row.dependents.contains(&dependent) {
            return Err(GraphError::NotADependent {
                task: row.name.clone(),
                dependent: target.name.clone(),
            });
        }
        target.ref_count.fetch_add(1, Ordering::AcqRel);
        Ok(Hold::node(Arc::clone(self), dependent, epoch))
    }

    /// Called by a node run once its task body returned.
    fn complete(self: &Arc<Self>, id: TaskId, epoch: u64) {
        let state = self.read();
        if !self.is_current(epoch) {
            log::warn!(
                "graph '{}': task {id} completed after its graph was retired",
                self.label
            );
            return;
        }
        let mut ready = Vec::new();
        if let Some(row) = state.rows.get(id.index()) {
            Self::release_dependents(&state, row, &mut ready);
        }
        let _ = self.dispatch_ready(&state, ready, epoch);
        self.retire_one();
    }

    fn release_dependents(state: &GraphState, row: &TaskRow, ready: &mut Vec<TaskId>) {
        for dep in &row.dependents {
            if let Some(d) = state.rows.get(dep.index()) {
                if d.ref_count.fetch_sub(1, Ordering::AcqRel) == 1 {
                    ready.push(*dep);
                }
            }
        }
    }

    /// Dispatch rows whose counts reached zero. Placeholders resolve in
    /// place, which may make further rows ready. Returns the first submit
    /// failure; the remaining rows are still attempted.
    fn dispatch_ready(
        self: &Arc<Self>,
        state: &GraphState,
        mut ready: Vec<TaskId>,
        epoch: u64,
    ) -> Result<(), DispatchError> {
        let mut first_err = None;
        while let Some(id) = ready.pop() {
            let Some(row) = state.rows.get(id.index()) else {
                continue;
            };
            if row.dispatched.swap(true, Ordering::AcqRel) {
                log::warn!(
                    "graph '{}': task '{}' dispatched twice; ignoring",
                    self.label,
                    row.name
                );
                continue;
            }
            match &row.task {
                Some(task) => {
                    log::trace!("graph '{}': dispatching '{}'", self.label, row.name);
                    let run = Arc::new(NodeRun {
                        graph: Arc::clone(self),
                        id,
                        epoch,
                        task: Arc::clone(task),
                    });
                    if let Err(e) = self.dispatcher.submit(run) {
                        log::error!("graph '{}': {e}; step cannot complete", self.label);
                        first_err.get_or_insert(e);
                    }
                }
                None => {
                    log::trace!("graph '{}': resolving placeholder '{}'", self.label, row.name);
                    Self::release_dependents(state, row, &mut ready);
                    self.retire_one();
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn retire_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.idle_lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.idle.notify_all();
        }
    }
}

/// Dispatcher-level wrapper that runs one row and reports completion.
struct NodeRun {
    graph: Arc<GraphShared>,
    id: TaskId,
    epoch: u64,
    task: Arc<dyn GraphTask>,
}

impl Task for NodeRun {
    fn name(&self) -> &str {
        self.task.name()
    }

    fn run(self: Arc<Self>) {
        let ctx = TaskContext {
            graph: &self.graph,
            id: self.id,
            epoch: self.epoch,
        };
        self.task.run(&ctx);
        self.graph.complete(self.id, self.epoch);
    }
}

// ── TaskManager ────────────────────────────────────────────────────

/// Per-scene task table.
///
/// All builder methods take `&self` and may be called from any thread
/// while the graph is [`Building`](GraphPhase::Building); once
/// [`start_simulation`](Self::start_simulation) has run they return
/// [`GraphError::Frozen`] until [`reset_dependencies`](Self::reset_dependencies).
pub struct TaskManager {
    shared: Arc<GraphShared>,
}

impl TaskManager {
    /// Create an empty manager in the `Building` phase. `label` names the
    /// graph in log output.
    pub fn new(label: impl Into<String>, dispatcher: DispatcherHandle) -> Self {
        Self {
            shared: Arc::new(GraphShared {
                label: label.into(),
                dispatcher,
                state: RwLock::new(GraphState {
                    phase: GraphPhase::Building,
                    rows: Vec::new(),
                    names: IndexMap::new(),
                }),
                epoch: AtomicU64::new(0),
                pending: AtomicUsize::new(0),
                idle_lock: Mutex::new(()),
                idle: Condvar::new(),
            }),
        }
    }

    /// Handle to the dispatcher rows are submitted to.
    pub fn dispatcher(&self) -> &DispatcherHandle {
        &self.shared.dispatcher
    }

    /// Current phase.
    pub fn phase(&self) -> GraphPhase {
        self.shared.read().phase
    }

    /// Current epoch; advanced by every reset.
    pub fn epoch(&self) -> u64 {
        self.shared.epoch.load(Ordering::Acquire)
    }

    /// Rows not yet completed (or resolved, for placeholders).
    pub fn pending_tasks(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Number of rows in the table.
    pub fn len(&self) -> usize {
        self.shared.read().rows.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push_row(&self, state: &mut GraphState, row: TaskRow) -> TaskId {
        let id = TaskId(state.rows.len() as u32);
        state.rows.push(row);
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        id
    }

    /// Register `task` under `name`, filling in a placeholder if the name
    /// was referenced earlier.
    pub fn submit_named_task(
        &self,
        name: &str,
        task: Arc<dyn GraphTask>,
    ) -> Result<TaskId, GraphError> {
        let mut state = self.shared.write();
        state.ensure_building(name)?;
        if let Some(&id) = state.names.get(name) {
            let row = &mut state.rows[id.index()];
            if row.task.is_some() {
                return Err(GraphError::DuplicateName {
                    name: name.to_string(),
                });
            }
            row.task = Some(task);
            return Ok(id);
        }
        let id = self.push_row(&mut state, TaskRow::new(name.to_string(), Some(task)));
        state.names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Register an anonymous task.
    pub fn submit_unnamed_task(&self, task: Arc<dyn GraphTask>) -> Result<TaskId, GraphError> {
        let mut state = self.shared.write();
        state.ensure_building(task.name())?;
        let name = task.name().to_string();
        Ok(self.push_row(&mut state, TaskRow::new(name, Some(task))))
    }

    /// ID for `name`, creating a placeholder row if nothing was
    /// registered under it yet.
    pub fn named_task(&self, name: &str) -> Result<TaskId, GraphError> {
        if let Some(id) = self.lookup(name) {
            return Ok(id);
        }
        let mut state = self.shared.write();
        if let Some(&id) = state.names.get(name) {
            return Ok(id);
        }
        state.ensure_building(name)?;
        let id = self.push_row(&mut state, TaskRow::new(name.to_string(), None));
        state.names.insert(name.to_string(), id);
        Ok(id)
    }

    /// ID for `name` if it is registered; never creates a placeholder.
    pub fn lookup(&self, name: &str) -> Option<TaskId> {
        self.shared.read().names.get(name).copied()
    }

    /// Name of row `id`.
    pub fn task_name(&self, id: TaskId) -> Option<String> {
        self.shared.read().rows.get(id.index()).map(|r| r.name.clone())
    }

    /// Current reference count of row `id` (diagnostics only).
    pub fn reference_count(&self, id: TaskId) -> Option<i64> {
        self.shared
            .read()
            .rows
            .get(id.index())
            .map(|r| r.ref_count.load(Ordering::Acquire))
    }

    fn add_edge(&self, from: TaskId, to: TaskId) -> Result<(), GraphError> {
        let mut state = self.shared.write();
        let to_name = state.row(to)?.name.clone();
        state.row(from)?;
        state.ensure_building(&to_name)?;
        if from == to {
            return Err(GraphError::SelfDependency { task: to_name });
        }
        let rows = &mut state.rows;
        rows[from.index()].dependents.push(to);
        rows[to.index()].ref_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// `task` runs only after `after` has completed.
    pub fn start_after(&self, task: TaskId, after: TaskId) -> Result<(), GraphError> {
        self.add_edge(after, task)
    }

    /// `task` must complete before `before` runs.
    pub fn finish_before(&self, task: TaskId, before: TaskId) -> Result<(), GraphError> {
        self.add_edge(task, before)
    }

    /// Take an extra build-time hold on `task`.
    pub fn add_hold(&self, task: TaskId) -> Result<Hold, GraphError> {
        let state = self.shared.write();
        let row = state.row(task)?;
        state.ensure_building(&row.name)?;
        row.ref_count.fetch_add(1, Ordering::AcqRel);
        Ok(Hold::node(Arc::clone(&self.shared), task, self.epoch()))
    }

    /// Freeze the graph and release every build hold.
    ///
    /// Rows whose counts reach zero are dispatched before this returns.
    /// Fails with [`GraphError::Cycle`] (leaving the graph in `Building`)
    /// if the edges could never all be satisfied, or with
    /// [`GraphError::Dispatch`] if the dispatcher rejected a ready row. In
    /// the latter case the graph is launched but cannot complete.
    pub fn start_simulation(&self) -> Result<(), GraphError> {
        {
            let mut state = self.shared.write();
            if state.phase == GraphPhase::Running {
                return Err(GraphError::NotBuilding);
            }
            if let Some(id) = state.find_cycle() {
                return Err(GraphError::Cycle {
                    task: state.rows[id.index()].name.clone(),
                });
            }
            state.phase = GraphPhase::Running;
        }

        let epoch = self.epoch();
        let state = self.shared.read();
        log::debug!(
            "graph '{}': launching {} task(s) at epoch {epoch}",
            self.shared.label,
            state.rows.len()
        );
        let ready: Vec<TaskId> = state
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.ref_count.fetch_sub(1, Ordering::AcqRel) == 1)
            .map(|(i, _)| TaskId(i as u32))
            .collect();
        // Dispatch order is the reverse of row order; reverse so that
        // earlier rows go out first.
        let ready: Vec<TaskId> = ready.into_iter().rev().collect();
        self.shared.dispatch_ready(&state, ready, epoch)?;
        Ok(())
    }

    /// Clear the table for the next step.
    ///
    /// A launched graph must be fully retired first
    /// ([`GraphError::StepInFlight`] otherwise). A graph still being
    /// built is discarded, as with [`abandon`](Self::abandon).
    pub fn reset_dependencies(&self) -> Result<(), GraphError> {
        let discarded = {
            let mut state = self.shared.write();
            if state.phase == GraphPhase::Running {
                let pending = self.pending_tasks();
                if pending > 0 {
                    return Err(GraphError::StepInFlight { pending });
                }
            }
            self.clear(&mut state)
        };
        // Dropped outside the lock: tasks may own holds on this graph.
        drop(discarded);
        Ok(())
    }

    /// Discard a graph that is still being built, e.g. after a module
    /// failed to register its tasks.
    pub fn abandon(&self) -> Result<(), GraphError> {
        let discarded = {
            let mut state = self.shared.write();
            if state.phase == GraphPhase::Running {
                return Err(GraphError::NotBuilding);
            }
            if !state.rows.is_empty() {
                log::warn!(
                    "graph '{}': abandoning {} unlaunched task(s)",
                    self.shared.label,
                    state.rows.len()
                );
            }
            self.clear(&mut state)
        };
        drop(discarded);
        Ok(())
    }

    fn clear(&self, state: &mut GraphState) -> Vec<TaskRow> {
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);
        self.shared.pending.store(0, Ordering::Release);
        state.phase = GraphPhase::Building;
        state.names.clear();
        std::mem::take(&mut state.rows)
    }

    /// Block until every row has completed. `None` waits forever.
    /// Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = self
            .shared
            .idle_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while self.pending_tasks() > 0 {
            match deadline {
                None => {
                    guard = self
                        .shared
                        .idle
                        .wait(guard)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    guard = self
                        .shared
                        .idle
                        .wait_timeout(guard, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
        true
    }
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("label", &self.shared.label)
            .field("phase", &self.phase())
            .field("rows", &self.len())
            .field("pending", &self.pending_tasks())
            .finish()
    }
}

// Compile-time assertion: the manager is shared between the scene and
// worker threads.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<TaskManager>();
    assert::<Hold>();
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::FnGraphTask;
    use cadence_dispatch::{Dispatcher, DispatcherConfig};

    fn setup() -> (Dispatcher, TaskManager) {
        let d = Dispatcher::new(DispatcherConfig::with_workers(2)).unwrap();
        let m = TaskManager::new("test", d.handle());
        (d, m)
    }

    fn log_task(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn GraphTask> {
        let log = Arc::clone(log);
        let label = name.to_string();
        FnGraphTask::new(name, move |_| log.lock().unwrap().push(label.clone()))
    }

    fn noop(name: &str) -> Arc<dyn GraphTask> {
        FnGraphTask::new(name, |_| {})
    }

    #[test]
    fn rows_start_with_build_hold() {
        let (_d, m) = setup();
        let a = m.submit_unnamed_task(noop("a")).unwrap();
        assert_eq!(m.reference_count(a), Some(1));
        assert_eq!(m.pending_tasks(), 1);
        assert_eq!(m.phase(), GraphPhase::Building);
    }

    #[test]
    fn edges_order_execution() {
        let (_d, m) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = m.submit_named_task("a", log_task("a", &log)).unwrap();
        let b = m.submit_named_task("b", log_task("b", &log)).unwrap();
        let c = m.submit_named_task("c", log_task("c", &log)).unwrap();
        m.start_after(c, b).unwrap();
        m.finish_before(a, b).unwrap();
        assert_eq!(m.reference_count(b), Some(2));

        m.start_simulation().unwrap();
        assert!(m.wait_idle(Some(Duration::from_secs(10))));
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn launch_reports_rejected_submit() {
        let (d, m) = setup();
        m.submit_named_task("a", noop("a")).unwrap();
        d.shutdown();
        let err = m.start_simulation().unwrap_err();
        assert!(
            matches!(err, GraphError::Dispatch(DispatchError::ShutDown { .. })),
            "{err}"
        );
        assert_eq!(m.phase(), GraphPhase::Running);
        assert!(!m.wait_idle(Some(Duration::from_millis(10))));
    }

    #[test]
    fn placeholder_resolves_when_never_submitted() {
        let (_d, m) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        let ghost = m.named_task("ghost").unwrap();
        let after = m.submit_unnamed_task(log_task("after", &log)).unwrap();
        m.start_after(after, ghost).unwrap();
        m.start_simulation().unwrap();
        assert!(m.wait_idle(Some(Duration::from_secs(10))));
        assert_eq!(*log.lock().unwrap(), vec!["after"]);
    }

    #[test]
    fn placeholder_is_filled_by_later_submission() {
        let (_d, m) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        let early = m.named_task("late").unwrap();
        let filled = m.submit_named_task("late", log_task("late", &log)).unwrap();
        assert_eq!(early, filled);
        m.start_simulation().unwrap();
        assert!(m.wait_idle(Some(Duration::from_secs(10))));
        assert_eq!(*log.lock().unwrap(), vec!["late"]);
    }

    #[test]
    fn duplicate_name_rejected() {
        let (_d, m) = setup();
        m.submit_named_task("x", noop("x")).unwrap();
        assert_eq!(
            m.submit_named_task("x", noop("x")),
            Err(GraphError::DuplicateName { name: "x".into() })
        );
    }

    #[test]
    fn self_and_unknown_edges_rejected() {
        let (_d, m) = setup();
        let a = m.submit_unnamed_task(noop("a")).unwrap();
        assert_eq!(
            m.start_after(a, a),
            Err(GraphError::SelfDependency { task: "a".into() })
        );
        assert_eq!(
            m.start_after(a, TaskId(9)),
            Err(GraphError::UnknownTask { id: TaskId(9) })
        );
    }

    #[test]
    fn frozen_graph_rejects_changes() {
        let (_d, m) = setup();
        let gate = m.submit_unnamed_task(noop("gate")).unwrap();
        let hold = m.add_hold(gate).unwrap();
        let other = m.submit_unnamed_task(noop("other")).unwrap();
        m.start_simulation().unwrap();

        assert!(matches!(m.start_after(other, gate), Err(GraphError::Frozen { .. })));
        assert!(matches!(m.submit_unnamed_task(noop("late")), Err(GraphError::Frozen { .. })));
        assert!(matches!(m.add_hold(gate), Err(GraphError::Frozen { .. })));
        assert_eq!(m.start_simulation(), Err(GraphError::NotBuilding));
        let deadline = Instant::now() + Duration::from_secs(10);
        while m.pending_tasks() > 1 {
            assert!(Instant::now() < deadline, "'other' never ran");
            std::thread::yield_now();
        }
        assert_eq!(
            m.reset_dependencies(),
            Err(GraphError::StepInFlight { pending: 1 })
        );

        hold.release();
        assert!(m.wait_idle(Some(Duration::from_secs(10))));
        m.reset_dependencies().unwrap();
        assert!(m.is_empty());
        assert_eq!(m.phase(), GraphPhase::Building);
    }

    #[test]
    fn cycle_is_rejected_and_graph_stays_buildable() {
        let (_d, m) = setup();
        let a = m.submit_unnamed_task(noop("a")).unwrap();
        let b = m.submit_unnamed_task(noop("b")).unwrap();
        m.start_after(a, b).unwrap();
        m.start_after(b, a).unwrap();
        assert!(matches!(m.start_simulation(), Err(GraphError::Cycle { .. })));
        assert_eq!(m.phase(), GraphPhase::Building);
        m.abandon().unwrap();
        assert_eq!(m.pending_tasks(), 0);
    }

    #[test]
    fn stale_hold_is_ignored_after_reset() {
        let (_d, m) = setup();
        let a = m.submit_unnamed_task(noop("a")).unwrap();
        let stale = m.add_hold(a).unwrap();
        m.abandon().unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        let b = m.submit_unnamed_task(log_task("b", &log)).unwrap();
        assert_eq!(a, b, "row ids are reused across epochs");
        let keep = m.add_hold(b).unwrap();
        m.start_simulation().unwrap();

        stale.release();
        assert_eq!(m.reference_count(b), Some(1), "stale hold did not count");
        keep.release();
        assert!(m.wait_idle(Some(Duration::from_secs(10))));
        assert_eq!(*log.lock().unwrap(), vec!["b"]);
    }

    #[test]
    fn running_task_may_only_hold_its_dependents() {
        let (_d, m) = setup();
        let (tx, rx) = crossbeam_channel::unbounded();
        let dependent_id = Arc::new(Mutex::new(None::<TaskId>));
        let slot = Arc::clone(&dependent_id);
        let producer = FnGraphTask::new("producer", move |ctx: &TaskContext<'_>| {
            let dep = slot.lock().unwrap().unwrap();
            let bogus = ctx.hold(ctx.task_id());
            tx.send(bogus.is_err()).unwrap();
            // Released when this closure's hold drops, after the send.
            let hold = ctx.hold(dep).unwrap();
            tx.send(true).unwrap();
            drop(hold);
        });
        let p = m.submit_unnamed_task(producer).unwrap();
        let c = m.submit_unnamed_task(noop("consumer")).unwrap();
        m.start_after(c, p).unwrap();
        *dependent_id.lock().unwrap() = Some(c);

        m.start_simulation().unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), "self hold rejected");
        assert!(rx.recv_timeout(Duration::from_secs(10)).unwrap());
        assert!(m.wait_idle(Some(Duration::from_secs(10))));
    }

    #[test]
    fn empty_graph_is_immediately_idle() {
        let (_d, m) = setup();
        m.start_simulation().unwrap();
        assert!(m.wait_idle(Some(Duration::ZERO)));
        m.reset_dependencies().unwrap();
    }
}
