//! Mock scene collaborators.
//!
//! - [`CountingPhysics`]: a physics engine that counts calls and completes
//!   steps immediately, after a delay, or only when the test says so.
//! - [`RecordingModule`]: a scene module that logs every hook call and
//!   the run of its one task into a shared event list.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cadence_core::{GraphError, TaskId};
use cadence_graph::{FnGraphTask, Hold, TaskManager};
use cadence_scene::{PhysicsEngine, SceneModule, StepInfo};

/// When [`CountingPhysics`] releases the completion of a simulate call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionMode {
    /// Before `simulate` returns.
    Immediate,
    /// From a helper thread after the given delay.
    Delayed(Duration),
    /// When the test calls [`CountingPhysics::complete_pending`].
    Deferred,
}

/// Physics engine mock that counts calls.
pub struct CountingPhysics {
    mode: CompletionMode,
    simulated: AtomicU32,
    fetched: AtomicU32,
    observed: Mutex<Vec<u32>>,
    pending: Mutex<Vec<Hold>>,
}

impl CountingPhysics {
    pub fn new(mode: CompletionMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            simulated: AtomicU32::new(0),
            fetched: AtomicU32::new(0),
            observed: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn immediate() -> Arc<Self> {
        Self::new(CompletionMode::Immediate)
    }

    /// Total `simulate` calls.
    pub fn simulate_calls(&self) -> u32 {
        self.simulated.load(Ordering::SeqCst)
    }

    /// Total `fetch_results` calls, intermediate substeps included.
    pub fn fetch_calls(&self) -> u32 {
        self.fetched.load(Ordering::SeqCst)
    }

    /// The `simulate` count seen by each `check_results` call.
    pub fn simulate_counts_at_check(&self) -> Vec<u32> {
        self.observed.lock().unwrap().clone()
    }

    /// Completions held back in [`CompletionMode::Deferred`].
    pub fn pending_completions(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Release every held-back completion. Returns how many there were.
    pub fn complete_pending(&self) -> usize {
        let pending: Vec<Hold> = std::mem::take(&mut *self.pending.lock().unwrap());
        let n = pending.len();
        for hold in pending {
            hold.release();
        }
        n
    }
}

impl PhysicsEngine for CountingPhysics {
    fn simulate(&self, _elapsed_time: f32, completion: Hold) {
        self.simulated.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            CompletionMode::Immediate => completion.release(),
            CompletionMode::Delayed(delay) => {
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    completion.release();
                });
            }
            CompletionMode::Deferred => self.pending.lock().unwrap().push(completion),
        }
    }

    fn check_results(&self, _block: bool) -> bool {
        let seen = self.simulated.load(Ordering::SeqCst);
        self.observed.lock().unwrap().push(seen);
        true
    }

    fn fetch_results(&self, _block: bool) -> bool {
        self.fetched.fetch_add(1, Ordering::SeqCst);
        true
    }
}

/// Shared, ordered list of `"<module>:<event>"` strings.
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Scene module that records its hooks and runs one task per step.
///
/// The task is named `"<name>.work"`. Edges against other named tasks
/// (including the step graph's) are added in `set_task_dependencies`
/// and may refer to names not registered yet.
pub struct RecordingModule {
    name: String,
    events: EventLog,
    start_after: Vec<String>,
    finish_before: Vec<String>,
    task: Option<TaskId>,
}

impl RecordingModule {
    pub fn new(name: impl Into<String>, events: EventLog) -> Self {
        Self {
            name: name.into(),
            events,
            start_after: Vec::new(),
            finish_before: Vec::new(),
            task: None,
        }
    }

    /// Run this module's task after the task named `name`.
    pub fn start_after(mut self, name: impl Into<String>) -> Self {
        self.start_after.push(name.into());
        self
    }

    /// Run this module's task before the task named `name`.
    pub fn finish_before(mut self, name: impl Into<String>) -> Self {
        self.finish_before.push(name.into());
        self
    }

    /// Name of the task this module submits.
    pub fn task_name(&self) -> String {
        format!("{}.work", self.name)
    }

    fn record(&self, event: &str) {
        self.events
            .lock()
            .unwrap()
            .push(format!("{}:{event}", self.name));
    }
}

impl SceneModule for RecordingModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn simulate(&mut self, _step: &StepInfo) {
        self.record("simulate");
    }

    fn submit_tasks(&mut self, manager: &TaskManager, _step: &StepInfo) -> Result<(), GraphError> {
        self.record("submit_tasks");
        let events = Arc::clone(&self.events);
        let entry = format!("{}:task", self.name);
        let id = manager.submit_named_task(
            &self.task_name(),
            FnGraphTask::new(self.task_name(), move |_| {
                events.lock().unwrap().push(entry.clone());
            }),
        )?;
        self.task = Some(id);
        Ok(())
    }

    fn set_task_dependencies(
        &mut self,
        manager: &TaskManager,
        _step: &StepInfo,
    ) -> Result<(), GraphError> {
        self.record("set_task_dependencies");
        let Some(task) = self.task else {
            return Ok(());
        };
        for name in &self.start_after {
            manager.start_after(task, manager.named_task(name)?)?;
        }
        for name in &self.finish_before {
            manager.finish_before(task, manager.named_task(name)?)?;
        }
        Ok(())
    }

    fn fetch_results_pre_render_lock(&mut self) {
        self.record("fetch_results_pre_render_lock");
    }

    fn lock_render_resources(&mut self) {
        self.record("lock_render_resources");
    }

    fn fetch_results(&mut self) {
        self.record("fetch_results");
    }

    fn unlock_render_resources(&mut self) {
        self.record("unlock_render_resources");
    }

    fn fetch_results_post_render_unlock(&mut self) {
        self.record("fetch_results_post_render_unlock");
    }
}
