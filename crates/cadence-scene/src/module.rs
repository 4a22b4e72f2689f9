//! The scene module collaborator.
//!
//! A module is an independently written simulation subsystem (cloth,
//! particles, destruction, ...) that contributes tasks to each step. It
//! knows nothing about other modules; ordering between them is expressed
//! only through edges against the well-known named tasks in
//! [`names`](crate::step::names).

use cadence_core::{GraphError, StepId};
use cadence_graph::TaskManager;

/// Per-step parameters handed to modules.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepInfo {
    /// The step being built.
    pub step: StepId,
    /// Simulated time the step advances, in seconds.
    pub elapsed_time: f32,
    /// Time advanced by each physics substep.
    pub substep_size: f32,
    /// Number of physics substeps.
    pub substep_count: u32,
    /// The caller flagged this as the last step before presenting a
    /// frame.
    pub final_step: bool,
}

/// A simulation module attached to a [`Scene`](crate::Scene).
///
/// Hooks are called from the caller's thread, in this order each step:
///
/// 1. `simulate`, `submit_tasks`, `set_task_dependencies` inside
///    `Scene::simulate`, while the step graph is being built;
/// 2. `fetch_results_pre_render_lock`, `lock_render_resources`,
///    `fetch_results`, `unlock_render_resources`,
///    `fetch_results_post_render_unlock` inside `Scene::fetch_results`.
///    `fetch_results` runs with the scene's render lock held.
pub trait SceneModule: Send {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Called before any task of the step is submitted.
    fn simulate(&mut self, _step: &StepInfo) {}

    /// Register this module's tasks for the step.
    fn submit_tasks(&mut self, manager: &TaskManager, step: &StepInfo) -> Result<(), GraphError>;

    /// Add edges between this module's tasks and the named tasks of the
    /// step graph or of other modules. Called after every module has
    /// submitted its tasks.
    fn set_task_dependencies(
        &mut self,
        _manager: &TaskManager,
        _step: &StepInfo,
    ) -> Result<(), GraphError> {
        Ok(())
    }

    /// First fetch hook, before the render lock is taken.
    fn fetch_results_pre_render_lock(&mut self) {}

    /// The render lock was just taken.
    fn lock_render_resources(&mut self) {}

    /// Collect the step's results. Runs under the render lock.
    fn fetch_results(&mut self);

    /// About to release the render lock.
    fn unlock_render_resources(&mut self) {}

    /// Last fetch hook, after the render lock was released.
    fn fetch_results_post_render_unlock(&mut self) {}
}
