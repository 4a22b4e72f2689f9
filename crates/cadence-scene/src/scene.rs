//! The scene: step lifecycle, frame gates and actor registry.
//!
//! # Step lifecycle
//!
//! ```text
//!   Idle ──simulate──► Building ──launch──► Running ──fetch_results──► Retiring ──► Idle
//!    ▲                    │ build failed                                           │
//!    └────────────────────┴────────────────── frame-complete set ◄─────────────────┘
//! ```
//!
//! `simulate` claims the scene (waiting on frame-complete if the previous
//! step has not been fetched), builds the step graph with every module's
//! tasks and launches it. `fetch_results` waits on results-ready, runs
//! the modules' result hooks under the render lock and sets
//! frame-complete.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use cadence_core::{ActorId, ConfigError, SceneError, StepId};
use cadence_graph::{Hold, TaskManager};

use crate::actors::{ActorList, Renderable};
use crate::config::{SceneConfig, MAX_SUBSTEPS};
use crate::context::SchedulerContext;
use crate::gate::Gate;
use crate::iterator::RenderableIterator;
use crate::metrics::StepStats;
use crate::module::{SceneModule, StepInfo};
use crate::physics::PhysicsEngine;
use crate::step::{build_step_graph, StepSignals};

/// Where the scene is in its step lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepPhase {
    /// No step outstanding; `simulate` may start one.
    Idle,
    /// `simulate` is building the step graph.
    Building,
    /// The step graph is launched.
    Running,
    /// `fetch_results` is collecting results.
    Retiring,
}

struct StepState {
    phase: StepPhase,
    step: StepId,
    substep_count: u32,
    current: Option<StepInfo>,
    last_stats: Option<StepStats>,
    total_elapsed_ms: u64,
    elapsed_remainder_ms: f64,
}

/// A simulated scene driven one step at a time.
///
/// All methods take `&self`; a scene is typically shared between a
/// simulation thread calling [`simulate`](Self::simulate) /
/// [`fetch_results`](Self::fetch_results) and a render thread walking
/// renderables.
pub struct Scene {
    config: SceneConfig,
    context: SchedulerContext,
    physics: Arc<dyn PhysicsEngine>,
    manager: TaskManager,
    signals: Arc<StepSignals>,
    frame_complete: Gate,
    state: Mutex<StepState>,
    modules: Mutex<Vec<Box<dyn SceneModule>>>,
    actors: Arc<RwLock<ActorList>>,
}

impl Scene {
    /// Create an idle scene scheduling onto `context`'s dispatcher.
    pub fn new(
        context: &SchedulerContext,
        physics: Arc<dyn PhysicsEngine>,
        config: SceneConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let manager = TaskManager::new(config.name.clone(), context.handle());
        log::debug!(
            "scene '{}': created with {} substep(s)",
            config.name,
            config.substep_count
        );
        Ok(Self {
            state: Mutex::new(StepState {
                phase: StepPhase::Idle,
                step: StepId::default(),
                substep_count: config.substep_count,
                current: None,
                last_stats: None,
                total_elapsed_ms: 0,
                elapsed_remainder_ms: 0.0,
            }),
            config,
            context: context.clone(),
            physics,
            manager,
            signals: Arc::new(StepSignals::new()),
            frame_complete: Gate::new(true),
            modules: Mutex::new(Vec::new()),
            actors: Arc::new(RwLock::new(ActorList::default())),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, StepState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_modules(&self) -> MutexGuard<'_, Vec<Box<dyn SceneModule>>> {
        self.modules.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_actors(&self) -> RwLockReadGuard<'_, ActorList> {
        self.actors.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_actors(&self) -> RwLockWriteGuard<'_, ActorList> {
        self.actors.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_dispatcher(&self) -> Result<(), SceneError> {
        let dispatcher = self.context.dispatcher();
        if dispatcher.is_poisoned() {
            Err(SceneError::DispatcherPoisoned)
        } else if dispatcher.is_shut_down() {
            Err(SceneError::DispatcherShutDown)
        } else {
            Ok(())
        }
    }

    // ── Stepping ───────────────────────────────────────────────────

    /// Start the next step, advancing the scene by `elapsed_time` seconds.
    ///
    /// If the previous step has not been retired by
    /// [`fetch_results`](Self::fetch_results), blocks until it is.
    /// `completion`, if given, is released once the step graph has run to
    /// completion, or immediately if the graph fails to build.
    pub fn simulate(
        &self,
        elapsed_time: f32,
        final_step: bool,
        completion: Option<Hold>,
    ) -> Result<StepId, SceneError> {
        self.start_step(elapsed_time, final_step, completion, true)
    }

    /// Like [`simulate`](Self::simulate), but fails with
    /// [`SceneError::StepInProgress`] instead of blocking.
    pub fn try_simulate(
        &self,
        elapsed_time: f32,
        final_step: bool,
        completion: Option<Hold>,
    ) -> Result<StepId, SceneError> {
        self.start_step(elapsed_time, final_step, completion, false)
    }

    fn start_step(
        &self,
        elapsed_time: f32,
        final_step: bool,
        completion: Option<Hold>,
        block: bool,
    ) -> Result<StepId, SceneError> {
        let info = self.claim_step(elapsed_time, final_step, block)?;

        // The previous graph's terminal row may still be completing.
        while !self.manager.wait_idle(Some(self.config.poll_interval)) {
            if let Err(e) = self.check_dispatcher() {
                self.release_claim();
                return Err(e);
            }
        }

        match self.build_and_launch(&info, completion) {
            Ok(()) => {
                log::debug!(
                    "scene '{}': step {} launched ({} substep(s), dt {})",
                    self.config.name,
                    info.step,
                    info.substep_count,
                    info.elapsed_time
                );
                Ok(info.step)
            }
            Err(e) => {
                log::warn!(
                    "scene '{}': step {} failed to build: {e}",
                    self.config.name,
                    info.step
                );
                if let Err(abandon) = self.manager.abandon() {
                    log::error!("scene '{}': {abandon}", self.config.name);
                }
                self.release_claim();
                Err(e)
            }
        }
    }

    /// Move from `Idle` to `Building`, waiting for frame-complete if
    /// `block` is set.
    fn claim_step(
        &self,
        elapsed_time: f32,
        final_step: bool,
        block: bool,
    ) -> Result<StepInfo, SceneError> {
        let mut warned = false;
        loop {
            {
                let mut state = self.lock_state();
                if state.phase == StepPhase::Idle {
                    state.phase = StepPhase::Building;
                    state.step = state.step.next();
                    self.frame_complete.reset();
                    self.signals.begin_step();
                    let substep_count = state.substep_count;
                    let info = StepInfo {
                        step: state.step,
                        elapsed_time,
                        substep_size: elapsed_time / substep_count as f32,
                        substep_count,
                        final_step,
                    };
                    state.current = Some(info);
                    return Ok(info);
                }
            }
            if !block {
                return Err(SceneError::StepInProgress);
            }
            if !warned {
                log::warn!(
                    "scene '{}': simulate called before the previous step was fetched; waiting",
                    self.config.name
                );
                warned = true;
            }
            if !self.frame_complete.wait_timeout(self.config.poll_interval) {
                self.check_dispatcher()?;
            }
        }
    }

    /// Return a claimed but unlaunched step to `Idle`.
    fn release_claim(&self) {
        let mut state = self.lock_state();
        state.phase = StepPhase::Idle;
        state.current = None;
        self.frame_complete.set();
    }

    fn build_and_launch(&self, info: &StepInfo, completion: Option<Hold>) -> Result<(), SceneError> {
        self.manager.reset_dependencies()?;

        let mut modules = self.lock_modules();
        for module in modules.iter_mut() {
            module.simulate(info);
        }
        let graph = build_step_graph(
            &self.manager,
            &self.physics,
            &self.signals,
            info.elapsed_time,
            info.substep_count,
            completion,
        )?;
        for module in modules.iter_mut() {
            module.submit_tasks(&self.manager, info)?;
        }
        for module in modules.iter_mut() {
            module.set_task_dependencies(&self.manager, info)?;
        }
        drop(modules);

        graph.launch(&self.manager)?;
        self.lock_state().phase = StepPhase::Running;
        Ok(())
    }

    /// Retire the running step.
    ///
    /// Returns `Ok(false)` if no step is running, or, with `block` unset,
    /// if its results are not ready yet. Otherwise runs every module's
    /// result hooks, with the render lock held around physics and module
    /// result collection, sets frame-complete and returns `Ok(true)`.
    pub fn fetch_results(&self, block: bool) -> Result<bool, SceneError> {
        if self.lock_state().phase != StepPhase::Running {
            return Ok(false);
        }
        let called_at = Instant::now();
        let was_ready = self.signals.results_ready().is_set();
        if !self.wait_results(block)? {
            return Ok(false);
        }

        let info = {
            let mut state = self.lock_state();
            if state.phase != StepPhase::Running {
                // Another thread fetched first.
                return Ok(false);
            }
            state.phase = StepPhase::Retiring;
            state.current.take()
        };
        let Some(info) = info else {
            log::error!("scene '{}': running step has no parameters", self.config.name);
            self.release_claim();
            return Ok(false);
        };

        let user_delayed_fetch_us = match (was_ready, self.signals.ready_at()) {
            (true, Some(ready_at)) => called_at.saturating_duration_since(ready_at).as_micros() as u64,
            _ => 0,
        };

        let fetch_start = Instant::now();
        let physics_fetch_us;
        let actor_count;
        {
            let mut modules = self.lock_modules();
            for module in modules.iter_mut() {
                module.fetch_results_pre_render_lock();
            }
            {
                let actors = self.write_actors();
                for module in modules.iter_mut() {
                    module.lock_render_resources();
                }
                let physics_start = Instant::now();
                self.physics.fetch_results(true);
                physics_fetch_us = physics_start.elapsed().as_micros() as u64;
                for module in modules.iter_mut() {
                    module.fetch_results();
                }
                for module in modules.iter_mut() {
                    module.unlock_render_resources();
                }
                actor_count = actors.len();
            }
            for module in modules.iter_mut() {
                module.fetch_results_post_render_unlock();
            }
        }
        let fetch_us = fetch_start.elapsed().as_micros() as u64;

        let mut state = self.lock_state();
        state.elapsed_remainder_ms += f64::from(info.elapsed_time) * 1000.0;
        let whole_ms = state.elapsed_remainder_ms.floor();
        state.total_elapsed_ms += whole_ms as u64;
        state.elapsed_remainder_ms -= whole_ms;
        let stats = StepStats {
            step: info.step,
            substep_count: info.substep_count,
            elapsed_time: info.elapsed_time,
            user_delayed_fetch_us,
            check_results_us: self.signals.check_results_us(),
            physics_fetch_us,
            fetch_us,
            actor_count,
            total_elapsed_ms: state.total_elapsed_ms,
        };
        log::debug!(
            "scene '{}': step {} fetched in {}us",
            self.config.name,
            info.step,
            fetch_us
        );
        state.last_stats = Some(stats);
        state.phase = StepPhase::Idle;
        self.frame_complete.set();
        Ok(true)
    }

    fn wait_results(&self, block: bool) -> Result<bool, SceneError> {
        let ready = self.signals.results_ready();
        if !block {
            return Ok(ready.is_set());
        }
        loop {
            if ready.wait_timeout(self.config.poll_interval) {
                return Ok(true);
            }
            if self.phase() != StepPhase::Running {
                return Ok(false);
            }
            self.check_dispatcher()?;
        }
    }

    /// Whether the current step's results are ready. `true` when no step
    /// is outstanding. With `block` set, waits until they are.
    pub fn check_results(&self, block: bool) -> Result<bool, SceneError> {
        loop {
            if matches!(self.phase(), StepPhase::Idle | StepPhase::Retiring) {
                return Ok(true);
            }
            let ready = self.signals.results_ready();
            if !block {
                return Ok(ready.is_set());
            }
            if ready.wait_timeout(self.config.poll_interval) {
                return Ok(true);
            }
            self.check_dispatcher()?;
        }
    }

    // ── Accessors ──────────────────────────────────────────────────

    /// Current lifecycle phase.
    pub fn phase(&self) -> StepPhase {
        self.lock_state().phase
    }

    /// The most recently started step; `StepId(0)` before the first.
    pub fn current_step(&self) -> StepId {
        self.lock_state().step
    }

    /// Statistics of the last retired step.
    pub fn last_stats(&self) -> Option<StepStats> {
        self.lock_state().last_stats.clone()
    }

    /// The scene's task manager, for inspecting the current graph.
    pub fn manager(&self) -> &TaskManager {
        &self.manager
    }

    /// The configuration the scene was created with.
    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    /// The frame-complete gate; set whenever no step is outstanding.
    pub fn frame_complete(&self) -> &Gate {
        &self.frame_complete
    }

    /// Change the substep count, effective from the next step.
    pub fn set_substep_count(&self, substep_count: u32) -> Result<(), ConfigError> {
        if !(1..=MAX_SUBSTEPS).contains(&substep_count) {
            return Err(ConfigError::InvalidSubstepCount {
                value: substep_count,
                max: MAX_SUBSTEPS,
            });
        }
        self.lock_state().substep_count = substep_count;
        Ok(())
    }

    // ── Modules ────────────────────────────────────────────────────

    fn ensure_idle(&self) -> Result<MutexGuard<'_, StepState>, SceneError> {
        let state = self.lock_state();
        if state.phase != StepPhase::Idle {
            return Err(SceneError::StepRunning);
        }
        Ok(state)
    }

    /// Attach a module. Only allowed between steps.
    pub fn add_module(&self, module: Box<dyn SceneModule>) -> Result<(), SceneError> {
        let _state = self.ensure_idle()?;
        log::debug!("scene '{}': adding module '{}'", self.config.name, module.name());
        self.lock_modules().push(module);
        Ok(())
    }

    /// Detach the first module named `name`. Only allowed between steps.
    pub fn remove_module(&self, name: &str) -> Result<Option<Box<dyn SceneModule>>, SceneError> {
        let _state = self.ensure_idle()?;
        let mut modules = self.lock_modules();
        Ok(modules
            .iter()
            .position(|m| m.name() == name)
            .map(|i| modules.remove(i)))
    }

    /// Attached modules.
    pub fn module_count(&self) -> usize {
        self.lock_modules().len()
    }

    // ── Actors ─────────────────────────────────────────────────────

    /// Register a renderable actor.
    pub fn add_actor(&self, renderable: Arc<dyn Renderable>) -> ActorId {
        self.write_actors().add(renderable)
    }

    /// Remove actor `id`. Returns whether it was registered.
    pub fn remove_actor(&self, id: ActorId) -> bool {
        let mut actors = self.write_actors();
        match actors.position(id) {
            Some(index) => actors.remove_at(index).is_some(),
            None => false,
        }
    }

    /// Remove the actor at `index` in registration order.
    pub fn remove_actor_at_index(&self, index: usize) -> Option<ActorId> {
        self.write_actors().remove_at(index).map(|a| a.id())
    }

    /// Remove every actor, first retiring an outstanding step.
    pub fn remove_all_actors(&self) -> Result<usize, SceneError> {
        if self.phase() == StepPhase::Running {
            self.fetch_results(true)?;
        }
        Ok(self.write_actors().clear())
    }

    /// Registered actors.
    pub fn actor_count(&self) -> usize {
        self.read_actors().len()
    }

    /// IDs of registered actors, in registration order.
    pub fn actor_ids(&self) -> Vec<ActorId> {
        self.read_actors().actors().iter().map(|a| a.id()).collect()
    }

    /// Take every actor's render-data lock.
    pub fn lock_all_renderables(&self) {
        for actor in self.read_actors().actors() {
            actor.lock().lock();
        }
    }

    /// Release every actor's render-data lock.
    pub fn unlock_all_renderables(&self) {
        for actor in self.read_actors().actors() {
            actor.lock().unlock();
        }
    }

    /// Create the scene's renderable iterator. Fails with
    /// [`SceneError::IteratorAlreadyLive`] while another one exists.
    pub fn create_renderable_iterator(&self) -> Result<RenderableIterator, SceneError> {
        RenderableIterator::create(Arc::clone(&self.actors))
    }

    /// Release an iterator, unlocking the actor it holds.
    pub fn release_renderable_iterator(&self, iterator: RenderableIterator) {
        drop(iterator);
    }
}

impl Drop for Scene {
    fn drop(&mut self) {
        if self.phase() == StepPhase::Running {
            if let Err(e) = self.fetch_results(true) {
                log::error!("scene '{}': outstanding step lost on drop: {e}", self.config.name);
            }
        }
        while !self.manager.wait_idle(Some(self.config.poll_interval)) {
            if self.check_dispatcher().is_err() {
                log::warn!(
                    "scene '{}': dropping with {} task(s) that can no longer run",
                    self.config.name,
                    self.manager.pending_tasks()
                );
                return;
            }
        }
        if let Err(e) = self.manager.reset_dependencies() {
            log::warn!("scene '{}': {e}", self.config.name);
        }
    }
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("name", &self.config.name)
            .field("phase", &self.phase())
            .field("step", &self.current_step())
            .field("actors", &self.actor_count())
            .field("modules", &self.module_count())
            .finish()
    }
}

// Compile-time assertion: a scene is shared between simulation and
// render threads.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<Scene>();
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::RenderDataLock;
    use crate::step::names;
    use cadence_core::GraphError;
    use cadence_dispatch::DispatcherConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Immediate {
        simulated: AtomicU32,
    }

    impl PhysicsEngine for Immediate {
        fn simulate(&self, _dt: f32, completion: Hold) {
            self.simulated.fetch_add(1, Ordering::SeqCst);
            drop(completion);
        }
        fn check_results(&self, _block: bool) -> bool {
            true
        }
        fn fetch_results(&self, _block: bool) -> bool {
            true
        }
    }

    fn scene_with(config: SceneConfig) -> (Scene, Arc<Immediate>) {
        let ctx = SchedulerContext::new(DispatcherConfig::with_workers(2)).unwrap();
        let physics = Arc::new(Immediate {
            simulated: AtomicU32::new(0),
        });
        let scene = Scene::new(&ctx, physics.clone(), config).unwrap();
        (scene, physics)
    }

    fn scene() -> (Scene, Arc<Immediate>) {
        scene_with(SceneConfig::default())
    }

    /// Re-registers the physics-simulate name, which the step graph
    /// already owns.
    struct Clashing;
    impl SceneModule for Clashing {
        fn name(&self) -> &str {
            "clashing"
        }
        fn submit_tasks(&mut self, manager: &TaskManager, _step: &StepInfo) -> Result<(), GraphError> {
            manager
                .submit_named_task(
                    names::PHYSICS_SIMULATE,
                    cadence_graph::FnGraphTask::new("dup", |_| {}),
                )
                .map(|_| ())
        }
        fn fetch_results(&mut self) {}
    }

    struct Dummy(RenderDataLock);
    impl Renderable for Dummy {
        fn render_data_lock(&self) -> &RenderDataLock {
            &self.0
        }
    }

    #[test]
    fn fetch_without_step_returns_false() {
        let (scene, _) = scene();
        assert_eq!(scene.fetch_results(true), Ok(false));
        assert_eq!(scene.check_results(false), Ok(true));
        assert_eq!(scene.phase(), StepPhase::Idle);
    }

    #[test]
    fn step_runs_and_fetch_is_idempotent() {
        let (scene, physics) = scene();
        let step = scene.simulate(0.016, true, None).unwrap();
        assert_eq!(step, StepId(1));
        assert_eq!(scene.fetch_results(true), Ok(true));
        assert_eq!(scene.fetch_results(true), Ok(false));
        assert_eq!(physics.simulated.load(Ordering::SeqCst), 1);
        assert!(scene.frame_complete().is_set());

        let stats = scene.last_stats().unwrap();
        assert_eq!(stats.step, StepId(1));
        assert_eq!(stats.substep_count, 1);
    }

    #[test]
    fn try_simulate_rejects_outstanding_step() {
        let (scene, _) = scene();
        scene.simulate(0.01, false, None).unwrap();
        assert_eq!(
            scene.try_simulate(0.01, false, None),
            Err(SceneError::StepInProgress)
        );
        assert!(scene.fetch_results(true).unwrap());
        assert_eq!(scene.try_simulate(0.01, false, None), Ok(StepId(2)));
        assert!(scene.fetch_results(true).unwrap());
    }

    #[test]
    fn elapsed_time_accumulates_with_remainder() {
        let (scene, _) = scene();
        for _ in 0..3 {
            scene.simulate(0.0105, false, None).unwrap();
            scene.fetch_results(true).unwrap();
        }
        // 3 × 10.5 ms = 31.5 ms
        assert_eq!(scene.last_stats().unwrap().total_elapsed_ms, 31);
    }

    #[test]
    fn substep_count_applies_to_next_step() {
        let (scene, physics) = scene();
        scene.set_substep_count(4).unwrap();
        scene.simulate(0.04, false, None).unwrap();
        scene.fetch_results(true).unwrap();
        assert_eq!(physics.simulated.load(Ordering::SeqCst), 4);
        assert_eq!(scene.last_stats().unwrap().substep_count, 4);
        assert!(matches!(
            scene.set_substep_count(0),
            Err(ConfigError::InvalidSubstepCount { value: 0, .. })
        ));
    }

    #[test]
    fn failed_build_returns_scene_to_idle() {
        let (scene, physics) = scene();
        scene.add_module(Box::new(Clashing)).unwrap();
        let err = scene.simulate(0.01, false, None).unwrap_err();
        assert!(matches!(
            err,
            SceneError::Graph(GraphError::DuplicateName { .. })
        ));
        assert_eq!(scene.phase(), StepPhase::Idle);
        assert!(scene.frame_complete().is_set());
        assert_eq!(physics.simulated.load(Ordering::SeqCst), 0);

        assert!(scene.remove_module("clashing").unwrap().is_some());
        scene.simulate(0.01, false, None).unwrap();
        assert!(scene.fetch_results(true).unwrap());
    }

    #[test]
    fn modules_cannot_change_mid_step() {
        let (scene, _) = scene();
        scene.simulate(0.01, false, None).unwrap();
        assert_eq!(
            scene.add_module(Box::new(Clashing)).unwrap_err(),
            SceneError::StepRunning
        );
        scene.fetch_results(true).unwrap();
        assert_eq!(scene.module_count(), 0);
    }

    #[test]
    fn remove_all_actors_retires_outstanding_step() {
        let (scene, _) = scene();
        let a = scene.add_actor(Arc::new(Dummy(RenderDataLock::new())));
        scene.add_actor(Arc::new(Dummy(RenderDataLock::new())));
        assert_eq!(scene.actor_ids().first(), Some(&a));
        scene.simulate(0.01, false, None).unwrap();
        assert_eq!(scene.remove_all_actors(), Ok(2));
        assert_eq!(scene.phase(), StepPhase::Idle);
        assert_eq!(scene.actor_count(), 0);
    }

    #[test]
    fn lock_all_renderables_locks_every_actor() {
        let (scene, _) = scene();
        let r = Arc::new(Dummy(RenderDataLock::new()));
        scene.add_actor(r.clone());
        scene.lock_all_renderables();
        assert!(r.0.is_locked());
        scene.unlock_all_renderables();
        assert!(!r.0.is_locked());
    }

    #[test]
    fn only_one_iterator_at_a_time() {
        let (scene, _) = scene();
        let it = scene.create_renderable_iterator().unwrap();
        assert!(matches!(
            scene.create_renderable_iterator(),
            Err(SceneError::IteratorAlreadyLive)
        ));
        scene.release_renderable_iterator(it);
        assert!(scene.create_renderable_iterator().is_ok());
    }
}
