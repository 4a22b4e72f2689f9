//! The per-step task graph.
//!
//! ```text
//!                      ┌──────────────► DuringTickComplete ──┐
//!  PhysicsSimulate ────┤                                     ├──► FetchResults
//!        │             └──────────────► CheckResults ────────┘
//!        │ completion                      ▲
//!        ▼                                 │ K-1 holds
//!   BetweenSteps (K-1 runs, K > 1) ────────┘
//! ```
//!
//! With `K` substeps, physics is asked to simulate `K` times, each for
//! `elapsed_time / K`. The first call comes from PhysicsSimulate, the
//! rest from the BetweenSteps light task, which first fetches the
//! previous substep's results. CheckResults carries
//! [`between_step_holds`]`(K)` extra holds owned by BetweenSteps, so it
//! can only run once every substep has been issued and the last one has
//! completed.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use cadence_core::{GraphError, TaskId};
use cadence_graph::{GraphTask, Hold, LightTask, TaskContext, TaskManager};

use crate::gate::Gate;
use crate::physics::PhysicsEngine;

/// Names of the step graph's nodes, for modules ordering their tasks
/// against them.
pub mod names {
    /// Starts the physics step.
    pub const PHYSICS_SIMULATE: &str = "cadence.physics.simulate";
    /// Runs after physics has started and before results are fetched;
    /// modules use `finish_before` on it for work that must complete
    /// within the tick.
    pub const DURING_TICK_COMPLETE: &str = "cadence.physics.during_tick_complete";
    /// Waits for physics to finish.
    pub const CHECK_RESULTS: &str = "cadence.physics.check_results";
    /// Terminal node; sets the results-ready gate.
    pub const FETCH_RESULTS: &str = "cadence.physics.fetch_results";
    /// The substep loop (a light task, not a table row).
    pub const BETWEEN_STEPS: &str = "cadence.physics.between_steps";
}

/// Extra holds CheckResults carries for a step with `substep_count`
/// substeps: one per substep after the first.
pub fn between_step_holds(substep_count: u32) -> u32 {
    substep_count.saturating_sub(1)
}

// ── StepSignals ────────────────────────────────────────────────────

/// State shared between the step graph's nodes and the scene.
#[derive(Debug, Default)]
pub struct StepSignals {
    results_ready: Gate,
    ready_at: Mutex<Option<Instant>>,
    check_results_us: AtomicU64,
}

impl StepSignals {
    /// Fresh signals with results-ready cleared.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set by FetchResults when the step's graph has run to completion.
    pub fn results_ready(&self) -> &Gate {
        &self.results_ready
    }

    /// When results-ready was last set.
    pub fn ready_at(&self) -> Option<Instant> {
        *self.ready_at.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Time CheckResults spent blocked on physics in the current step.
    pub fn check_results_us(&self) -> u64 {
        self.check_results_us.load(Ordering::Acquire)
    }

    pub(crate) fn begin_step(&self) {
        self.results_ready.reset();
        *self.ready_at.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.check_results_us.store(0, Ordering::Release);
    }

    fn mark_results_ready(&self) {
        *self.ready_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        self.results_ready.set();
    }
}

// ── Nodes ──────────────────────────────────────────────────────────

struct PhysicsSimulateNode {
    physics: Arc<dyn PhysicsEngine>,
    substep_size: f32,
    check_results: TaskId,
    between_steps: Option<Arc<LightTask>>,
}

impl GraphTask for PhysicsSimulateNode {
    fn name(&self) -> &str {
        names::PHYSICS_SIMULATE
    }

    fn run(&self, ctx: &TaskContext<'_>) {
        let completion = match &self.between_steps {
            Some(between) => between.hold(),
            None => match ctx.hold(self.check_results) {
                Ok(hold) => hold,
                Err(e) => {
                    log::error!("physics simulate could not gate check-results: {e}");
                    return;
                }
            },
        };
        self.physics.simulate(self.substep_size, completion);
    }
}

/// State of the BetweenSteps light task.
struct SubstepLoop {
    physics: Arc<dyn PhysicsEngine>,
    substep_size: f32,
    holds: Mutex<Vec<Hold>>,
    issued: AtomicU32,
}

impl SubstepLoop {
    fn advance(&self, me: &Arc<LightTask>) {
        let (hold, last) = {
            let mut holds = self.holds.lock().unwrap_or_else(PoisonError::into_inner);
            let hold = holds.pop();
            (hold, holds.is_empty())
        };
        let Some(hold) = hold else {
            log::error!("substep loop ran with no substeps left");
            return;
        };

        self.physics.fetch_results(true);
        let completion = if last {
            // The last substep's completion gates CheckResults directly.
            hold
        } else {
            let next = me.hold();
            hold.release();
            next
        };
        let n = self.issued.fetch_add(1, Ordering::AcqRel) + 2;
        log::trace!("issuing physics substep {n}");
        self.physics.simulate(self.substep_size, completion);
    }
}

struct DuringTickCompleteNode;

impl GraphTask for DuringTickCompleteNode {
    fn name(&self) -> &str {
        names::DURING_TICK_COMPLETE
    }

    fn run(&self, _ctx: &TaskContext<'_>) {}
}

struct CheckResultsNode {
    physics: Arc<dyn PhysicsEngine>,
    signals: Arc<StepSignals>,
}

impl GraphTask for CheckResultsNode {
    fn name(&self) -> &str {
        names::CHECK_RESULTS
    }

    fn run(&self, _ctx: &TaskContext<'_>) {
        let start = Instant::now();
        self.physics.check_results(true);
        self.signals
            .check_results_us
            .store(start.elapsed().as_micros() as u64, Ordering::Release);
    }
}

struct FetchResultsNode {
    signals: Arc<StepSignals>,
    completion: Mutex<Option<Hold>>,
}

impl GraphTask for FetchResultsNode {
    fn name(&self) -> &str {
        names::FETCH_RESULTS
    }

    fn run(&self, _ctx: &TaskContext<'_>) {
        self.signals.mark_results_ready();
        let completion = self
            .completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(completion);
    }
}

// ── StepGraph ──────────────────────────────────────────────────────

/// Handles to the nodes of one step's graph.
#[derive(Debug)]
pub struct StepGraph {
    /// PhysicsSimulate row.
    pub physics_simulate: TaskId,
    /// DuringTickComplete row.
    pub during_tick_complete: TaskId,
    /// CheckResults row.
    pub check_results: TaskId,
    /// FetchResults row.
    pub fetch_results: TaskId,
    /// The substep loop, present when `substep_count > 1`.
    pub between_steps: Option<Arc<LightTask>>,
    /// Substeps in this step.
    pub substep_count: u32,
    /// Time advanced by each substep.
    pub substep_size: f32,
}

impl StepGraph {
    /// Freeze the graph and start it. Module tasks must be registered
    /// before this is called.
    pub fn launch(&self, manager: &TaskManager) -> Result<(), GraphError> {
        manager.start_simulation()
    }
}

/// Register the step graph's nodes and edges in `manager`.
///
/// `completion`, if given, is released when FetchResults has run. A
/// `substep_count` of zero is treated as one.
pub fn build_step_graph(
    manager: &TaskManager,
    physics: &Arc<dyn PhysicsEngine>,
    signals: &Arc<StepSignals>,
    elapsed_time: f32,
    substep_count: u32,
    completion: Option<Hold>,
) -> Result<StepGraph, GraphError> {
    let substep_count = substep_count.max(1);
    let substep_size = elapsed_time / substep_count as f32;

    let check_results = manager.submit_named_task(
        names::CHECK_RESULTS,
        Arc::new(CheckResultsNode {
            physics: Arc::clone(physics),
            signals: Arc::clone(signals),
        }),
    )?;

    let between_steps = if substep_count > 1 {
        let holds = (0..between_step_holds(substep_count))
            .map(|_| manager.add_hold(check_results))
            .collect::<Result<Vec<_>, _>>()?;
        let substeps = Arc::new(SubstepLoop {
            physics: Arc::clone(physics),
            substep_size,
            holds: Mutex::new(holds),
            issued: AtomicU32::new(0),
        });
        Some(LightTask::new(
            names::BETWEEN_STEPS,
            manager.dispatcher().clone(),
            move |me| substeps.advance(me),
        ))
    } else {
        None
    };

    let physics_simulate = manager.submit_named_task(
        names::PHYSICS_SIMULATE,
        Arc::new(PhysicsSimulateNode {
            physics: Arc::clone(physics),
            substep_size,
            check_results,
            between_steps: between_steps.clone(),
        }),
    )?;
    let during_tick_complete =
        manager.submit_named_task(names::DURING_TICK_COMPLETE, Arc::new(DuringTickCompleteNode))?;
    let fetch_results = manager.submit_named_task(
        names::FETCH_RESULTS,
        Arc::new(FetchResultsNode {
            signals: Arc::clone(signals),
            completion: Mutex::new(completion),
        }),
    )?;

    manager.start_after(check_results, physics_simulate)?;
    manager.start_after(during_tick_complete, physics_simulate)?;
    manager.start_after(fetch_results, physics_simulate)?;
    manager.start_after(fetch_results, during_tick_complete)?;
    manager.start_after(fetch_results, check_results)?;

    Ok(StepGraph {
        physics_simulate,
        during_tick_complete,
        check_results,
        fetch_results,
        between_steps,
        substep_count,
        substep_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_dispatch::{Dispatcher, DispatcherConfig};
    use std::time::Duration;

    /// Completes every step immediately and records the number of
    /// simulate calls seen by `check_results`.
    #[derive(Default)]
    struct Immediate {
        simulated: AtomicU32,
        seen_by_check: Mutex<Vec<u32>>,
    }

    impl PhysicsEngine for Immediate {
        fn simulate(&self, _dt: f32, completion: Hold) {
            self.simulated.fetch_add(1, Ordering::SeqCst);
            completion.release();
        }
        fn check_results(&self, _block: bool) -> bool {
            let n = self.simulated.load(Ordering::SeqCst);
            self.seen_by_check.lock().unwrap().push(n);
            true
        }
        fn fetch_results(&self, _block: bool) -> bool {
            true
        }
    }

    #[test]
    fn between_step_holds_is_one_less_than_substeps() {
        assert_eq!(between_step_holds(0), 0);
        assert_eq!(between_step_holds(1), 0);
        assert_eq!(between_step_holds(2), 1);
        assert_eq!(between_step_holds(5), 4);
    }

    #[test]
    fn check_results_gated_by_edge_and_substep_holds() {
        let d = Dispatcher::new(DispatcherConfig::with_workers(2)).unwrap();
        let m = TaskManager::new("step", d.handle());
        let physics: Arc<dyn PhysicsEngine> = Arc::new(Immediate::default());
        let signals = Arc::new(StepSignals::new());
        let g = build_step_graph(&m, &physics, &signals, 1.0, 3, None).unwrap();

        // build hold + PhysicsSimulate edge + two substep holds
        assert_eq!(m.reference_count(g.check_results), Some(4));
        // build hold + three predecessors
        assert_eq!(m.reference_count(g.fetch_results), Some(4));
        assert!(g.between_steps.is_some());
        assert!((g.substep_size - 1.0 / 3.0).abs() < f32::EPSILON);
        m.abandon().unwrap();
    }

    #[test]
    fn step_graph_runs_all_substeps_then_sets_results_ready() {
        let d = Dispatcher::new(DispatcherConfig::with_workers(3)).unwrap();
        let m = TaskManager::new("step", d.handle());
        let engine = Arc::new(Immediate::default());
        let physics: Arc<dyn PhysicsEngine> = engine.clone();
        let signals = Arc::new(StepSignals::new());

        for k in [1u32, 2, 5] {
            engine.simulated.store(0, Ordering::SeqCst);
            engine.seen_by_check.lock().unwrap().clear();
            signals.begin_step();

            let g = build_step_graph(&m, &physics, &signals, 0.1, k, None).unwrap();
            g.launch(&m).unwrap();
            assert!(signals.results_ready().wait_timeout(Duration::from_secs(10)));
            assert!(m.wait_idle(Some(Duration::from_secs(10))));
            assert_eq!(*engine.seen_by_check.lock().unwrap(), vec![k]);
            assert!(signals.ready_at().is_some());
            m.reset_dependencies().unwrap();
        }
    }

    #[test]
    fn completion_hold_released_by_fetch_results() {
        let d = Dispatcher::new(DispatcherConfig::with_workers(2)).unwrap();
        let m = TaskManager::new("step", d.handle());
        let physics: Arc<dyn PhysicsEngine> = Arc::new(Immediate::default());
        let signals = Arc::new(StepSignals::new());
        let done = LightTask::new("done", d.handle(), |_| {});

        let g = build_step_graph(&m, &physics, &signals, 0.1, 1, Some(done.hold())).unwrap();
        assert_eq!(done.reference_count(), 1);
        g.launch(&m).unwrap();
        assert!(m.wait_idle(Some(Duration::from_secs(10))));
        let deadline = Instant::now() + Duration::from_secs(10);
        while done.run_count() == 0 {
            assert!(Instant::now() < deadline);
            std::thread::yield_now();
        }
    }
}
