//! Benchmark profiles for the cadence scheduling core.
//!
//! - [`FanoutModule`]: a scene module submitting `width` independent
//!   tasks that all finish before the step's fetch-results node
//! - [`Countdown`]: a latch released once every task of a dispatcher
//!   batch has run
//! - [`step_profile`]: a scene with a fan-out module attached

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::error::Error;
use std::sync::Arc;

use cadence_core::GraphError;
use cadence_dispatch::{DispatcherConfig, Task, TaskRef};
use cadence_graph::{FnGraphTask, TaskManager};
use crossbeam_utils::sync::WaitGroup;
use cadence_scene::{
    names, PhysicsEngine, Scene, SceneConfig, SceneModule, SchedulerContext, StepInfo,
};

/// Module that submits `width` no-op tasks per step, each ordered
/// before fetch-results.
pub struct FanoutModule {
    width: usize,
}

impl FanoutModule {
    /// A module with `width` tasks per step.
    pub fn new(width: usize) -> Self {
        Self { width }
    }
}

impl SceneModule for FanoutModule {
    fn name(&self) -> &str {
        "fanout"
    }

    fn submit_tasks(&mut self, manager: &TaskManager, _step: &StepInfo) -> Result<(), GraphError> {
        let fetch = manager.named_task(names::FETCH_RESULTS)?;
        for _ in 0..self.width {
            let id = manager.submit_unnamed_task(FnGraphTask::new("fanout.work", |_| {
                std::hint::black_box(());
            }))?;
            manager.finish_before(id, fetch)?;
        }
        Ok(())
    }

    fn fetch_results(&mut self) {}
}

/// Completion latch for a batch of dispatcher tasks.
///
/// Every task from [`task`](Self::task) holds a [`WaitGroup`] clone that
/// is dropped once the dispatcher releases the task after it ran.
#[derive(Clone, Default)]
pub struct Countdown {
    group: WaitGroup,
}

struct CountdownTask {
    _member: WaitGroup,
}

impl Task for CountdownTask {
    fn name(&self) -> &str {
        "countdown"
    }

    fn run(self: Arc<Self>) {}
}

impl Countdown {
    /// An empty latch.
    pub fn new() -> Self {
        Self::default()
    }

    /// A task that counts towards this latch until it is dropped.
    pub fn task(&self) -> TaskRef {
        Arc::new(CountdownTask {
            _member: self.group.clone(),
        })
    }

    /// Block until every task handed out by this latch, and every clone
    /// of it, has been dropped.
    pub fn wait(self) {
        self.group.wait();
    }
}

/// A scene on its own `workers`-thread dispatcher, with a
/// [`FanoutModule`] of `width` tasks and `substep_count` substeps.
pub fn step_profile(
    physics: Arc<dyn PhysicsEngine>,
    workers: usize,
    width: usize,
    substep_count: u32,
) -> Result<(SchedulerContext, Scene), Box<dyn Error>> {
    let ctx = SchedulerContext::new(DispatcherConfig::with_workers(workers))?;
    let config = SceneConfig {
        name: format!("bench-w{width}-k{substep_count}"),
        substep_count,
        ..SceneConfig::default()
    };
    let scene = Scene::new(&ctx, physics, config)?;
    scene.add_module(Box::new(FanoutModule::new(width)))?;
    Ok((ctx, scene))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_dispatch::Dispatcher;

    #[test]
    fn countdown_waits_for_every_task() {
        let dispatcher = Dispatcher::new(DispatcherConfig::with_workers(2)).unwrap();
        let latch = Countdown::new();
        for _ in 0..100 {
            dispatcher.submit(latch.task()).unwrap();
        }
        latch.wait();
        assert_eq!(dispatcher.shutdown().tasks_executed, 100);
    }
}
