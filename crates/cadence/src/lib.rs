//! Cadence: the per-frame concurrency and task-scheduling core of a
//! physics simulation runtime.
//!
//! This is the top-level facade crate that re-exports the public API from
//! all cadence sub-crates. For most users, adding `cadence` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use cadence::prelude::*;
//!
//! // A physics engine that finishes every step as soon as it is asked.
//! struct Instant;
//! impl PhysicsEngine for Instant {
//!     fn simulate(&self, _elapsed_time: f32, completion: Hold) {
//!         completion.release();
//!     }
//!     fn check_results(&self, _block: bool) -> bool { true }
//!     fn fetch_results(&self, _block: bool) -> bool { true }
//! }
//!
//! // A module with one task that must finish within the physics tick.
//! struct Cloth;
//! impl SceneModule for Cloth {
//!     fn name(&self) -> &str { "cloth" }
//!     fn submit_tasks(&mut self, manager: &TaskManager, _step: &StepInfo)
//!         -> Result<(), GraphError>
//!     {
//!         let solve = manager.submit_named_task("cloth.solve", FnGraphTask::new("cloth.solve", |_| {}))?;
//!         let tick = manager.named_task(names::DURING_TICK_COMPLETE)?;
//!         manager.finish_before(solve, tick)
//!     }
//!     fn fetch_results(&mut self) {}
//! }
//!
//! let ctx = SchedulerContext::new(DispatcherConfig::with_workers(2)).unwrap();
//! let scene = Scene::new(&ctx, Arc::new(Instant), SceneConfig::default()).unwrap();
//! scene.add_module(Box::new(Cloth)).unwrap();
//!
//! let step = scene.simulate(1.0 / 60.0, true, None).unwrap();
//! assert!(scene.fetch_results(true).unwrap());
//! assert_eq!(scene.last_stats().unwrap().step, step);
//! assert_eq!(scene.fetch_results(true).unwrap(), false);
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `cadence-core` | IDs and error enums |
//! | [`dispatch`] | `cadence-dispatch` | Work-stealing dispatcher and queue-entry pool |
//! | [`graph`] | `cadence-graph` | Per-step task manager, holds and light tasks |
//! | [`scene`] | `cadence-scene` | Scene stepping, frame gates, render locking |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Identifiers and error types (`cadence-core`).
pub use cadence_core as types;

/// Work-stealing dispatcher (`cadence-dispatch`).
///
/// [`dispatch::Dispatcher`] runs [`dispatch::Task`]s on a fixed pool of
/// worker threads.
pub use cadence_dispatch as dispatch;

/// Per-step task graph (`cadence-graph`).
///
/// [`graph::TaskManager`] collects the rows of one step; [`graph::Hold`]
/// and [`graph::LightTask`] gate work outside the table.
pub use cadence_graph as graph;

/// Scene stepping (`cadence-scene`).
///
/// [`scene::Scene`] drives a physics engine and its modules one step at a
/// time and guards render data with [`scene::RenderDataLock`]s.
pub use cadence_scene as scene;

/// Common imports for typical cadence usage.
///
/// ```rust
/// use cadence::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use cadence_core::{ActorId, StepId, TaskId};

    // Errors
    pub use cadence_core::{ConfigError, DispatchError, GraphError, SceneError};

    // Dispatch
    pub use cadence_dispatch::{Dispatcher, DispatcherConfig, DispatcherHandle, FnTask, Task, TaskRef};

    // Graph
    pub use cadence_graph::{FnGraphTask, GraphTask, Hold, LightTask, TaskContext, TaskManager};

    // Scene
    pub use cadence_scene::{
        names, PhysicsEngine, RenderDataLock, Renderable, RenderableIterator, Scene, SceneConfig,
        SceneModule, SchedulerContext, StepInfo, StepPhase, StepStats,
    };
}
