//! Per-frame step orchestration for the cadence scheduling core.
//!
//! A [`Scene`] drives a [`PhysicsEngine`] and any number of
//! [`SceneModule`]s through one task graph per simulation step, on the
//! dispatcher owned by a shared [`SchedulerContext`]. Two [`Gate`]s bound
//! each step: *results-ready*, set when the graph has run to completion,
//! and *frame-complete*, set when the caller has fetched the results.
//!
//! A render thread can walk the scene's actors with a
//! [`RenderableIterator`] while the simulation thread steps; each actor
//! is returned with its [`RenderDataLock`] held.
//!
//! ```text
//!  caller ── simulate ──► [ step graph on dispatcher ] ──► results-ready
//!         ◄─ fetch_results (render lock, module hooks) ──► frame-complete
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod actors;
pub mod config;
pub mod context;
pub mod gate;
pub mod iterator;
pub mod metrics;
pub mod module;
pub mod physics;
pub mod scene;
pub mod step;

pub use actors::{RenderDataLock, Renderable, RenderableRef};
pub use config::{SceneConfig, MAX_SUBSTEPS};
pub use context::SchedulerContext;
pub use gate::Gate;
pub use iterator::RenderableIterator;
pub use metrics::StepStats;
pub use module::{SceneModule, StepInfo};
pub use physics::PhysicsEngine;
pub use scene::{Scene, StepPhase};
pub use step::{between_step_holds, build_step_graph, names, StepGraph, StepSignals};
