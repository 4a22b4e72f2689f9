//! Core types for the cadence scheduling core.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the identifiers and error enums shared by the dispatcher, the task
//! graph and the scene: task and actor IDs, step counters, and one error
//! type per subsystem.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod id;

pub use error::{ConfigError, DispatchError, GraphError, SceneError};
pub use id::{ActorId, StepId, TaskId};
