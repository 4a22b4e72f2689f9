//! Per-step task dependency graph for the cadence scheduling core.
//!
//! A [`TaskManager`] holds one table of tasks per simulation step.
//! Independently written modules register their work in it, by name or
//! anonymously, and order it with [`start_after`](TaskManager::start_after)
//! and [`finish_before`](TaskManager::finish_before) edges. Each row
//! carries an atomic reference count; [`start_simulation`](TaskManager::start_simulation)
//! freezes the table, releases the build hold on every row, and rows are
//! handed to the dispatcher as their counts reach zero.
//!
//! Reference counts are never touched directly. They move only through
//! edges, through [`Hold`] tokens (released exactly once, by value or on
//! drop), and through [`LightTask`]s, the re-armable continuation tasks
//! that live outside the table.
//!
//! ```text
//!   Building ──start_simulation──► Running ──(all rows retired)──► reset
//!      ▲                                                             │
//!      └─────────────────────────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod hold;
pub mod light;
pub mod manager;
pub mod task;

pub use hold::Hold;
pub use light::LightTask;
pub use manager::{GraphPhase, TaskManager};
pub use task::{FnGraphTask, GraphTask, TaskContext};
