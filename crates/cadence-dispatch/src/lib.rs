//! Work-stealing CPU dispatcher for the cadence scheduling core.
//!
//! The [`Dispatcher`] owns a fixed set of worker threads, a global
//! injector queue and one local deque per worker. Any thread may
//! [`submit`](Dispatcher::submit) a [`Task`]; workers pull from their own
//! deque first, then the injector, then steal from peers, and park when
//! every queue is empty.
//!
//! ```text
//!  submitter ──► Injector ──┬──► worker 0 ◄─┐
//!                           ├──► worker 1   │ steal
//!  worker k  ──► local k ───┴──► worker N ──┘
//! ```
//!
//! Queue entries come from a fixed [`EntryPool`] so steady-state
//! submission does not allocate.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod dispatcher;
pub mod pool;
mod signal;
pub mod stats;
pub mod task;
mod worker;

pub use config::DispatcherConfig;
pub use dispatcher::{current_worker, Dispatcher, DispatcherHandle, ShutdownReport};
pub use pool::{EntryPool, QueueEntry};
pub use stats::{DispatcherStats, WorkerStats};
pub use task::{FnTask, Task, TaskRef};
