//! Error types for the cadence scheduling core.
//!
//! One enum per subsystem: dispatch (the worker pool), graph (per-step
//! task tables), scene (the caller-facing step API) and config
//! (construction-time validation). Usage errors are reported
//! synchronously through these types; a panicking task is not an error
//! value but poisons the dispatcher (see [`DispatchError::Poisoned`]).

use thiserror::Error;

use crate::id::TaskId;

/// Errors returned when submitting work to the dispatcher.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The dispatcher has begun shutting down and accepts no new work.
    #[error("dispatcher is shutting down; task '{task}' was not queued")]
    ShutDown {
        /// Name of the rejected task.
        task: String,
    },
    /// A previously executed task panicked. The pool is in an undefined
    /// state and must be shut down.
    #[error("dispatcher is poisoned by a panicking task; task '{task}' was not queued")]
    Poisoned {
        /// Name of the rejected task.
        task: String,
    },
}

/// Errors from building or driving a per-step task graph.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The graph was launched; no further tasks, edges or holds may be
    /// added until it is reset.
    #[error("task graph is frozen; cannot modify '{task}' after launch")]
    Frozen {
        /// Name of the task the caller tried to modify.
        task: String,
    },
    /// The operation requires a graph under construction.
    #[error("task graph is not being built")]
    NotBuilding,
    /// The ID does not refer to a row in the current graph.
    #[error("unknown task id {id}")]
    UnknownTask {
        /// The offending ID.
        id: TaskId,
    },
    /// A different task is already registered under this name.
    #[error("a task named '{name}' is already registered")]
    DuplicateName {
        /// The contested name.
        name: String,
    },
    /// A task was asked to run after itself.
    #[error("task '{task}' cannot depend on itself")]
    SelfDependency {
        /// Name of the task.
        task: String,
    },
    /// A running task tried to take a hold on a task it does not gate.
    #[error("task '{dependent}' is not a dependent of running task '{task}'")]
    NotADependent {
        /// Name of the running task.
        task: String,
        /// Name of the requested hold target.
        dependent: String,
    },
    /// The previous graph still has tasks outstanding.
    #[error("previous task graph still has {pending} task(s) in flight")]
    StepInFlight {
        /// Number of rows not yet completed.
        pending: usize,
    },
    /// The dependency edges form a cycle; launching would deadlock.
    #[error("dependency cycle through task '{task}'")]
    Cycle {
        /// Name of one task on the cycle.
        task: String,
    },
    /// Dispatching a ready task failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Errors from the caller-facing scene API.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SceneError {
    /// `try_simulate` was called while the previous step has not been
    /// retired by `fetch_results`.
    #[error("a simulation step is already in progress")]
    StepInProgress,
    /// The operation is not permitted while a step is running.
    #[error("operation not permitted while a step is running")]
    StepRunning,
    /// A renderable iterator already exists for this scene.
    #[error("a renderable iterator is already live for this scene")]
    IteratorAlreadyLive,
    /// A task panicked; the step can never complete.
    #[error("dispatcher poisoned by a panicking task; the step cannot complete")]
    DispatcherPoisoned,
    /// The dispatcher was shut down underneath the scene.
    #[error("dispatcher has shut down; the step cannot complete")]
    DispatcherShutDown,
    /// Building or launching the step graph failed.
    #[error("step graph error: {0}")]
    Graph(#[from] GraphError),
}

/// Errors detected while validating configuration.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Worker count was explicitly set to zero.
    #[error("worker_count must be at least 1")]
    InvalidWorkerCount,
    /// The queue entry pool must hold at least one entry.
    #[error("entry_pool_capacity must be at least 1")]
    PoolCapacityZero,
    /// Park timeout must be non-zero.
    #[error("park_timeout must be non-zero")]
    InvalidParkTimeout,
    /// Substep count outside the supported range.
    #[error("substep_count {value} out of range 1..={max}")]
    InvalidSubstepCount {
        /// The configured value.
        value: u32,
        /// The largest accepted value.
        max: u32,
    },
    /// Poll interval must be non-zero.
    #[error("poll_interval must be non-zero")]
    InvalidPollInterval,
    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn worker thread: {reason}")]
    ThreadSpawnFailed {
        /// The underlying I/O error, rendered.
        reason: String,
    },
}
