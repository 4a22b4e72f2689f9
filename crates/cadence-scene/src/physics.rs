//! The physics engine collaborator.

use cadence_graph::Hold;

/// The rigid-body engine the step graph drives.
///
/// The scene calls these from worker threads (`simulate` from the
/// physics-simulate node and between substeps, `check_results` from the
/// check-results node) and from the caller's thread (the final
/// `fetch_results`). Implementations must be thread-safe.
///
/// The `completion` passed to [`simulate`](PhysicsEngine::simulate) gates
/// the next node of the step graph. Release it, or drop it, once the
/// requested step has finished; releasing it early lets the graph run
/// ahead of physics, never releasing it stalls the step forever.
pub trait PhysicsEngine: Send + Sync + 'static {
    /// Start advancing by `elapsed_time` seconds. May return before the
    /// step finishes.
    fn simulate(&self, elapsed_time: f32, completion: Hold);

    /// Whether the running step has finished. With `block` set, wait
    /// until it has.
    fn check_results(&self, block: bool) -> bool;

    /// Make the finished step's results current. With `block` set, wait
    /// for the step to finish first. Returns `false` if no results were
    /// available.
    fn fetch_results(&self, block: bool) -> bool;
}
