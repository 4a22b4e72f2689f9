//! Per-step statistics for a scene.
//!
//! [`StepStats`] captures the timing of one simulation step as observed
//! by the scene: how long the caller left results waiting, how long the
//! check-results node blocked on physics, and how long result collection
//! took under the render lock.

use cadence_core::StepId;

/// Timing data collected for a single step.
///
/// All durations are in microseconds. The scene fills these in during
/// `fetch_results`; read them with `Scene::last_stats`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepStats {
    /// The step these numbers describe.
    pub step: StepId,
    /// Physics substeps run in the step.
    pub substep_count: u32,
    /// Simulated time advanced by the step, in seconds.
    pub elapsed_time: f32,
    /// Time between results becoming ready and the caller fetching
    /// them. Zero when the caller was already waiting.
    pub user_delayed_fetch_us: u64,
    /// Time the check-results node spent blocked on physics.
    pub check_results_us: u64,
    /// Time spent in the physics engine's final `fetch_results`.
    pub physics_fetch_us: u64,
    /// Time spent in module result collection, render lock included.
    pub fetch_us: u64,
    /// Actors registered when results were fetched.
    pub actor_count: usize,
    /// Cumulative simulated time over the scene's lifetime, in whole
    /// milliseconds.
    pub total_elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let s = StepStats::default();
        assert_eq!(s.step, StepId(0));
        assert_eq!(s.user_delayed_fetch_us, 0);
        assert_eq!(s.total_elapsed_ms, 0);
    }
}
