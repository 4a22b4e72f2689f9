//! Substep gating: CheckResults runs only after every substep was
//! simulated and the last one completed.

use std::time::{Duration, Instant};

use cadence_dispatch::DispatcherConfig;
use cadence_scene::{between_step_holds, Scene, SceneConfig, SchedulerContext};
use cadence_test_utils::{init_logging, CompletionMode, CountingPhysics};

fn scene_with_substeps(
    physics: std::sync::Arc<CountingPhysics>,
    substep_count: u32,
) -> (SchedulerContext, Scene) {
    init_logging();
    let ctx = SchedulerContext::new(DispatcherConfig::with_workers(3)).unwrap();
    let config = SceneConfig {
        substep_count,
        ..SceneConfig::default()
    };
    let scene = Scene::new(&ctx, physics, config).unwrap();
    (ctx, scene)
}

fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn check_results_observes_every_substep() {
    for k in [1u32, 2, 5] {
        let physics = CountingPhysics::immediate();
        let (_ctx, scene) = scene_with_substeps(physics.clone(), k);

        scene.simulate(0.05, false, None).unwrap();
        assert!(scene.fetch_results(true).unwrap());

        assert_eq!(physics.simulate_calls(), k, "K = {k}");
        assert_eq!(physics.simulate_counts_at_check(), vec![k], "K = {k}");
        // One intermediate fetch per extra substep, plus the final one.
        assert_eq!(physics.fetch_calls(), between_step_holds(k) + 1, "K = {k}");
        assert_eq!(scene.last_stats().unwrap().substep_count, k);
    }
}

#[test]
fn substeps_wait_for_each_completion() {
    let physics = CountingPhysics::new(CompletionMode::Deferred);
    let (_ctx, scene) = scene_with_substeps(physics.clone(), 3);
    scene.simulate(0.03, false, None).unwrap();

    for issued in 1..=3 {
        wait_for(|| physics.simulate_calls() == issued && physics.pending_completions() == 1);
        assert!(physics.simulate_counts_at_check().is_empty());
        assert!(!scene.check_results(false).unwrap());
        physics.complete_pending();
    }

    assert!(scene.fetch_results(true).unwrap());
    assert_eq!(physics.simulate_counts_at_check(), vec![3]);
}

#[test]
fn delayed_completion_still_gates_check_results() {
    let physics = CountingPhysics::new(CompletionMode::Delayed(Duration::from_millis(5)));
    let (_ctx, scene) = scene_with_substeps(physics.clone(), 4);
    for _ in 0..3 {
        scene.simulate(0.04, false, None).unwrap();
        assert!(scene.fetch_results(true).unwrap());
    }
    assert_eq!(physics.simulate_calls(), 12);
    assert_eq!(physics.simulate_counts_at_check(), vec![4, 8, 12]);
}
