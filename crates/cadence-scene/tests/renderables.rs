//! Renderable iteration under concurrent actor removal and busy
//! render-data locks.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use cadence_core::ActorId;
use cadence_dispatch::DispatcherConfig;
use cadence_scene::{Renderable, Scene, SceneConfig, SchedulerContext};
use cadence_test_utils::{init_logging, CountingPhysics, MockRenderable};
use proptest::prelude::*;

fn scene() -> (SchedulerContext, Arc<Scene>) {
    init_logging();
    let ctx = SchedulerContext::new(DispatcherConfig::with_workers(1)).unwrap();
    let scene = Scene::new(&ctx, CountingPhysics::immediate(), SceneConfig::default()).unwrap();
    (ctx, Arc::new(scene))
}

#[test]
fn removal_by_another_thread_is_skipped() {
    let (_ctx, scene) = scene();
    let a = scene.add_actor(MockRenderable::new("a"));
    let b = scene.add_actor(MockRenderable::new("b"));

    let mut it = scene.create_renderable_iterator().unwrap();
    assert_eq!(it.next().map(|r| r.id()), Some(a));

    let remover = {
        let scene = Arc::clone(&scene);
        std::thread::spawn(move || assert!(scene.remove_actor(b)))
    };
    remover.join().unwrap();

    assert!(it.next().is_none());
    assert_eq!(scene.actor_ids(), vec![a]);
}

#[test]
fn removing_the_held_actor_unlocks_it() {
    let (_ctx, scene) = scene();
    let r = MockRenderable::new("held");
    let id = scene.add_actor(r.clone());

    let mut it = scene.create_renderable_iterator().unwrap();
    assert_eq!(it.next().map(|r| r.id()), Some(id));
    assert!(r.render_data_lock().is_locked());

    let remover = {
        let scene = Arc::clone(&scene);
        std::thread::spawn(move || scene.remove_actor_at_index(0))
    };
    assert_eq!(remover.join().unwrap(), Some(id));
    assert!(!r.render_data_lock().is_locked());
    assert!(it.next().is_none());
}

#[test]
fn busy_actor_is_returned_after_the_free_ones() {
    let (_ctx, scene) = scene();
    let busy = MockRenderable::new("busy");
    let first = scene.add_actor(busy.clone());
    let second = scene.add_actor(MockRenderable::new("free"));

    busy.render_data_lock().lock();
    let unlocker = {
        let busy = Arc::clone(&busy);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            busy.render_data_lock().unlock();
        })
    };

    let mut it = scene.create_renderable_iterator().unwrap();
    assert_eq!(it.next().map(|r| r.id()), Some(second));
    assert_eq!(it.next().map(|r| r.id()), Some(first));
    assert!(busy.render_data_lock().is_locked(), "held by the iterator now");
    assert!(it.next().is_none());
    assert!(!busy.render_data_lock().is_locked());
    unlocker.join().unwrap();
}

#[test]
fn deferred_actor_removed_before_second_pass_is_never_returned() {
    let (_ctx, scene) = scene();
    let busy = MockRenderable::new("busy");
    let busy_id = scene.add_actor(busy.clone());
    let b = scene.add_actor(MockRenderable::new("b"));
    let c = scene.add_actor(MockRenderable::new("c"));

    busy.render_data_lock().lock();
    let mut it = scene.create_renderable_iterator().unwrap();
    assert_eq!(it.next().map(|r| r.id()), Some(b));
    assert_eq!(it.remaining(), 2, "c unvisited, busy deferred");

    assert!(scene.remove_actor(busy_id));
    assert_eq!(it.remaining(), 1);
    busy.render_data_lock().unlock();

    let rest: Vec<ActorId> = it.by_ref().map(|r| r.id()).collect();
    assert_eq!(rest, vec![c]);
    assert_eq!(it.remaining(), 0);
    assert!(!busy.render_data_lock().is_locked());
}

#[test]
fn iteration_during_a_running_step() {
    let (_ctx, scene) = scene();
    for i in 0..8 {
        scene.add_actor(MockRenderable::new(format!("actor{i}")));
    }
    scene.simulate(0.01, false, None).unwrap();
    let mut it = scene.create_renderable_iterator().unwrap();
    assert_eq!(it.by_ref().count(), 8);
    scene.release_renderable_iterator(it);
    assert!(scene.fetch_results(true).unwrap());
    assert_eq!(scene.last_stats().unwrap().actor_count, 8);
}

proptest! {
    #[test]
    fn every_live_actor_visited_once(
        count in 0usize..24,
        removed in proptest::collection::vec(any::<prop::sample::Index>(), 0..8),
        removed_mid in proptest::collection::vec(any::<prop::sample::Index>(), 0..4),
        passes in 1usize..3,
    ) {
        let (_ctx, scene) = scene();
        let ids: Vec<ActorId> = (0..count)
            .map(|i| scene.add_actor(MockRenderable::new(format!("a{i}"))))
            .collect();
        if !ids.is_empty() {
            for idx in &removed {
                scene.remove_actor(*idx.get(&ids));
            }
        }

        let mut it = scene.create_renderable_iterator().unwrap();
        for _ in 0..passes {
            let live: HashSet<ActorId> = scene.actor_ids().into_iter().collect();
            let mut seen = Vec::new();
            let mut dropped = HashSet::new();
            let mut next = it.first();
            while let Some(actor) = next {
                prop_assert!(!dropped.contains(&actor.id()));
                seen.push(actor.id());
                if seen.len() == 1 && !ids.is_empty() {
                    for idx in &removed_mid {
                        let id = *idx.get(&ids);
                        if id != actor.id() && scene.remove_actor(id) {
                            dropped.insert(id);
                        }
                    }
                }
                next = it.next();
            }
            let unique: HashSet<ActorId> = seen.iter().copied().collect();
            prop_assert_eq!(unique.len(), seen.len(), "duplicate visit");
            let expected: HashSet<ActorId> = live.difference(&dropped).copied().collect();
            prop_assert_eq!(unique, expected);
        }
    }
}
