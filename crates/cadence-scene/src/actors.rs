//! Renderable actors and their render-data locks.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use cadence_core::ActorId;

use crate::iterator::IterState;

// ── RenderDataLock ─────────────────────────────────────────────────

/// Per-actor lock over render data.
///
/// Unlike a `Mutex` guard this lock is not tied to a scope: the
/// renderable iterator takes it in one call and releases it in the next,
/// and `lock_all_renderables` / `unlock_all_renderables` bracket a whole
/// render pass.
#[derive(Debug, Default)]
pub struct RenderDataLock {
    locked: Mutex<bool>,
    released: Condvar,
}

impl RenderDataLock {
    /// An unlocked lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock is acquired.
    pub fn lock(&self) {
        let mut locked = self.locked.lock().unwrap_or_else(PoisonError::into_inner);
        while *locked {
            locked = self
                .released
                .wait(locked)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *locked = true;
    }

    /// Acquire the lock if it is free.
    pub fn try_lock(&self) -> bool {
        let mut locked = self.locked.lock().unwrap_or_else(PoisonError::into_inner);
        if *locked {
            return false;
        }
        *locked = true;
        true
    }

    /// Release the lock. Unlocking a free lock does nothing.
    pub fn unlock(&self) {
        *self.locked.lock().unwrap_or_else(PoisonError::into_inner) = false;
        self.released.notify_one();
    }

    /// Whether the lock is currently held.
    pub fn is_locked(&self) -> bool {
        *self.locked.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Renderable ─────────────────────────────────────────────────────

/// An actor whose render data is read by the render thread.
pub trait Renderable: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str {
        "renderable"
    }

    /// The lock guarding this actor's render data.
    fn render_data_lock(&self) -> &RenderDataLock;
}

/// A registered actor: its scene ID and the renderable itself.
#[derive(Clone)]
pub struct RenderableRef {
    id: ActorId,
    renderable: Arc<dyn Renderable>,
}

impl RenderableRef {
    /// The actor's ID within its scene.
    pub fn id(&self) -> ActorId {
        self.id
    }

    /// The renderable.
    pub fn renderable(&self) -> &Arc<dyn Renderable> {
        &self.renderable
    }

    pub(crate) fn lock(&self) -> &RenderDataLock {
        self.renderable.render_data_lock()
    }
}

impl fmt::Debug for RenderableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderableRef")
            .field("id", &self.id)
            .field("name", &self.renderable.name())
            .finish()
    }
}

// ── ActorList ──────────────────────────────────────────────────────

/// The scene's insertion-ordered actor list. Always accessed through the
/// scene's `RwLock`.
#[derive(Default)]
pub(crate) struct ActorList {
    actors: Vec<RenderableRef>,
    next_id: u64,
    pub(crate) iterator: Option<Arc<Mutex<IterState>>>,
}

impl ActorList {
    pub(crate) fn actors(&self) -> &[RenderableRef] {
        &self.actors
    }

    pub(crate) fn len(&self) -> usize {
        self.actors.len()
    }

    pub(crate) fn add(&mut self, renderable: Arc<dyn Renderable>) -> ActorId {
        let id = ActorId(self.next_id);
        self.next_id += 1;
        self.actors.push(RenderableRef { id, renderable });
        id
    }

    pub(crate) fn position(&self, id: ActorId) -> Option<usize> {
        self.actors.iter().position(|a| a.id == id)
    }

    /// Remove the actor at `index`, preserving order, and drop it from
    /// the live iterator's snapshot. Requires the write lock.
    pub(crate) fn remove_at(&mut self, index: usize) -> Option<RenderableRef> {
        if index >= self.actors.len() {
            return None;
        }
        let removed = self.actors.remove(index);
        if let Some(iter) = &self.iterator {
            iter.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove_cached_actor(removed.id);
        }
        Some(removed)
    }

    pub(crate) fn clear(&mut self) -> usize {
        let n = self.actors.len();
        while !self.actors.is_empty() {
            let last = self.actors.len() - 1;
            self.remove_at(last);
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn try_lock_fails_while_held() {
        let l = RenderDataLock::new();
        assert!(l.try_lock());
        assert!(!l.try_lock());
        assert!(l.is_locked());
        l.unlock();
        assert!(!l.is_locked());
        l.unlock();
        assert!(!l.is_locked(), "double unlock is harmless");
    }

    #[test]
    fn blocking_lock_waits_for_unlock() {
        let l = Arc::new(RenderDataLock::new());
        l.lock();
        let l2 = Arc::clone(&l);
        let waiter = std::thread::spawn(move || {
            l2.lock();
            l2.unlock();
        });
        std::thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        l.unlock();
        waiter.join().unwrap();
    }

    struct Dummy(RenderDataLock);
    impl Renderable for Dummy {
        fn render_data_lock(&self) -> &RenderDataLock {
            &self.0
        }
    }

    #[test]
    fn actor_ids_are_never_reused() {
        let mut list = ActorList::default();
        let a = list.add(Arc::new(Dummy(RenderDataLock::new())));
        let idx = list.position(a).unwrap();
        list.remove_at(idx);
        let b = list.add(Arc::new(Dummy(RenderDataLock::new())));
        assert_ne!(a, b);
        assert_eq!(list.len(), 1);
        assert_eq!(list.clear(), 1);
        assert!(list.actors().is_empty());
    }
}
