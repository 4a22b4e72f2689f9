//! Lock-aware traversal of a scene's renderable actors.
//!
//! The iterator works on a private snapshot of the actor list taken
//! under the scene's write lock. Each call to `next` retakes the read
//! lock, so actors may be added or removed between calls; removals null
//! the matching snapshot slot, so a removed actor is never returned.
//!
//! Traversal is two-phase. The first pass walks the snapshot and takes
//! every actor whose render-data lock is free; busy actors are deferred.
//! Once the pass is exhausted the deferred actors are taken one by one
//! with a blocking lock. Every live actor is returned exactly once per
//! [`reset`](RenderableIterator::reset).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use cadence_core::{ActorId, SceneError};

use crate::actors::{ActorList, RenderableRef};

pub(crate) struct IterState {
    snapshot: Vec<Option<RenderableRef>>,
    cursor: usize,
    deferred: Vec<usize>,
    held: Option<RenderableRef>,
}

impl IterState {
    fn capture(list: &ActorList) -> Self {
        Self {
            snapshot: list.actors().iter().cloned().map(Some).collect(),
            cursor: 0,
            deferred: Vec::new(),
            held: None,
        }
    }

    fn release_held(&mut self) {
        if let Some(prev) = self.held.take() {
            prev.lock().unlock();
        }
    }

    /// Forget `id`. Called by the scene with its write lock held.
    pub(crate) fn remove_cached_actor(&mut self, id: ActorId) {
        let Some(slot) = self
            .snapshot
            .iter()
            .position(|s| s.as_ref().is_some_and(|a| a.id() == id))
        else {
            return;
        };
        self.snapshot[slot] = None;
        self.deferred.retain(|&d| d != slot);
        if self.held.as_ref().is_some_and(|h| h.id() == id) {
            self.release_held();
        }
    }

    fn advance(&mut self) -> Option<RenderableRef> {
        self.release_held();

        while self.cursor < self.snapshot.len() {
            let slot = self.cursor;
            self.cursor += 1;
            if let Some(actor) = &self.snapshot[slot] {
                if actor.lock().try_lock() {
                    self.held = Some(actor.clone());
                    return self.held.clone();
                }
                self.deferred.push(slot);
            }
        }

        while let Some(slot) = self.deferred.pop() {
            if let Some(actor) = &self.snapshot[slot] {
                actor.lock().lock();
                self.held = Some(actor.clone());
                return self.held.clone();
            }
        }
        None
    }
}

/// Iterator over a scene's renderables, each returned with its
/// render-data lock held until the following call to `next`.
///
/// At most one iterator exists per scene; dropping it (or passing it to
/// `Scene::release_renderable_iterator`) releases the last held lock and
/// lets a new one be created.
///
/// The blocking phase waits on render-data locks while holding the
/// scene's read lock. A thread holding a render-data lock must not wait
/// on the scene's write lock (e.g. by removing actors) before unlocking.
pub struct RenderableIterator {
    actors: Arc<RwLock<ActorList>>,
    state: Arc<Mutex<IterState>>,
}

impl RenderableIterator {
    pub(crate) fn create(actors: Arc<RwLock<ActorList>>) -> Result<Self, SceneError> {
        let state = {
            let mut list = actors.write().unwrap_or_else(PoisonError::into_inner);
            if list.iterator.is_some() {
                return Err(SceneError::IteratorAlreadyLive);
            }
            let state = Arc::new(Mutex::new(IterState::capture(&list)));
            list.iterator = Some(Arc::clone(&state));
            state
        };
        Ok(Self { actors, state })
    }

    fn lock_state(&self) -> MutexGuard<'_, IterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release the held actor and retake the snapshot from the current
    /// actor list.
    pub fn reset(&mut self) {
        let list = self.actors.write().unwrap_or_else(PoisonError::into_inner);
        let mut state = self.lock_state();
        state.release_held();
        *state = IterState::capture(&list);
    }

    /// [`reset`](Self::reset), then return the first actor.
    pub fn first(&mut self) -> Option<RenderableRef> {
        self.reset();
        self.next()
    }

    /// Actors in the snapshot that have not been returned yet and were
    /// not removed.
    pub fn remaining(&self) -> usize {
        let state = self.lock_state();
        let unvisited = state.snapshot[state.cursor..]
            .iter()
            .filter(|s| s.is_some())
            .count();
        let deferred = state
            .deferred
            .iter()
            .filter(|&&d| state.snapshot[d].is_some())
            .count();
        unvisited + deferred
    }
}

impl Iterator for RenderableIterator {
    type Item = RenderableRef;

    fn next(&mut self) -> Option<RenderableRef> {
        let _list = self.actors.read().unwrap_or_else(PoisonError::into_inner);
        self.lock_state().advance()
    }
}

impl Drop for RenderableIterator {
    fn drop(&mut self) {
        let mut list = self.actors.write().unwrap_or_else(PoisonError::into_inner);
        self.lock_state().release_held();
        if list
            .iterator
            .as_ref()
            .is_some_and(|s| Arc::ptr_eq(s, &self.state))
        {
            list.iterator = None;
        }
    }
}

impl std::fmt::Debug for RenderableIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderableIterator")
            .field("remaining", &self.remaining())
            .finish()
    }
}
