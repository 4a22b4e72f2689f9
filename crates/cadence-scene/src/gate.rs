//! Manual-reset events used as frame synchronization gates.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A binary event that stays set until explicitly reset.
///
/// Every waiter is released by [`set`](Gate::set); the gate does not
/// clear itself when a waiter passes.
#[derive(Debug, Default)]
pub struct Gate {
    set: Mutex<bool>,
    changed: Condvar,
}

impl Gate {
    /// A gate in the given state.
    pub fn new(initially_set: bool) -> Self {
        Self {
            set: Mutex::new(initially_set),
            changed: Condvar::new(),
        }
    }

    /// Set the gate and release every waiter.
    pub fn set(&self) {
        *self.set.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.changed.notify_all();
    }

    /// Clear the gate.
    pub fn reset(&self) {
        *self.set.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    /// Current state.
    pub fn is_set(&self) -> bool {
        *self.set.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the gate is set.
    pub fn wait(&self) {
        let mut set = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        while !*set {
            set = self
                .changed
                .wait(set)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until the gate is set or `timeout` elapses. Returns whether
    /// the gate is set. A zero timeout polls.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut set = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        while !*set {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            set = self
                .changed
                .wait_timeout(set, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}
