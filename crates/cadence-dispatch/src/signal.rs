//! Worker wake signalling.
//!
//! Each worker owns a `Parker`; the shared side keeps the matching
//! `Unparker` plus an idle flag per worker. A worker publishes its idle
//! flag, re-checks every queue, and only then parks. A submitter pushes
//! first and then looks for an idle flag to clear. With both sides
//! sequentially consistent, either the submitter sees the flag and
//! unparks, or the worker's re-check sees the task.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_utils::sync::Unparker;
use crossbeam_utils::CachePadded;

pub(crate) struct WakeSignal {
    unparkers: Vec<Unparker>,
    idle: Vec<CachePadded<AtomicBool>>,
    next: AtomicUsize,
}

impl WakeSignal {
    pub(crate) fn new(unparkers: Vec<Unparker>) -> Self {
        let idle = unparkers
            .iter()
            .map(|_| CachePadded::new(AtomicBool::new(false)))
            .collect();
        Self {
            unparkers,
            idle,
            next: AtomicUsize::new(0),
        }
    }

    /// Wake one idle worker, round-robin. Returns `false` when every
    /// worker is busy (they will find the work on their next fetch).
    pub(crate) fn notify_one(&self) -> bool {
        let n = self.unparkers.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % n;
        for i in 0..n {
            let w = (start + i) % n;
            if self.idle[w].swap(false, Ordering::SeqCst) {
                self.unparkers[w].unpark();
                return true;
            }
        }
        false
    }

    pub(crate) fn notify_all(&self) {
        for (flag, unparker) in self.idle.iter().zip(&self.unparkers) {
            flag.store(false, Ordering::SeqCst);
            unparker.unpark();
        }
    }

    pub(crate) fn announce_idle(&self, worker: usize) {
        self.idle[worker].store(true, Ordering::SeqCst);
    }

    pub(crate) fn clear_idle(&self, worker: usize) {
        self.idle[worker].store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_utils::sync::Parker;
    use std::time::Duration;

    #[test]
    fn notify_one_skips_busy_workers() {
        let parkers: Vec<Parker> = (0..3).map(|_| Parker::new()).collect();
        let signal = WakeSignal::new(parkers.iter().map(|p| p.unparker().clone()).collect());

        assert!(!signal.notify_one(), "no worker is idle");

        signal.announce_idle(2);
        assert!(signal.notify_one());
        // Token left by unpark makes the park return immediately.
        parkers[2].park_timeout(Duration::from_secs(5));
        assert!(!signal.notify_one(), "flag was consumed");
    }

    #[test]
    fn clear_idle_withdraws_announcement() {
        let parker = Parker::new();
        let signal = WakeSignal::new(vec![parker.unparker().clone()]);
        signal.announce_idle(0);
        signal.clear_idle(0);
        assert!(!signal.notify_one());
    }
}
