//! Dispatcher counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live per-worker counters, cache-padded in the shared state.
#[derive(Default)]
pub(crate) struct WorkerCounters {
    pub(crate) executed: AtomicU64,
    pub(crate) local_pops: AtomicU64,
    pub(crate) global_pops: AtomicU64,
    pub(crate) steals: AtomicU64,
    pub(crate) parks: AtomicU64,
}

impl WorkerCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            executed: self.executed.load(Ordering::Relaxed),
            local_pops: self.local_pops.load(Ordering::Relaxed),
            global_pops: self.global_pops.load(Ordering::Relaxed),
            steals: self.steals.load(Ordering::Relaxed),
            parks: self.parks.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of one worker's counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Tasks run to completion (including ones that panicked).
    pub executed: u64,
    /// Tasks taken from the worker's own deque.
    pub local_pops: u64,
    /// Tasks taken from the global injector.
    pub global_pops: u64,
    /// Tasks stolen from a peer's deque.
    pub steals: u64,
    /// Times the worker parked with nothing to do.
    pub parks: u64,
}

/// Snapshot of the whole dispatcher.
#[derive(Clone, Debug, Default)]
pub struct DispatcherStats {
    /// One entry per worker, indexed by worker number.
    pub workers: Vec<WorkerStats>,
    /// Tasks accepted by `submit`.
    pub submitted: u64,
    /// Queue entries that had to be heap-allocated because the pool was
    /// exhausted.
    pub pool_fallback_allocations: u64,
}

impl DispatcherStats {
    /// Total tasks executed across all workers.
    pub fn executed(&self) -> u64 {
        self.workers.iter().map(|w| w.executed).sum()
    }

    /// Total successful steals across all workers.
    pub fn steals(&self) -> u64 {
        self.workers.iter().map(|w| w.steals).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_sum_over_workers() {
        let stats = DispatcherStats {
            workers: vec![
                WorkerStats {
                    executed: 3,
                    steals: 1,
                    ..WorkerStats::default()
                },
                WorkerStats {
                    executed: 4,
                    steals: 2,
                    ..WorkerStats::default()
                },
            ],
            submitted: 7,
            pool_fallback_allocations: 0,
        };
        assert_eq!(stats.executed(), 7);
        assert_eq!(stats.steals(), 3);
    }
}
