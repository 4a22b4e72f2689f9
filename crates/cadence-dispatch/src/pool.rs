//! Fixed-size pool of reusable queue entries.
//!
//! Every submission needs a queue entry to travel through the
//! dispatcher's lock-free queues. The pool pre-allocates a fixed number
//! of boxed entries and recycles them through a bounded lock-free free
//! list, so steady-state submission performs no heap allocation. When the
//! pool is exhausted, [`EntryPool::acquire`] falls back to a fresh heap
//! entry that is freed instead of recycled on release.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_queue::ArrayQueue;

use crate::task::TaskRef;

// ── QueueEntry ─────────────────────────────────────────────────────

/// Wraps a task for storage in the dispatcher queues.
pub struct QueueEntry {
    task: Option<TaskRef>,
    pooled: bool,
}

impl QueueEntry {
    /// Whether this entry belongs to the pool (`true`) or is a heap
    /// fallback that is freed on release (`false`).
    pub fn is_pooled(&self) -> bool {
        self.pooled
    }

    /// Name of the wrapped task, or `""` if the entry is empty.
    pub fn task_name(&self) -> &str {
        self.task.as_deref().map_or("", |t| t.name())
    }

    /// Take the wrapped task, leaving the entry empty.
    pub fn take_task(&mut self) -> Option<TaskRef> {
        self.task.take()
    }
}

impl std::fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEntry")
            .field("task", &self.task_name())
            .field("pooled", &self.pooled)
            .finish()
    }
}

// ── EntryPool ──────────────────────────────────────────────────────

/// Lock-free pool of [`QueueEntry`] boxes.
pub struct EntryPool {
    free: ArrayQueue<Box<QueueEntry>>,
    fallback_allocations: AtomicU64,
}

impl EntryPool {
    /// Pre-allocate `capacity` entries. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let free = ArrayQueue::new(capacity);
        for _ in 0..capacity {
            // Cannot fail: the queue was sized for exactly this many.
            let _ = free.push(Box::new(QueueEntry {
                task: None,
                pooled: true,
            }));
        }
        Self {
            free,
            fallback_allocations: AtomicU64::new(0),
        }
    }

    /// Total number of pooled entries.
    pub fn capacity(&self) -> usize {
        self.free.capacity()
    }

    /// Number of pooled entries currently free.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Number of heap fallback entries handed out since creation.
    pub fn fallback_allocations(&self) -> u64 {
        self.fallback_allocations.load(Ordering::Relaxed)
    }

    /// Obtain an entry wrapping `task`.
    pub fn acquire(&self, task: TaskRef) -> Box<QueueEntry> {
        match self.free.pop() {
            Some(mut entry) => {
                entry.task = Some(task);
                entry
            }
            None => {
                let n = self.fallback_allocations.fetch_add(1, Ordering::Relaxed) + 1;
                log::debug!(
                    "entry pool exhausted ({} entries); heap fallback #{n} for task '{}'",
                    self.capacity(),
                    task.name()
                );
                Box::new(QueueEntry {
                    task: Some(task),
                    pooled: false,
                })
            }
        }
    }

    /// Return an entry. Pooled entries are cleared and recycled; fallback
    /// entries are dropped.
    pub fn release(&self, mut entry: Box<QueueEntry>) {
        entry.task = None;
        if entry.pooled {
            // At most `capacity` pooled entries exist, so this never overflows.
            let _ = self.free.push(entry);
        }
    }
}

impl std::fmt::Debug for EntryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryPool")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .field("fallback_allocations", &self.fallback_allocations())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::FnTask;
    use std::sync::Arc;

    fn noop() -> TaskRef {
        FnTask::new("noop", || {})
    }

    #[test]
    fn acquire_release_recycles_pooled_entries() {
        let pool = EntryPool::new(2);
        let a = pool.acquire(noop());
        assert!(a.is_pooled());
        assert_eq!(a.task_name(), "noop");
        assert_eq!(pool.available(), 1);
        pool.release(a);
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.fallback_allocations(), 0);
    }

    #[test]
    fn exhausted_pool_falls_back_to_heap() {
        let pool = EntryPool::new(1);
        let a = pool.acquire(noop());
        let b = pool.acquire(noop());
        assert!(a.is_pooled());
        assert!(!b.is_pooled());
        assert_eq!(pool.fallback_allocations(), 1);

        pool.release(b);
        assert_eq!(pool.available(), 0, "fallback entries are not recycled");
        pool.release(a);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn release_drops_the_task_reference() {
        let pool = EntryPool::new(1);
        let task = noop();
        let entry = pool.acquire(Arc::clone(&task));
        assert_eq!(Arc::strong_count(&task), 2);
        pool.release(entry);
        assert_eq!(Arc::strong_count(&task), 1);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        assert_eq!(EntryPool::new(0).capacity(), 1);
    }

    #[test]
    fn concurrent_acquire_release_keeps_pool_whole() {
        let pool = Arc::new(EntryPool::new(8));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let e = pool.acquire(noop());
                        pool.release(e);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(pool.available(), 8);
    }
}
