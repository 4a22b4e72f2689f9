//! Worker thread fetch loop.
//!
//! Each worker installs its local deque in a thread-local slot so that
//! tasks running on it can resubmit into the same deque without going
//! through the global injector. The fetch order is: own deque, global
//! injector (batch), peers in rotating order starting at `index + 1`.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

use crossbeam_deque::{Steal, Worker};
use crossbeam_utils::sync::Parker;

use crate::dispatcher::Shared;
use crate::pool::QueueEntry;
use crate::stats::WorkerCounters;

struct LocalQueue {
    dispatcher: u64,
    index: usize,
    deque: Worker<Box<QueueEntry>>,
}

thread_local! {
    static LOCAL: RefCell<Option<LocalQueue>> = const { RefCell::new(None) };
}

/// Push onto the calling thread's deque if it is a worker of `dispatcher`.
/// Hands the entry back otherwise.
pub(crate) fn push_local(dispatcher: u64, entry: Box<QueueEntry>) -> Result<(), Box<QueueEntry>> {
    let mut entry = Some(entry);
    let _ = LOCAL.try_with(|slot| {
        if let Ok(guard) = slot.try_borrow() {
            if let Some(q) = guard.as_ref().filter(|q| q.dispatcher == dispatcher) {
                if let Some(e) = entry.take() {
                    q.deque.push(e);
                }
            }
        }
    });
    match entry {
        None => Ok(()),
        Some(e) => Err(e),
    }
}

/// Index of the calling worker thread within its dispatcher.
pub(crate) fn current_index() -> Option<usize> {
    LOCAL
        .try_with(|slot| slot.try_borrow().ok().and_then(|g| g.as_ref().map(|q| q.index)))
        .ok()
        .flatten()
}

pub(crate) fn is_worker_of(dispatcher: u64) -> bool {
    LOCAL
        .try_with(|slot| {
            slot.try_borrow()
                .ok()
                .and_then(|g| g.as_ref().map(|q| q.dispatcher == dispatcher))
                .unwrap_or(false)
        })
        .unwrap_or(false)
}

enum Source {
    Local,
    Global,
    Stolen,
}

pub(crate) struct WorkerThread {
    index: usize,
    shared: Arc<Shared>,
    parker: Parker,
}

impl WorkerThread {
    pub(crate) fn new(index: usize, shared: Arc<Shared>, parker: Parker) -> Self {
        Self {
            index,
            shared,
            parker,
        }
    }

    pub(crate) fn run(self, deque: Worker<Box<QueueEntry>>) {
        LOCAL.with(|slot| {
            *slot.borrow_mut() = Some(LocalQueue {
                dispatcher: self.shared.id,
                index: self.index,
                deque,
            });
        });
        log::debug!("worker {} online", self.index);
        self.fetch_loop();
        LOCAL.with(|slot| slot.borrow_mut().take());
        log::debug!("worker {} exiting", self.index);
    }

    fn fetch_loop(&self) {
        let counters = &self.shared.counters[self.index];
        loop {
            if let Some((entry, source)) = self.find_work() {
                match source {
                    Source::Local => WorkerCounters::bump(&counters.local_pops),
                    Source::Global => WorkerCounters::bump(&counters.global_pops),
                    Source::Stolen => WorkerCounters::bump(&counters.steals),
                }
                self.execute(entry);
                continue;
            }

            // Queues are drained before honouring shutdown.
            if self.shared.shutdown.load(Ordering::Acquire) {
                break;
            }

            self.shared.signal.announce_idle(self.index);
            fence(Ordering::SeqCst);
            if self.shared.shutdown.load(Ordering::SeqCst) || self.has_visible_work() {
                self.shared.signal.clear_idle(self.index);
                continue;
            }
            WorkerCounters::bump(&counters.parks);
            self.parker.park_timeout(self.shared.park_timeout);
            self.shared.signal.clear_idle(self.index);
        }
    }

    fn find_work(&self) -> Option<(Box<QueueEntry>, Source)> {
        let mine = LOCAL.with(|slot| {
            let guard = slot.borrow();
            let q = guard.as_ref()?;
            if let Some(e) = q.deque.pop() {
                return Some((e, Source::Local));
            }
            loop {
                match self.shared.injector.steal_batch_and_pop(&q.deque) {
                    Steal::Success(e) => return Some((e, Source::Global)),
                    Steal::Empty => return None,
                    Steal::Retry => continue,
                }
            }
        });
        if mine.is_some() {
            return mine;
        }

        let n = self.shared.stealers.len();
        for k in 1..n {
            let victim = (self.index + k) % n;
            loop {
                match self.shared.stealers[victim].steal() {
                    Steal::Success(e) => return Some((e, Source::Stolen)),
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }
        None
    }

    fn has_visible_work(&self) -> bool {
        let local = LOCAL.with(|slot| {
            slot.borrow()
                .as_ref()
                .is_some_and(|q| !q.deque.is_empty())
        });
        local
            || !self.shared.injector.is_empty()
            || self.shared.stealers.iter().any(|s| !s.is_empty())
    }

    fn execute(&self, mut entry: Box<QueueEntry>) {
        let Some(task) = entry.take_task() else {
            self.shared.pool.release(entry);
            return;
        };
        let witness = Arc::clone(&task);
        log::trace!("worker {} running '{}'", self.index, witness.name());

        let outcome = panic::catch_unwind(AssertUnwindSafe(move || task.run()));
        self.shared.pool.release(entry);
        WorkerCounters::bump(&self.shared.counters[self.index].executed);

        if let Err(payload) = outcome {
            self.shared.poison(witness.name(), payload);
        }
    }
}
