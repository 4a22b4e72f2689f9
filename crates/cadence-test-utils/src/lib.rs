//! Test utilities and mock collaborators for cadence development.
//!
//! Provides a mock physics engine ([`CountingPhysics`]), a scene module
//! that records its hook calls ([`RecordingModule`]), a trivial
//! renderable ([`MockRenderable`]) and a dispatcher task that reports its
//! runs over a channel ([`CountingTask`]).

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::sync::Arc;
use std::time::Duration;

use cadence_dispatch::{Task, TaskRef};
use cadence_scene::{RenderDataLock, Renderable};
use crossbeam_channel::{Receiver, Sender};

pub use fixtures::{CompletionMode, CountingPhysics, RecordingModule};

/// Route `log` output through `env_logger` in test-friendly mode.
/// Safe to call from every test.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A renderable with nothing but a name and a render-data lock.
pub struct MockRenderable {
    name: String,
    lock: RenderDataLock,
}

impl MockRenderable {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            lock: RenderDataLock::new(),
        })
    }
}

impl Renderable for MockRenderable {
    fn name(&self) -> &str {
        &self.name
    }

    fn render_data_lock(&self) -> &RenderDataLock {
        &self.lock
    }
}

/// A dispatcher task that optionally sleeps, then sends its index.
pub struct CountingTask {
    index: usize,
    delay: Option<Duration>,
    done: Sender<usize>,
}

impl CountingTask {
    pub fn new(index: usize, delay: Option<Duration>, done: Sender<usize>) -> Arc<Self> {
        Arc::new(Self { index, delay, done })
    }

    /// `count` tasks numbered `0..count` sharing one completion channel.
    pub fn batch(count: usize, delay: Option<Duration>) -> (Vec<TaskRef>, Receiver<usize>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let tasks = (0..count)
            .map(|i| CountingTask::new(i, delay, tx.clone()) as TaskRef)
            .collect();
        (tasks, rx)
    }
}

impl Task for CountingTask {
    fn name(&self) -> &str {
        "counting"
    }

    fn run(self: Arc<Self>) {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let _ = self.done.send(self.index);
    }
}
