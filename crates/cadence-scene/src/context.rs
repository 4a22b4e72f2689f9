//! The scheduling context shared by every scene.

use std::sync::Arc;

use cadence_core::ConfigError;
use cadence_dispatch::{Dispatcher, DispatcherConfig, DispatcherHandle, DispatcherStats};

/// Owns the dispatcher that every scene built from it schedules onto.
///
/// Cloning is cheap and shares the same dispatcher. The worker threads
/// stop when the last clone (and every scene built from it) is dropped,
/// or when [`shutdown`](Dispatcher::shutdown) is called on
/// [`dispatcher`](Self::dispatcher).
#[derive(Clone, Debug)]
pub struct SchedulerContext {
    dispatcher: Arc<Dispatcher>,
}

impl SchedulerContext {
    /// Start a dispatcher with `config`.
    pub fn new(config: DispatcherConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            dispatcher: Arc::new(Dispatcher::new(config)?),
        })
    }

    /// The shared dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Submit-only handle to the shared dispatcher.
    pub fn handle(&self) -> DispatcherHandle {
        self.dispatcher.handle()
    }

    /// Counters of the shared dispatcher.
    pub fn stats(&self) -> DispatcherStats {
        self.dispatcher.stats()
    }
}
