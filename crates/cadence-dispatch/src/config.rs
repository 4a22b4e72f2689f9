//! Dispatcher configuration and validation.

use std::time::Duration;

use cadence_core::ConfigError;

/// Upper bound on the number of worker threads.
pub const MAX_WORKERS: usize = 64;

// ── DispatcherConfig ───────────────────────────────────────────────

/// Configuration for a [`Dispatcher`](crate::Dispatcher).
#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Number of worker threads. `None` = auto-detect
    /// (`available_parallelism - 1`, leaving a core for the caller,
    /// clamped to `[1, 64]`).
    pub worker_count: Option<usize>,
    /// Number of queue entries pre-allocated by the entry pool.
    /// Submissions beyond this many in flight fall back to the heap.
    /// Default: 256.
    pub entry_pool_capacity: usize,
    /// Upper bound on a single park. Wakeups are explicit, so this only
    /// bounds how long an idle worker sleeps between re-checks.
    /// Default: 10 ms.
    pub park_timeout: Duration,
    /// Prefix for worker thread names (`"{prefix}-{index}"`).
    /// Default: `"cadence-worker"`.
    pub thread_name_prefix: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: None,
            entry_pool_capacity: 256,
            park_timeout: Duration::from_millis(10),
            thread_name_prefix: "cadence-worker".to_string(),
        }
    }
}

impl DispatcherConfig {
    /// Config with an explicit worker count and defaults elsewhere.
    pub fn with_workers(worker_count: usize) -> Self {
        Self {
            worker_count: Some(worker_count),
            ..Self::default()
        }
    }

    /// Resolve the actual worker count, applying auto-detection if `None`.
    ///
    /// Explicit values are clamped to `[1, 64]`.
    pub fn resolved_worker_count(&self) -> usize {
        match self.worker_count {
            Some(n) => n.clamp(1, MAX_WORKERS),
            None => {
                let cpus = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(2);
                cpus.saturating_sub(1).clamp(1, MAX_WORKERS)
            }
        }
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == Some(0) {
            return Err(ConfigError::InvalidWorkerCount);
        }
        if self.entry_pool_capacity == 0 {
            return Err(ConfigError::PoolCapacityZero);
        }
        if self.park_timeout.is_zero() {
            return Err(ConfigError::InvalidParkTimeout);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(DispatcherConfig::default().validate().is_ok());
    }

    #[test]
    fn auto_worker_count_is_within_bounds() {
        let n = DispatcherConfig::default().resolved_worker_count();
        assert!((1..=MAX_WORKERS).contains(&n));
    }

    #[test]
    fn explicit_worker_count_is_clamped() {
        assert_eq!(DispatcherConfig::with_workers(1000).resolved_worker_count(), 64);
        assert_eq!(DispatcherConfig::with_workers(3).resolved_worker_count(), 3);
    }

    #[test]
    fn zero_workers_rejected() {
        let cfg = DispatcherConfig::with_workers(0);
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidWorkerCount));
    }

    #[test]
    fn zero_pool_and_zero_park_timeout_rejected() {
        let cfg = DispatcherConfig {
            entry_pool_capacity: 0,
            ..DispatcherConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::PoolCapacityZero));

        let cfg = DispatcherConfig {
            park_timeout: Duration::ZERO,
            ..DispatcherConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidParkTimeout));
    }
}
