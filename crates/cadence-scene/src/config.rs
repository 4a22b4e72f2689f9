//! Scene configuration and validation.

use std::time::Duration;

use cadence_core::ConfigError;

/// Largest supported number of physics substeps per step.
pub const MAX_SUBSTEPS: u32 = 64;

/// Configuration for a [`Scene`](crate::Scene).
#[derive(Clone, Debug)]
pub struct SceneConfig {
    /// Name used for the scene's task graph in log output.
    /// Default: `"scene"`.
    pub name: String,
    /// Physics substeps per step. Each substep advances
    /// `elapsed_time / substep_count`. Default: 1.
    pub substep_count: u32,
    /// How often blocking waits re-check the dispatcher for poisoning or
    /// shutdown. Default: 50 ms.
    pub poll_interval: Duration,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            name: "scene".to_string(),
            substep_count: 1,
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl SceneConfig {
    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_SUBSTEPS).contains(&self.substep_count) {
            return Err(ConfigError::InvalidSubstepCount {
                value: self.substep_count,
                max: MAX_SUBSTEPS,
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidPollInterval);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(SceneConfig::default().validate().is_ok());
    }

    #[test]
    fn substep_bounds_enforced() {
        for bad in [0, MAX_SUBSTEPS + 1] {
            let cfg = SceneConfig {
                substep_count: bad,
                ..SceneConfig::default()
            };
            assert_eq!(
                cfg.validate(),
                Err(ConfigError::InvalidSubstepCount {
                    value: bad,
                    max: MAX_SUBSTEPS
                })
            );
        }
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let cfg = SceneConfig {
            poll_interval: Duration::ZERO,
            ..SceneConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidPollInterval));
    }
}
