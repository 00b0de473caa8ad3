use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Channel and timing model for a simulated run. Times are in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    pub loss_rate: f64,
    pub min_latency: u64,
    pub max_latency: u64,
    /// Sender retransmission timeout.
    pub timeout_ms: u64,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            min_latency: 10,
            max_latency: 100,
            timeout_ms: 2000,
            seed: 0,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.loss_rate) {
            return Err(ConfigError::LossRate(self.loss_rate));
        }
        if self.min_latency > self.max_latency {
            return Err(ConfigError::LatencyRange {
                min: self.min_latency,
                max: self.max_latency,
            });
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// A retransmission can only overtake the original copy when a round trip
    /// may take longer than the timeout.
    pub fn allows_premature_retransmit(&self) -> bool {
        self.max_latency.saturating_mul(2) >= self.timeout_ms
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("loss rate must lie in [0, 1], got {0}")]
    LossRate(f64),
    #[error("min_latency {min} exceeds max_latency {max}")]
    LatencyRange { min: u64, max: u64 },
    #[error("timeout_ms must be positive")]
    ZeroTimeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SimConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert!(!config.allows_premature_retransmit());
    }

    #[test]
    fn rejects_out_of_range_loss() {
        let config = SimConfig {
            loss_rate: 1.5,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::LossRate(1.5)));
    }

    #[test]
    fn rejects_inverted_latency_range() {
        let config = SimConfig {
            min_latency: 50,
            max_latency: 10,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::LatencyRange { min: 50, max: 10 })
        ));
    }
}
