use std::time::Duration;

use core_types::Score;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::signal::SignalWeights;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid engine config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Evidence further than this from an incident's first observation opens a new incident.
    pub dedup_window_secs: u64,
    /// Points subtracted by one contradicting evidence item.
    pub contradiction_decay: Score,
    pub lock_timeout_ms: u64,
    pub weights: SignalWeights,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: 3600,
            contradiction_decay: Score::from_points(10),
            lock_timeout_ms: 2000,
            weights: SignalWeights::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dedup_window_secs == 0 {
            return Err(ConfigError::Invalid("dedup_window_secs must be positive".into()));
        }
        if self.contradiction_decay == Score::ZERO {
            return Err(ConfigError::Invalid(
                "contradiction_decay must be in (0, 100]".into(),
            ));
        }
        if self.lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid("lock_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.lock_timeout(), Duration::from_secs(2));
        assert_eq!(cfg.contradiction_decay, Score::from_points(10));
    }

    #[test]
    fn zero_decay_is_rejected() {
        let cfg = EngineConfig {
            contradiction_decay: Score::ZERO,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"contradiction_decay": 12.5, "weights": {"dns_query": 5}}"#)
                .unwrap();
        assert_eq!(cfg.dedup_window_secs, 3600);
        assert_eq!(cfg.contradiction_decay, Score::from_hundredths(1250));
        assert_eq!(cfg.weights.dns_query, 5);
        assert_eq!(cfg.weights.flow_signal, 20);
    }
}
