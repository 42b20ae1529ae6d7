//! Layered pipeline configuration: defaults, then an optional JSON file,
//! then `VIGIL_*` environment variables.

use std::path::{Path, PathBuf};

use alert_engine::AlertConfig;
use core_types::Score;
use incident_engine::EngineConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const ENV_DEDUP_WINDOW_SECS: &str = "VIGIL_DEDUP_WINDOW_SECS";
pub const ENV_CONTRADICTION_DECAY: &str = "VIGIL_CONTRADICTION_DECAY";
pub const ENV_LOCK_TIMEOUT_MS: &str = "VIGIL_LOCK_TIMEOUT_MS";
pub const ENV_RISK_BUCKET_WIDTH: &str = "VIGIL_RISK_BUCKET_WIDTH";
pub const ENV_AUTHORITY_SCOPE: &str = "VIGIL_AUTHORITY_SCOPE";
pub const ENV_WORKERS: &str = "VIGIL_WORKERS";
pub const ENV_LEDGER_PATH: &str = "VIGIL_LEDGER_PATH";
pub const ENV_ALERTS_PATH: &str = "VIGIL_ALERTS_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("environment variable {var}={value:?} is not valid: {reason}")]
    Env {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error(transparent)]
    Invalid(#[from] incident_engine::ConfigError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub engine: EngineConfig,
    pub alerts: AlertConfig,
    /// Policy scope whose active bundle routes every incident.
    pub authority_scope: String,
    pub workers: usize,
    /// JSONL audit ledger. In-memory when unset.
    pub ledger_path: Option<PathBuf>,
    /// JSONL alert store. In-memory when unset.
    pub alerts_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            alerts: AlertConfig::default(),
            authority_scope: "default".to_string(),
            workers: 4,
            ledger_path: None,
            alerts_path: None,
        }
    }
}

impl PipelineConfig {
    /// Defaults, overlaid by `file` when given, overlaid by the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(file, |var| std::env::var(var).ok())
    }

    pub fn load_with(
        file: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(env)?;
        config.validate()?;
        debug!(
            scope = %config.authority_scope,
            workers = config.workers,
            file = ?file,
            "pipeline config loaded"
        );
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = env(ENV_DEDUP_WINDOW_SECS) {
            self.engine.dedup_window_secs = parse_env(ENV_DEDUP_WINDOW_SECS, &v)?;
        }
        if let Some(v) = env(ENV_CONTRADICTION_DECAY) {
            self.engine.contradiction_decay = parse_env::<Score>(ENV_CONTRADICTION_DECAY, &v)?;
        }
        if let Some(v) = env(ENV_LOCK_TIMEOUT_MS) {
            let ms: u64 = parse_env(ENV_LOCK_TIMEOUT_MS, &v)?;
            self.engine.lock_timeout_ms = ms;
            self.alerts.lock_timeout_ms = ms;
        }
        if let Some(v) = env(ENV_RISK_BUCKET_WIDTH) {
            self.alerts.risk_bucket_width = parse_env(ENV_RISK_BUCKET_WIDTH, &v)?;
        }
        if let Some(v) = env(ENV_AUTHORITY_SCOPE) {
            self.authority_scope = v.trim().to_string();
        }
        if let Some(v) = env(ENV_WORKERS) {
            self.workers = parse_env(ENV_WORKERS, &v)?;
        }
        if let Some(v) = env(ENV_LEDGER_PATH) {
            self.ledger_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env(ENV_ALERTS_PATH) {
            self.alerts_path = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        self.alerts.validate()?;
        if self.workers == 0 {
            return Err(incident_engine::ConfigError::Invalid("workers must be at least 1".into()).into());
        }
        if self.authority_scope.is_empty() {
            return Err(
                incident_engine::ConfigError::Invalid("authority_scope must not be empty".into())
                    .into(),
            );
        }
        Ok(())
    }
}

fn parse_env<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
