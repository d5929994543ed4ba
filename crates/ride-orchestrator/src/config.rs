//! # Orchestrator Configuration
//!
//! Every field has a default, so an empty or partial YAML file is valid:
//!
//! ```yaml
//! policy:
//!   waiting:
//!     grace_period_secs: 120
//!     paid_wait_secs: 300
//!     bonus_wait_secs: 240
//!   rider_cancel_grace_secs: 180
//!   compensation_min_distance_m: 1000
//!   compensation_min_en_route_secs: 60
//!   matching_window_secs: 10
//!   idle_alert_secs: 240
//! retry:
//!   max_retries: 3
//!   base_delay_ms: 200
//! auto_cancel_expired_wait: false
//! sweep_interval_secs: 5
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use ride_state::RidePolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Backoff for collaborator calls. Delays double each attempt:
/// 200ms, 400ms, 800ms with the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub policy: RidePolicy,
    pub retry: RetryPolicy,
    /// System-cancel rides whose waiting phase has expired, with reason
    /// `rider_no_show`. Off unless a deployment opts in.
    pub auto_cancel_expired_wait: bool,
    /// How often the background sweep runs.
    pub sweep_interval_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            policy: RidePolicy::default(),
            retry: RetryPolicy::default(),
            auto_cancel_expired_wait: false,
            sweep_interval_secs: 5,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sweep_interval_secs must be positive".into(),
            ));
        }
        if self.policy.idle_alert_secs == 0 {
            return Err(ConfigError::Invalid("idle_alert_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
