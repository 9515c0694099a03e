use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tuning for the queue and its worker pool. Every option is required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub max_concurrency: usize,
    pub default_max_attempts: u32,
    pub retry_delay_ms: u64,
    pub retry_backoff_multiplier: f64,
    pub max_retry_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub stale_job_timeout_ms: u64,
}

impl QueueConfig {
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: QueueConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Zero { field: "max_concurrency" });
        }
        if self.default_max_attempts == 0 {
            return Err(ConfigError::Zero { field: "default_max_attempts" });
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Zero { field: "poll_interval_ms" });
        }
        if self.stale_job_timeout_ms == 0 {
            return Err(ConfigError::Zero { field: "stale_job_timeout_ms" });
        }
        if !self.retry_backoff_multiplier.is_finite() || self.retry_backoff_multiplier < 1.0 {
            return Err(ConfigError::Multiplier(self.retry_backoff_multiplier));
        }
        if self.max_retry_delay_ms < self.retry_delay_ms {
            return Err(ConfigError::DelayCeiling {
                base: self.retry_delay_ms,
                max: self.max_retry_delay_ms,
            });
        }
        Ok(())
    }

    /// Delay before retry number `attempt + 1`, where `attempt` is the
    /// counter value before the retry increments it.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.retry_delay_ms as f64 * self.retry_backoff_multiplier.powi(exponent);
        let capped = scaled.min(self.max_retry_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stale_job_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_job_timeout_ms)
    }
}
