use thiserror::Error;

use crate::types::JobId;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("job already exists: {0}")]
    DuplicateJob(JobId),

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("failed to decode payload: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("retry_backoff_multiplier must be a finite value >= 1.0 (got {0})")]
    Multiplier(f64),

    #[error("max_retry_delay_ms ({max}) is below retry_delay_ms ({base})")]
    DelayCeiling { base: u64, max: u64 },

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;
