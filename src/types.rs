use std::{collections::BTreeMap, fmt};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::QueueError;

/// Caller-assigned job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Tag selecting the handler that runs a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobType(String);

impl JobType {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for JobType {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Scheduling tier. Variants are declared lowest first so the derived
/// ordering gives `High > Medium > Low`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Retrying,
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
            JobStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work description handed through to the handler untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub organization_id: String,
    pub run_id: String,
    pub step_id: Option<String>,
    pub input: Bytes,
    pub previous_outputs: BTreeMap<String, Bytes>,
}

impl JobPayload {
    pub fn new(organization_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            run_id: run_id.into(),
            ..Default::default()
        }
    }

    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn with_input(mut self, input: impl Into<Bytes>) -> Self {
        self.input = input.into();
        self
    }

    pub fn with_previous_output(mut self, step_id: impl Into<String>, output: impl Into<Bytes>) -> Self {
        self.previous_outputs.insert(step_id.into(), output.into());
        self
    }

    /// Replaces `input` with the bincode encoding of `value`.
    pub fn encode_input<T: Serialize>(&mut self, value: &T) -> Result<(), QueueError> {
        self.input = encode(value)?;
        Ok(())
    }

    pub fn decode_input<T: DeserializeOwned>(&self) -> Result<T, QueueError> {
        decode(&self.input)
    }

    pub fn decode_previous_output<T: DeserializeOwned>(&self, step_id: &str) -> Result<Option<T>, QueueError> {
        self.previous_outputs
            .get(step_id)
            .map(|bytes| decode(bytes))
            .transpose()
    }
}

pub fn encode<T: Serialize>(value: &T) -> Result<Bytes, QueueError> {
    let encoded = bincode::serde::encode_to_vec(value, bincode::config::standard())?;
    Ok(encoded.into())
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, QueueError> {
    let (decoded, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(decoded)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The handler returned an error.
    Handler,
    /// The handler panicked.
    Panic,
    /// No handler is registered for the job's type. Never retried.
    UnregisteredType,
    /// The attempt ran past the stale timeout and was force-failed.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub message: String,
    pub kind: FailureKind,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind != FailureKind::UnregisteredType
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub priority: Priority,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub attempt_started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub attempt: u32,
    /// `None` until enqueue, where the queue's configured default fills it in.
    pub max_attempts: Option<u32>,
    pub worker_id: Option<String>,
    pub payload: JobPayload,
    pub error: Option<JobFailure>,
    #[serde(skip)]
    pub(crate) sequence: u64,
}

impl Job {
    pub fn new(
        id: impl Into<JobId>,
        job_type: impl Into<JobType>,
        priority: Priority,
        payload: JobPayload,
    ) -> Self {
        Self {
            id: id.into(),
            job_type: job_type.into(),
            priority,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            attempt_started_at: None,
            finished_at: None,
            scheduled_at: None,
            attempt: 0,
            max_attempts: None,
            worker_id: None,
            payload,
            error: None,
            sequence: 0,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(0)
    }

    /// Whether selection may hand this job to a worker at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            JobStatus::Queued => true,
            JobStatus::Retrying => self.scheduled_at.map_or(true, |at| at <= now),
            _ => false,
        }
    }
}
