use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::{
    handler::JobHandler,
    types::{FailureKind, Job, JobFailure, JobId, JobType},
};

/// What a handler receives for one attempt.
#[derive(Clone)]
pub struct ExecutionContext {
    pub job: Job,
    pub logger: ExecutionLogger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Attempt-scoped logger. Lines go to `tracing` and are also kept so the
/// runner can attach them to the [`JobResult`].
#[derive(Clone)]
pub struct ExecutionLogger {
    job_id: JobId,
    job_type: JobType,
    worker_id: String,
    attempt: u32,
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl ExecutionLogger {
    pub fn new(job: &Job, worker_id: impl Into<String>) -> Self {
        Self {
            job_id: job.id.clone(),
            job_type: job.job_type.clone(),
            worker_id: worker_id.into(),
            attempt: job.attempt,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message.into());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message.into());
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    fn log(&self, level: LogLevel, message: String) {
        let job_id = self.job_id.as_str();
        let job_type = self.job_type.as_str();
        let worker_id = self.worker_id.as_str();
        let attempt = self.attempt;
        match level {
            LogLevel::Debug => tracing::debug!(job_id, job_type, worker_id, attempt, "{message}"),
            LogLevel::Info => tracing::info!(job_id, job_type, worker_id, attempt, "{message}"),
            LogLevel::Warn => tracing::warn!(job_id, job_type, worker_id, attempt, "{message}"),
            LogLevel::Error => tracing::error!(job_id, job_type, worker_id, attempt, "{message}"),
        }
        self.entries.lock().push(LogEntry {
            level,
            message,
            at: Utc::now(),
        });
    }

    fn take_entries(&self) -> Vec<LogEntry> {
        std::mem::take(&mut *self.entries.lock())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Failure,
}

/// Outcome of a single attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub status: ResultStatus,
    pub output: Option<Bytes>,
    pub execution_time_ms: u64,
    pub error: Option<JobFailure>,
    pub logs: Vec<LogEntry>,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    pub(crate) fn failure(job_id: JobId, error: JobFailure, execution_time_ms: u64, logs: Vec<LogEntry>) -> Self {
        Self {
            job_id,
            status: ResultStatus::Failure,
            output: None,
            execution_time_ms,
            error: Some(error),
            logs,
        }
    }
}

/// Runs one handler invocation and turns whatever happens into a [`JobResult`].
pub struct ExecutionRunner;

impl ExecutionRunner {
    pub async fn run(job: &Job, handler: Option<Arc<dyn JobHandler>>, worker_id: &str) -> JobResult {
        let logger = ExecutionLogger::new(job, worker_id);
        let started = Instant::now();

        let Some(handler) = handler else {
            let error = JobFailure::new(
                FailureKind::UnregisteredType,
                format!("no handler registered for job type {}", job.job_type),
            );
            logger.error(error.message.clone());
            return JobResult::failure(job.id.clone(), error, 0, logger.take_entries());
        };

        let ctx = ExecutionContext {
            job: job.clone(),
            logger: logger.clone(),
        };
        let span = tracing::info_span!(
            "execute_job",
            job_id = job.id.as_str(),
            job_type = job.job_type.as_str(),
            worker_id,
            attempt = job.attempt
        );
        let outcome = AssertUnwindSafe(handler.handle(ctx))
            .catch_unwind()
            .instrument(span)
            .await;
        let execution_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(Ok(output)) => JobResult {
                job_id: job.id.clone(),
                status: ResultStatus::Success,
                output: Some(output),
                execution_time_ms,
                error: None,
                logs: logger.take_entries(),
            },
            Ok(Err(err)) => {
                let error = JobFailure::new(FailureKind::Handler, format!("{err:#}"));
                JobResult::failure(job.id.clone(), error, execution_time_ms, logger.take_entries())
            }
            Err(panic) => {
                let error = JobFailure::new(FailureKind::Panic, panic_message(panic.as_ref()));
                tracing::error!(job_id = job.id.as_str(), "handler panicked: {}", error.message);
                JobResult::failure(job.id.clone(), error, execution_time_ms, logger.take_entries())
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("handler panicked: {message}")
    } else {
        "handler panicked".to_string()
    }
}
