//! In-process job execution core: a priority-ordered in-memory job queue
//! and a fixed-size pool of workers that run registered handlers with
//! bounded retry and exponential backoff.
//!
//! Jobs live only in process memory. Delivery is at-least-once: an
//! attempt that runs past the stale timeout is force-failed and may be
//! retried while the original attempt is still executing.
//!
//! ```rust,ignore
//! let queue = JobQueue::new(config)?;
//! queue.register_handler("summarize", |ctx: ExecutionContext| async move {
//!     ctx.logger.info("summarizing");
//!     Ok::<_, anyhow::Error>(Bytes::from_static(b"done"))
//! });
//!
//! let pool = WorkerPool::new(queue.clone());
//! pool.start();
//! queue.enqueue(Job::new("job-1", "summarize", Priority::High, payload)).await?;
//! // ...
//! pool.stop().await;
//! ```

pub mod config;
pub mod error;
pub mod handler;
mod job_handle;
pub mod pool;
pub mod queue;
pub mod runner;
pub mod types;
pub mod worker;

pub use config::QueueConfig;
pub use error::{ConfigError, QueueError, Result};
pub use handler::{HandlerRegistry, JobHandler};
pub use pool::{PoolStats, WorkerPool};
pub use queue::{JobQueue, QueueStats};
pub use runner::{ExecutionContext, ExecutionLogger, ExecutionRunner, JobResult, LogEntry, LogLevel, ResultStatus};
pub use types::{FailureKind, Job, JobFailure, JobId, JobPayload, JobStatus, JobType, Priority};
pub use worker::{Worker, WorkerSnapshot, WorkerStatus};
