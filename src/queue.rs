use std::{
    cmp::Ordering,
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock};
use tracing::instrument;

use crate::{
    config::QueueConfig,
    error::QueueError,
    handler::{HandlerRegistry, JobHandler},
    job_handle::JobHandle,
    runner::{ExecutionRunner, JobResult},
    types::{FailureKind, Job, JobFailure, JobId, JobStatus, JobType},
};

/// Counts of jobs per status, taken from one scan of the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub retrying: usize,
    pub canceled: usize,
    /// Running jobs whose current attempt is older than the stale timeout.
    pub stale: usize,
}

/// In-memory job store. Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct JobQueue {
    jobs: Arc<RwLock<HashMap<JobId, Job>>>,
    handlers: HandlerRegistry,
    config: Arc<QueueConfig>,
    active: Arc<AtomicBool>,
    sequence: Arc<AtomicU64>,
    wakeup: Arc<Notify>,
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> Result<Self, QueueError> {
        config.validate()?;
        Ok(Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            handlers: HandlerRegistry::new(),
            config: Arc::new(config),
            active: Arc::new(AtomicBool::new(false)),
            sequence: Arc::new(AtomicU64::new(0)),
            wakeup: Arc::new(Notify::new()),
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn register_handler<H: JobHandler + 'static>(&self, job_type: impl Into<JobType>, handler: H) {
        self.handlers.register(job_type, handler);
    }

    pub fn start(&self) {
        if !self.active.swap(true, AtomicOrdering::SeqCst) {
            tracing::info!("job queue started");
        }
    }

    pub fn stop(&self) {
        if self.active.swap(false, AtomicOrdering::SeqCst) {
            tracing::info!("job queue stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(AtomicOrdering::SeqCst)
    }

    /// Inserts `job` as `queued`. Runtime fields (timestamps, attempt,
    /// error) are reset; a missing `max_attempts` takes the configured default.
    #[instrument(skip_all, err, fields(job_id = %job.id, job_type = %job.job_type, priority = job.priority.as_str()))]
    pub async fn enqueue(&self, mut job: Job) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(QueueError::DuplicateJob(job.id));
        }

        job.status = JobStatus::Queued;
        job.created_at = Utc::now();
        job.started_at = None;
        job.attempt_started_at = None;
        job.finished_at = None;
        job.scheduled_at = None;
        job.attempt = 0;
        job.worker_id = None;
        job.error = None;
        job.max_attempts.get_or_insert(self.config.default_max_attempts);
        job.sequence = self.sequence.fetch_add(1, AtomicOrdering::SeqCst);

        jobs.insert(job.id.clone(), job);
        drop(jobs);

        self.wakeup.notify_waiters();
        Ok(())
    }

    pub async fn get_job(&self, id: &JobId) -> Option<Job> {
        self.jobs.read().await.get(id).cloned()
    }

    /// Peeks at the job a worker would claim next. Does not claim it.
    pub async fn get_next_job(&self) -> Option<Job> {
        self.get_next_job_at(Utc::now()).await
    }

    pub async fn get_next_job_at(&self, now: DateTime<Utc>) -> Option<Job> {
        let jobs = self.jobs.read().await;
        select_next(&jobs, now).cloned()
    }

    /// Selects the next eligible job and marks it `running` under a single
    /// write lock, so no two callers can claim the same job.
    pub async fn claim_next_job(&self, worker_id: &str) -> Option<Job> {
        self.claim_next_job_at(worker_id, Utc::now()).await
    }

    #[instrument(skip_all, fields(worker_id = worker_id, job_id = tracing::field::Empty))]
    pub async fn claim_next_job_at(&self, worker_id: &str, now: DateTime<Utc>) -> Option<Job> {
        if !self.is_active() {
            return None;
        }

        let mut jobs = self.jobs.write().await;
        let id = select_next(&jobs, now)?.id.clone();
        let job = jobs.get_mut(&id)?;
        mark_running(job, Some(worker_id), now);

        tracing::Span::current().record("job_id", id.as_str());
        tracing::debug!(attempt = job.attempt, "claimed job");
        Some(job.clone())
    }

    #[instrument(skip_all, err, fields(job_id = %id, status = %status))]
    pub async fn update_job_status(&self, id: &JobId, status: JobStatus) -> Result<(), QueueError> {
        let now = Utc::now();
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(id).ok_or_else(|| QueueError::JobNotFound(id.clone()))?;

        match status {
            JobStatus::Running => mark_running(job, None, now),
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled => {
                job.status = status;
                job.finished_at = Some(now);
            }
            JobStatus::Queued | JobStatus::Retrying => job.status = status,
        }
        Ok(())
    }

    /// Marks the job `failed` and records `error`. Never schedules a retry.
    #[instrument(skip_all, err, fields(job_id = %id))]
    pub async fn fail_job(&self, id: &JobId, error: JobFailure) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(id).ok_or_else(|| QueueError::JobNotFound(id.clone()))?;

        tracing::debug!(%error, attempt = job.attempt, "job failed");
        job.status = JobStatus::Failed;
        job.finished_at = Some(Utc::now());
        job.error = Some(error);
        Ok(())
    }

    pub async fn retry_job(&self, id: &JobId) -> bool {
        self.retry_job_at(id, Utc::now()).await
    }

    /// Moves a `failed` job to `retrying` with a backoff delay. Returns
    /// `false` for unknown jobs, jobs not in `failed`, and jobs whose
    /// attempts are exhausted (those stay `failed`).
    #[instrument(skip_all, ret, fields(job_id = %id))]
    pub async fn retry_job_at(&self, id: &JobId, now: DateTime<Utc>) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(id) {
            Some(job) if job.status == JobStatus::Failed => schedule_retry(job, &self.config, now),
            _ => false,
        }
    }

    /// Cancels a job that has not been claimed yet.
    #[instrument(skip_all, ret, fields(job_id = %id))]
    pub async fn cancel_job(&self, id: &JobId) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(id) {
            Some(job) if job.status == JobStatus::Queued => {
                job.status = JobStatus::Canceled;
                job.finished_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Runs `job`'s handler and records the outcome as `completed` or
    /// `failed`. Does not retry.
    ///
    /// `job` must be the snapshot of a running attempt (as returned by
    /// [`JobQueue::claim_next_job`] or read back after marking it running).
    /// If the store has since moved that job on, the result is still
    /// returned but not recorded.
    pub async fn execute_job(&self, job: &Job, worker_id: &str) -> JobResult {
        self.execute_attempt(job, worker_id).await.0
    }

    /// Same as [`JobQueue::execute_job`], also reporting whether the
    /// outcome was written to the store.
    pub(crate) async fn execute_attempt(&self, job: &Job, worker_id: &str) -> (JobResult, bool) {
        let handler = self.handlers.get(&job.job_type);
        let result = ExecutionRunner::run(job, handler, worker_id).await;

        let handle = JobHandle::new(Arc::clone(&self.jobs), job.clone());
        let recorded = match &result.error {
            None => handle.complete().await,
            Some(error) => handle.fail(error.clone()).await,
        };
        if recorded {
            tracing::debug!(
                job_id = %job.id,
                worker_id,
                status = ?result.status,
                execution_time_ms = result.execution_time_ms,
                "recorded job result"
            );
        }
        (result, recorded)
    }

    pub async fn recover_stale_jobs(&self) -> Vec<JobId> {
        self.recover_stale_jobs_at(Utc::now()).await
    }

    /// Force-fails every attempt running longer than the stale timeout and
    /// then applies the retry policy to it. Returns the affected ids.
    pub async fn recover_stale_jobs_at(&self, now: DateTime<Utc>) -> Vec<JobId> {
        let timeout = self.config.stale_job_timeout();
        let mut jobs = self.jobs.write().await;
        let mut recovered = Vec::new();

        for job in jobs.values_mut().filter(|job| is_stale(job, now, timeout)) {
            let message = format!(
                "job ran longer than {}ms on worker {}",
                self.config.stale_job_timeout_ms,
                job.worker_id.as_deref().unwrap_or("<unknown>"),
            );
            job.status = JobStatus::Failed;
            job.finished_at = Some(now);
            job.error = Some(JobFailure::new(FailureKind::Stale, message));
            let retried = schedule_retry(job, &self.config, now);

            tracing::warn!(job_id = %job.id, attempt = job.attempt, retried, "recovered stale job");
            recovered.push(job.id.clone());
        }
        recovered
    }

    pub async fn get_stats(&self) -> QueueStats {
        self.get_stats_at(Utc::now()).await
    }

    pub async fn get_stats_at(&self, now: DateTime<Utc>) -> QueueStats {
        let timeout = self.config.stale_job_timeout();
        let jobs = self.jobs.read().await;
        let mut stats = QueueStats {
            total: jobs.len(),
            ..Default::default()
        };

        for job in jobs.values() {
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Retrying => stats.retrying += 1,
                JobStatus::Canceled => stats.canceled += 1,
            }
            if is_stale(job, now, timeout) {
                stats.stale += 1;
            }
        }
        stats
    }

    /// Snapshot of every job in `status`, in selection order.
    pub async fn jobs_with_status(&self, status: JobStatus) -> Vec<Job> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<Job> = jobs.values().filter(|job| job.status == status).cloned().collect();
        matching.sort_by(selection_order);
        matching
    }

    /// Drops every record. Attempts still running can no longer report back.
    pub async fn clear(&self) -> usize {
        let mut jobs = self.jobs.write().await;
        let removed = jobs.len();
        jobs.clear();
        tracing::info!(removed, "cleared job queue");
        removed
    }

    /// Resolves on the next enqueue.
    pub(crate) async fn enqueued(&self) {
        self.wakeup.notified().await;
    }
}

/// Higher priority first, then earliest `created_at`, then insertion order.
fn selection_order(a: &Job, b: &Job) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.sequence.cmp(&b.sequence))
}

fn select_next(jobs: &HashMap<JobId, Job>, now: DateTime<Utc>) -> Option<&Job> {
    jobs.values()
        .filter(|job| job.is_eligible(now))
        .min_by(|a, b| selection_order(a, b))
}

fn mark_running(job: &mut Job, worker_id: Option<&str>, now: DateTime<Utc>) {
    if job.status == JobStatus::Running {
        return;
    }
    job.status = JobStatus::Running;
    job.started_at.get_or_insert(now);
    job.attempt_started_at = Some(now);
    job.finished_at = None;
    job.scheduled_at = None;
    job.worker_id = worker_id.map(str::to_string);
}

fn schedule_retry(job: &mut Job, config: &QueueConfig, now: DateTime<Utc>) -> bool {
    if job.attempt >= job.max_attempts() {
        tracing::info!(job_id = %job.id, attempt = job.attempt, "retries exhausted");
        return false;
    }

    let delay = config.retry_delay(job.attempt);
    job.attempt += 1;
    job.status = JobStatus::Retrying;
    job.scheduled_at = Some(add_delay(now, delay));
    job.worker_id = None;
    true
}

fn is_stale(job: &Job, now: DateTime<Utc>, timeout: Duration) -> bool {
    match (job.status, job.attempt_started_at) {
        (JobStatus::Running, Some(started)) => add_delay(started, timeout) <= now,
        _ => false,
    }
}

fn add_delay(at: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| at.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::{
        runner::{ExecutionContext, ResultStatus},
        types::{JobPayload, Priority},
    };

    fn config() -> QueueConfig {
        QueueConfig {
            max_concurrency: 2,
            default_max_attempts: 3,
            retry_delay_ms: 1_000,
            retry_backoff_multiplier: 2.0,
            max_retry_delay_ms: 3_000,
            poll_interval_ms: 10,
            stale_job_timeout_ms: 60_000,
        }
    }

    fn queue() -> JobQueue {
        let queue = JobQueue::new(config()).unwrap();
        queue.start();
        queue
    }

    fn job(id: &str, priority: Priority) -> Job {
        Job::new(id, "step", priority, JobPayload::new("org-1", "run-1"))
    }

    async fn fail_running(queue: &JobQueue, id: &JobId) {
        queue.update_job_status(id, JobStatus::Running).await.unwrap();
        queue
            .fail_job(id, JobFailure::new(FailureKind::Handler, "boom"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn enqueue_stores_queued_job_with_default_attempts() {
        let queue = queue();
        queue.enqueue(job("a", Priority::Low)).await.unwrap();
        queue.enqueue(job("b", Priority::Low).with_max_attempts(7)).await.unwrap();

        let a = queue.get_job(&"a".into()).await.unwrap();
        assert_eq!(a.status, JobStatus::Queued);
        assert_eq!(a.attempt, 0);
        assert_eq!(a.max_attempts, Some(3));
        assert_eq!(queue.get_job(&"b".into()).await.unwrap().max_attempts, Some(7));
        assert!(queue.get_job(&"missing".into()).await.is_none());
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let queue = queue();
        queue.enqueue(job("a", Priority::Low)).await.unwrap();

        let err = queue.enqueue(job("a", Priority::High)).await.unwrap_err();
        assert!(matches!(err, QueueError::DuplicateJob(id) if id.as_str() == "a"));
        assert_eq!(queue.get_job(&"a".into()).await.unwrap().priority, Priority::Low);
    }

    #[tokio::test]
    async fn next_job_prefers_priority_then_fifo() {
        let queue = queue();
        queue.enqueue(job("low", Priority::Low)).await.unwrap();
        queue.enqueue(job("medium-1", Priority::Medium)).await.unwrap();
        queue.enqueue(job("high", Priority::High)).await.unwrap();
        queue.enqueue(job("medium-2", Priority::Medium)).await.unwrap();

        let mut order = Vec::new();
        while let Some(next) = queue.claim_next_job("w").await {
            order.push(next.id.to_string());
        }
        assert_eq!(order, vec!["high", "medium-1", "medium-2", "low"]);
    }

    #[tokio::test]
    async fn get_next_job_does_not_claim() {
        let queue = queue();
        queue.enqueue(job("a", Priority::Medium)).await.unwrap();

        assert_eq!(queue.get_next_job().await.unwrap().id.as_str(), "a");
        assert_eq!(queue.get_next_job().await.unwrap().status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn inactive_queue_hands_out_nothing() {
        let queue = JobQueue::new(config()).unwrap();
        queue.enqueue(job("a", Priority::High)).await.unwrap();

        assert!(queue.claim_next_job("w").await.is_none());
        queue.start();
        assert!(queue.claim_next_job("w").await.is_some());
        queue.stop();
        queue.stop();
        assert!(!queue.is_active());
    }

    #[tokio::test]
    async fn running_records_first_start_only() {
        let queue = queue();
        let id = JobId::from("a");
        queue.enqueue(job("a", Priority::High)).await.unwrap();

        queue.update_job_status(&id, JobStatus::Running).await.unwrap();
        let first = queue.get_job(&id).await.unwrap().started_at;
        assert!(first.is_some());

        fail_running(&queue, &id).await;
        assert!(queue.retry_job_at(&id, Utc::now() - ChronoDuration::seconds(5)).await);
        let claimed = queue.claim_next_job("w").await.unwrap();
        assert_eq!(claimed.started_at, first);
        assert_eq!(claimed.worker_id.as_deref(), Some("w"));

        let missing = queue.update_job_status(&"nope".into(), JobStatus::Running).await;
        assert!(matches!(missing, Err(QueueError::JobNotFound(_))));
    }

    #[tokio::test]
    async fn retry_applies_backoff_and_respects_ceiling() {
        let queue = queue();
        let id = JobId::from("a");
        queue.enqueue(job("a", Priority::Medium).with_max_attempts(2)).await.unwrap();
        let now = Utc::now();

        fail_running(&queue, &id).await;
        assert!(queue.retry_job_at(&id, now).await);
        let retried = queue.get_job(&id).await.unwrap();
        assert_eq!(retried.status, JobStatus::Retrying);
        assert_eq!(retried.attempt, 1);
        assert_eq!(retried.scheduled_at, Some(now + ChronoDuration::milliseconds(1_000)));

        queue.update_job_status(&id, JobStatus::Running).await.unwrap();
        queue.fail_job(&id, JobFailure::new(FailureKind::Handler, "again")).await.unwrap();
        assert!(queue.retry_job_at(&id, now).await);
        let retried = queue.get_job(&id).await.unwrap();
        assert_eq!(retried.attempt, 2);
        assert_eq!(retried.scheduled_at, Some(now + ChronoDuration::milliseconds(2_000)));

        queue.update_job_status(&id, JobStatus::Running).await.unwrap();
        queue.fail_job(&id, JobFailure::new(FailureKind::Handler, "final")).await.unwrap();
        assert!(!queue.retry_job_at(&id, now).await);
        let exhausted = queue.get_job(&id).await.unwrap();
        assert_eq!(exhausted.status, JobStatus::Failed);
        assert_eq!(exhausted.attempt, 2);
        assert_eq!(exhausted.error.unwrap().message, "final");
    }

    #[tokio::test]
    async fn retry_rejects_jobs_that_are_not_failed() {
        let queue = queue();
        queue.enqueue(job("a", Priority::Medium)).await.unwrap();

        assert!(!queue.retry_job(&"a".into()).await);
        assert!(!queue.retry_job(&"missing".into()).await);
        assert_eq!(queue.get_job(&"a".into()).await.unwrap().status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn retrying_job_is_invisible_until_scheduled() {
        let queue = queue();
        let id = JobId::from("a");
        queue.enqueue(job("a", Priority::High)).await.unwrap();
        let now = Utc::now();
        fail_running(&queue, &id).await;
        assert!(queue.retry_job_at(&id, now).await);

        assert!(queue.get_next_job_at(now + ChronoDuration::milliseconds(999)).await.is_none());
        assert!(queue.claim_next_job_at("w", now + ChronoDuration::milliseconds(999)).await.is_none());

        let due = now + ChronoDuration::milliseconds(1_000);
        let claimed = queue.claim_next_job_at("w", due).await.unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.priority, Priority::High);
    }

    #[tokio::test]
    async fn cancel_only_affects_queued_jobs() {
        let queue = queue();
        for id in ["queued", "running", "done"] {
            queue.enqueue(job(id, Priority::Low)).await.unwrap();
        }
        queue.update_job_status(&"running".into(), JobStatus::Running).await.unwrap();
        queue.update_job_status(&"done".into(), JobStatus::Running).await.unwrap();
        queue.update_job_status(&"done".into(), JobStatus::Completed).await.unwrap();

        assert!(queue.cancel_job(&"queued".into()).await);
        assert!(!queue.cancel_job(&"queued".into()).await);
        assert!(!queue.cancel_job(&"running".into()).await);
        assert!(!queue.cancel_job(&"done".into()).await);
        assert!(!queue.cancel_job(&"missing".into()).await);

        assert_eq!(queue.get_job(&"queued".into()).await.unwrap().status, JobStatus::Canceled);
        assert_eq!(queue.get_job(&"running".into()).await.unwrap().status, JobStatus::Running);
        assert_eq!(queue.get_job(&"done".into()).await.unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn execute_job_records_failure_without_retrying() {
        let queue = queue();
        queue.register_handler("step", |_ctx: ExecutionContext| async {
            Err::<Bytes, _>(anyhow::anyhow!("provider unavailable"))
        });
        queue.enqueue(job("a", Priority::High)).await.unwrap();
        let claimed = queue.claim_next_job("w").await.unwrap();

        let result = queue.execute_job(&claimed, "w").await;

        assert_eq!(result.status, ResultStatus::Failure);
        assert_eq!(result.error.as_ref().unwrap().message, "provider unavailable");
        let stored = queue.get_job(&claimed.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.attempt, 0);
        assert_eq!(stored.error.unwrap().kind, FailureKind::Handler);
    }

    #[tokio::test]
    async fn execute_job_completes_on_success() {
        let queue = queue();
        queue.register_handler("step", |ctx: ExecutionContext| async move {
            Ok::<_, anyhow::Error>(Bytes::from(ctx.job.payload.run_id.clone()))
        });
        queue.enqueue(job("a", Priority::High)).await.unwrap();
        let claimed = queue.claim_next_job("w").await.unwrap();

        let result = queue.execute_job(&claimed, "w").await;

        assert_eq!(result.output, Some(Bytes::from_static(b"run-1")));
        let stored = queue.get_job(&claimed.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert!(stored.finished_at.is_some());
    }

    #[tokio::test]
    async fn execute_job_with_unregistered_type_fails_the_job() {
        let queue = queue();
        queue.enqueue(job("a", Priority::High)).await.unwrap();
        let claimed = queue.claim_next_job("w").await.unwrap();

        let result = queue.execute_job(&claimed, "w").await;

        assert_eq!(result.error.unwrap().kind, FailureKind::UnregisteredType);
        assert_eq!(queue.get_job(&claimed.id).await.unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn stale_jobs_are_counted_then_failed_and_retried() {
        let queue = queue();
        queue.enqueue(job("a", Priority::High).with_max_attempts(1)).await.unwrap();
        queue.enqueue(job("b", Priority::Low).with_max_attempts(0)).await.unwrap();
        let claimed_at = Utc::now();
        let a = queue.claim_next_job_at("w1", claimed_at).await.unwrap();
        let b = queue.claim_next_job_at("w2", claimed_at).await.unwrap();
        let later = claimed_at + ChronoDuration::milliseconds(60_000);

        assert_eq!(queue.get_stats_at(claimed_at).await.stale, 0);
        assert_eq!(queue.get_stats_at(later).await.stale, 2);

        let mut recovered = queue.recover_stale_jobs_at(later).await;
        recovered.sort();
        assert_eq!(recovered, vec![a.id.clone(), b.id.clone()]);

        let a_now = queue.get_job(&a.id).await.unwrap();
        assert_eq!(a_now.status, JobStatus::Retrying);
        assert_eq!(a_now.attempt, 1);
        let b_now = queue.get_job(&b.id).await.unwrap();
        assert_eq!(b_now.status, JobStatus::Failed);
        assert_eq!(b_now.error.unwrap().kind, FailureKind::Stale);

        // the original attempt finishing late must not overwrite the recovery
        queue.register_handler("step", |_ctx: ExecutionContext| async {
            Ok::<_, anyhow::Error>(Bytes::new())
        });
        queue.execute_job(&a, "w1").await;
        assert_eq!(queue.get_job(&a.id).await.unwrap().status, JobStatus::Retrying);
    }

    #[tokio::test]
    async fn stats_count_each_status() {
        let queue = queue();
        for id in ["a", "b", "c", "d"] {
            queue.enqueue(job(id, Priority::Medium)).await.unwrap();
        }
        queue.cancel_job(&"a".into()).await;
        fail_running(&queue, &"b".into()).await;
        queue.update_job_status(&"c".into(), JobStatus::Running).await.unwrap();

        let stats = queue.get_stats().await;
        assert_eq!(
            stats,
            QueueStats {
                total: 4,
                queued: 1,
                running: 1,
                completed: 0,
                failed: 1,
                retrying: 0,
                canceled: 1,
                stale: 0,
            }
        );

        let queued = queue.jobs_with_status(JobStatus::Queued).await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queue.clear().await, 4);
        assert_eq!(queue.get_stats().await, QueueStats::default());
    }
}
