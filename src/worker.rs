use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{sync::watch, time::MissedTickBehavior};

use crate::{queue::JobQueue, types::JobId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub id: String,
    pub status: WorkerStatus,
    pub jobs_processed: u64,
    pub current_job: Option<JobId>,
}

#[derive(Default)]
struct WorkerState {
    ticking: AtomicBool,
    busy: AtomicBool,
    jobs_processed: AtomicU64,
    current_job: Mutex<Option<JobId>>,
}

/// One execution slot. Runs at most one job at a time.
#[derive(Clone)]
pub struct Worker {
    id: String,
    queue: JobQueue,
    state: Arc<WorkerState>,
}

impl Worker {
    pub fn new(id: impl Into<String>, queue: JobQueue) -> Self {
        Self {
            id: id.into(),
            queue,
            state: Arc::new(WorkerState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> WorkerStatus {
        if self.state.busy.load(Ordering::SeqCst) {
            WorkerStatus::Busy
        } else {
            WorkerStatus::Idle
        }
    }

    pub fn jobs_processed(&self) -> u64 {
        self.state.jobs_processed.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            id: self.id.clone(),
            status: self.status(),
            jobs_processed: self.jobs_processed(),
            current_job: self.state.current_job.lock().clone(),
        }
    }

    /// One poll step: claim the next job, run it, and hand failures to the
    /// retry policy. Returns `true` if a job was attempted.
    pub async fn tick(&self) -> bool {
        if self.state.ticking.swap(true, Ordering::SeqCst) {
            return false;
        }

        let Some(job) = self.queue.claim_next_job(&self.id).await else {
            self.state.ticking.store(false, Ordering::SeqCst);
            return false;
        };
        *self.state.current_job.lock() = Some(job.id.clone());
        self.state.busy.store(true, Ordering::SeqCst);

        let (result, recorded) = self.queue.execute_attempt(&job, &self.id).await;
        match &result.error {
            Some(error) if recorded => {
                if !error.is_retryable() {
                    tracing::warn!(job_id = %job.id, worker_id = %self.id, %error, "job failed permanently");
                } else if !self.queue.retry_job(&job.id).await {
                    tracing::warn!(
                        job_id = %job.id,
                        worker_id = %self.id,
                        attempt = job.attempt,
                        %error,
                        "job failed with no attempts left"
                    );
                }
            }
            _ => {}
        }

        self.state.jobs_processed.fetch_add(1, Ordering::SeqCst);
        *self.state.current_job.lock() = None;
        self.state.busy.store(false, Ordering::SeqCst);
        self.state.ticking.store(false, Ordering::SeqCst);
        true
    }

    /// Polls until `shutdown` flips to `true` or its sender goes away. The
    /// attempt in progress when shutdown arrives always runs to completion.
    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.queue.config().poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(worker_id = %self.id, "worker started");

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = interval.tick() => {}
                _ = self.queue.enqueued() => {}
            }
            loop {
                let stopping = *shutdown.borrow();
                if stopping || !self.tick().await {
                    break;
                }
            }
            if *shutdown.borrow() {
                break;
            }
        }

        tracing::debug!(worker_id = %self.id, jobs_processed = self.jobs_processed(), "worker stopped");
    }
}
