use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use tokio::sync::RwLock;

use crate::types::{Job, JobFailure, JobId, JobStatus};

/// Claim on one running attempt of a job.
///
/// The handle remembers which attempt it was created for. Reporting an
/// outcome is a no-op (returns `false`) once the record has moved on, e.g.
/// after stale recovery re-queued it or the queue was cleared.
pub(crate) struct JobHandle {
    jobs: Arc<RwLock<HashMap<JobId, Job>>>,
    row: Job,
}

impl JobHandle {
    pub(crate) fn new(jobs: Arc<RwLock<HashMap<JobId, Job>>>, row: Job) -> Self {
        Self { jobs, row }
    }

    pub(crate) fn id(&self) -> &JobId {
        &self.row.id
    }

    fn holds(&self, current: &Job) -> bool {
        current.status == JobStatus::Running
            && current.attempt == self.row.attempt
            && current.attempt_started_at == self.row.attempt_started_at
    }

    pub(crate) async fn complete(self) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(self.id()) {
            Some(job) if self.holds(job) => {
                job.status = JobStatus::Completed;
                job.finished_at = Some(Utc::now());
                true
            }
            _ => {
                tracing::warn!(job_id = %self.row.id, "discarding completion for superseded attempt");
                false
            }
        }
    }

    pub(crate) async fn fail(self, error: JobFailure) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(self.id()) {
            Some(job) if self.holds(job) => {
                job.status = JobStatus::Failed;
                job.finished_at = Some(Utc::now());
                job.error = Some(error);
                true
            }
            _ => {
                tracing::warn!(job_id = %self.row.id, %error, "discarding failure for superseded attempt");
                false
            }
        }
    }
}
