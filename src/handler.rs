use std::{collections::HashMap, future::Future, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::{runner::ExecutionContext, types::JobType};

/// Performs the work for one job type.
///
/// Returning `Err` (or panicking) fails the attempt; the queue decides
/// whether it is retried.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, ctx: ExecutionContext) -> anyhow::Result<Bytes>;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Bytes>> + Send + 'static,
{
    async fn handle(&self, ctx: ExecutionContext) -> anyhow::Result<Bytes> {
        (self)(ctx).await
    }
}

/// Handlers keyed by job type. Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<JobType, Arc<dyn JobHandler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `job_type`, replacing any earlier one.
    pub fn register<H: JobHandler + 'static>(&self, job_type: impl Into<JobType>, handler: H) {
        let job_type = job_type.into();
        let replaced = self.handlers.write().insert(job_type.clone(), Arc::new(handler));
        if replaced.is_some() {
            tracing::debug!(%job_type, "replaced job handler");
        }
    }

    pub fn get(&self, job_type: &JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.read().get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &JobType) -> bool {
        self.handlers.read().contains_key(job_type)
    }

    pub fn job_types(&self) -> Vec<JobType> {
        let mut types: Vec<JobType> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }
}
