use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::{
    queue::JobQueue,
    worker::{Worker, WorkerSnapshot, WorkerStatus},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub total_workers: usize,
    pub idle_workers: usize,
    pub busy_workers: usize,
    pub total_jobs_processed: u64,
}

struct Running {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Fixed set of `max_concurrency` workers sharing one [`JobQueue`].
pub struct WorkerPool {
    queue: JobQueue,
    workers: Vec<Worker>,
    /// Held for the whole of `stop`, so `start` cannot interleave with it.
    running: Mutex<Option<Running>>,
    active: AtomicBool,
}

impl WorkerPool {
    pub fn new(queue: JobQueue) -> Self {
        let workers = (0..queue.config().max_concurrency)
            .map(|index| Worker::new(format!("worker-{index}"), queue.clone()))
            .collect();
        Self {
            queue,
            workers,
            running: Mutex::new(None),
            active: AtomicBool::new(false),
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Starts the queue, every worker loop, and the stale job monitor.
    /// Must be called from within a tokio runtime.
    ///
    /// Returns `false` without doing anything if the pool is already
    /// running or a `stop` is still in progress.
    pub fn start(&self) -> bool {
        let Ok(mut running) = self.running.try_lock() else {
            tracing::warn!("worker pool is stopping, start ignored");
            return false;
        };
        if running.is_some() {
            return false;
        }

        self.queue.start();
        let (shutdown, receiver) = watch::channel(false);
        let mut tasks: Vec<JoinHandle<()>> = self
            .workers
            .iter()
            .map(|worker| tokio::spawn(worker.clone().run(receiver.clone())))
            .collect();
        tasks.push(tokio::spawn(monitor_stale_jobs(self.queue.clone(), receiver)));

        *running = Some(Running { shutdown, tasks });
        self.active.store(true, Ordering::SeqCst);
        tracing::info!(workers = self.workers.len(), "worker pool started");
        true
    }

    /// Signals every worker to stop after its current attempt and waits
    /// until all of them have exited. Safe to call when already stopped;
    /// a concurrent call waits for the first one to finish.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(Running { shutdown, tasks }) = running.take() else {
            return;
        };

        let _ = shutdown.send(true);
        for task in tasks {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "worker task ended abnormally");
            }
        }

        self.queue.stop();
        self.active.store(false, Ordering::SeqCst);
        drop(running);
        tracing::info!(
            jobs_processed = self.get_stats().total_jobs_processed,
            "worker pool stopped"
        );
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn get_workers(&self) -> Vec<WorkerSnapshot> {
        self.workers.iter().map(Worker::snapshot).collect()
    }

    pub fn get_stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            total_workers: self.workers.len(),
            ..Default::default()
        };
        for worker in &self.workers {
            match worker.status() {
                WorkerStatus::Idle => stats.idle_workers += 1,
                WorkerStatus::Busy => stats.busy_workers += 1,
            }
            stats.total_jobs_processed += worker.jobs_processed();
        }
        stats
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            let _ = running.shutdown.send(true);
        }
    }
}

async fn monitor_stale_jobs(queue: JobQueue, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(queue.config().poll_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                let recovered = queue.recover_stale_jobs().await;
                if !recovered.is_empty() {
                    tracing::warn!(count = recovered.len(), "stale jobs recovered");
                }
            }
        }
    }
}
