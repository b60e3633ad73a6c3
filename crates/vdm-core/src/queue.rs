//! Worker pool that runs published jobs.
//!
//! Keeps up to `workers` jobs running at once; further jobs wait in a bounded
//! channel. A job whose id is already running is not started a second time.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::config::VdmConfig;
use crate::error::QueueClosed;
use crate::job::{Job, JobId};

/// Handle on the dispatcher task. Dropping every handle (or calling
/// [`JobQueue::shutdown`]) lets running jobs finish and then stops the pool.
#[derive(Debug)]
pub struct JobQueue {
    tx: mpsc::Sender<Arc<Job>>,
    dispatcher: JoinHandle<()>,
}

impl JobQueue {
    pub fn spawn(workers: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let dispatcher = tokio::spawn(dispatch(rx, workers.max(1)));
        Self { tx, dispatcher }
    }

    pub fn from_config(cfg: &VdmConfig) -> Self {
        Self::spawn(cfg.queue_workers, cfg.queue_capacity)
    }

    /// Marks the job Pending and queues it for a worker.
    pub async fn publish(&self, job: Arc<Job>) -> Result<(), QueueClosed> {
        job.set_pending();
        tracing::debug!(job_id = %job.id(), url = %job.url(), "queued");
        self.tx.send(job).await.map_err(|_| QueueClosed)
    }

    /// Stops accepting jobs and waits for queued and running ones to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.dispatcher.await {
            tracing::warn!("job dispatcher ended abnormally: {}", e);
        }
    }
}

async fn dispatch(mut rx: mpsc::Receiver<Arc<Job>>, workers: usize) {
    let mut join_set = JoinSet::new();
    let mut in_flight: HashSet<JobId> = HashSet::new();

    loop {
        tokio::select! {
            next = rx.recv(), if join_set.len() < workers => {
                let Some(job) = next else { break };
                if !in_flight.insert(job.id().clone()) {
                    tracing::warn!(job_id = %job.id(), "job is already running, not starting it twice");
                    continue;
                }
                join_set.spawn(run_job(job));
            }
            Some(res) = join_set.join_next(), if !join_set.is_empty() => {
                match res {
                    Ok(id) => {
                        in_flight.remove(&id);
                    }
                    Err(e) => tracing::error!("job task join: {}", e),
                }
            }
        }
    }

    while let Some(res) = join_set.join_next().await {
        if let Err(e) = res {
            tracing::error!("job task join: {}", e);
        }
    }
}

async fn run_job(job: Arc<Job>) -> JobId {
    let id = job.id().clone();
    // A job stopped while queued skips the lookup; `start` then only finalizes it.
    if !job.is_livestream() && !job.status().is_terminal() {
        if let Err(e) = job.set_metadata().await {
            tracing::warn!(job_id = %id, url = %job.url(), "metadata: {}", e);
        }
    }
    if let Err(e) = job.start().await {
        tracing::error!(job_id = %id, "job {} failed: {}", id.short(), e);
    }
    id
}
