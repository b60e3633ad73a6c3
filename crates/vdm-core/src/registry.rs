//! Registry of known jobs, keyed by [`JobId`].

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::RegistryError;
use crate::job::{Job, JobId, JobSnapshot, JobStatus};

/// Lookup table of jobs shared by request handlers and workers.
pub trait JobRegistry: Send + Sync {
    /// Inserts or replaces the job under its id.
    fn set(&self, job: Arc<Job>);
    fn get(&self, id: &JobId) -> Result<Arc<Job>, RegistryError>;
    fn delete(&self, id: &JobId);
    fn keys(&self) -> Vec<JobId>;
    fn all(&self) -> Vec<JobSnapshot>;

    /// Kills every job and removes all of them. Returns the ids whose process
    /// was actually signalled.
    fn kill_all(&self) -> Vec<JobId> {
        tracing::info!("killing all jobs");
        let mut killed = Vec::new();
        for id in self.keys() {
            let Ok(job) = self.get(&id) else { continue };
            match job.kill() {
                Ok(()) => {
                    tracing::info!(job_id = %id, "killed");
                    killed.push(id.clone());
                }
                Err(e) => tracing::info!(job_id = %id, "not killed: {}", e),
            }
            self.delete(&id);
        }
        killed
    }

    /// Removes every Completed job; Errored and unfinished jobs stay.
    fn clear_completed(&self) -> usize {
        let mut cleared = 0;
        for id in self.keys() {
            let completed = self
                .get(&id)
                .is_ok_and(|job| job.status() == JobStatus::Completed);
            if completed {
                self.delete(&id);
                cleared += 1;
            }
        }
        tracing::info!(cleared, "cleared completed jobs");
        cleared
    }
}

/// In-memory registry. Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    jobs: Arc<RwLock<HashMap<JobId, Arc<Job>>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts a task that logs every completed job and drops the ones created
    /// with `auto_remove`. Pass the sender to [`crate::job::JobContext::with_completions`].
    pub fn watch_completions(&self) -> (mpsc::UnboundedSender<JobId>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<JobId>();
        let registry = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(id) = rx.recv().await {
                let Ok(job) = registry.get(&id) else {
                    tracing::debug!(job_id = %id, "completed job is not registered");
                    continue;
                };
                let info = job.info();
                let output = job.output();
                tracing::info!(
                    job_id = %id,
                    status = ?job.status(),
                    "job {} completed: {} -> {}",
                    id.short(),
                    info.title,
                    output.saved_file_path
                );
                if job.auto_remove() {
                    registry.delete(&id);
                }
            }
        });
        (tx, handle)
    }
}

impl JobRegistry for MemoryRegistry {
    fn set(&self, job: Arc<Job>) {
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job.id().clone(), job);
    }

    fn get(&self, id: &JobId) -> Result<Arc<Job>, RegistryError> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    fn delete(&self, id: &JobId) {
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    fn keys(&self) -> Vec<JobId> {
        let mut keys: Vec<JobId> = self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    fn all(&self) -> Vec<JobSnapshot> {
        let jobs: Vec<Arc<Job>> = self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut snapshots: Vec<JobSnapshot> = jobs.iter().map(|j| j.snapshot()).collect();
        snapshots.sort_by(|a, b| a.info.created_at.cmp(&b.info.created_at));
        snapshots
    }
}
