//! Turning a subscription update into a download job.

use std::sync::Arc;

use anyhow::{Context, Result};

use super::{UpdateService, UpdateStatus};
use crate::job::{DownloadRequest, Job, JobContext, JobId};
use crate::queue::JobQueue;
use crate::registry::JobRegistry;

/// Creates a job for the update's video, registers and queues it, then marks
/// the update `queued_for_download`. Returns the new job's id.
///
/// A failure to update the status is logged; the job is queued regardless.
pub async fn queue_update_for_download(
    update_id: &str,
    updates: &dyn UpdateService,
    registry: &dyn JobRegistry,
    queue: &JobQueue,
    ctx: &JobContext,
) -> Result<JobId> {
    let update = updates
        .get_update(update_id)
        .await
        .with_context(|| format!("load subscription update {}", update_id))?
        .with_context(|| format!("subscription update {} not found", update_id))?;

    let job = Arc::new(Job::new(
        DownloadRequest::new(update.video_url.clone()),
        ctx.clone(),
    ));
    let id = job.id().clone();
    registry.set(job.clone());
    queue.publish(job).await?;
    tracing::info!(job_id = %id, url = %update.video_url, "queued subscription update for download");

    if let Err(e) = updates
        .update_status(update_id, UpdateStatus::QueuedForDownload)
        .await
    {
        tracing::warn!(update_id, "could not mark update as queued: {:#}", e);
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::Downloader;
    use crate::registry::MemoryRegistry;
    use crate::subscription::{MemoryUpdateService, SubscriptionVideoUpdate};

    fn ctx() -> JobContext {
        JobContext::new(Arc::new(Downloader::new("/nonexistent/vdm-test-tool")), ".")
    }

    #[tokio::test]
    async fn queues_job_and_marks_update() {
        let updates = MemoryUpdateService::new();
        let stored = updates
            .create_update(SubscriptionVideoUpdate::detected("s1", "https://e.com/v", "V"))
            .await
            .unwrap();
        let registry = MemoryRegistry::new();
        let queue = JobQueue::spawn(1, 4);

        let id = queue_update_for_download(&stored.id, &updates, &registry, &queue, &ctx())
            .await
            .unwrap();

        let job = registry.get(&id).unwrap();
        assert_eq!(job.url(), "https://e.com/v");
        let after = updates.get_update(&stored.id).await.unwrap().unwrap();
        assert_eq!(after.status, UpdateStatus::QueuedForDownload);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_update_is_an_error() {
        let updates = MemoryUpdateService::new();
        let registry = MemoryRegistry::new();
        let queue = JobQueue::spawn(1, 4);
        let err = queue_update_for_download("missing", &updates, &registry, &queue, &ctx())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert!(registry.is_empty());
        queue.shutdown().await;
    }
}
