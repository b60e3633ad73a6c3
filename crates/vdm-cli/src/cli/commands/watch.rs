//! `vdm watch <url>` – poll a subscription in the foreground until Ctrl-C.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use vdm_core::archive::Archiver;
use vdm_core::config::VdmConfig;
use vdm_core::downloader::Downloader;
use vdm_core::job::JobContext;
use vdm_core::queue::JobQueue;
use vdm_core::registry::{JobRegistry, MemoryRegistry};
use vdm_core::subscription::{
    queue_update_for_download, MemoryUpdateService, Scheduler, Subscription,
    SubscriptionVideoUpdate, TaskRunner, UpdateService, UpdateStatus,
};

use crate::cli::store::JsonlArchive;

pub async fn run_watch(cfg: &VdmConfig, url: &str, cron: &str, download: bool) -> Result<()> {
    let downloader = Arc::new(Downloader::from_config(cfg));
    let store = Arc::new(JsonlArchive::open_default()?);
    let (new_tx, mut new_rx) = mpsc::unbounded_channel();
    let updates = Arc::new(NotifyingUpdates::new(new_tx));

    let scheduler = Arc::new(Scheduler::new(
        downloader.clone(),
        store.clone(),
        updates.clone(),
        cfg.dispatch_capacity,
    ));
    let mut errors = scheduler
        .take_errors()
        .context("scheduler error channel already taken")?;
    let sub = Subscription::new(url, cron);
    scheduler.submit(sub.clone()).await?;

    let stop = CancellationToken::new();
    let spawner = tokio::spawn({
        let scheduler = scheduler.clone();
        let stop = stop.clone();
        async move { scheduler.spawner(stop).await }
    });

    let (publisher, archiver) = Archiver::spawn(store, cfg.archive_capacity);
    let registry = MemoryRegistry::new();
    let (done_tx, watcher) = registry.watch_completions();
    let ctx = JobContext::new(downloader, cfg.download_path.clone())
        .with_archive(publisher)
        .with_completions(done_tx);
    let queue = JobQueue::from_config(cfg);

    println!("Watching {url} ({cron}). Press Ctrl-C to stop.");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(update) = new_rx.recv() => {
                println!("New video: {} {}", update.video_title, update.video_url);
                if download {
                    match queue_update_for_download(&update.id, updates.as_ref(), &registry, &queue, &ctx).await {
                        Ok(id) => println!("  queued as job {}", id.short()),
                        Err(e) => eprintln!("  could not queue download: {:#}", e),
                    }
                }
            }
            Some(err) = errors.recv() => eprintln!("fetch failed: {:#}", err),
        }
    }

    tracing::info!(subscription_id = %sub.id, "watch interrupted, shutting down");
    scheduler.stop_task(&sub.id);
    stop.cancel();
    match spawner.await {
        Ok(Err(e)) => tracing::warn!("spawner: {}", e),
        Err(e) => tracing::error!("spawner task join: {}", e),
        Ok(Ok(())) => {}
    }

    let killed = registry.kill_all();
    tracing::info!(killed = killed.len(), "stopped downloads on shutdown");
    queue.shutdown().await;

    // Jobs hold the archive publisher; release them before draining the archive.
    watcher.abort();
    let _ = watcher.await;
    drop(ctx);
    drop(registry);
    archiver.join().await;
    Ok(())
}

/// In-memory update store that announces each newly created update.
pub struct NotifyingUpdates {
    inner: MemoryUpdateService,
    created: mpsc::UnboundedSender<SubscriptionVideoUpdate>,
}

impl NotifyingUpdates {
    pub fn new(created: mpsc::UnboundedSender<SubscriptionVideoUpdate>) -> Self {
        Self {
            inner: MemoryUpdateService::new(),
            created,
        }
    }
}

#[async_trait]
impl UpdateService for NotifyingUpdates {
    async fn create_update(
        &self,
        update: SubscriptionVideoUpdate,
    ) -> Result<SubscriptionVideoUpdate> {
        let id = update.id.clone();
        let stored = self.inner.create_update(update).await?;
        if stored.id == id {
            // Receiver gone means the command is shutting down.
            let _ = self.created.send(stored.clone());
        }
        Ok(stored)
    }

    async fn get_update(&self, id: &str) -> Result<Option<SubscriptionVideoUpdate>> {
        self.inner.get_update(id).await
    }

    async fn get_update_by_video_url(
        &self,
        video_url: &str,
    ) -> Result<Option<SubscriptionVideoUpdate>> {
        self.inner.get_update_by_video_url(video_url).await
    }

    async fn list_unseen(
        &self,
        limit: usize,
        offset: usize,
        subscription_ids: &[String],
    ) -> Result<Vec<SubscriptionVideoUpdate>> {
        self.inner.list_unseen(limit, offset, subscription_ids).await
    }

    async fn unseen_count(&self, subscription_ids: &[String]) -> Result<usize> {
        self.inner.unseen_count(subscription_ids).await
    }

    async fn mark_seen(&self, id: &str, seen: bool) -> Result<()> {
        self.inner.mark_seen(id, seen).await
    }

    async fn mark_all_seen(&self, subscription_ids: &[String], seen: bool) -> Result<u64> {
        self.inner.mark_all_seen(subscription_ids, seen).await
    }

    async fn update_status(&self, id: &str, status: UpdateStatus) -> Result<()> {
        self.inner.update_status(id, status).await
    }

    async fn delete_update(&self, id: &str) -> Result<()> {
        self.inner.delete_update(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn only_new_updates_are_announced() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let updates = NotifyingUpdates::new(tx);
        let first = SubscriptionVideoUpdate::detected("s1", "https://e.com/v", "V");
        let again = SubscriptionVideoUpdate::detected("s1", "https://e.com/v", "V");

        let stored = updates.create_update(first.clone()).await.unwrap();
        assert_eq!(stored.id, first.id);
        let dup = updates.create_update(again).await.unwrap();
        assert_eq!(dup.id, first.id);

        assert_eq!(rx.try_recv().unwrap().id, first.id);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn status_changes_reach_the_inner_store() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let updates = NotifyingUpdates::new(tx);
        let stored = updates
            .create_update(SubscriptionVideoUpdate::detected("s1", "https://e.com/v", "V"))
            .await
            .unwrap();
        updates
            .update_status(&stored.id, UpdateStatus::Dismissed)
            .await
            .unwrap();
        let got = updates.get_update(&stored.id).await.unwrap().unwrap();
        assert_eq!(got.status, UpdateStatus::Dismissed);
        assert_eq!(updates.unseen_count(&[]).await.unwrap(), 1);
    }
}
