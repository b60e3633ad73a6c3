//! End to end: a subscription poll finds new videos, they are downloaded
//! through the queue and archived, and the next poll skips them.
#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::fake_tool::FakeTool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use vdm_core::archive::{Archiver, MemoryArchive};
use vdm_core::job::{JobContext, JobStatus};
use vdm_core::queue::JobQueue;
use vdm_core::registry::{JobRegistry, MemoryRegistry};
use vdm_core::subscription::{
    fetch_cycle, queue_update_for_download, CronSchedule, FetchEnv, MemoryUpdateService,
    Subscription, UpdateService, UpdateStatus,
};

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn detected_videos_are_downloaded_archived_and_not_detected_again() {
    let tool = FakeTool::new().with_entries(&["https://e.com/watch/1", "https://e.com/watch/2"]);
    let downloader = Arc::new(tool.downloader());

    let archive = Arc::new(MemoryArchive::new());
    let (publisher, _archiver) = Archiver::spawn(archive.clone(), 8);
    let updates = Arc::new(MemoryUpdateService::new());
    let env = FetchEnv {
        downloader: downloader.clone(),
        dedup: archive.clone(),
        updates: updates.clone(),
        errors: None,
    };
    let sub = Subscription::new("https://e.com/c/chan", "*/10 * * * *");
    let schedule = CronSchedule::parse(&sub.cron_expr).unwrap();

    let first = fetch_cycle(&env, &sub, &schedule, &CancellationToken::new()).await;
    assert_eq!(first.created, 2);

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let ctx = JobContext::new(downloader.clone(), tool.path().display().to_string())
        .with_archive(publisher)
        .with_completions(done_tx);
    let registry = MemoryRegistry::new();
    let queue = JobQueue::spawn(2, 8);

    let mut ids = Vec::new();
    for update in updates.all() {
        let id = queue_update_for_download(&update.id, updates.as_ref(), &registry, &queue, &ctx)
            .await
            .unwrap();
        ids.push(id);
    }

    for _ in 0..ids.len() {
        tokio::time::timeout(TIMEOUT, done_rx.recv())
            .await
            .expect("job did not complete in time")
            .unwrap();
    }
    for id in &ids {
        assert_eq!(registry.get(id).unwrap().status(), JobStatus::Completed);
    }
    assert_eq!(tool.downloads().len(), 2);
    for update in updates.all() {
        assert_eq!(update.status, UpdateStatus::QueuedForDownload);
    }

    let mut waited = Duration::ZERO;
    while archive.entries().len() < 2 {
        assert!(waited < TIMEOUT, "downloads were not archived");
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }
    let mut sources: Vec<String> = archive.entries().into_iter().map(|m| m.source).collect();
    sources.sort();
    assert_eq!(sources, ["https://e.com/watch/1", "https://e.com/watch/2"]);
    let resolved = tool.resolved_path().display().to_string();
    for entry in archive.entries() {
        assert_eq!(entry.path, resolved);
        assert_eq!(entry.title, "Fake video");
    }

    let second = fetch_cycle(&env, &sub, &schedule, &CancellationToken::new()).await;
    assert_eq!(second.created, 0);
    assert_eq!(updates.len(), 2);
    assert_eq!(updates.unseen_count(&[]).await.unwrap(), 2);

    queue.shutdown().await;
}

#[tokio::test]
async fn playlist_suffix_is_dropped_and_channel_folder_is_used() {
    let tool = FakeTool::new();
    let downloader = Arc::new(tool.downloader());
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let ctx = JobContext::new(downloader, tool.path().display().to_string())
        .with_completions(done_tx);
    let registry = MemoryRegistry::new();
    let queue = JobQueue::spawn(1, 4);

    let mut req = vdm_core::job::DownloadRequest::new("https://e.com/watch/9?list=PL1");
    req.channel_folder = Some("My: Channel".to_string());
    let job = Arc::new(vdm_core::job::Job::new(req, ctx));
    registry.set(job.clone());
    queue.publish(job.clone()).await.unwrap();

    tokio::time::timeout(TIMEOUT, done_rx.recv())
        .await
        .expect("job did not complete in time")
        .unwrap();

    let argv = tool.downloads().join("\n");
    assert!(argv.starts_with("https://e.com/watch/9 --newline"));
    let folder = tool.path().join("My_ Channel");
    assert!(argv.contains(&format!("-o {}/", folder.display())));
    assert_eq!(job.output().saved_file_path, tool.resolved_path().display().to_string());

    queue.shutdown().await;
}
