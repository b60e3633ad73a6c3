//! Tests for the subscription scheduler.

use std::time::Duration;

use super::*;
use crate::archive::MemoryArchive;
use crate::subscription::MemoryUpdateService;

fn scheduler_with(downloader: Downloader) -> (Arc<Scheduler>, Arc<MemoryUpdateService>) {
    let updates = Arc::new(MemoryUpdateService::new());
    let scheduler = Scheduler::new(
        Arc::new(downloader),
        Arc::new(MemoryArchive::new()),
        updates.clone(),
        4,
    );
    (Arc::new(scheduler), updates)
}

fn offline() -> (Arc<Scheduler>, Arc<MemoryUpdateService>) {
    scheduler_with(Downloader::new("/nonexistent/vdm-test-tool"))
}

#[tokio::test]
async fn submit_then_stop_without_spawner() {
    let (scheduler, _) = offline();
    let sub = Subscription::new("https://e.com/c/chan", "*/5 * * * *");
    scheduler.submit(sub.clone()).await.unwrap();
    assert!(scheduler.is_running(&sub.id));

    assert!(scheduler.stop_task(&sub.id));
    assert!(scheduler.running().is_empty());
    // Stopping twice is a no-op.
    assert!(!scheduler.stop_task(&sub.id));
}

#[tokio::test]
async fn invalid_cron_is_rejected_at_submit() {
    let (scheduler, _) = offline();
    let sub = Subscription::new("https://e.com/c/chan", "every five minutes");
    let err = scheduler.submit(sub.clone()).await.unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidCron { .. }));
    assert!(!scheduler.is_running(&sub.id));
}

#[tokio::test]
async fn resubmit_replaces_previous_task() {
    let (scheduler, _) = offline();
    let sub = Subscription::new("https://e.com/c/chan", "*/5 * * * *");
    scheduler.submit(sub.clone()).await.unwrap();
    scheduler
        .submit(Subscription {
            cron_expr: "@hourly".to_string(),
            ..sub.clone()
        })
        .await
        .unwrap();
    assert_eq!(scheduler.running(), vec![sub.id.clone()]);
}

#[test]
fn recoverer_is_unsupported() {
    let (scheduler, _) = offline();
    assert!(matches!(
        scheduler.recoverer(),
        Err(SchedulerError::RecoveryUnsupported)
    ));
}

#[tokio::test]
async fn second_spawner_is_refused_and_shutdown_stops_the_first() {
    let (scheduler, _) = offline();
    let first = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.spawner(CancellationToken::new()).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = scheduler.spawner(CancellationToken::new()).await;
    assert!(matches!(second, Err(SchedulerError::SpawnerAlreadyRunning)));

    scheduler.shutdown();
    let res = tokio::time::timeout(Duration::from_secs(5), first)
        .await
        .expect("spawner should return after shutdown")
        .unwrap();
    assert!(res.is_ok());
}

#[cfg(unix)]
#[tokio::test]
async fn spawner_runs_first_cycle_immediately_and_stops_on_request() {
    let dir = tempfile::tempdir().unwrap();
    let calls = dir.path().join("calls");
    let script = dir.path().join("tool.sh");
    std::fs::write(
        &script,
        format!(
            "echo call >> '{}'\n\
             echo '{{\"entries\":[{{\"title\":\"V\",\"webpage_url\":\"https://e.com/v1\"}}]}}'\n",
            calls.display()
        ),
    )
    .unwrap();
    let downloader = Downloader::new("sh").with_base_args(vec![script.display().to_string()]);
    let (scheduler, updates) = scheduler_with(downloader);

    let ctx = CancellationToken::new();
    let spawner = tokio::spawn({
        let scheduler = scheduler.clone();
        let ctx = ctx.clone();
        async move { scheduler.spawner(ctx).await }
    });

    let sub = Subscription::new("https://e.com/c/chan", "0 0 1 1 *");
    scheduler.submit(sub.clone()).await.unwrap();

    let mut waited = Duration::ZERO;
    while updates.is_empty() {
        assert!(waited < Duration::from_secs(5), "no update was created");
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }
    let created = updates.all();
    assert_eq!(created[0].video_url, "https://e.com/v1");
    assert_eq!(created[0].subscription_id, sub.id);

    assert!(scheduler.stop_task(&sub.id));
    tokio::time::sleep(Duration::from_millis(100)).await;
    // Yearly schedule: only the initial cycle ran.
    let calls = std::fs::read_to_string(&calls).unwrap();
    assert_eq!(calls.lines().count(), 1);

    ctx.cancel();
    let res = tokio::time::timeout(Duration::from_secs(5), spawner)
        .await
        .expect("spawner should return after cancel")
        .unwrap();
    assert!(res.is_ok());
}

#[cfg(unix)]
#[tokio::test]
async fn stop_right_after_submit_never_fetches() {
    let dir = tempfile::tempdir().unwrap();
    let calls = dir.path().join("calls");
    let script = dir.path().join("tool.sh");
    std::fs::write(&script, format!("echo call >> '{}'\n", calls.display())).unwrap();
    let downloader = Downloader::new("sh").with_base_args(vec![script.display().to_string()]);
    let (scheduler, _) = scheduler_with(downloader);

    let sub = Subscription::new("https://e.com/c/chan", "*/5 * * * *");
    scheduler.submit(sub.clone()).await.unwrap();
    assert!(scheduler.stop_task(&sub.id));

    let ctx = CancellationToken::new();
    let spawner = tokio::spawn({
        let scheduler = scheduler.clone();
        let ctx = ctx.clone();
        async move { scheduler.spawner(ctx).await }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!calls.exists());

    ctx.cancel();
    spawner.await.unwrap().unwrap();
}

async fn spawn_and_submit(
    scheduler: &Arc<Scheduler>,
    sub: &Subscription,
) -> (CancellationToken, tokio::task::JoinHandle<Result<(), SchedulerError>>) {
    let ctx = CancellationToken::new();
    let spawner = tokio::spawn({
        let scheduler = scheduler.clone();
        let ctx = ctx.clone();
        async move { scheduler.spawner(ctx).await }
    });
    scheduler.submit(sub.clone()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    (ctx, spawner)
}

#[tokio::test]
async fn spawner_exit_drops_its_monitors_from_the_running_set() {
    let (scheduler, _) = offline();
    let sub = Subscription::new("https://e.com/c/chan", "0 0 1 1 *");
    let (ctx, spawner) = spawn_and_submit(&scheduler, &sub).await;
    assert!(scheduler.is_running(&sub.id));

    ctx.cancel();
    tokio::time::timeout(Duration::from_secs(5), spawner)
        .await
        .expect("spawner should return after cancel")
        .unwrap()
        .unwrap();
    assert!(!scheduler.is_running(&sub.id));
    assert!(scheduler.running().is_empty());

    // A fresh spawner runs resubmitted subscriptions again.
    let (ctx, spawner) = spawn_and_submit(&scheduler, &sub).await;
    assert!(scheduler.is_running(&sub.id));
    ctx.cancel();
    spawner.await.unwrap().unwrap();
}

#[tokio::test]
async fn replaced_monitor_does_not_unregister_its_successor() {
    let (scheduler, _) = offline();
    let sub = Subscription::new("https://e.com/c/chan", "0 0 1 1 *");
    let (ctx, spawner) = spawn_and_submit(&scheduler, &sub).await;

    scheduler
        .submit(Subscription {
            cron_expr: "@yearly".to_string(),
            ..sub.clone()
        })
        .await
        .unwrap();
    // Give the replaced monitor time to exit.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(scheduler.running(), vec![sub.id.clone()]);

    assert!(scheduler.stop_task(&sub.id));
    ctx.cancel();
    spawner.await.unwrap().unwrap();
    assert!(scheduler.running().is_empty());
}
