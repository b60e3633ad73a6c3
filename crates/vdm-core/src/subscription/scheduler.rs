//! Cron-driven monitoring of subscriptions.
//!
//! `submit` registers a subscription and hands a monitor task to the
//! dispatch channel; `spawner` picks tasks up and runs each one until it is
//! stopped. A monitor runs a generator that alternates fetch cycles and
//! cancellable sleeps, and reports every finished cycle back to the monitor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::cron::CronSchedule;
use super::fetch::{fetch_cycle, CycleOutcome, FetchEnv};
use super::{Subscription, UpdateService};
use crate::archive::DedupOracle;
use crate::downloader::Downloader;
use crate::error::SchedulerError;

const ERROR_CAPACITY: usize = 16;

/// Scheduling interface for subscription monitors.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Validates the cron expression and schedules the subscription.
    /// Resubmitting an id replaces the running monitor.
    async fn submit(&self, sub: Subscription) -> Result<(), SchedulerError>;

    /// Runs submitted monitors until `ctx` is cancelled or the scheduler shuts down.
    async fn spawner(&self, ctx: CancellationToken) -> Result<(), SchedulerError>;

    /// Stops the monitor for `id`. Returns false if none was scheduled.
    fn stop_task(&self, id: &str) -> bool;

    /// Restores monitors after a restart.
    fn recoverer(&self) -> Result<(), SchedulerError>;
}

struct MonitorTask {
    done: CancellationToken,
    generation: u64,
    schedule: CronSchedule,
    subscription: Subscription,
}

/// Entry of the running set. The generation tells a resubmitted monitor
/// apart from the one it replaced.
struct Registration {
    generation: u64,
    done: CancellationToken,
}

type RunningSet = Arc<Mutex<HashMap<String, Registration>>>;

fn lock_set(running: &RunningSet) -> MutexGuard<'_, HashMap<String, Registration>> {
    running.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drops `id` from the running set unless it has been resubmitted since.
fn release(running: &RunningSet, id: &str, generation: u64) {
    let mut running = lock_set(running);
    if running.get(id).is_some_and(|r| r.generation == generation) {
        running.remove(id);
    }
}

/// Subscription scheduler owning its dispatch channel and running set.
pub struct Scheduler {
    env: FetchEnv,
    dispatch_tx: mpsc::Sender<MonitorTask>,
    dispatch_rx: Mutex<Option<mpsc::Receiver<MonitorTask>>>,
    errors_rx: Mutex<Option<mpsc::Receiver<SchedulerError>>>,
    running: RunningSet,
    next_generation: AtomicU64,
    root: CancellationToken,
}

impl Scheduler {
    pub fn new(
        downloader: Arc<Downloader>,
        dedup: Arc<dyn DedupOracle>,
        updates: Arc<dyn UpdateService>,
        dispatch_capacity: usize,
    ) -> Self {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(dispatch_capacity.max(1));
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_CAPACITY);
        Self {
            env: FetchEnv {
                downloader,
                dedup,
                updates,
                errors: Some(errors_tx),
            },
            dispatch_tx,
            dispatch_rx: Mutex::new(Some(dispatch_rx)),
            errors_rx: Mutex::new(Some(errors_rx)),
            running: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            root: CancellationToken::new(),
        }
    }

    /// Receiver of fetch failures. Reports are dropped while nobody drains it.
    pub fn take_errors(&self) -> Option<mpsc::Receiver<SchedulerError>> {
        self.errors_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Ids of scheduled subscriptions, sorted. A subscription leaves the set
    /// when it is stopped or when its monitor exits.
    pub fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock_running().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.lock_running().contains_key(id)
    }

    /// Stops every monitor and makes `spawner` return.
    pub fn shutdown(&self) {
        self.root.cancel();
        for (id, reg) in self.lock_running().drain() {
            tracing::debug!(subscription_id = %id, "stopping monitor on shutdown");
            reg.done.cancel();
        }
    }

    fn lock_running(&self) -> MutexGuard<'_, HashMap<String, Registration>> {
        lock_set(&self.running)
    }
}

#[async_trait]
impl TaskRunner for Scheduler {
    async fn submit(&self, sub: Subscription) -> Result<(), SchedulerError> {
        let schedule = CronSchedule::parse(&sub.cron_expr)?;
        let done = CancellationToken::new();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let id = sub.id.clone();

        let registration = Registration {
            generation,
            done: done.clone(),
        };
        let previous = self.lock_running().insert(id.clone(), registration);
        if let Some(previous) = previous {
            tracing::info!(subscription_id = %id, "replacing scheduled monitor");
            previous.done.cancel();
        }

        let task = MonitorTask {
            done: done.clone(),
            generation,
            schedule,
            subscription: sub,
        };
        if self.dispatch_tx.send(task).await.is_err() {
            done.cancel();
            release(&self.running, &id, generation);
            return Err(SchedulerError::DispatchClosed);
        }
        tracing::info!(subscription_id = %id, "subscription scheduled");
        Ok(())
    }

    async fn spawner(&self, ctx: CancellationToken) -> Result<(), SchedulerError> {
        let mut rx = self
            .dispatch_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(SchedulerError::SpawnerAlreadyRunning)?;

        let scope = ctx.child_token();
        let mut monitors = JoinSet::new();
        loop {
            tokio::select! {
                _ = scope.cancelled() => break,
                _ = self.root.cancelled() => break,
                next = rx.recv() => {
                    let Some(task) = next else { break };
                    if task.done.is_cancelled() {
                        tracing::debug!(subscription_id = %task.subscription.id, "monitor stopped before it started");
                        continue;
                    }
                    monitors.spawn(monitor(
                        self.env.clone(),
                        task,
                        scope.child_token(),
                        self.running.clone(),
                    ));
                }
                Some(res) = monitors.join_next(), if !monitors.is_empty() => {
                    if let Err(e) = res {
                        tracing::error!("monitor task join: {}", e);
                    }
                }
            }
        }

        scope.cancel();
        while let Some(res) = monitors.join_next().await {
            if let Err(e) = res {
                tracing::error!("monitor task join: {}", e);
            }
        }
        *self
            .dispatch_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(rx);
        Ok(())
    }

    fn stop_task(&self, id: &str) -> bool {
        match self.lock_running().remove(id) {
            Some(reg) => {
                reg.done.cancel();
                tracing::info!(subscription_id = %id, "monitor stopped");
                true
            }
            None => false,
        }
    }

    fn recoverer(&self) -> Result<(), SchedulerError> {
        Err(SchedulerError::RecoveryUnsupported)
    }
}

/// Drives one subscription until its done token or `ctx` is cancelled, then
/// takes it out of the running set.
async fn monitor(env: FetchEnv, task: MonitorTask, ctx: CancellationToken, running: RunningSet) {
    let MonitorTask {
        done,
        generation,
        schedule,
        subscription,
    } = task;
    let (events_tx, mut events) = mpsc::channel::<CycleOutcome>(1);
    let generator = tokio::spawn(generate(
        env,
        subscription.clone(),
        schedule,
        ctx.clone(),
        events_tx,
    ));

    loop {
        tokio::select! {
            _ = done.cancelled() => {
                tracing::info!(subscription_id = %subscription.id, url = %subscription.url, "stopping monitor and removing schedule");
                break;
            }
            _ = ctx.cancelled() => break,
            event = events.recv() => match event {
                Some(outcome) => tracing::info!(
                    subscription_id = %subscription.id,
                    url = %subscription.url,
                    created = outcome.created,
                    "finished monitoring channel"
                ),
                None => break,
            },
        }
    }

    ctx.cancel();
    drop(events);
    if let Err(e) = generator.await {
        tracing::error!(subscription_id = %subscription.id, "fetch generator join: {}", e);
    }
    release(&running, &subscription.id, generation);
}

/// Fetch, report, sleep; repeat until `ctx` is cancelled.
async fn generate(
    env: FetchEnv,
    sub: Subscription,
    schedule: CronSchedule,
    ctx: CancellationToken,
    events: mpsc::Sender<CycleOutcome>,
) {
    while !ctx.is_cancelled() {
        let outcome = fetch_cycle(&env, &sub, &schedule, &ctx).await;
        if events.send(outcome).await.is_err() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(outcome.delay) => {}
            _ = ctx.cancelled() => return,
        }
    }
}

#[cfg(test)]
mod tests;
