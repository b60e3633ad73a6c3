//! One poll of a subscription.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::cron::CronSchedule;
use super::{Subscription, SubscriptionVideoUpdate, UpdateService};
use crate::archive::DedupOracle;
use crate::downloader::{parse_upload_date, Downloader, PlaylistEntry};
use crate::error::{SchedulerError, ToolError};

/// Collaborators of a fetch cycle.
#[derive(Clone)]
pub struct FetchEnv {
    pub downloader: Arc<Downloader>,
    pub dedup: Arc<dyn DedupOracle>,
    pub updates: Arc<dyn UpdateService>,
    /// Fire-and-forget error reports; dropped when full or absent.
    pub errors: Option<mpsc::Sender<SchedulerError>>,
}

impl FetchEnv {
    fn report(&self, err: SchedulerError) {
        if let Some(tx) = &self.errors {
            if tx.try_send(err).is_err() {
                tracing::debug!("scheduler error channel full or closed, dropping report");
            }
        }
    }
}

/// Result of [`fetch_cycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    /// How long to wait before the next cycle.
    pub delay: Duration,
    /// Updates handed to the update service.
    pub created: usize,
    pub cancelled: bool,
}

/// Lists the subscription's latest entries and records an update for each
/// one not archived yet.
///
/// The delay is taken from the schedule before fetching. Cancellation kills
/// the tool and yields a zero delay; any other failure is reported on the
/// error channel and keeps the scheduled delay.
pub async fn fetch_cycle(
    env: &FetchEnv,
    sub: &Subscription,
    schedule: &CronSchedule,
    cancel: &CancellationToken,
) -> CycleOutcome {
    tracing::info!(subscription_id = %sub.id, url = %sub.url, "fetching latest videos");
    let delay = schedule.next_delay();
    let mut outcome = CycleOutcome {
        delay,
        created: 0,
        cancelled: false,
    };

    let dump = match env.downloader.dump_playlist(&sub.url, cancel).await {
        Ok(dump) => dump,
        Err(ToolError::Cancelled) => {
            tracing::info!(subscription_id = %sub.id, "fetch cancelled");
            outcome.delay = Duration::ZERO;
            outcome.cancelled = true;
            return outcome;
        }
        Err(e) => {
            tracing::error!(subscription_id = %sub.id, url = %sub.url, "fetch failed: {}", e);
            env.report(SchedulerError::Fetch {
                subscription_id: sub.id.clone(),
                source: e,
            });
            return outcome;
        }
    };

    for entry in &dump.entries {
        if cancel.is_cancelled() {
            outcome.delay = Duration::ZERO;
            outcome.cancelled = true;
            return outcome;
        }
        if record_entry(env, sub, entry).await {
            outcome.created += 1;
        }
    }

    tracing::info!(
        subscription_id = %sub.id,
        url = %sub.url,
        created = outcome.created,
        "fetch finished, next run in {:?}",
        delay
    );
    outcome
}

/// Returns true when a new update was stored for `entry`.
async fn record_entry(env: &FetchEnv, sub: &Subscription, entry: &PlaylistEntry) -> bool {
    let Some(url) = entry.canonical_url() else {
        tracing::warn!(subscription_id = %sub.id, title = %entry.title, "skipping entry without url");
        return false;
    };

    match env.dedup.is_source_downloaded(url).await {
        Ok(true) => return false,
        Ok(false) => {}
        Err(e) => {
            tracing::error!(url, "dedup check failed: {:#}", e);
            return false;
        }
    }

    let mut update = SubscriptionVideoUpdate::detected(&sub.id, url, &entry.title);
    update.thumbnail_url = entry.thumbnail.clone();
    if !entry.upload_date.is_empty() {
        match parse_upload_date(&entry.upload_date) {
            Ok(t) => update.published_at = Some(t),
            Err(e) => tracing::warn!(
                url,
                date = %entry.upload_date,
                "unparsable upload_date: {}",
                e
            ),
        }
    }

    let submitted = update.id.clone();
    match env.updates.create_update(update).await {
        Ok(stored) if stored.id == submitted => {
            tracing::info!(subscription_id = %sub.id, title = %stored.video_title, "new video detected");
            true
        }
        Ok(stored) => {
            tracing::debug!(subscription_id = %sub.id, update_id = %stored.id, url, "update already recorded");
            false
        }
        Err(e) => {
            tracing::error!(subscription_id = %sub.id, url, "store update failed: {:#}", e);
            false
        }
    }
}
