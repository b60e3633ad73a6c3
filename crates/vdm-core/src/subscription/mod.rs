//! Subscriptions: channel or playlist URLs polled on a cron schedule.
//!
//! Each poll lists the most recent entries and records a
//! [`SubscriptionVideoUpdate`] for every entry that is not archived yet.
//! [`channel_videos`] lists the whole channel on demand.

mod channel;
mod cron;
mod download;
mod fetch;
mod scheduler;
mod updates;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use channel::{channel_videos, ChannelVideo, ChannelVideos};
pub use self::cron::{CronSchedule, FALLBACK_DELAY};
pub use download::queue_update_for_download;
pub use fetch::{fetch_cycle, CycleOutcome, FetchEnv};
pub use scheduler::{Scheduler, TaskRunner};
pub use updates::MemoryUpdateService;

/// A polled channel or playlist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Subscription {
    pub id: String,
    pub url: String,
    pub params: Vec<String>,
    pub cron_expr: String,
}

impl Subscription {
    pub fn new(url: impl Into<String>, cron_expr: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.into(),
            params: Vec::new(),
            cron_expr: cron_expr.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    #[default]
    New,
    QueuedForDownload,
    Downloaded,
    Dismissed,
}

impl UpdateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateStatus::New => "new",
            UpdateStatus::QueuedForDownload => "queued_for_download",
            UpdateStatus::Downloaded => "downloaded",
            UpdateStatus::Dismissed => "dismissed",
        }
    }
}

impl std::fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A new video found on a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionVideoUpdate {
    pub id: String,
    pub subscription_id: String,
    pub video_url: String,
    pub video_title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub thumbnail_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    pub detected_at: DateTime<Utc>,
    pub is_seen: bool,
    pub status: UpdateStatus,
}

impl SubscriptionVideoUpdate {
    /// Fresh unseen update detected now.
    pub fn detected(subscription_id: &str, video_url: &str, video_title: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subscription_id: subscription_id.to_string(),
            video_url: video_url.to_string(),
            video_title: video_title.to_string(),
            thumbnail_url: String::new(),
            published_at: None,
            detected_at: Utc::now(),
            is_seen: false,
            status: UpdateStatus::New,
        }
    }
}

/// Storage of subscription updates.
#[async_trait]
pub trait UpdateService: Send + Sync {
    /// Persists `update` and returns the stored record.
    async fn create_update(
        &self,
        update: SubscriptionVideoUpdate,
    ) -> anyhow::Result<SubscriptionVideoUpdate>;
    async fn get_update(&self, id: &str) -> anyhow::Result<Option<SubscriptionVideoUpdate>>;
    async fn get_update_by_video_url(
        &self,
        video_url: &str,
    ) -> anyhow::Result<Option<SubscriptionVideoUpdate>>;
    /// Unseen updates, newest first. An empty `subscription_ids` means all subscriptions.
    async fn list_unseen(
        &self,
        limit: usize,
        offset: usize,
        subscription_ids: &[String],
    ) -> anyhow::Result<Vec<SubscriptionVideoUpdate>>;
    async fn unseen_count(&self, subscription_ids: &[String]) -> anyhow::Result<usize>;
    async fn mark_seen(&self, id: &str, seen: bool) -> anyhow::Result<()>;
    /// Returns how many updates changed.
    async fn mark_all_seen(&self, subscription_ids: &[String], seen: bool) -> anyhow::Result<u64>;
    async fn update_status(&self, id: &str, status: UpdateStatus) -> anyhow::Result<()>;
    async fn delete_update(&self, id: &str) -> anyhow::Result<()>;
}
