//! In-memory [`UpdateService`].

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::anyhow;
use async_trait::async_trait;

use super::{SubscriptionVideoUpdate, UpdateService, UpdateStatus};

/// Keeps updates in insertion order. A second update for the same
/// `(subscription_id, video_url)` is not stored; the existing one is returned.
#[derive(Debug, Default)]
pub struct MemoryUpdateService {
    updates: RwLock<Vec<SubscriptionVideoUpdate>>,
}

impl MemoryUpdateService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<SubscriptionVideoUpdate> {
        self.read().clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<SubscriptionVideoUpdate>> {
        self.updates.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<SubscriptionVideoUpdate>> {
        self.updates.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_update<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut SubscriptionVideoUpdate) -> T,
    ) -> anyhow::Result<T> {
        let mut updates = self.write();
        let update = updates
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| anyhow!("subscription update {} not found", id))?;
        Ok(f(update))
    }
}

fn selected(update: &SubscriptionVideoUpdate, subscription_ids: &[String]) -> bool {
    subscription_ids.is_empty() || subscription_ids.contains(&update.subscription_id)
}

#[async_trait]
impl UpdateService for MemoryUpdateService {
    async fn create_update(
        &self,
        update: SubscriptionVideoUpdate,
    ) -> anyhow::Result<SubscriptionVideoUpdate> {
        let mut updates = self.write();
        if let Some(existing) = updates.iter().find(|u| {
            u.subscription_id == update.subscription_id && u.video_url == update.video_url
        }) {
            return Ok(existing.clone());
        }
        updates.push(update.clone());
        Ok(update)
    }

    async fn get_update(&self, id: &str) -> anyhow::Result<Option<SubscriptionVideoUpdate>> {
        Ok(self.read().iter().find(|u| u.id == id).cloned())
    }

    async fn get_update_by_video_url(
        &self,
        video_url: &str,
    ) -> anyhow::Result<Option<SubscriptionVideoUpdate>> {
        Ok(self.read().iter().find(|u| u.video_url == video_url).cloned())
    }

    async fn list_unseen(
        &self,
        limit: usize,
        offset: usize,
        subscription_ids: &[String],
    ) -> anyhow::Result<Vec<SubscriptionVideoUpdate>> {
        let mut unseen: Vec<SubscriptionVideoUpdate> = self
            .read()
            .iter()
            .filter(|u| !u.is_seen && selected(u, subscription_ids))
            .cloned()
            .collect();
        unseen.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        Ok(unseen.into_iter().skip(offset).take(limit).collect())
    }

    async fn unseen_count(&self, subscription_ids: &[String]) -> anyhow::Result<usize> {
        Ok(self
            .read()
            .iter()
            .filter(|u| !u.is_seen && selected(u, subscription_ids))
            .count())
    }

    async fn mark_seen(&self, id: &str, seen: bool) -> anyhow::Result<()> {
        self.with_update(id, |u| u.is_seen = seen)
    }

    async fn mark_all_seen(&self, subscription_ids: &[String], seen: bool) -> anyhow::Result<u64> {
        let mut changed = 0;
        for u in self.write().iter_mut() {
            if u.is_seen != seen && selected(u, subscription_ids) {
                u.is_seen = seen;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn update_status(&self, id: &str, status: UpdateStatus) -> anyhow::Result<()> {
        self.with_update(id, |u| u.status = status)
    }

    async fn delete_update(&self, id: &str) -> anyhow::Result<()> {
        let mut updates = self.write();
        let before = updates.len();
        updates.retain(|u| u.id != id);
        if updates.len() == before {
            return Err(anyhow!("subscription update {} not found", id));
        }
        Ok(())
    }
}
