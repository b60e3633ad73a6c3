//! Archival of finished downloads and the "already downloaded?" oracle.
//!
//! Jobs publish an [`ArchiveMessage`] through an [`ArchivePublisher`] (a
//! bounded channel); a single consumer task owned by [`Archiver`] hands each
//! message to an [`ArchiveSink`]. Subscriptions ask a [`DedupOracle`] whether
//! a source URL is already archived.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ArchiveClosed;

/// Record of a finished download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveMessage {
    pub id: String,
    pub path: String,
    pub title: String,
    pub thumbnail: String,
    /// URL the job was created for.
    pub source: String,
    /// Full tool metadata of the job.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Persists archive messages.
#[async_trait]
pub trait ArchiveSink: Send + Sync {
    async fn store(&self, msg: ArchiveMessage) -> anyhow::Result<()>;
}

/// Answers whether a source URL has already been archived.
#[async_trait]
pub trait DedupOracle: Send + Sync {
    async fn is_source_downloaded(&self, url: &str) -> anyhow::Result<bool>;
}

/// Sending half of the archival channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ArchivePublisher {
    tx: mpsc::Sender<ArchiveMessage>,
}

impl ArchivePublisher {
    /// Queues `msg`, waiting while the channel is full.
    pub async fn publish(&self, msg: ArchiveMessage) -> Result<(), ArchiveClosed> {
        self.tx.send(msg).await.map_err(|_| ArchiveClosed)
    }
}

/// Owns the consumer task that drains the archival channel into a sink.
#[derive(Debug)]
pub struct Archiver {
    handle: JoinHandle<()>,
}

impl Archiver {
    /// Starts the consumer. It runs until every publisher has been dropped.
    pub fn spawn(sink: Arc<dyn ArchiveSink>, capacity: usize) -> (ArchivePublisher, Archiver) {
        let (tx, mut rx) = mpsc::channel::<ArchiveMessage>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let id = msg.id.clone();
                match sink.store(msg).await {
                    Ok(()) => tracing::debug!(job_id = %id, "archived"),
                    Err(e) => tracing::warn!(job_id = %id, "archive store failed: {:#}", e),
                }
            }
        });
        (ArchivePublisher { tx }, Archiver { handle })
    }

    /// Waits until all queued messages are stored. Drop every publisher first.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            tracing::warn!("archive consumer ended abnormally: {}", e);
        }
    }
}

/// In-process archive; also the dedup oracle over what it stored.
#[derive(Debug, Default)]
pub struct MemoryArchive {
    entries: RwLock<Vec<ArchiveMessage>>,
    known_sources: RwLock<Vec<String>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks sources as archived without a full message (seed data).
    pub fn with_sources<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: RwLock::default(),
            known_sources: RwLock::new(sources.into_iter().map(Into::into).collect()),
        }
    }

    pub fn entries(&self) -> Vec<ArchiveMessage> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ArchiveSink for MemoryArchive {
    async fn store(&self, msg: ArchiveMessage) -> anyhow::Result<()> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(msg);
        Ok(())
    }
}

#[async_trait]
impl DedupOracle for MemoryArchive {
    async fn is_source_downloaded(&self, url: &str) -> anyhow::Result<bool> {
        let stored = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|m| m.source == url);
        let seeded = self
            .known_sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|s| s == url);
        Ok(stored || seeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, source: &str) -> ArchiveMessage {
        ArchiveMessage {
            id: id.to_string(),
            path: format!("/media/{}.mp4", id),
            title: id.to_string(),
            thumbnail: String::new(),
            source: source.to_string(),
            metadata: serde_json::json!({ "title": id }),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn archiver_drains_into_sink() {
        let archive = Arc::new(MemoryArchive::new());
        let (publisher, archiver) = Archiver::spawn(archive.clone(), 1);
        publisher.publish(message("a", "https://e.com/a")).await.unwrap();
        publisher.publish(message("b", "https://e.com/b")).await.unwrap();
        drop(publisher);
        archiver.join().await;

        let ids: Vec<_> = archive.entries().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(archive.is_source_downloaded("https://e.com/b").await.unwrap());
        assert!(!archive.is_source_downloaded("https://e.com/c").await.unwrap());
    }

    #[tokio::test]
    async fn publish_after_consumer_stopped_fails() {
        let archive = Arc::new(MemoryArchive::new());
        let (publisher, archiver) = Archiver::spawn(archive, 4);
        archiver.handle.abort();
        let _ = archiver.handle.await;
        assert!(publisher.publish(message("x", "u")).await.is_err());
    }

    #[tokio::test]
    async fn seeded_sources_count_as_downloaded() {
        let archive = MemoryArchive::with_sources(["https://e.com/old"]);
        assert!(archive.is_source_downloaded("https://e.com/old").await.unwrap());
        assert!(archive.entries().is_empty());
    }
}
