//! Full listing of a subscription's channel with per-video download state.

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::Subscription;
use crate::archive::DedupOracle;
use crate::downloader::Downloader;
use crate::error::ToolError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelVideos {
    /// Playlist id from the tool, or the subscription id when it gave none.
    pub id: String,
    pub title: String,
    pub uploader: String,
    pub url: String,
    pub entries: Vec<ChannelVideo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelVideo {
    pub id: String,
    pub title: String,
    /// Empty when the tool reported no URL for the entry.
    pub url: String,
    pub thumbnail: String,
    pub upload_date: String,
    pub is_downloaded: bool,
}

/// Dumps every entry of `sub` and flags the ones already archived.
///
/// A failed dedup lookup marks the entry as not downloaded.
pub async fn channel_videos(
    downloader: &Downloader,
    sub: &Subscription,
    dedup: &dyn DedupOracle,
    cancel: &CancellationToken,
) -> Result<ChannelVideos, ToolError> {
    tracing::info!(subscription_id = %sub.id, url = %sub.url, "fetching channel videos");
    let dump = downloader.dump_channel(&sub.url, cancel).await?;

    let mut entries = Vec::with_capacity(dump.entries.len());
    for entry in dump.entries {
        let url = entry.canonical_url().unwrap_or_default().to_string();
        let is_downloaded = if url.is_empty() {
            false
        } else {
            dedup.is_source_downloaded(&url).await.unwrap_or_else(|e| {
                tracing::error!(url = %url, "dedup check failed: {:#}", e);
                false
            })
        };
        entries.push(ChannelVideo {
            id: entry.id,
            title: entry.title,
            url,
            thumbnail: entry.thumbnail,
            upload_date: entry.upload_date,
            is_downloaded,
        });
    }

    let videos = ChannelVideos {
        id: if dump.id.is_empty() {
            sub.id.clone()
        } else {
            dump.id
        },
        title: dump.title,
        uploader: dump.uploader,
        url: sub.url.clone(),
        entries,
    };
    tracing::info!(
        subscription_id = %sub.id,
        entries = videos.entries.len(),
        "channel videos fetched"
    );
    Ok(videos)
}
