//! `vdm channel <url>` – list every video of a channel and whether it is archived.

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use vdm_core::config::VdmConfig;
use vdm_core::downloader::Downloader;
use vdm_core::subscription::{channel_videos, ChannelVideo, Subscription};

use crate::cli::store::JsonlArchive;

pub async fn run_channel(cfg: &VdmConfig, url: &str, json: bool) -> Result<()> {
    let downloader = Downloader::from_config(cfg);
    let store = JsonlArchive::open_default()?;
    let sub = Subscription::new(url, "");

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });
    let listed = channel_videos(&downloader, &sub, &store, &cancel).await;
    interrupt.abort();
    let videos = listed.with_context(|| format!("listing {url}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&videos)?);
        return Ok(());
    }
    let title = if videos.title.is_empty() { url } else { videos.title.as_str() };
    println!("{} ({} videos)", title, videos.entries.len());
    for video in &videos.entries {
        println!("{}", format_row(video));
    }
    Ok(())
}

/// One listing line: archive mark, upload date, title, URL.
fn format_row(video: &ChannelVideo) -> String {
    let mark = if video.is_downloaded { '*' } else { ' ' };
    let date = if video.upload_date.is_empty() {
        "-"
    } else {
        video.upload_date.as_str()
    };
    format!("{} {:<8} {}  {}", mark, date, video.title, video.url)
}
