//! `vdm download <url>` – run one job through the queue and report progress.

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use vdm_core::archive::Archiver;
use vdm_core::config::VdmConfig;
use vdm_core::downloader::Downloader;
use vdm_core::job::{DownloadRequest, Job, JobContext, JobStatus};
use vdm_core::queue::JobQueue;

use crate::cli::store::JsonlArchive;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Flags of `vdm download` beyond the URL.
#[derive(Debug, Default)]
pub struct DownloadOptions {
    pub qualities: Vec<String>,
    pub extensions: Vec<String>,
    pub output_dir: Option<PathBuf>,
    pub rename: Option<String>,
    pub folder: Option<String>,
    pub live: bool,
    pub params: Vec<String>,
}

impl DownloadOptions {
    pub fn into_request(self, url: &str) -> DownloadRequest {
        let mut req = DownloadRequest::new(url);
        req.params = self.params;
        req.path = self
            .output_dir
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        req.rename = self.rename.unwrap_or_default();
        req.channel_folder = self.folder;
        req.preferred_qualities = self.qualities;
        req.preferred_formats = self.extensions;
        req.livestream = self.live;
        req
    }
}

pub async fn run_download(cfg: &VdmConfig, url: &str, opts: DownloadOptions) -> Result<()> {
    let downloader = Arc::new(Downloader::from_config(cfg));
    let store = Arc::new(JsonlArchive::open_default()?);
    let (publisher, archiver) = Archiver::spawn(store, cfg.archive_capacity);
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let ctx = JobContext::new(downloader, cfg.download_path.clone())
        .with_archive(publisher)
        .with_completions(done_tx);

    let job = Arc::new(Job::new(opts.into_request(url), ctx));
    let queue = JobQueue::from_config(cfg);
    queue.publish(job.clone()).await?;
    println!("Queued job {} for URL: {}", job.id().short(), url);

    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    loop {
        tokio::select! {
            _ = done_rx.recv() => break,
            _ = ticker.tick() => {
                let p = job.progress();
                if p.status == JobStatus::Downloading {
                    println!("\r  {:>7}  {:.2} MiB/s  ETA {:.0}s  ", p.percentage, p.speed / 1_048_576.0, p.eta);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(job_id = %job.id(), "interrupted, stopping download");
                if let Err(e) = job.kill() {
                    // Nothing running yet: the queue finalizes the job without spawning the tool.
                    tracing::debug!(job_id = %job.id(), "kill on interrupt: {}", e);
                    break;
                }
            }
        }
    }

    queue.shutdown().await;
    let status = job.status();
    let saved = job.output().saved_file_path;
    drop(job);
    archiver.join().await;

    if status == JobStatus::Errored {
        bail!("download of {url} failed (see log for tool output)");
    }
    if saved.is_empty() {
        println!("Done.");
    } else {
        println!("Saved to {saved}");
    }
    Ok(())
}
