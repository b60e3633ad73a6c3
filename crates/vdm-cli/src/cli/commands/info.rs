//! `vdm info <url>` – print the tool's metadata as JSON.

use anyhow::{Context, Result};
use vdm_core::config::VdmConfig;
use vdm_core::downloader::Downloader;

pub async fn run_info(cfg: &VdmConfig, url: &str) -> Result<()> {
    let downloader = Downloader::from_config(cfg);
    let out = downloader
        .fetch_metadata(url)
        .await
        .with_context(|| format!("metadata for {url}"))?;
    if let Some(stderr) = &out.failure {
        tracing::warn!(url, "tool exited with an error after printing metadata: {}", stderr);
        eprintln!("warning: {}", stderr.trim());
    }
    println!("{}", serde_json::to_string_pretty(&out.info)?);
    Ok(())
}
