use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Global configuration loaded from `~/.config/vdm/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VdmConfig {
    /// Program used for every tool invocation (yt-dlp or a compatible fork).
    pub downloader_path: String,
    /// Arguments placed before every invocation, e.g. `["-m", "yt_dlp"]` with `python3`.
    #[serde(default)]
    pub downloader_args: Vec<String>,
    /// Base directory for downloads when a request does not name one.
    pub download_path: String,
    /// Number of jobs the queue runs concurrently.
    pub queue_workers: usize,
    /// Capacity of the job queue channel; `publish` waits when full.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Capacity of the archival channel between completed jobs and the archive sink.
    #[serde(default = "default_archive_capacity")]
    pub archive_capacity: usize,
    /// Capacity of the subscription scheduler's dispatch channel.
    #[serde(default = "default_dispatch_capacity")]
    pub dispatch_capacity: usize,
}

fn default_queue_capacity() -> usize {
    64
}

fn default_archive_capacity() -> usize {
    32
}

fn default_dispatch_capacity() -> usize {
    16
}

impl Default for VdmConfig {
    fn default() -> Self {
        Self {
            downloader_path: "yt-dlp".to_string(),
            downloader_args: Vec::new(),
            download_path: ".".to_string(),
            queue_workers: 2,
            queue_capacity: default_queue_capacity(),
            archive_capacity: default_archive_capacity(),
            dispatch_capacity: default_dispatch_capacity(),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("vdm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<VdmConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = VdmConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: VdmConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = VdmConfig::default();
        assert_eq!(cfg.downloader_path, "yt-dlp");
        assert!(cfg.downloader_args.is_empty());
        assert_eq!(cfg.download_path, ".");
        assert_eq!(cfg.queue_workers, 2);
        assert_eq!(cfg.queue_capacity, 64);
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = VdmConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: VdmConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.downloader_path, cfg.downloader_path);
        assert_eq!(parsed.download_path, cfg.download_path);
        assert_eq!(parsed.queue_workers, cfg.queue_workers);
        assert_eq!(parsed.dispatch_capacity, cfg.dispatch_capacity);
    }

    #[test]
    fn config_toml_minimal_uses_channel_defaults() {
        let toml = r#"
            downloader_path = "/usr/bin/python3"
            downloader_args = ["-m", "yt_dlp"]
            download_path = "/srv/media"
            queue_workers = 4
        "#;
        let cfg: VdmConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.downloader_path, "/usr/bin/python3");
        assert_eq!(cfg.downloader_args, vec!["-m", "yt_dlp"]);
        assert_eq!(cfg.download_path, "/srv/media");
        assert_eq!(cfg.queue_workers, 4);
        assert_eq!(cfg.queue_capacity, 64);
        assert_eq!(cfg.archive_capacity, 32);
        assert_eq!(cfg.dispatch_capacity, 16);
    }

    #[test]
    fn config_toml_missing_downloader_args_is_empty() {
        let toml = r#"
            downloader_path = "yt-dlp"
            download_path = "."
            queue_workers = 1
            archive_capacity = 4
        "#;
        let cfg: VdmConfig = toml::from_str(toml).unwrap();
        assert!(cfg.downloader_args.is_empty());
        assert_eq!(cfg.archive_capacity, 4);
    }
}
