//! A stand-in for the downloader tool: a `/bin/sh` script answering the four
//! invocation shapes from files in a scratch directory.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use vdm_core::downloader::Downloader;

pub struct FakeTool {
    dir: TempDir,
    downloader: Downloader,
}

impl FakeTool {
    /// Playlist dumps come from `dump.json`, metadata from `info.json`;
    /// downloads append their argv to `downloads.log` and print nothing.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().display().to_string();
        let script = format!(
            r#"for a in "$@"; do
  case "$a" in
    --dump-single-json) cat '{root}/dump.json'; exit 0 ;;
    -J) cat '{root}/info.json'; exit 0 ;;
    --print) echo '{root}/resolved.mp4'; exit 0 ;;
  esac
done
echo "$@" >> '{root}/downloads.log'
"#
        );
        let path = dir.path().join("tool.sh");
        std::fs::write(&path, script).unwrap();
        std::fs::write(dir.path().join("info.json"), r#"{"title":"Fake video"}"#).unwrap();
        let downloader = Downloader::new("sh").with_base_args(vec![path.display().to_string()]);
        Self { dir, downloader }
    }

    pub fn with_entries(self, urls: &[&str]) -> Self {
        let entries: Vec<serde_json::Value> = urls
            .iter()
            .enumerate()
            .map(|(i, u)| {
                serde_json::json!({
                    "id": format!("v{}", i),
                    "title": format!("Video {}", i),
                    "webpage_url": u,
                    "upload_date": "20240101",
                })
            })
            .collect();
        let dump = serde_json::json!({ "id": "chan", "title": "Channel", "entries": entries });
        std::fs::write(self.dir.path().join("dump.json"), dump.to_string()).unwrap();
        self
    }

    pub fn downloader(&self) -> Downloader {
        self.downloader.clone()
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn downloads(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("downloads.log"))
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// What `--print` answers for every URL.
    pub fn resolved_path(&self) -> PathBuf {
        self.dir.path().join("resolved.mp4")
    }
}
