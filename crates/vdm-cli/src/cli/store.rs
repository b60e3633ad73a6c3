//! JSON-lines archive file: one [`ArchiveMessage`] per line.
//!
//! Serves as the archive sink for `download` and `watch --download` and as
//! the dedup oracle for `watch`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use vdm_core::archive::{ArchiveMessage, ArchiveSink, DedupOracle};
use vdm_core::logging;

const ARCHIVE_FILE: &str = "archive.jsonl";

pub struct JsonlArchive {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlArchive {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// `$XDG_STATE_HOME/vdm/archive.jsonl`.
    pub fn open_default() -> Result<Self> {
        let dir = logging::state_dir()?;
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create state dir {}", dir.display()))?;
        Ok(Self::open(dir.join(ARCHIVE_FILE)))
    }

    /// All readable entries. A missing file is an empty archive; malformed
    /// lines are skipped.
    pub async fn entries(&self) -> Result<Vec<ArchiveMessage>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(t) => t,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("read {}", self.path.display()));
            }
        };
        let mut out = Vec::new();
        for (n, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ArchiveMessage>(line) {
                Ok(msg) => out.push(msg),
                Err(e) => tracing::warn!(
                    path = %self.path.display(),
                    line = n + 1,
                    "skipping malformed archive line: {}",
                    e
                ),
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl ArchiveSink for JsonlArchive {
    async fn store(&self, msg: ArchiveMessage) -> Result<()> {
        let mut line = serde_json::to_string(&msg)?;
        line.push('\n');
        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("open {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl DedupOracle for JsonlArchive {
    async fn is_source_downloaded(&self, url: &str) -> Result<bool> {
        Ok(self.entries().await?.iter().any(|m| m.source == url))
    }
}
