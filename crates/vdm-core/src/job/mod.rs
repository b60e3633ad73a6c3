//! Download jobs: one URL, one tool process, one progress record.
//!
//! A [`Job`] is shared as `Arc<Job>` between the registry (readers) and the
//! single worker task that drives it through
//! `Pending → Downloading → Completed | Errored`.

mod args;
mod format;
mod output;
mod progress;

use std::fmt;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

use crate::archive::{ArchiveMessage, ArchivePublisher};
use crate::downloader::{DownloadInfo, Downloader, MetadataOutput};
use crate::error::{JobError, ToolError};

pub use args::{download_args, sanitize_params, strip_playlist_suffix};
pub use format::{Alternative, FormatPreference, FormatSelector, Quality};
pub use output::{build_filename, sanitize_folder_name, DownloadOutput, DEFAULT_FILENAME_TEMPLATE};
pub use progress::{DownloadProgress, JobStatus, DOWNLOAD_TEMPLATE, POSTPROCESS_TEMPLATE};

use progress::ToolLine;

/// Opaque job identifier (UUID v4).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First UUID group; enough to tell jobs apart in logs.
    pub fn short(&self) -> &str {
        self.0.split('-').next().unwrap_or(&self.0)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What a caller asks for when creating a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadRequest {
    pub url: String,
    pub params: Vec<String>,
    /// Base directory; falls back to the configured download path.
    pub path: String,
    /// Filename template; falls back to [`DEFAULT_FILENAME_TEMPLATE`].
    pub rename: String,
    pub channel_folder: Option<String>,
    pub preferred_formats: Vec<String>,
    pub preferred_qualities: Vec<String>,
    pub livestream: bool,
    pub auto_remove: bool,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Services a job needs while it runs.
#[derive(Debug, Clone)]
pub struct JobContext {
    downloader: Arc<Downloader>,
    default_download_path: String,
    archive: Option<ArchivePublisher>,
    completions: Option<mpsc::UnboundedSender<JobId>>,
}

impl JobContext {
    pub fn new(downloader: Arc<Downloader>, default_download_path: impl Into<String>) -> Self {
        Self {
            downloader,
            default_download_path: default_download_path.into(),
            archive: None,
            completions: None,
        }
    }

    pub fn with_archive(mut self, archive: ArchivePublisher) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Channel that receives the id of every job once it has completed.
    pub fn with_completions(mut self, tx: mpsc::UnboundedSender<JobId>) -> Self {
        self.completions = Some(tx);
        self
    }

    pub fn downloader(&self) -> &Arc<Downloader> {
        &self.downloader
    }
}

/// Point-in-time copy of a job's state.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub url: String,
    pub params: Vec<String>,
    pub info: DownloadInfo,
    pub progress: DownloadProgress,
    pub output: DownloadOutput,
    pub livestream: bool,
    pub auto_remove: bool,
}

#[derive(Debug, Default)]
struct JobState {
    params: Vec<String>,
    info: DownloadInfo,
    progress: DownloadProgress,
    output: DownloadOutput,
}

/// A single download driven by one tool process.
#[derive(Debug)]
pub struct Job {
    id: JobId,
    url: String,
    livestream: bool,
    auto_remove: bool,
    preference: FormatPreference,
    state: RwLock<JobState>,
    pid: Mutex<Option<u32>>,
    killed: AtomicBool,
    stopped_at_spawn: AtomicBool,
    started: AtomicBool,
    completed: AtomicBool,
    ctx: JobContext,
}

impl Job {
    pub fn new(req: DownloadRequest, ctx: JobContext) -> Self {
        let output = DownloadOutput::new(req.path, req.rename, req.channel_folder.as_deref());
        let state = JobState {
            params: req.params,
            info: DownloadInfo::pending(&req.url),
            progress: DownloadProgress::default(),
            output,
        };
        Self {
            id: JobId::new(),
            preference: FormatPreference::new(&req.preferred_qualities, req.preferred_formats),
            url: req.url,
            livestream: req.livestream,
            auto_remove: req.auto_remove,
            state: RwLock::new(state),
            pid: Mutex::new(None),
            killed: AtomicBool::new(false),
            stopped_at_spawn: AtomicBool::new(false),
            started: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            ctx,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_livestream(&self) -> bool {
        self.livestream
    }

    pub fn auto_remove(&self) -> bool {
        self.auto_remove
    }

    pub fn status(&self) -> JobStatus {
        self.read().progress.status
    }

    pub fn progress(&self) -> DownloadProgress {
        self.read().progress.clone()
    }

    pub fn info(&self) -> DownloadInfo {
        self.read().info.clone()
    }

    pub fn output(&self) -> DownloadOutput {
        self.read().output.clone()
    }

    /// OS pid of the bound tool process, if one is running.
    pub fn pid(&self) -> Option<u32> {
        *self.lock_pid()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let st = self.read();
        JobSnapshot {
            id: self.id.clone(),
            url: self.url.clone(),
            params: st.params.clone(),
            info: st.info.clone(),
            progress: st.progress.clone(),
            output: st.output.clone(),
            livestream: self.livestream,
            auto_remove: self.auto_remove,
        }
    }

    /// Resets info to a placeholder (`title = url`, `created_at = now`) and marks the job Pending.
    ///
    /// No-op once the job has been started or has reached a terminal status.
    pub fn set_pending(&self) {
        if self.started.load(Ordering::SeqCst) {
            return;
        }
        let mut st = self.write();
        if st.progress.status.is_terminal() {
            return;
        }
        st.info = DownloadInfo::pending(&self.url);
        st.progress.status = JobStatus::Pending;
    }

    /// Fetches `-J` metadata into the job.
    ///
    /// Decoded info is stored even when the tool exits non-zero; the error
    /// then carries the tool's stderr.
    pub async fn set_metadata(&self) -> Result<(), JobError> {
        let MetadataOutput { mut info, failure } =
            self.ctx.downloader.fetch_metadata(&self.url).await?;
        if info.url.is_empty() {
            info.url = self.url.clone();
        }
        info.created_at = Utc::now();
        {
            let mut st = self.write();
            st.info = info;
            if !self.started.load(Ordering::SeqCst) && !st.progress.status.is_terminal() {
                st.progress.status = JobStatus::Pending;
            }
        }
        match failure {
            Some(stderr) => Err(JobError::Metadata(stderr)),
            None => Ok(()),
        }
    }

    /// Runs the download to completion. Callable once per job.
    ///
    /// Completion bookkeeping runs on every exit path. A job killed before
    /// this call is finalized without spawning the tool. A launch failure or
    /// an unexpected non-zero exit leaves the job Errored.
    pub async fn start(&self) -> Result<(), JobError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(JobError::AlreadyStarted(self.id.clone()));
        }

        if self.killed.load(Ordering::SeqCst) || self.status().is_terminal() {
            tracing::info!(job_id = %self.id, url = %self.url, "job was stopped before its download started");
            self.finish(false).await;
            return Ok(());
        }

        let outcome = self.run_process().await;
        let result = match outcome {
            Ok(status) if status.success() || self.killed.load(Ordering::SeqCst) => Ok(()),
            Ok(status) => {
                tracing::warn!(job_id = %self.id, url = %self.url, "downloader exited with {}", status);
                self.mark_errored();
                Ok(())
            }
            Err(e) => {
                tracing::error!(job_id = %self.id, url = %self.url, "download failed: {}", e);
                self.mark_errored();
                Err(JobError::Tool(e))
            }
        };

        let ran = !self.stopped_at_spawn.load(Ordering::SeqCst);
        self.finish(ran).await;
        result
    }

    /// Sends SIGTERM to the job's process group and forces status Completed.
    ///
    /// Fails with [`JobError::NoProcess`] when nothing is running; the status
    /// is forced either way.
    pub fn kill(&self) -> Result<(), JobError> {
        self.killed.store(true, Ordering::SeqCst);
        let result = self.signal_process_group();
        self.write().progress.status = JobStatus::Completed;
        result
    }

    /// Final bookkeeping; only the first call has any effect.
    ///
    /// Resolves the saved path if the tool never reported one, publishes the
    /// archive event when no progress was ever observed, records terminal
    /// progress (an Errored job stays Errored) and emits the completion event.
    pub async fn complete(&self) {
        self.finish(true).await;
    }

    /// Completion bookkeeping. A job that never got to run (`ran == false`)
    /// skips filename resolution and is never archived.
    async fn finish(&self, ran: bool) {
        if self.completed.swap(true, Ordering::SeqCst) {
            return;
        }

        let (never_observed, needs_path) = {
            let st = self.read();
            (
                st.progress.never_observed(),
                st.output.saved_file_path.is_empty(),
            )
        };

        if ran && needs_path {
            let template = self.output_template();
            match self
                .ctx
                .downloader
                .resolve_filename(strip_playlist_suffix(&self.url), &template)
                .await
            {
                Ok(path) => {
                    self.write().output.saved_file_path = path;
                }
                Err(e) => {
                    tracing::warn!(job_id = %self.id, "could not resolve saved filename: {}", e)
                }
            }
        }

        if ran && never_observed {
            self.publish_archive().await;
        }

        let (status, saved) = {
            let mut st = self.write();
            if st.progress.status != JobStatus::Errored {
                st.progress = DownloadProgress::completed();
            }
            (st.progress.status, st.output.saved_file_path.clone())
        };
        tracing::info!(job_id = %self.id, ?status, "job {} finished: {}", self.id.short(), saved);

        if let Some(tx) = &self.ctx.completions {
            let _ = tx.send(self.id.clone());
        }
    }

    async fn run_process(&self) -> Result<ExitStatus, ToolError> {
        let args = self.prepare_invocation();
        tracing::info!(job_id = %self.id, url = %self.url, "starting download: {:?}", args);

        let mut child = self.ctx.downloader.spawn_download(&args)?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;
        let pid = child.id();
        *self.lock_pid() = pid;
        if let Some(pid) = pid.filter(|_| self.killed.load(Ordering::SeqCst)) {
            tracing::info!(job_id = %self.id, pid, "killed while spawning, terminating at once");
            self.stopped_at_spawn.store(true, Ordering::SeqCst);
            if let Err(e) = self.ctx.downloader.process_control().terminate(pid) {
                tracing::warn!(job_id = %self.id, pid, "terminate: {}", e);
            }
        }

        let wait = async {
            let status = child.wait().await;
            *self.lock_pid() = None;
            status
        };
        let (status, (), ()) = tokio::join!(
            wait,
            for_each_line(stdout, |line| self.apply_stdout_line(line)),
            for_each_line(stderr, |line| {
                tracing::error!(job_id = %self.id, url = %self.url, "downloader: {}", line)
            }),
        );
        status.map_err(ToolError::Io)
    }

    /// Normalizes params and output under the lock and returns the argv.
    fn prepare_invocation(&self) -> Vec<String> {
        let mut st = self.write();
        st.params = sanitize_params(std::mem::take(&mut st.params));
        st.output.apply_defaults(&self.ctx.default_download_path);
        let template = st.output.full_template();
        let selector = self.preference.selector();
        download_args(&self.url, &st.params, selector.as_ref(), &template)
    }

    fn output_template(&self) -> String {
        let mut output = self.read().output.clone();
        output.apply_defaults(&self.ctx.default_download_path);
        output.full_template()
    }

    fn apply_stdout_line(&self, line: &str) {
        match progress::parse_line(line) {
            Some(ToolLine::Progress(tick)) => {
                let applied = self.write().progress.apply(&tick);
                if applied {
                    tracing::debug!(
                        job_id = %self.id,
                        percentage = %tick.percentage.trim(),
                        speed = tick.speed.unwrap_or_default(),
                        "progress"
                    );
                }
            }
            Some(ToolLine::Postprocess(marker)) => {
                tracing::debug!(job_id = %self.id, path = %marker.filepath, "post-processed");
                self.write().output.saved_file_path = marker.filepath;
            }
            None => {}
        }
    }

    fn signal_process_group(&self) -> Result<(), JobError> {
        let pid = self.pid().ok_or(JobError::NoProcess)?;
        tracing::info!(job_id = %self.id, pid, "terminating process group");
        self.ctx
            .downloader
            .process_control()
            .terminate(pid)
            .map_err(JobError::Signal)
    }

    fn mark_errored(&self) {
        let mut st = self.write();
        if !st.progress.status.is_terminal() {
            st.progress.status = JobStatus::Errored;
        }
    }

    async fn publish_archive(&self) {
        let Some(archive) = &self.ctx.archive else {
            return;
        };
        let msg = {
            let st = self.read();
            ArchiveMessage {
                id: self.id.to_string(),
                path: st.output.saved_file_path.clone(),
                title: st.info.title.clone(),
                thumbnail: st.info.thumbnail.clone(),
                source: self.url.clone(),
                metadata: serde_json::to_value(&st.info).unwrap_or_default(),
                created_at: st.info.created_at,
            }
        };
        if let Err(e) = archive.publish(msg).await {
            tracing::warn!(job_id = %self.id, "archive publish failed: {}", e);
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, JobState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, JobState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pid(&self) -> MutexGuard<'_, Option<u32>> {
        self.pid.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn missing_pipe(name: &str) -> ToolError {
    ToolError::Spawn(std::io::Error::other(format!("{} was not captured", name)))
}

/// Feeds every line of `reader` to `f`, tolerating invalid UTF-8.
async fn for_each_line<R, F>(reader: R, mut f: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                f(line.trim_end_matches(['\r', '\n']));
            }
            Err(e) => {
                tracing::debug!("stop reading downloader output: {}", e);
                break;
            }
        }
    }
}
