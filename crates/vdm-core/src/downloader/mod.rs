//! External downloader tool (yt-dlp compatible) invocations.
//!
//! Builds and runs the four invocation shapes the engine needs: the download
//! itself, the `-J` metadata dump, the flat playlist dump used by subscriptions
//! and the `--print filename` resolution. Every process is launched through a
//! [`ProcessControl`] so it can later be terminated as a group.

mod info;
mod process;

use std::ffi::OsStr;
use std::process::{Output, Stdio};
use std::sync::Arc;

use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::config::VdmConfig;
use crate::error::ToolError;

pub use info::{parse_upload_date, DownloadInfo, PlaylistDump, PlaylistEntry};
pub use process::{ProcessControl, SystemProcessControl};

/// Number of most recent playlist entries inspected per subscription poll.
pub const PLAYLIST_WINDOW: &str = "-I0:10";

/// Result of a `-J` invocation.
///
/// The tool may print a complete document and still exit non-zero (e.g. a
/// post-extraction warning escalated to an error); in that case `info` is kept
/// and `failure` carries the buffered stderr.
#[derive(Debug, Clone)]
pub struct MetadataOutput {
    pub info: DownloadInfo,
    pub failure: Option<String>,
}

/// Handle on the downloader program.
#[derive(Clone)]
pub struct Downloader {
    program: String,
    base_args: Vec<String>,
    control: Arc<dyn ProcessControl>,
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("program", &self.program)
            .field("base_args", &self.base_args)
            .finish_non_exhaustive()
    }
}

impl Downloader {
    /// Downloader running `program` with the platform's process control.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            control: Arc::new(SystemProcessControl),
        }
    }

    pub fn from_config(cfg: &VdmConfig) -> Self {
        Self::new(cfg.downloader_path.clone()).with_base_args(cfg.downloader_args.clone())
    }

    /// Arguments inserted before every invocation (`python3 -m yt_dlp ...`).
    pub fn with_base_args(mut self, args: Vec<String>) -> Self {
        self.base_args = args;
        self
    }

    pub fn with_process_control(mut self, control: Arc<dyn ProcessControl>) -> Self {
        self.control = control;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn process_control(&self) -> &Arc<dyn ProcessControl> {
        &self.control
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        self.control.configure(&mut cmd);
        cmd
    }

    /// Spawns the download invocation with piped stdout/stderr.
    pub fn spawn_download(&self, args: &[String]) -> Result<Child, ToolError> {
        self.command(args).spawn().map_err(ToolError::Spawn)
    }

    /// `<tool> <url> -J`.
    pub async fn fetch_metadata(&self, url: &str) -> Result<MetadataOutput, ToolError> {
        tracing::info!(url, "retrieving metadata");
        let output = self.run(self.command([url, "-J"]), None).await?;
        let failure = (!output.status.success()).then(|| stderr_text(&output));

        match serde_json::from_slice::<DownloadInfo>(&output.stdout) {
            Ok(info) => Ok(MetadataOutput { info, failure }),
            // Nothing decodable and a failed exit: stderr says more than "EOF".
            Err(_) if failure.is_some() => Err(ToolError::Exit {
                code: output.status.code(),
                stderr: failure.unwrap_or_default(),
            }),
            Err(e) => Err(ToolError::Decode(e)),
        }
    }

    /// `<tool> --print filename -o <template> <url>`; returns the trimmed path.
    pub async fn resolve_filename(&self, url: &str, template: &str) -> Result<String, ToolError> {
        let output = self
            .run(
                self.command(["--print", "filename", "-o", template, url]),
                None,
            )
            .await?;
        if !output.status.success() {
            return Err(ToolError::Exit {
                code: output.status.code(),
                stderr: stderr_text(&output),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .trim_matches('\n')
            .to_string())
    }

    /// `<tool> <url> --dump-single-json --flat-playlist -I0:10 --no-warnings`.
    ///
    /// The invocation is bound to `cancel`: cancelling kills the process group
    /// and returns [`ToolError::Cancelled`] without waiting for the tool.
    pub async fn dump_playlist(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<PlaylistDump, ToolError> {
        let cmd = self.command([
            url,
            "--dump-single-json",
            "--flat-playlist",
            PLAYLIST_WINDOW,
            "--no-warnings",
        ]);
        self.dump(cmd, cancel).await
    }

    /// `<tool> <url> --dump-single-json --flat-playlist --no-warnings`: every
    /// entry, not just the latest window.
    pub async fn dump_channel(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<PlaylistDump, ToolError> {
        let cmd = self.command([url, "--dump-single-json", "--flat-playlist", "--no-warnings"]);
        self.dump(cmd, cancel).await
    }

    async fn dump(&self, cmd: Command, cancel: &CancellationToken) -> Result<PlaylistDump, ToolError> {
        let output = self.run(cmd, Some(cancel)).await?;
        if !output.status.success() {
            return Err(ToolError::Exit {
                code: output.status.code(),
                stderr: stderr_text(&output),
            });
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    /// Runs `cmd` to completion, collecting stdout and stderr.
    async fn run(
        &self,
        mut cmd: Command,
        cancel: Option<&CancellationToken>,
    ) -> Result<Output, ToolError> {
        cmd.kill_on_drop(true);
        let child = cmd.spawn().map_err(ToolError::Spawn)?;
        let Some(cancel) = cancel else {
            return child.wait_with_output().await.map_err(ToolError::Io);
        };

        let pid = child.id();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                if let Some(pid) = pid {
                    if let Err(e) = self.control.terminate(pid) {
                        tracing::debug!(pid, "terminate cancelled invocation: {}", e);
                    }
                }
                Err(ToolError::Cancelled)
            }
            out = child.wait_with_output() => out.map_err(ToolError::Io),
        }
    }
}

fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}
