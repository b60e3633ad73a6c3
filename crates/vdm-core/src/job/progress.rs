//! Progress reporting for jobs: status, percentage, speed and ETA.
//!
//! The tool is told (via two `--progress-template` flags) to print one JSON
//! object per download tick and one per post-processed file. Every stdout line
//! is tried against both shapes; anything else is ordinary tool chatter.

use serde::{Deserialize, Serialize};

/// Template for download ticks, already collapsed to a single line.
pub const DOWNLOAD_TEMPLATE: &str = r#"download:{"eta":%(progress.eta)s,"percentage":"%(progress._percent_str)s","speed":%(progress.speed)s}"#;

/// Template for the final path reported after post-processing.
pub const POSTPROCESS_TEMPLATE: &str = r#"postprocess:{"filepath":"%(info.filepath)s"}"#;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Downloading,
    Completed,
    Errored,
}

impl JobStatus {
    /// Completed and Errored are final; progress ticks no longer apply.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Errored)
    }
}

/// Snapshot of download progress for one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    #[serde(rename = "process_status")]
    pub status: JobStatus,
    /// Percentage string as printed by the tool (e.g. `"42.0%"`); empty until the first tick.
    pub percentage: String,
    /// Bytes per second.
    pub speed: f64,
    /// Estimated seconds remaining.
    pub eta: f64,
}

impl DownloadProgress {
    /// Terminal progress recorded once a job has finished.
    pub fn completed() -> Self {
        Self {
            status: JobStatus::Completed,
            percentage: "-1".to_string(),
            speed: 0.0,
            eta: 0.0,
        }
    }

    /// True until the first download tick has been applied.
    pub fn never_observed(&self) -> bool {
        self.percentage.is_empty() && self.speed == 0.0
    }

    /// Applies a download tick. Ignored once the status is terminal.
    pub(crate) fn apply(&mut self, tick: &ProgressTick) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Downloading;
        self.percentage = tick.percentage.trim().to_string();
        self.speed = tick.speed.unwrap_or_default();
        self.eta = tick.eta.unwrap_or_default();
        true
    }
}

/// One download tick printed through [`DOWNLOAD_TEMPLATE`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct ProgressTick {
    pub percentage: String,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub eta: Option<f64>,
}

/// Final file path printed through [`POSTPROCESS_TEMPLATE`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct PostprocessMarker {
    pub filepath: String,
}

/// A recognised stdout line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub(crate) enum ToolLine {
    Progress(ProgressTick),
    Postprocess(PostprocessMarker),
}

/// Parses one stdout line; `None` for anything that is not one of the two markers.
pub(crate) fn parse_line(line: &str) -> Option<ToolLine> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }
    serde_json::from_str(line).ok()
}
