//! Error types shared by the job state machine, the tool runner and the scheduler.

use std::io;

use crate::job::JobId;

/// Failure of one external-tool invocation.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The process could not be launched (missing binary, permission, pipe setup).
    #[error("failed to launch downloader: {0}")]
    Spawn(#[source] io::Error),
    /// The process ran but exited unsuccessfully; `stderr` is what it printed.
    #[error("downloader exited with {}: {stderr}", exit_label(.code))]
    Exit { code: Option<i32>, stderr: String },
    /// Stdout was not the JSON document the invocation promises.
    #[error("decode downloader output: {0}")]
    Decode(#[from] serde_json::Error),
    /// Reading from or waiting on the process failed.
    #[error("downloader i/o: {0}")]
    Io(#[source] io::Error),
    /// The invocation was abandoned because its context was cancelled.
    #[error("downloader invocation cancelled")]
    Cancelled,
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {}", c),
        None => "signal".to_string(),
    }
}

/// Errors surfaced by [`crate::job::Job`] operations.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// `kill` was called while no OS process is bound to the job.
    #[error("no process bound to job")]
    NoProcess,
    /// Delivering the termination signal failed.
    #[error("signal process group: {0}")]
    Signal(#[source] io::Error),
    /// `start` was called a second time.
    #[error("job {0} was already started")]
    AlreadyStarted(JobId),
    /// The metadata invocation exited non-zero; carries its stderr text.
    #[error("{0}")]
    Metadata(String),
    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// Lookup failure in a [`crate::registry::JobRegistry`].
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("job {0} not found")]
    NotFound(JobId),
}

/// The archive consumer has stopped; the message was not delivered.
#[derive(Debug, thiserror::Error)]
#[error("archive consumer has stopped")]
pub struct ArchiveClosed;

/// The job queue dispatcher has stopped; the job was not queued.
#[derive(Debug, thiserror::Error)]
#[error("job queue has stopped")]
pub struct QueueClosed;

/// Errors surfaced by the subscription scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("invalid cron expression '{expr}': {message}")]
    InvalidCron { expr: String, message: String },
    /// The spawner is gone, so submitted tasks can no longer be dispatched.
    #[error("scheduler dispatch channel closed")]
    DispatchClosed,
    #[error("scheduler spawner is already running")]
    SpawnerAlreadyRunning,
    #[error("subscription recovery is not implemented")]
    RecoveryUnsupported,
    /// A fetch cycle's tool invocation failed (reported on the error channel).
    #[error("fetch for subscription {subscription_id}: {source}")]
    Fetch {
        subscription_id: String,
        #[source]
        source: ToolError,
    },
}
