pub mod config;
pub mod logging;

pub mod archive;
pub mod downloader;
pub mod error;
pub mod job;
pub mod queue;
pub mod registry;
pub mod subscription;
