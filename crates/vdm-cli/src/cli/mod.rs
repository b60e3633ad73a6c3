//! CLI for the VDM video download manager.

mod commands;
mod store;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use vdm_core::config;

use commands::{run_channel, run_download, run_info, run_watch, DownloadOptions};

/// Top-level CLI for the VDM video download manager.
#[derive(Debug, Parser)]
#[command(name = "vdm")]
#[command(about = "VDM: video download manager driving yt-dlp", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download one video through the job queue.
    Download {
        /// Video page URL.
        url: String,

        /// Preferred quality, most preferred first (e.g. 1080p, best). Repeatable.
        #[arg(long = "quality", value_name = "Q")]
        qualities: Vec<String>,

        /// Preferred container extension (e.g. mp4). Repeatable.
        #[arg(long = "ext", value_name = "EXT")]
        extensions: Vec<String>,

        /// Directory to download into (default: `download_path` from config).
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,

        /// Filename template, without or with `.%(ext)s`.
        #[arg(long, value_name = "NAME")]
        rename: Option<String>,

        /// Subfolder under the output directory, e.g. the channel name.
        #[arg(long, value_name = "SUB")]
        folder: Option<String>,

        /// Treat the URL as a livestream (no metadata lookup).
        #[arg(long)]
        live: bool,

        /// Raw arguments passed to the tool after `--`.
        #[arg(last = true)]
        params: Vec<String>,
    },

    /// Print the tool's metadata for a URL as JSON.
    Info {
        /// Video page URL.
        url: String,
    },

    /// List every video of a channel or playlist; archived ones are marked `*`.
    Channel {
        /// Channel or playlist URL.
        url: String,

        /// Print the listing as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Poll a channel or playlist on a cron schedule and print new videos.
    Watch {
        /// Channel or playlist URL.
        url: String,

        /// Cron expression: 5 fields (minute first) or a macro such as @hourly.
        #[arg(long, default_value = "@hourly", value_name = "EXPR")]
        cron: String,

        /// Also download every new video.
        #[arg(long)]
        download: bool,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Download {
                url,
                qualities,
                extensions,
                output_dir,
                rename,
                folder,
                live,
                params,
            } => {
                let opts = DownloadOptions {
                    qualities,
                    extensions,
                    output_dir,
                    rename,
                    folder,
                    live,
                    params,
                };
                run_download(&cfg, &url, opts).await?;
            }
            CliCommand::Info { url } => run_info(&cfg, &url).await?,
            CliCommand::Channel { url, json } => run_channel(&cfg, &url, json).await?,
            CliCommand::Watch {
                url,
                cron,
                download,
            } => run_watch(&cfg, &url, &cron, download).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
