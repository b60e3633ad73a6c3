//! CLI command handlers, one file per subcommand.

mod channel;
mod download;
mod info;
mod watch;

pub use channel::run_channel;
pub use download::{run_download, DownloadOptions};
pub use info::run_info;
pub use watch::run_watch;
