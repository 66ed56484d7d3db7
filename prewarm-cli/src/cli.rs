use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "prewarm",
    author,
    version,
    about = "Keeps the channels a viewer is likely to switch to buffered in memory"
)]
pub struct Args {
    /// Channel map (JSON): lineup, stream URLs, favorites and tuning
    #[arg(short, long, value_name = "FILE")]
    pub config: PathBuf,

    /// Directory for the learned prediction model (overrides the config file)
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Maximum number of channels buffered at once
    #[arg(long)]
    pub max_cached: Option<usize>,

    /// Playlist refresh interval in milliseconds
    #[arg(long, value_name = "MS")]
    pub poll_interval_ms: Option<u64>,

    /// Channel to tune to on startup
    #[arg(long, value_name = "ID")]
    pub channel: Option<String>,

    /// Log filter directive; takes precedence over RUST_LOG
    #[arg(long, value_name = "FILTER")]
    pub log_filter: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}
