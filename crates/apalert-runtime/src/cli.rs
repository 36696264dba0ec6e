//! CLI definition using clap derive.

use std::path::PathBuf;

use apalert_sources::locator::DEFAULT_AGGREGATOR_URL;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "apalert", version, about = "multiworld randomizer tracker")]
pub struct Cli {
    /// Directory holding trackers.json, sessions.json and classifications.json
    #[arg(long, global = true, env = "APALERT_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Aggregator base URL
    #[arg(long, global = true, env = "APALERT_AGGREGATOR_URL", default_value = DEFAULT_AGGREGATOR_URL)]
    pub aggregator_url: String,

    /// Seconds between scheduled cycles
    #[arg(long, global = true, env = "APALERT_INTERVAL_SECS", default_value = "3600")]
    pub interval_secs: u64,

    /// Minimum gap between two requests to the same host, in milliseconds
    #[arg(long, global = true, env = "APALERT_HOST_PACING_MS", default_value = "2000")]
    pub host_pacing_ms: u64,

    /// Per-request timeout in seconds
    #[arg(long, global = true, env = "APALERT_REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,

    /// Flush durable state after this many processed slots
    #[arg(long, global = true, env = "APALERT_FLUSH_EVERY", default_value = "10")]
    pub flush_every: usize,

    /// HTTP user agent
    #[arg(long, global = true, env = "APALERT_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Append notifications as JSON lines to this file instead of logging them
    #[arg(long, global = true, env = "APALERT_OUTBOX")]
    pub outbox: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run scheduled cycles until ctrl-c or SIGTERM
    Run,
    /// Run a single cycle and exit
    Once {
        /// Ignore rate limits and the idle-slot throttle
        #[arg(long)]
        force: bool,
    },
    /// Print tracked slots from the state file
    Status,
}

/// Default state directory: `$XDG_STATE_HOME/apalert`, else
/// `~/.local/state/apalert`, else `./.apalert`.
pub fn default_state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(dir).join("apalert");
    }
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".local/state/apalert"),
        Err(_) => PathBuf::from(".apalert"),
    }
}
