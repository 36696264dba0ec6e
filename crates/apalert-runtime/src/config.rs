//! Resolved runtime settings.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use apalert_sources::http::DEFAULT_USER_AGENT;
use apalert_sources::{
    AggregatorAgent, FetcherConfig, HtmlAgent, HttpFetcher, NativeAgent,
};
use apalert_session::SourceSet;
use url::Url;

use crate::cli::{self, Cli};

// ─── Sync Policy ─────────────────────────────────────────────────────

/// Driver-level knobs. Per-slot and per-agent constants live in
/// `apalert-core`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Time between scheduled cycles.
    pub interval: Duration,
    /// Durable state is flushed after this many processed slots.
    pub flush_every: usize,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            flush_every: 10,
        }
    }
}

// ─── Settings ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Settings {
    pub state_dir: PathBuf,
    pub aggregator_url: Url,
    pub fetcher: FetcherConfig,
    pub policy: SyncPolicy,
    pub outbox: Option<PathBuf>,
}

impl Settings {
    pub fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let aggregator_url = Url::parse(&cli.aggregator_url)
            .with_context(|| format!("invalid aggregator url: {}", cli.aggregator_url))?;
        Ok(Self {
            state_dir: cli.state_dir.clone().unwrap_or_else(cli::default_state_dir),
            aggregator_url,
            fetcher: FetcherConfig {
                user_agent: cli
                    .user_agent
                    .clone()
                    .unwrap_or_else(|| DEFAULT_USER_AGENT.to_owned()),
                request_timeout: Duration::from_secs(cli.request_timeout_secs),
                host_pacing: Duration::from_millis(cli.host_pacing_ms),
            },
            policy: SyncPolicy {
                interval: Duration::from_secs(cli.interval_secs.max(1)),
                flush_every: cli.flush_every.max(1),
            },
            outbox: cli.outbox.clone(),
        })
    }

    /// The three HTTP agents, sharing one client and one pacer.
    pub fn build_sources(&self) -> anyhow::Result<SourceSet> {
        let http = HttpFetcher::new(&self.fetcher).context("failed to build http client")?;
        Ok(SourceSet {
            aggregator: Box::new(AggregatorAgent::new(http.clone(), self.aggregator_url.clone())),
            native: Box::new(NativeAgent::new(http.clone())),
            html: Box::new(HtmlAgent::new(http)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn settings_clamp_zero_knobs() {
        let cli = Cli::try_parse_from([
            "apalert",
            "--state-dir",
            "/tmp/apalert-test",
            "--flush-every",
            "0",
            "--interval-secs",
            "0",
            "run",
        ])
        .expect("parse");
        let settings = Settings::from_cli(&cli).expect("settings");
        assert_eq!(settings.policy.flush_every, 1);
        assert_eq!(settings.policy.interval, Duration::from_secs(1));
        assert_eq!(settings.state_dir, PathBuf::from("/tmp/apalert-test"));
    }

    #[test]
    fn rejects_bad_aggregator_url() {
        let cli = Cli::try_parse_from(["apalert", "--aggregator-url", "not a url", "status"])
            .expect("parse");
        assert!(Settings::from_cli(&cli).is_err());
    }
}
