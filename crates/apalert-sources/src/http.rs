//! Shared HTTP client with per-host pacing.
//!
//! Every agent goes through one [`HttpFetcher`]; its [`HostPacer`] keeps a
//! minimum gap between requests to the same host regardless of which
//! player or slot the driver is working on.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

use crate::error::SourceError;

pub const DEFAULT_USER_AGENT: &str = concat!("apalert/", env!("CARGO_PKG_VERSION"));

// ─── Host Pacer ──────────────────────────────────────────────────────

/// Fixed-interval scheduler keyed by host.
#[derive(Debug)]
pub struct HostPacer {
    min_interval: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl HostPacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    /// Wait until `host` may be contacted again, then claim the slot.
    pub async fn wait(&self, host: &str) {
        let wake_at = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let at = slots.get(host).copied().filter(|t| *t > now).unwrap_or(now);
            slots.insert(host.to_owned(), at + self.min_interval);
            at
        };
        let wait = wake_at.saturating_duration_since(Instant::now());
        if !wait.is_zero() {
            tracing::debug!(host, wait_ms = wait.as_millis() as u64, "pacing request");
            tokio::time::sleep_until(wake_at).await;
        }
    }
}

// ─── Fetcher ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub user_agent: String,
    pub request_timeout: Duration,
    pub host_pacing: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            request_timeout: Duration::from_secs(30),
            host_pacing: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    pacer: Arc<HostPacer>,
}

impl HttpFetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout)
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            pacer: Arc::new(HostPacer::new(config.host_pacing)),
        })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        let response = self.send(self.client.get(url), url).await?;
        response
            .json()
            .await
            .map_err(|e| SourceError::Malformed(format!("{url}: {e}")))
    }

    pub async fn get_text(&self, url: &str) -> Result<String, SourceError> {
        let response = self.send(self.client.get(url), url).await?;
        response
            .text()
            .await
            .map_err(|e| SourceError::from_reqwest(&e, url))
    }

    pub async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T, SourceError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let response = self.send(self.client.post(url).json(body), url).await?;
        response
            .json()
            .await
            .map_err(|e| SourceError::Malformed(format!("{url}: {e}")))
    }

    pub async fn put_json<B>(&self, url: &str, body: &B) -> Result<(), SourceError>
    where
        B: Serialize + ?Sized + Sync,
    {
        self.send(self.client.put(url).json(body), url).await?;
        Ok(())
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<reqwest::Response, SourceError> {
        let host = host_key(url)?;
        self.pacer.wait(&host).await;
        tracing::debug!(url, "requesting");
        let response = request
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest(&e, url))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::from_status(status.as_u16(), url));
        }
        Ok(response)
    }
}

fn host_key(url: &str) -> Result<String, SourceError> {
    let parsed = Url::parse(url).map_err(|_| SourceError::BadIdentifier(url.to_owned()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| SourceError::BadIdentifier(url.to_owned()))?;
    Ok(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    })
}
