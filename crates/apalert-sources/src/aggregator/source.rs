//! Aggregator-API agent: full session snapshots from a third-party
//! aggregation service that proxies the game host.

use apalert_core::{AgentKind, ProgressionStatus, SessionSnapshot};
use async_trait::async_trait;
use url::Url;

use super::translate::{self, AggregatorTracker, GameUpdate, RegisterRequest, RegisterResponse};
use crate::agent::SourceAgent;
use crate::error::SourceError;
use crate::http::HttpFetcher;
use crate::locator::SessionLink;

#[derive(Debug, Clone)]
pub struct AggregatorAgent {
    http: HttpFetcher,
    base: Url,
}

impl AggregatorAgent {
    pub fn new(http: HttpFetcher, base: Url) -> Self {
        Self { http, base }
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/{path}", self.base.as_str().trim_end_matches('/'))
    }

    /// Return the session's aggregator handle, registering the upstream URL
    /// first when the link has none.
    async fn ensure_id(&self, link: &mut SessionLink) -> Result<Option<String>, SourceError> {
        if let Some(id) = &link.aggregator_id {
            return Ok(Some(id.clone()));
        }
        let Some(upstream) = link.upstream_url() else {
            return Ok(None);
        };
        let registered: RegisterResponse = self
            .http
            .post_json(&self.api("tracker"), &RegisterRequest { url: &upstream })
            .await?;
        tracing::info!(upstream = %upstream, tracker_id = %registered.tracker_id, "registered session with aggregator");
        link.aggregator_id = Some(registered.tracker_id.clone());
        Ok(Some(registered.tracker_id))
    }
}

#[async_trait]
impl SourceAgent for AggregatorAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Aggregator
    }

    async fn fetch_session(
        &self,
        link: &mut SessionLink,
    ) -> Result<Option<SessionSnapshot>, SourceError> {
        let Some(id) = self.ensure_id(link).await? else {
            return Ok(None);
        };
        let doc: AggregatorTracker = self.http.get_json(&self.api(&format!("tracker/{id}"))).await?;
        if let Some(upstream) = &doc.upstream_url {
            link.adopt_upstream(upstream, &self.base);
        }
        Ok(Some(translate::translate(&doc)))
    }

    async fn set_progression(
        &self,
        link: &SessionLink,
        remote_id: i64,
        status: ProgressionStatus,
    ) -> Result<(), SourceError> {
        let id = link
            .aggregator_id
            .as_deref()
            .ok_or(SourceError::Unsupported(AgentKind::Aggregator))?;
        let url = self.api(&format!("tracker/{id}/game/{remote_id}"));
        self.http
            .put_json(&url, &GameUpdate {
                progression_status: status,
            })
            .await
    }
}
