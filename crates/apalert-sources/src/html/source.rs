//! HTML-scrape agent: last-resort fallback over the player-facing pages.

use apalert_core::slot::TrackedSlot;
use apalert_core::{AgentKind, SessionSnapshot};
use async_trait::async_trait;

use super::translate;
use crate::agent::{SlotFetch, SourceAgent};
use crate::error::SourceError;
use crate::http::HttpFetcher;
use crate::locator::SessionLink;

#[derive(Debug, Clone)]
pub struct HtmlAgent {
    http: HttpFetcher,
}

impl HtmlAgent {
    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }
}

#[async_trait]
impl SourceAgent for HtmlAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Html
    }

    async fn fetch_session(
        &self,
        link: &mut SessionLink,
    ) -> Result<Option<SessionSnapshot>, SourceError> {
        let Some(room) = link.native.clone() else {
            return Ok(None);
        };
        let url = room.tracker_url();
        let html = self.http.get_text(&url).await?;
        let mut snapshot = translate::parse_session_page(&html)?;
        snapshot.upstream_url = Some(url);
        Ok(Some(snapshot))
    }

    async fn fetch_slot(
        &self,
        link: &mut SessionLink,
        slot: &TrackedSlot,
    ) -> Result<SlotFetch, SourceError> {
        let Some(room) = link.native.clone() else {
            return Ok(SlotFetch::NoData);
        };

        let html = self
            .http
            .get_text(&room.slot_url(slot.position, link.html_generic))
            .await?;
        let mut page = translate::parse_slot_page(&html)?;

        if page.received.is_none() && !link.html_generic {
            tracing::debug!(room = %room.room, slot = slot.position, "no received table, trying generic tracker");
            let html = self.http.get_text(&room.slot_url(slot.position, true)).await?;
            page = translate::parse_slot_page(&html)?;
            if page.received.is_some() {
                link.html_generic = true;
            }
        }

        match page.received {
            Some(rows) if !rows.is_empty() => Ok(SlotFetch::Rows {
                rows,
                checks: page.checks,
            }),
            _ => Ok(SlotFetch::NoData),
        }
    }
}
