//! Native-API agent: the game host's own structured tracker API.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use apalert_core::slot::TrackedSlot;
use apalert_core::{AgentKind, SessionSnapshot};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::translate::{self, GameDatapackage, LiveTracker, StaticTracker};
use crate::agent::{SlotFetch, SourceAgent};
use crate::error::SourceError;
use crate::http::HttpFetcher;
use crate::locator::{NativeRoom, SessionLink};

/// A live document this young is reused by per-slot fetches.
const LIVE_REUSE: Duration = Duration::from_secs(300);

/// Per-session documents, kept on the [`SessionLink`] but never persisted.
#[derive(Debug, Clone, Default)]
pub struct NativeCache {
    statics: Option<Arc<StaticTracker>>,
    live: Option<(Instant, Arc<LiveTracker>)>,
}

type ItemNames = Arc<HashMap<i64, String>>;

#[derive(Debug)]
pub struct NativeAgent {
    http: HttpFetcher,
    /// Item dictionaries keyed by `(game, checksum)`.
    datapackages: Mutex<HashMap<(String, String), ItemNames>>,
}

impl NativeAgent {
    pub fn new(http: HttpFetcher) -> Self {
        Self {
            http,
            datapackages: Mutex::new(HashMap::new()),
        }
    }

    async fn statics(
        &self,
        link: &mut SessionLink,
        room: &NativeRoom,
    ) -> Result<Arc<StaticTracker>, SourceError> {
        if let Some(doc) = &link.native_cache.statics {
            return Ok(Arc::clone(doc));
        }
        let doc: StaticTracker = self
            .http
            .get_json(&room.api_url(&format!("static_tracker/{}", room.room)))
            .await?;
        let doc = Arc::new(doc);
        link.native_cache.statics = Some(Arc::clone(&doc));
        Ok(doc)
    }

    async fn live(
        &self,
        link: &mut SessionLink,
        room: &NativeRoom,
        reuse: bool,
    ) -> Result<Arc<LiveTracker>, SourceError> {
        if reuse {
            if let Some((at, doc)) = &link.native_cache.live {
                if at.elapsed() < LIVE_REUSE {
                    return Ok(Arc::clone(doc));
                }
            }
        }
        let doc: LiveTracker = self
            .http
            .get_json(&room.api_url(&format!("tracker/{}", room.room)))
            .await?;
        let doc = Arc::new(doc);
        link.native_cache.live = Some((Instant::now(), Arc::clone(&doc)));
        Ok(doc)
    }

    async fn item_names(
        &self,
        room: &NativeRoom,
        game: &str,
        checksum: &str,
    ) -> Result<ItemNames, SourceError> {
        let key = (game.to_owned(), checksum.to_owned());
        if let Some(names) = self.datapackages.lock().await.get(&key) {
            return Ok(Arc::clone(names));
        }
        let package: GameDatapackage = self
            .http
            .get_json(&room.api_url(&format!("datapackage/{checksum}")))
            .await?;
        let names = Arc::new(package.into_names());
        tracing::debug!(game, checksum, items = names.len(), "cached datapackage");
        self.datapackages
            .lock()
            .await
            .insert(key, Arc::clone(&names));
        Ok(names)
    }
}

#[async_trait]
impl SourceAgent for NativeAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Native
    }

    async fn fetch_session(
        &self,
        link: &mut SessionLink,
    ) -> Result<Option<SessionSnapshot>, SourceError> {
        let Some(room) = link.native.clone() else {
            return Ok(None);
        };
        let statics = self.statics(link, &room).await?;
        let live = self.live(link, &room, false).await?;
        let mut snapshot = translate::translate(&statics, &live);
        snapshot.upstream_url = Some(room.tracker_url());
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
        let live = self.live(link, &room, true).await?;
        let Some(items) = live.items_for(slot.position) else {
            return Ok(SlotFetch::NoData);
        };
        let count = i64::try_from(items.len()).unwrap_or(i64::MAX);
        if count == slot.latest_item && !slot.all_items.is_empty() {
            return Ok(SlotFetch::Unchanged);
        }

        let statics = self.statics(link, &room).await?;
        let game = slot
            .game
            .as_deref()
            .or_else(|| statics.game_of(slot.position))
            .ok_or_else(|| SourceError::Malformed(format!("no game for slot {}", slot.position)))?;
        let checksum = statics
            .checksum_of(game)
            .ok_or_else(|| SourceError::Malformed(format!("no datapackage checksum for {game}")))?;
        let names = self.item_names(&room, game, checksum).await?;

        Ok(SlotFetch::Rows {
            rows: translate::item_rows(items, &names),
            checks: None,
        })
    }
}
