//! Synchronization driver.
//!
//! One cycle walks every player and every tracked slot strictly in order:
//! resolve and refresh the owning session, fold its metadata into the slot,
//! pull new items when the throttle allows, then hand whatever the slot
//! queued to the transport. Network pacing is enforced per host inside the
//! HTTP fetcher, so the walk itself never sleeps.

use std::collections::{BTreeSet, HashSet};

use anyhow::Context;
use apalert_core::slot::{DiffContext, TrackedSlot};
use apalert_core::snapshot::epoch;
use apalert_core::{
    ClassificationBook, GameRules, NotificationEvent, ProgressionStatus, RemovalReason,
    SlotPosition,
};
use apalert_session::{SessionError, SessionId, SessionRegistry, SlotRefresh, SourceSet};
use apalert_sources::SessionLocator;
use chrono::{DateTime, Utc};
use url::Url;

use crate::config::SyncPolicy;
use crate::player::{Player, PlayerDefaults, TrackerState};
use crate::store::JsonStore;
use crate::transport::{NotificationSink, SlotAddress};

// ─── Reports ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub players: usize,
    pub player_errors: usize,
    pub slots_processed: usize,
    pub slots_refreshed: usize,
    pub claimed: usize,
    pub removed: usize,
    pub deliveries: usize,
    pub delivery_failures: usize,
    pub pruned: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed {
        session: SessionId,
        position: SlotPosition,
    },
    AlreadyTracked {
        session: SessionId,
        position: SlotPosition,
    },
}

enum SlotStep {
    Keep,
    Remove(RemovalReason),
    Duplicate,
}

/// Slots already handled for one player in this cycle. Slots of a session
/// known only to the aggregator share one URL, so URLs pair with positions.
#[derive(Default)]
struct Seen {
    urls: HashSet<(String, SlotPosition)>,
    slots: HashSet<(SessionId, SlotPosition)>,
}

#[derive(Default)]
struct RunState {
    refreshed: HashSet<SessionId>,
    report: CycleReport,
}

// ─── Tracker ─────────────────────────────────────────────────────────

pub struct Tracker {
    state: TrackerState,
    registry: SessionRegistry,
    book: ClassificationBook,
    rules: GameRules,
    sources: SourceSet,
    sink: Box<dyn NotificationSink>,
    policy: SyncPolicy,
    aggregator: Url,
    store: Option<JsonStore>,
}

impl Tracker {
    pub fn new(
        sources: SourceSet,
        sink: Box<dyn NotificationSink>,
        mut policy: SyncPolicy,
        aggregator: Url,
    ) -> Self {
        policy.flush_every = policy.flush_every.max(1);
        Self {
            state: TrackerState::default(),
            registry: SessionRegistry::new(),
            book: ClassificationBook::new(),
            rules: GameRules::default(),
            sources,
            sink,
            policy,
            aggregator,
            store: None,
        }
    }

    /// Load durable state from `store` and write back to it on every flush.
    pub fn with_store(mut self, store: JsonStore) -> anyhow::Result<Self> {
        self.state = store.load_trackers()?;
        self.registry = store.load_sessions();
        self.book = store.load_classifications()?;
        tracing::info!(
            dir = %store.dir().display(),
            players = self.state.players.len(),
            slots = self.state.slot_count(),
            sessions = self.registry.len(),
            classifications = self.book.len(),
            "state loaded"
        );
        self.store = Some(store);
        Ok(self)
    }

    pub fn add_player(&mut self, player: Player) {
        self.state.players.insert(player.id.clone(), player);
    }

    pub fn player(&self, id: &str) -> Option<&Player> {
        self.state.players.get(id)
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn knowledge(&self) -> &ClassificationBook {
        &self.book
    }

    pub fn knowledge_mut(&mut self) -> &mut ClassificationBook {
        &mut self.book
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    /// Write trackers, sessions and (if changed) classifications.
    pub fn flush(&mut self) -> anyhow::Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        store.save_trackers(&self.state)?;
        store.save_sessions(&self.registry)?;
        store.save_classifications(&mut self.book)?;
        Ok(())
    }

    // ─── Claiming ────────────────────────────────────────────────────

    /// Start tracking the slot `url` points at for `player_id`.
    pub async fn claim_slot(
        &mut self,
        player_id: &str,
        url: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<ClaimOutcome> {
        let locator = SessionLocator::parse(url, &self.aggregator)?;
        let position = locator
            .slot()
            .with_context(|| format!("{url} does not name a slot"))?;
        let player = self
            .state
            .players
            .get_mut(player_id)
            .with_context(|| format!("unknown player {player_id}"))?;

        let id = refresh_session(&mut self.registry, &self.sources, &locator, false, now).await?;
        let session = self
            .registry
            .get(id)
            .ok_or(SessionError::UnknownSession(id))?;
        if !session.snapshot.slots.is_empty() && session.snapshot.slot(position).is_none() {
            anyhow::bail!("session {id} has no slot {position}");
        }

        let tracked = player.slots.iter().any(|s| {
            s.url == url
                || (s.position == position
                    && SessionLocator::parse(&s.url, &self.aggregator)
                        .ok()
                        .and_then(|l| self.registry.lookup(&l))
                        == Some(id))
        });
        if tracked {
            return Ok(ClaimOutcome::AlreadyTracked {
                session: id,
                position,
            });
        }

        let mut slot = TrackedSlot::new(url, position);
        if let Some(meta) = session.snapshot.slot(position) {
            slot.observe_meta(meta);
        }
        tracing::info!(player = player_id, session = %id, slot = position, "slot claimed");
        player.slots.push(slot);
        Ok(ClaimOutcome::Claimed {
            session: id,
            position,
        })
    }

    /// Push a progression status for the slot `url` points at. The change
    /// reaches the player through the next cycle's metadata diff.
    pub async fn set_progression(
        &mut self,
        url: &str,
        status: ProgressionStatus,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let locator = SessionLocator::parse(url, &self.aggregator)?;
        let position = locator
            .slot()
            .with_context(|| format!("{url} does not name a slot"))?;
        let id = self
            .registry
            .lookup(&locator)
            .with_context(|| format!("no session known for {url}"))?;
        self.registry
            .session_mut(id)?
            .set_progression(&self.sources, position, status, now)
            .await?;
        Ok(())
    }

    // ─── Cycle ───────────────────────────────────────────────────────

    /// Run one full cycle. Per-player failures are logged and counted; only
    /// the final flush can fail the cycle.
    pub async fn run_cycle(&mut self, force: bool, now: DateTime<Utc>) -> anyhow::Result<CycleReport> {
        let mut run = RunState::default();
        let players: Vec<String> = self.state.players.keys().cloned().collect();

        for player_id in players {
            run.report.players += 1;
            if let Err(e) = self.process_player(&player_id, force, now, &mut run).await {
                run.report.player_errors += 1;
                tracing::error!(player = %player_id, error = %format!("{e:#}"), "player cycle failed");
            }
        }

        run.report.pruned = self.prune();
        self.flush().context("failed to flush state at cycle end")?;

        let report = run.report;
        tracing::info!(
            players = report.players,
            player_errors = report.player_errors,
            slots = report.slots_processed,
            refreshed = report.slots_refreshed,
            claimed = report.claimed,
            removed = report.removed,
            deliveries = report.deliveries,
            delivery_failures = report.delivery_failures,
            pruned = report.pruned,
            "cycle complete"
        );
        Ok(report)
    }

    async fn process_player(
        &mut self,
        player_id: &str,
        force: bool,
        now: DateTime<Utc>,
        run: &mut RunState,
    ) -> anyhow::Result<()> {
        if let Some(player) = self.state.players.get_mut(player_id) {
            let mut cycle = Cycle {
                registry: &mut self.registry,
                book: &mut self.book,
                rules: &self.rules,
                sources: &self.sources,
                sink: self.sink.as_ref(),
                aggregator: &self.aggregator,
                refreshed: &mut run.refreshed,
                report: &mut run.report,
                force,
                now,
            };
            cycle.auto_claim(player).await;
        }

        let mut seen = Seen::default();
        let mut idx = 0;
        loop {
            let step = {
                let Some(player) = self.state.players.get_mut(player_id) else {
                    break;
                };
                let defaults = player.defaults();
                let Some(slot) = player.slots.get_mut(idx) else {
                    break;
                };
                let mut cycle = Cycle {
                    registry: &mut self.registry,
                    book: &mut self.book,
                    rules: &self.rules,
                    sources: &self.sources,
                    sink: self.sink.as_ref(),
                    aggregator: &self.aggregator,
                    refreshed: &mut run.refreshed,
                    report: &mut run.report,
                    force,
                    now,
                };
                cycle.process_slot(&defaults, slot, &mut seen).await?
            };

            match step {
                SlotStep::Keep => idx += 1,
                SlotStep::Remove(reason) => {
                    if let Some(player) = self.state.players.get_mut(player_id) {
                        let slot = player.slots.remove(idx);
                        tracing::info!(player = player_id, url = %slot.url, %reason, "slot removed");
                    }
                    run.report.removed += 1;
                }
                SlotStep::Duplicate => {
                    if let Some(player) = self.state.players.get_mut(player_id) {
                        let slot = player.slots.remove(idx);
                        tracing::info!(player = player_id, url = %slot.url, "dropped duplicate slot");
                    }
                }
            }

            run.report.slots_processed += 1;
            if run.report.slots_processed % self.policy.flush_every == 0 {
                if let Err(e) = self.flush() {
                    tracing::warn!(error = %format!("{e:#}"), "mid-cycle flush failed");
                }
            }
        }
        Ok(())
    }

    /// Drop sessions no slot or watched URL refers to any more.
    fn prune(&mut self) -> usize {
        let keep: BTreeSet<SessionId> = self
            .state
            .players
            .values()
            .flat_map(|p| p.slots.iter().map(|s| s.url.as_str()).chain(p.watched.iter().map(String::as_str)))
            .filter_map(|url| SessionLocator::parse(url, &self.aggregator).ok())
            .filter_map(|locator| self.registry.lookup(&locator))
            .collect();
        self.registry.prune(&keep).len()
    }
}

// ─── Per-slot Work ───────────────────────────────────────────────────

/// Resolve `locator` to its canonical session and refresh it (subject to the
/// session's own admission rules).
async fn refresh_session(
    registry: &mut SessionRegistry,
    sources: &SourceSet,
    locator: &SessionLocator,
    force: bool,
    now: DateTime<Utc>,
) -> Result<SessionId, SessionError> {
    let id = registry.resolve(locator);
    registry.session_mut(id)?.refresh(sources, force, now).await?;
    registry.register_aliases(id)
}

/// Borrowed view of the tracker for one unit of work.
struct Cycle<'a> {
    registry: &'a mut SessionRegistry,
    book: &'a mut ClassificationBook,
    rules: &'a GameRules,
    sources: &'a SourceSet,
    sink: &'a dyn NotificationSink,
    aggregator: &'a Url,
    refreshed: &'a mut HashSet<SessionId>,
    report: &'a mut CycleReport,
    force: bool,
    now: DateTime<Utc>,
}

impl Cycle<'_> {
    /// Refresh each session at most once per cycle.
    async fn session_for(&mut self, locator: &SessionLocator) -> Result<SessionId, SessionError> {
        if let Some(id) = self.registry.lookup(locator)
            && self.refreshed.contains(&id)
        {
            return Ok(id);
        }
        let id = refresh_session(self.registry, self.sources, locator, self.force, self.now).await?;
        self.refreshed.insert(id);
        Ok(id)
    }

    /// Track every slot the aggregator says `player` owns, in the sessions
    /// the player watches or already tracks.
    async fn auto_claim(&mut self, player: &mut Player) {
        let Some(handle) = player.aggregator_handle.clone() else {
            return;
        };

        let urls: Vec<String> = player
            .watched
            .iter()
            .chain(player.slots.iter().map(|s| &s.url))
            .cloned()
            .collect();
        let mut sessions = BTreeSet::new();
        for url in &urls {
            let locator = match SessionLocator::parse(url, self.aggregator) {
                Ok(locator) => locator,
                Err(e) => {
                    tracing::warn!(player = %player.id, url = %url, error = %e, "skipping unparseable url");
                    continue;
                }
            };
            match self.session_for(&locator).await {
                Ok(id) => {
                    sessions.insert(id);
                }
                Err(e) => tracing::warn!(player = %player.id, url = %url, error = %e, "session refresh failed"),
            }
        }

        let mut tracked: HashSet<(SessionId, SlotPosition)> = player
            .slots
            .iter()
            .filter_map(|s| {
                let locator = SessionLocator::parse(&s.url, self.aggregator).ok()?;
                Some((self.registry.lookup(&locator)?, s.position))
            })
            .collect();

        for id in sessions {
            let Some(session) = self.registry.get(id) else {
                continue;
            };
            if session.abandoned(self.now) {
                continue;
            }
            for meta in session.snapshot.slots_owned_by(&handle) {
                if meta.is_victorious() || tracked.contains(&(id, meta.position)) {
                    continue;
                }
                let Some(url) = session.slot_url(meta.position, self.aggregator) else {
                    continue;
                };
                let mut slot = TrackedSlot::new(url, meta.position);
                slot.observe_meta(meta);
                tracing::info!(player = %player.id, session = %id, slot = meta.position, "auto-claimed slot");
                player.slots.push(slot);
                tracked.insert((id, meta.position));
                self.report.claimed += 1;
            }
        }
    }

    async fn process_slot(
        &mut self,
        player: &PlayerDefaults,
        slot: &mut TrackedSlot,
        seen: &mut Seen,
    ) -> anyhow::Result<SlotStep> {
        if !seen.urls.insert((slot.url.clone(), slot.position)) {
            return Ok(SlotStep::Duplicate);
        }

        let session_id = match SessionLocator::parse(&slot.url, self.aggregator) {
            Ok(locator) => match self.session_for(&locator).await {
                Ok(id) => Some(id),
                Err(e) => {
                    if e.is_permanent() {
                        slot.mark_unreachable();
                    }
                    tracing::warn!(player = %player.id, url = %slot.url, error = %e, "session refresh failed");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(player = %player.id, url = %slot.url, error = %e, "slot url cannot resolve");
                slot.mark_unreachable();
                None
            }
        };

        if let Some(id) = session_id
            && !seen.slots.insert((id, slot.position))
        {
            return Ok(SlotStep::Duplicate);
        }

        let mut activity = epoch();
        if let Some(session) = session_id.and_then(|id| self.registry.get(id)) {
            activity = session.last_activity();
            if let Some(meta) = session.snapshot.slot(slot.position) {
                slot.observe_meta(meta);
            }
        }

        if let Some(id) = session_id
            && slot.removal_reason(activity, self.now).is_none()
            && slot.needs_refresh(activity, self.now, self.force)
        {
            let session = self.registry.session_mut(id)?;
            let mut ctx = DiffContext {
                classifier: self.rules,
                knowledge: &mut *self.book,
                default_filter: player.filter,
                now: self.now,
            };
            let fetched = match session.refresh_slot(self.sources, slot, &mut ctx, self.force).await {
                Ok(SlotRefresh::RateLimited) => false,
                Ok(outcome) => {
                    tracing::debug!(player = %player.id, session = %id, slot = slot.position, ?outcome, "slot refreshed");
                    true
                }
                Err(e) => {
                    tracing::warn!(player = %player.id, session = %id, slot = slot.position, error = %e, "slot refresh failed");
                    true
                }
            };
            if fetched {
                slot.refresh_hints(&session.snapshot, player.hint_filter);
                slot.mark_refreshed(self.now);
                self.report.slots_refreshed += 1;
            }
        }

        let removal = slot.removal_reason(activity, self.now);
        if let Some(reason) = removal {
            let notified = slot
                .pending
                .iter()
                .any(|e| matches!(e, NotificationEvent::SlotRemoved { .. }));
            if !notified {
                slot.pending.push(NotificationEvent::SlotRemoved { reason });
            }
        }

        // A removed slot takes its queue with it, so it stays until the
        // removal notice is out.
        let delivered = self.deliver(player, session_id, slot).await;
        Ok(match removal {
            Some(reason) if delivered => SlotStep::Remove(reason),
            _ => SlotStep::Keep,
        })
    }

    /// Hand the slot's queued events to the transport. On failure they are
    /// put back for the next cycle and `false` is returned.
    async fn deliver(
        &mut self,
        player: &PlayerDefaults,
        session: Option<SessionId>,
        slot: &mut TrackedSlot,
    ) -> bool {
        if !slot.has_notifications() {
            return true;
        }
        let address = SlotAddress {
            session,
            url: slot.url.clone(),
            position: slot.position,
            name: slot.display_name(),
        };
        let events = slot.drain_notifications();
        if let Err(e) = self.sink.deliver(&player.id, &address, &events).await {
            tracing::error!(
                player = %player.id,
                url = %slot.url,
                slot = slot.position,
                events = events.len(),
                error = %format!("{e:#}"),
                "delivery failed"
            );
            slot.requeue(events);
            self.report.delivery_failures += 1;
            return false;
        }
        tracing::debug!(player = %player.id, slot = slot.position, events = events.len(), "delivered");
        self.report.deliveries += 1;
        true
    }
}
