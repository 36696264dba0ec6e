//! One multiworld session and the agents that serve it.
//!
//! The session owns all admission decisions (rate limits, disablement,
//! backoff) so callers see one `refresh`/`refresh_slot` contract no matter
//! which agent actually answered.

use std::fmt;

use apalert_core::agent_state::{HTML_TIMEOUT_BACKOFF, RATE_LIMIT};
use apalert_core::slot::{DiffContext, ItemDiff, TrackedSlot, session_abandoned};
use apalert_core::{
    AgentKind, AgentState, ProgressionStatus, SessionSnapshot, SlotPosition,
};
use apalert_sources::{SessionLink, SlotFetch, SourceAgent, SourceError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::SessionError;

// ─── Identity ────────────────────────────────────────────────────────

/// Canonical in-process handle for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// External identifiers under which a session can be looked up.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionAlias {
    Aggregator(String),
    /// `host/room`.
    Native(String),
}

// ─── Agents ──────────────────────────────────────────────────────────

/// The three agents, shared by every session.
pub struct SourceSet {
    pub aggregator: Box<dyn SourceAgent>,
    pub native: Box<dyn SourceAgent>,
    pub html: Box<dyn SourceAgent>,
}

impl SourceSet {
    pub fn get(&self, kind: AgentKind) -> &dyn SourceAgent {
        match kind {
            AgentKind::Aggregator => self.aggregator.as_ref(),
            AgentKind::Native => self.native.as_ref(),
            AgentKind::Html => self.html.as_ref(),
        }
    }
}

/// Admission state for each agent kind, per session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStates {
    #[serde(default)]
    pub aggregator: AgentState,
    #[serde(default)]
    pub native: AgentState,
    #[serde(default)]
    pub html: AgentState,
}

impl AgentStates {
    pub fn get(&self, kind: AgentKind) -> &AgentState {
        match kind {
            AgentKind::Aggregator => &self.aggregator,
            AgentKind::Native => &self.native,
            AgentKind::Html => &self.html,
        }
    }

    pub fn get_mut(&mut self, kind: AgentKind) -> &mut AgentState {
        match kind {
            AgentKind::Aggregator => &mut self.aggregator,
            AgentKind::Native => &mut self.native,
            AgentKind::Html => &mut self.html,
        }
    }

    /// HTML is only consulted once both structured sources are gone.
    pub fn html_in_play(&self) -> bool {
        !self.aggregator.enabled && !self.native.enabled
    }

    /// Combine with the states of a duplicate session. Disablement wins,
    /// otherwise the most recently refreshed state is kept.
    fn absorb(&mut self, other: &AgentStates) {
        for kind in [AgentKind::Aggregator, AgentKind::Native, AgentKind::Html] {
            let theirs = other.get(kind);
            let ours = self.get_mut(kind);
            let enabled = ours.enabled && theirs.enabled;
            if theirs.last_refreshed > ours.last_refreshed {
                *ours = theirs.clone();
            }
            ours.enabled = enabled;
        }
    }
}

// ─── Outcomes ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Agents that returned a snapshot this time.
    pub served_by: Vec<AgentKind>,
}

impl RefreshReport {
    pub fn updated(&self) -> bool {
        !self.served_by.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotRefresh {
    /// No enabled agent can serve per-slot data.
    NoSource,
    /// The slot was fetched less than an hour ago and the call was not forced.
    RateLimited,
    Unchanged,
    /// The agent answered without usable item data.
    NoData,
    Applied(ItemDiff),
}

impl SlotRefresh {
    /// Whether items were appended to the slot's notification queue.
    pub fn has_new_items(&self) -> bool {
        matches!(self, Self::Applied(diff) if diff.queued > 0)
    }
}

// ─── Multiworld Session ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiworldSession {
    pub id: SessionId,
    pub link: SessionLink,
    #[serde(default)]
    pub agents: AgentStates,
    #[serde(default)]
    pub snapshot: SessionSnapshot,
}

impl MultiworldSession {
    pub fn new(id: SessionId, link: SessionLink) -> Self {
        Self {
            id,
            link,
            agents: AgentStates::default(),
            snapshot: SessionSnapshot::default(),
        }
    }

    pub fn aliases(&self) -> Vec<SessionAlias> {
        let mut aliases = Vec::with_capacity(2);
        if let Some(id) = &self.link.aggregator_id {
            aliases.push(SessionAlias::Aggregator(id.clone()));
        }
        if let Some(room) = &self.link.native {
            aliases.push(SessionAlias::Native(room.alias()));
        }
        aliases
    }

    /// Fold a duplicate of this session into it. The duplicate's snapshot
    /// is treated as the fresher one.
    pub(crate) fn absorb(&mut self, dup: MultiworldSession) {
        self.link.absorb(dup.link);
        self.agents.absorb(&dup.agents);
        let mut snapshot = dup.snapshot;
        snapshot.merge_from(&self.snapshot);
        self.snapshot = snapshot;
    }

    /// URL a slot of this session is tracked under: the host's slot page
    /// when the native room is known, otherwise the aggregator page.
    pub fn slot_url(&self, position: SlotPosition, aggregator: &Url) -> Option<String> {
        if let Some(room) = &self.link.native {
            return Some(room.slot_url(position, false));
        }
        let id = self.link.aggregator_id.as_ref()?;
        Some(format!("{}/tracker/{id}", aggregator.as_str().trim_end_matches('/')))
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.snapshot.last_activity()
    }

    pub fn goaled(&self) -> bool {
        self.snapshot.goaled()
    }

    pub fn abandoned(&self, now: DateTime<Utc>) -> bool {
        session_abandoned(self.last_activity(), now)
    }

    /// Refresh the session snapshot from every admitted agent.
    ///
    /// Safe to call with no tracked slots. Only a bad identifier escapes;
    /// every other agent error is absorbed into that agent's state.
    pub async fn refresh(
        &mut self,
        sources: &SourceSet,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<RefreshReport, SessionError> {
        let mut report = RefreshReport::default();
        let mut fresh: Vec<SessionSnapshot> = Vec::new();

        for kind in [AgentKind::Aggregator, AgentKind::Native, AgentKind::Html] {
            if kind == AgentKind::Html && !self.agents.html_in_play() {
                continue;
            }
            let admission = self.agents.get(kind).admission(now, force);
            if !admission.is_go() {
                tracing::debug!(session = %self.id, agent = %kind, ?admission, "skipping agent");
                continue;
            }
            match sources.get(kind).fetch_session(&mut self.link).await {
                Ok(Some(snapshot)) => {
                    self.agents.get_mut(kind).record_success(now);
                    report.served_by.push(kind);
                    fresh.push(snapshot);
                }
                Ok(None) => {
                    tracing::debug!(session = %self.id, agent = %kind, "agent has no handle for session yet");
                }
                Err(SourceError::BadIdentifier(raw)) => {
                    return Err(SessionError::BadIdentifier(raw));
                }
                Err(err) => self.absorb_error(kind, &err, now),
            }
        }

        let mut merged = fresh.into_iter();
        if let Some(mut snapshot) = merged.next() {
            for lower in merged {
                snapshot.merge_from(&lower);
            }
            snapshot.merge_from(&self.snapshot);
            self.snapshot = snapshot;
            tracing::info!(
                session = %self.id,
                slots = self.snapshot.slots.len(),
                hints = self.snapshot.hints.len(),
                served_by = ?report.served_by,
                "session refreshed"
            );
        }
        Ok(report)
    }

    /// Pull new items for one slot and diff them against its cursor.
    ///
    /// Prefers the native agent; the HTML agent only serves once both
    /// structured sources are disabled. Both need the host room, so a session
    /// known only to the aggregator has no per-slot source. Disablement and
    /// backoff come from the session's agent state; the hourly limit is kept
    /// per slot against its last refresh. Failures are charged to the slot.
    pub async fn refresh_slot(
        &mut self,
        sources: &SourceSet,
        slot: &mut TrackedSlot,
        ctx: &mut DiffContext<'_>,
        force: bool,
    ) -> Result<SlotRefresh, SessionError> {
        let now = ctx.now;
        if self.link.native.is_none() {
            return Ok(SlotRefresh::NoSource);
        }
        let kind = if self.agents.native.enabled {
            AgentKind::Native
        } else if self.agents.html_in_play() {
            AgentKind::Html
        } else {
            return Ok(SlotRefresh::NoSource);
        };
        let admission = self.agents.get(kind).admission(now, true);
        if !admission.is_go() {
            tracing::debug!(session = %self.id, slot = slot.position, agent = %kind, ?admission, "no agent admitted for slot");
            return Ok(SlotRefresh::NoSource);
        }
        if !force && slot.last_refresh.is_some_and(|last| now - last < RATE_LIMIT) {
            return Ok(SlotRefresh::RateLimited);
        }

        match sources.get(kind).fetch_slot(&mut self.link, slot).await {
            Ok(SlotFetch::Unchanged) => {
                slot.clear_failures();
                Ok(SlotRefresh::Unchanged)
            }
            Ok(SlotFetch::Rows { rows, checks }) => {
                if let Some(checks) = checks {
                    slot.checks = checks;
                }
                let diff = slot.apply_rows(rows, ctx);
                tracing::debug!(
                    session = %self.id,
                    slot = slot.position,
                    agent = %kind,
                    outcome = ?diff.outcome,
                    delta = diff.delta.len(),
                    queued = diff.queued,
                    "slot diffed"
                );
                Ok(SlotRefresh::Applied(diff))
            }
            Ok(SlotFetch::NoData | SlotFetch::Unsupported) => {
                slot.record_silent_failure();
                Ok(SlotRefresh::NoData)
            }
            Err(err) => {
                self.absorb_error(kind, &err, now);
                match &err {
                    SourceError::BadIdentifier(_) => slot.mark_unreachable(),
                    e if e.is_explicit() => slot.record_error(),
                    _ => slot.record_silent_failure(),
                }
                Err(err.into())
            }
        }
    }

    /// Push a progression status for `position` to the aggregator, then
    /// force a refresh so the change is reflected locally.
    pub async fn set_progression(
        &mut self,
        sources: &SourceSet,
        position: SlotPosition,
        status: ProgressionStatus,
        now: DateTime<Utc>,
    ) -> Result<RefreshReport, SessionError> {
        let remote_id = self
            .snapshot
            .slot(position)
            .and_then(|s| s.remote_id)
            .ok_or(SessionError::UnknownSlot(position))?;
        sources
            .aggregator
            .set_progression(&self.link, remote_id, status)
            .await?;
        tracing::info!(session = %self.id, slot = position, %status, "progression pushed");
        self.refresh(sources, true, now).await
    }

    fn absorb_error(&mut self, kind: AgentKind, err: &SourceError, now: DateTime<Utc>) {
        let state = self.agents.get_mut(kind);
        if err.is_disabling() {
            state.disable();
            tracing::warn!(session = %self.id, agent = %kind, error = %err, "agent disabled for session");
        } else if err.is_timeout() && kind == AgentKind::Html {
            state.back_off(now, HTML_TIMEOUT_BACKOFF);
            tracing::warn!(session = %self.id, agent = %kind, error = %err, "html host timed out, backing off");
        } else {
            tracing::warn!(session = %self.id, agent = %kind, error = %err, "agent request failed");
        }
    }
}
