//! Canonical session identity.
//!
//! One [`MultiworldSession`] per real session, reachable through every
//! external alias it is known by (aggregator id, native `host/room`).
//! Sessions created through different aliases collapse into one as soon as
//! a refresh reveals they are the same.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use apalert_sources::{SessionLink, SessionLocator};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::session::{MultiworldSession, SessionAlias, SessionId};

fn locator_alias(locator: &SessionLocator) -> SessionAlias {
    match locator {
        SessionLocator::Aggregator { tracker_id } => SessionAlias::Aggregator(tracker_id.clone()),
        SessionLocator::Native { room, .. } => SessionAlias::Native(room.alias()),
    }
}

// ─── Session Registry ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<MultiworldSession>", into = "Vec<MultiworldSession>")]
pub struct SessionRegistry {
    sessions: BTreeMap<SessionId, MultiworldSession>,
    next_id: u64,
    aliases: HashMap<SessionAlias, SessionId>,
}

impl From<Vec<MultiworldSession>> for SessionRegistry {
    fn from(sessions: Vec<MultiworldSession>) -> Self {
        let mut registry = Self::default();
        for session in sessions {
            registry.next_id = registry.next_id.max(session.id.0 + 1);
            registry.sessions.insert(session.id, session);
        }
        registry.reindex();
        registry
    }
}

impl From<SessionRegistry> for Vec<MultiworldSession> {
    fn from(registry: SessionRegistry) -> Self {
        registry.sessions.into_values().collect()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, id: SessionId) -> Option<&MultiworldSession> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut MultiworldSession> {
        self.sessions.get_mut(&id)
    }

    /// Like [`get_mut`](Self::get_mut), as a `Result`.
    pub fn session_mut(&mut self, id: SessionId) -> Result<&mut MultiworldSession, SessionError> {
        self.sessions
            .get_mut(&id)
            .ok_or(SessionError::UnknownSession(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &MultiworldSession> {
        self.sessions.values()
    }

    pub fn find(&self, alias: &SessionAlias) -> Option<SessionId> {
        self.aliases.get(alias).copied()
    }

    /// The canonical session for `locator`, if one exists.
    pub fn lookup(&self, locator: &SessionLocator) -> Option<SessionId> {
        self.find(&locator_alias(locator))
    }

    /// The canonical session for `locator`, created on first sight.
    pub fn resolve(&mut self, locator: &SessionLocator) -> SessionId {
        let alias = locator_alias(locator);
        if let Some(id) = self.find(&alias) {
            return id;
        }

        let id = SessionId(self.next_id);
        self.next_id += 1;
        self.sessions
            .insert(id, MultiworldSession::new(id, SessionLink::from_locator(locator)));
        self.aliases.insert(alias, id);
        tracing::debug!(session = %id, ?locator, "session registered");
        id
    }

    /// Index every alias `id` has learned since it was created.
    ///
    /// When an alias already belongs to another session, `id` is merged
    /// into that older session and removed. Returns the surviving id.
    pub fn register_aliases(&mut self, id: SessionId) -> Result<SessionId, SessionError> {
        let aliases = self
            .sessions
            .get(&id)
            .ok_or(SessionError::UnknownSession(id))?
            .aliases();

        let canonical = aliases
            .iter()
            .filter_map(|alias| self.find(alias))
            .find(|other| *other != id && self.sessions.contains_key(other));

        let Some(canonical) = canonical else {
            for alias in aliases {
                self.aliases.insert(alias, id);
            }
            return Ok(id);
        };

        let Some(dup) = self.sessions.remove(&id) else {
            return Err(SessionError::UnknownSession(id));
        };
        let target = self.session_mut(canonical)?;
        target.absorb(dup);
        let learned = target.aliases();
        for alias in learned {
            self.aliases.insert(alias, canonical);
        }
        self.aliases.retain(|_, v| *v != id);
        tracing::info!(duplicate = %id, session = %canonical, "merged duplicate session");
        Ok(canonical)
    }

    /// Drop every session not in `keep`. Returns the removed ids.
    pub fn prune(&mut self, keep: &BTreeSet<SessionId>) -> Vec<SessionId> {
        let removed: Vec<SessionId> = self
            .sessions
            .keys()
            .filter(|id| !keep.contains(id))
            .copied()
            .collect();
        if removed.is_empty() {
            return removed;
        }
        for id in &removed {
            self.sessions.remove(id);
        }
        self.reindex();
        tracing::info!(removed = removed.len(), remaining = self.sessions.len(), "pruned sessions");
        removed
    }

    fn reindex(&mut self) {
        self.aliases = self
            .sessions
            .values()
            .flat_map(|s| s.aliases().into_iter().map(move |alias| (alias, s.id)))
            .collect();
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
