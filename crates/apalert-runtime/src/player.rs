//! Players and the slots they track.

use std::collections::BTreeMap;

use apalert_core::slot::TrackedSlot;
use apalert_core::{HintFilter, ItemFilter};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Chat-side identity; the key the transport delivers to.
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Handle the aggregator reports as a slot's owner. Enables auto-claim.
    #[serde(default)]
    pub aggregator_handle: Option<String>,
    #[serde(default)]
    pub default_filter: ItemFilter,
    #[serde(default)]
    pub default_hint_filter: HintFilter,
    /// Session URLs scanned for slots this player owns.
    #[serde(default)]
    pub watched: Vec<String>,
    #[serde(default)]
    pub slots: Vec<TrackedSlot>,
}

impl Player {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            aggregator_handle: None,
            default_filter: ItemFilter::UNSET,
            default_hint_filter: HintFilter::UNSET,
            watched: Vec::new(),
            slots: Vec::new(),
        }
    }

    pub fn defaults(&self) -> PlayerDefaults {
        PlayerDefaults {
            id: self.id.clone(),
            filter: self.default_filter,
            hint_filter: self.default_hint_filter,
        }
    }
}

/// What per-slot processing needs to know about the owning player.
#[derive(Debug, Clone)]
pub struct PlayerDefaults {
    pub id: String,
    pub filter: ItemFilter,
    pub hint_filter: HintFilter,
}

/// Everything persisted in `trackers.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerState {
    #[serde(default)]
    pub players: BTreeMap<String, Player>,
}

impl TrackerState {
    pub fn slot_count(&self) -> usize {
        self.players.values().map(|p| p.slots.len()).sum()
    }
}
