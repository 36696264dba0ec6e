//! Game-host API documents and their translation.

use std::collections::{BTreeSet, HashMap};

use apalert_core::slot::ItemRow;
use apalert_core::{
    Classification, CompletionStatus, SessionSnapshot, SlotMeta, SlotPosition, TrackerStatus,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::wire::{lenient_datetime, null_default};

/// Only team 0 is tracked.
const TEAM: u32 = 0;

// ─── Static Tracker ──────────────────────────────────────────────────

/// `GET /api/static_tracker/{room}`: rarely changes, fetched once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StaticTracker {
    #[serde(default, deserialize_with = "null_default")]
    pub datapackage: HashMap<String, GameChecksum>,
    #[serde(default, deserialize_with = "null_default")]
    pub player_locations_total: Vec<PlayerTotal>,
    #[serde(default, deserialize_with = "null_default")]
    pub player_game: Vec<PlayerGame>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GameChecksum {
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlayerTotal {
    pub team: u32,
    pub player: SlotPosition,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlayerGame {
    pub team: u32,
    pub player: SlotPosition,
    pub game: String,
}

impl StaticTracker {
    pub fn game_of(&self, position: SlotPosition) -> Option<&str> {
        self.player_game
            .iter()
            .find(|p| p.team == TEAM && p.player == position)
            .map(|p| p.game.as_str())
    }

    pub fn checksum_of(&self, game: &str) -> Option<&str> {
        self.datapackage.get(game).map(|d| d.checksum.as_str())
    }

    fn total_of(&self, position: SlotPosition) -> Option<u32> {
        self.player_locations_total
            .iter()
            .find(|p| p.team == TEAM && p.player == position)
            .map(|p| p.total)
    }
}

// ─── Live Tracker ────────────────────────────────────────────────────

/// `GET /api/tracker/{room}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LiveTracker {
    #[serde(default, deserialize_with = "null_default")]
    pub aliases: Vec<PlayerAlias>,
    #[serde(default, deserialize_with = "null_default")]
    pub player_items_received: Vec<PlayerItems>,
    #[serde(default, deserialize_with = "null_default")]
    pub player_checks_done: Vec<PlayerChecks>,
    #[serde(default, deserialize_with = "null_default")]
    pub activity_timers: Vec<PlayerTimer>,
    #[serde(default, deserialize_with = "null_default")]
    pub player_status: Vec<PlayerStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlayerAlias {
    pub team: u32,
    pub player: SlotPosition,
    #[serde(default)]
    pub alias: Option<String>,
}

/// `[item, location, sending player, flags]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RawItem(pub i64, pub i64, pub i64, pub u32);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlayerItems {
    pub team: u32,
    pub player: SlotPosition,
    #[serde(default, deserialize_with = "null_default")]
    pub items: Vec<RawItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlayerChecks {
    pub team: u32,
    pub player: SlotPosition,
    #[serde(default, deserialize_with = "null_default")]
    pub locations: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlayerTimer {
    pub team: u32,
    pub player: SlotPosition,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlayerStatus {
    pub team: u32,
    pub player: SlotPosition,
    #[serde(default, deserialize_with = "null_default")]
    pub status: i64,
}

impl LiveTracker {
    pub fn items_for(&self, position: SlotPosition) -> Option<&[RawItem]> {
        self.player_items_received
            .iter()
            .find(|p| p.team == TEAM && p.player == position)
            .map(|p| p.items.as_slice())
    }
}

// ─── Datapackage ─────────────────────────────────────────────────────

/// `GET /api/datapackage/{checksum}`; only the item table is used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GameDatapackage {
    #[serde(default, deserialize_with = "null_default")]
    pub item_name_to_id: HashMap<String, i64>,
}

impl GameDatapackage {
    pub fn into_names(self) -> HashMap<i64, String> {
        self.item_name_to_id
            .into_iter()
            .map(|(name, id)| (id, name))
            .collect()
    }
}

// ─── Translation ─────────────────────────────────────────────────────

pub fn translate(statics: &StaticTracker, live: &LiveTracker) -> SessionSnapshot {
    let mut positions = BTreeSet::new();
    positions.extend(statics.player_locations_total.iter().filter(|p| p.team == TEAM).map(|p| p.player));
    positions.extend(statics.player_game.iter().filter(|p| p.team == TEAM).map(|p| p.player));
    positions.extend(live.player_status.iter().filter(|p| p.team == TEAM).map(|p| p.player));
    positions.extend(live.player_items_received.iter().filter(|p| p.team == TEAM).map(|p| p.player));

    let slots = positions
        .into_iter()
        .map(|position| {
            let mut meta = SlotMeta::new(position);
            if let Some(alias) = live
                .aliases
                .iter()
                .find(|a| a.team == TEAM && a.player == position)
                .and_then(|a| a.alias.clone())
            {
                meta.name = alias;
            }
            meta.game = statics.game_of(position).map(str::to_owned);
            meta.checks_total = statics.total_of(position).unwrap_or_default();
            meta.checks_done = live
                .player_checks_done
                .iter()
                .find(|p| p.team == TEAM && p.player == position)
                .map(|p| u32::try_from(p.locations.len()).unwrap_or(u32::MAX))
                .unwrap_or_default();
            meta.last_activity = live
                .activity_timers
                .iter()
                .find(|p| p.team == TEAM && p.player == position)
                .and_then(|p| p.time);
            meta.tracker_status = live
                .player_status
                .iter()
                .find(|p| p.team == TEAM && p.player == position)
                .map_or(TrackerStatus::Unknown, |p| TrackerStatus::from_client_status(p.status));
            meta.completion = if meta.tracker_status == TrackerStatus::GoalCompleted {
                CompletionStatus::Goal
            } else if meta.checks_exhausted() {
                CompletionStatus::AllChecks
            } else if meta.checks_total > 0 {
                CompletionStatus::Incomplete
            } else {
                CompletionStatus::Unknown
            };
            (position, meta)
        })
        .collect();

    SessionSnapshot {
        slots,
        ..SessionSnapshot::default()
    }
}

/// Item rows in receive order, 1-based so the last row's order equals the
/// number of items received.
pub fn item_rows(items: &[RawItem], names: &HashMap<i64, String>) -> Vec<ItemRow> {
    items
        .iter()
        .zip(1i64..)
        .map(|(raw, order)| ItemRow {
            order,
            name: names
                .get(&raw.0)
                .cloned()
                .unwrap_or_else(|| format!("Unknown item {}", raw.0)),
            quantity: 1,
            flag: Some(Classification::from_item_flags(raw.3)),
        })
        .collect()
}
