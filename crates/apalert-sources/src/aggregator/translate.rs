//! Aggregator JSON documents and their translation to [`SessionSnapshot`].

use std::collections::HashMap;

use apalert_core::{
    CompletionStatus, Hint, HintClassification, ProgressionStatus, SessionSnapshot, SlotMeta,
    SlotPosition, TrackerStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::wire::{lenient_datetime, null_default};

/// `GET /api/tracker/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AggregatorTracker {
    pub tracker_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub upstream_url: Option<String>,
    #[serde(default)]
    pub room_link: Option<String>,
    #[serde(default)]
    pub last_port: Option<u16>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_default")]
    pub games: Vec<AggregatorGame>,
    #[serde(default, deserialize_with = "null_default")]
    pub hints: Vec<AggregatorHint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AggregatorGame {
    pub id: i64,
    pub position: SlotPosition,
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,
    #[serde(default)]
    pub game: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub checks_done: u32,
    #[serde(default, deserialize_with = "null_default")]
    pub checks_total: u32,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_default")]
    pub progression_status: ProgressionStatus,
    #[serde(default, deserialize_with = "null_default")]
    pub completion_status: CompletionStatus,
    #[serde(default, deserialize_with = "null_default")]
    pub tracker_status: TrackerStatus,
    #[serde(default)]
    pub effective_discord_username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AggregatorHint {
    pub id: i64,
    pub item: String,
    pub location: String,
    #[serde(default, deserialize_with = "null_default")]
    pub entrance: String,
    #[serde(default)]
    pub found: bool,
    #[serde(default, deserialize_with = "null_default")]
    pub classification: HintClassification,
    #[serde(default)]
    pub finder_game_id: Option<i64>,
    #[serde(default)]
    pub receiver_game_id: Option<i64>,
    #[serde(default)]
    pub item_link_name: Option<String>,
}

/// `POST /api/tracker` request body.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest<'a> {
    pub url: &'a str,
}

/// `POST /api/tracker` response; the rest of the document is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterResponse {
    pub tracker_id: String,
}

/// `PUT /api/tracker/{id}/game/{game_id}` request body.
#[derive(Debug, Clone, Serialize)]
pub struct GameUpdate {
    pub progression_status: ProgressionStatus,
}

pub fn translate(doc: &AggregatorTracker) -> SessionSnapshot {
    let positions: HashMap<i64, SlotPosition> =
        doc.games.iter().map(|g| (g.id, g.position)).collect();

    let slots = doc
        .games
        .iter()
        .map(|g| {
            let meta = SlotMeta {
                position: g.position,
                remote_id: Some(g.id),
                name: g.name.clone(),
                game: g.game.clone(),
                completion: g.completion_status,
                progression: g.progression_status,
                tracker_status: g.tracker_status,
                checks_done: g.checks_done,
                checks_total: g.checks_total,
                last_activity: g.last_activity,
                last_checked: g.last_checked,
                owner: g.effective_discord_username.clone(),
            };
            (g.position, meta)
        })
        .collect();

    let hints = doc
        .hints
        .iter()
        .map(|h| Hint {
            id: h.id,
            finder: h.finder_game_id.and_then(|id| positions.get(&id).copied()),
            receiver: h.receiver_game_id.and_then(|id| positions.get(&id).copied()),
            item: h.item.clone(),
            location: h.location.clone(),
            entrance: h.entrance.clone(),
            found: h.found,
            classification: h.classification,
            item_link_name: h.item_link_name.clone(),
        })
        .collect();

    SessionSnapshot {
        title: doc.title.clone(),
        slots,
        hints,
        room_link: doc.room_link.clone(),
        upstream_url: doc.upstream_url.clone(),
        updated_at: doc.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> serde_json::Value {
        json!({
            "tracker_id": "t-1",
            "title": "Friday Async",
            "upstream_url": "https://archipelago.gg/tracker/room",
            "room_link": "https://archipelago.gg/room/abc",
            "last_port": 38281,
            "updated_at": "2025-02-14T18:30:00Z",
            "games": [
                {
                    "id": 501, "position": 1, "name": "Alice", "game": "Clique",
                    "checks_done": 3, "checks_total": 10,
                    "last_activity": "2025-02-14T18:00:00Z", "last_checked": null,
                    "progression_status": "bk", "completion_status": "incomplete",
                    "tracker_status": "playing", "effective_discord_username": "alice"
                },
                {
                    "id": 502, "position": 2, "name": "Bob", "game": null,
                    "checks_done": null, "checks_total": null,
                    "progression_status": null, "completion_status": "sparkly",
                    "tracker_status": "goal_completed"
                }
            ],
            "hints": [
                {
                    "id": 9, "item": "Hookshot", "location": "Well", "entrance": null,
                    "found": false, "classification": "critical",
                    "finder_game_id": 502, "receiver_game_id": 501
                },
                {
                    "id": 10, "item": "Bow", "location": "Shop", "found": true,
                    "classification": "unset", "finder_game_id": 501,
                    "receiver_game_id": null, "item_link_name": "Link Group"
                }
            ]
        })
    }

    #[test]
    fn translates_games_and_hints() {
        let doc: AggregatorTracker = serde_json::from_value(sample()).expect("parse");
        let snap = translate(&doc);

        assert_eq!(snap.title.as_deref(), Some("Friday Async"));
        let alice = snap.slot(1).expect("alice");
        assert_eq!(alice.remote_id, Some(501));
        assert_eq!(alice.progression, ProgressionStatus::Bk);
        assert_eq!(alice.owner.as_deref(), Some("alice"));
        assert_eq!((alice.checks_done, alice.checks_total), (3, 10));

        let bob = snap.slot(2).expect("bob");
        assert_eq!(bob.completion, CompletionStatus::Unknown);
        assert_eq!(bob.progression, ProgressionStatus::Unknown);
        assert_eq!(bob.tracker_status, TrackerStatus::GoalCompleted);

        assert_eq!(snap.hints[0].finder, Some(2));
        assert_eq!(snap.hints[0].receiver, Some(1));
        assert_eq!(snap.hints[0].classification, HintClassification::Critical);
        assert_eq!(snap.hints[1].receiver, None);
        assert_eq!(snap.hints[1].item_link_name.as_deref(), Some("Link Group"));
    }

    #[test]
    fn missing_collections_are_empty() {
        let doc: AggregatorTracker =
            serde_json::from_value(json!({"tracker_id": "t", "games": null})).expect("parse");
        let snap = translate(&doc);
        assert!(snap.slots.is_empty());
        assert!(snap.hints.is_empty());
    }
}
