//! Source-agnostic view of one multiworld session.
//!
//! Every agent translates its wire format into a [`SessionSnapshot`]; the
//! session merges them in priority order with [`SessionSnapshot::merge_from`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CompletionStatus, HintClassification, ProgressionStatus, TrackerStatus};

/// Position of a slot within its session (the host's player number).
pub type SlotPosition = u32;

/// `1970-01-01T00:00:00Z`, used wherever "never" needs a comparable value.
pub fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

pub(crate) fn is_victory(completion: CompletionStatus, done: u32, total: u32) -> bool {
    matches!(completion, CompletionStatus::Done | CompletionStatus::Released)
        || (completion.is_terminal() && total > 0 && done >= total)
}

// ─── Slot Metadata ────────────────────────────────────────────────

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotMeta {
    pub position: SlotPosition,
    /// Identifier the aggregator uses for this slot, when known.
    pub remote_id: Option<i64>,
    pub name: String,
    pub game: Option<String>,
    pub completion: CompletionStatus,
    pub progression: ProgressionStatus,
    pub tracker_status: TrackerStatus,
    pub checks_done: u32,
    pub checks_total: u32,
    pub last_activity: Option<DateTime<Utc>>,
    pub last_checked: Option<DateTime<Utc>>,
    /// Chat handle of the player who owns the slot, if the source knows it.
    pub owner: Option<String>,
}

impl SlotMeta {
    pub fn new(position: SlotPosition) -> Self {
        Self {
            position,
            name: position.to_string(),
            ..Self::default()
        }
    }

    /// The slot has reached its goal; hints it receives no longer matter.
    pub fn is_goal_complete(&self) -> bool {
        self.tracker_status == TrackerStatus::GoalCompleted || self.completion.is_terminal()
    }

    pub fn checks_exhausted(&self) -> bool {
        self.checks_total > 0 && self.checks_done >= self.checks_total
    }

    /// Terminal completion with nothing left to check.
    ///
    /// `done` and `released` imply the remaining checks were sent out.
    pub fn is_victorious(&self) -> bool {
        is_victory(self.completion, self.checks_done, self.checks_total)
    }

    /// Fill gaps in `self` from a lower-priority observation of the same slot.
    fn absorb(&mut self, other: &SlotMeta) {
        if self.remote_id.is_none() {
            self.remote_id = other.remote_id;
        }
        if self.game.is_none() {
            self.game.clone_from(&other.game);
        }
        if (self.name.is_empty() || self.name == self.position.to_string())
            && !other.name.is_empty()
        {
            self.name.clone_from(&other.name);
        }
        if !self.completion.is_terminal() && other.completion.is_terminal() {
            self.completion = other.completion;
        } else if self.completion == CompletionStatus::Unknown {
            self.completion = other.completion;
        }
        if self.progression == ProgressionStatus::Unknown {
            self.progression = other.progression;
        }
        if self.tracker_status == TrackerStatus::Unknown
            || other.tracker_status == TrackerStatus::GoalCompleted
        {
            self.tracker_status = other.tracker_status;
        }
        if other.checks_total > 0 {
            if self.checks_total == 0 {
                self.checks_total = other.checks_total;
            }
            self.checks_done = self.checks_done.max(other.checks_done);
        }
        self.last_activity = self.last_activity.max(other.last_activity);
        self.last_checked = self.last_checked.max(other.last_checked);
        if self.owner.is_none() {
            self.owner.clone_from(&other.owner);
        }
    }
}

// ─── Hint ─────────────────────────────────────────────────────────

/// One hint as observed on a source. `id` is scoped to the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hint {
    pub id: i64,
    pub finder: Option<SlotPosition>,
    /// `None` when the item goes to an item-link group rather than a slot.
    pub receiver: Option<SlotPosition>,
    pub item: String,
    pub location: String,
    #[serde(default)]
    pub entrance: String,
    pub found: bool,
    #[serde(default)]
    pub classification: HintClassification,
    #[serde(default)]
    pub item_link_name: Option<String>,
}

// ─── Session Snapshot ─────────────────────────────────────────────

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub title: Option<String>,
    pub slots: BTreeMap<SlotPosition, SlotMeta>,
    pub hints: Vec<Hint>,
    pub room_link: Option<String>,
    /// Canonical host URL of the session, as reported by the aggregator.
    pub upstream_url: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty() && self.hints.is_empty() && self.title.is_none()
    }

    pub fn slot(&self, position: SlotPosition) -> Option<&SlotMeta> {
        self.slots.get(&position)
    }

    /// Latest activity over all slots, or the epoch when there are none.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.slots
            .values()
            .filter_map(|s| s.last_activity)
            .max()
            .unwrap_or_else(epoch)
    }

    /// True iff every slot is terminal. A snapshot with no slots has not
    /// been fetched yet and is never goaled.
    pub fn goaled(&self) -> bool {
        !self.slots.is_empty() && self.slots.values().all(|s| s.completion.is_terminal())
    }

    /// Slots whose owner matches `handle` (case-insensitive).
    pub fn slots_owned_by<'a>(&'a self, handle: &'a str) -> impl Iterator<Item = &'a SlotMeta> {
        self.slots.values().filter(move |s| {
            s.owner
                .as_deref()
                .is_some_and(|owner| owner.eq_ignore_ascii_case(handle))
        })
    }

    /// Merge a lower-priority snapshot into this one, filling gaps only.
    pub fn merge_from(&mut self, other: &SessionSnapshot) {
        if self.title.is_none() {
            self.title.clone_from(&other.title);
        }
        if self.room_link.is_none() {
            self.room_link.clone_from(&other.room_link);
        }
        if self.upstream_url.is_none() {
            self.upstream_url.clone_from(&other.upstream_url);
        }
        self.updated_at = self.updated_at.max(other.updated_at);
        if self.hints.is_empty() {
            self.hints.clone_from(&other.hints);
        }
        for (position, meta) in &other.slots {
            self.slots
                .entry(*position)
                .and_modify(|existing| existing.absorb(meta))
                .or_insert_with(|| meta.clone());
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
