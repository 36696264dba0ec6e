//! Durable per-(player, session, slot) cursor state.
//!
//! A [`TrackedSlot`] is the only thing that remembers what a player has
//! already been told. [`TrackedSlot::apply_rows`] turns an authoritative
//! item list into a delta against the stored cursor; hint and metadata
//! updates feed the same pending-event queue, drained by the driver.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{NotificationEvent, RemovalReason};
use crate::hint::{TrackedHint, diff_hints};
use crate::knowledge::{Classifier, KnowledgeBase, resolve};
use crate::snapshot::{SessionSnapshot, SlotMeta, SlotPosition, epoch, is_victory};
use crate::types::{
    Classification, CompletionStatus, HintDirection, HintFilter, ItemFilter, NetworkItem,
    ProgressionStatus,
};

// ─── Constants ───────────────────────────────────────────────────────

/// Consecutive explicit errors before a slot is dropped.
pub const MAX_EXPLICIT_FAILURES: u32 = 3;

/// Consecutive cycles without usable data before a slot is dropped.
pub const MAX_SILENT_FAILURES: u32 = 10;

/// Session inactivity after which a slot counts as abandoned.
pub const ABANDON_AFTER: TimeDelta = TimeDelta::days(30);

/// A slot is re-checked at least this often, even when idle.
pub const STALE_CHECK: TimeDelta = TimeDelta::hours(3);

/// Cursor value before any item has been seen.
pub const NO_CURSOR: i64 = -1;

/// A session counts as abandoned once it has reported activity and then
/// gone quiet for [`ABANDON_AFTER`].
pub fn session_abandoned(activity: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    activity > epoch() && now - activity >= ABANDON_AFTER
}

// ─── Inputs ──────────────────────────────────────────────────────────

/// One row of an agent's received-items list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRow {
    pub order: i64,
    pub name: String,
    pub quantity: u32,
    /// Classification carried on the item instance itself, if any.
    pub flag: Option<Classification>,
}

impl ItemRow {
    pub fn new(order: i64, name: impl Into<String>) -> Self {
        Self {
            order,
            name: name.into(),
            quantity: 1,
            flag: None,
        }
    }

    #[must_use]
    pub fn with_flag(mut self, flag: Classification) -> Self {
        self.flag = Some(flag);
        self
    }
}

/// Collaborators and defaults needed to classify and filter a delta.
pub struct DiffContext<'a> {
    pub classifier: &'a dyn Classifier,
    pub knowledge: &'a mut dyn KnowledgeBase,
    /// Player-level filter used when the slot's own filter is unset.
    pub default_filter: ItemFilter,
    pub now: DateTime<Utc>,
}

// ─── Outputs ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOutcome {
    /// Nothing new since the stored cursor.
    Unchanged,
    /// The host's max order index fell below the cursor.
    Rollback,
    Advanced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDiff {
    pub outcome: DiffOutcome,
    /// Every item past the old cursor, before filtering.
    pub delta: Vec<NetworkItem>,
    /// Items appended to the notification queue.
    pub queued: usize,
}

impl ItemDiff {
    fn empty(outcome: DiffOutcome) -> Self {
        Self {
            outcome,
            delta: Vec::new(),
            queued: 0,
        }
    }
}

/// Name plus time, for "last item" style markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamped {
    pub name: String,
    pub at: DateTime<Utc>,
}

// ─── Tracked Slot ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedSlot {
    /// URL the slot was claimed through.
    pub url: String,
    pub position: SlotPosition,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub game: Option<String>,
    #[serde(default)]
    pub remote_id: Option<i64>,

    pub latest_item: i64,
    #[serde(default)]
    pub all_items: BTreeMap<String, u32>,
    #[serde(default)]
    pub checks: BTreeMap<String, bool>,
    #[serde(default)]
    pub finder_hints: BTreeMap<i64, TrackedHint>,
    #[serde(default)]
    pub receiver_hints: BTreeMap<i64, TrackedHint>,
    #[serde(default)]
    pub notification_queue: Vec<NetworkItem>,
    /// Non-item events waiting for delivery.
    #[serde(default)]
    pub pending: Vec<NotificationEvent>,

    /// Consecutive cycles that produced no usable data.
    #[serde(default)]
    pub failures: u32,
    /// Consecutive explicit errors.
    #[serde(default)]
    pub errors: u32,
    #[serde(default)]
    pub filters: ItemFilter,
    #[serde(default)]
    pub hint_filters: HintFilter,

    #[serde(default)]
    pub progression: ProgressionStatus,
    #[serde(default)]
    pub completion: CompletionStatus,
    #[serde(default)]
    pub checks_done: u32,
    #[serde(default)]
    pub checks_total: u32,
    /// Whether slot metadata has been observed at least once.
    #[serde(default)]
    pub meta_seen: bool,

    #[serde(default)]
    pub last_refresh: Option<DateTime<Utc>>,
    #[serde(default = "epoch")]
    pub last_checked: DateTime<Utc>,
    #[serde(default = "epoch")]
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub last_item: Option<Stamped>,
    #[serde(default)]
    pub last_progression: Option<Stamped>,
}

impl TrackedSlot {
    pub fn new(url: impl Into<String>, position: SlotPosition) -> Self {
        Self {
            url: url.into(),
            position,
            name: None,
            game: None,
            remote_id: None,
            latest_item: NO_CURSOR,
            all_items: BTreeMap::new(),
            checks: BTreeMap::new(),
            finder_hints: BTreeMap::new(),
            receiver_hints: BTreeMap::new(),
            notification_queue: Vec::new(),
            pending: Vec::new(),
            failures: 0,
            errors: 0,
            filters: ItemFilter::UNSET,
            hint_filters: HintFilter::UNSET,
            progression: ProgressionStatus::Unknown,
            completion: CompletionStatus::Unknown,
            checks_done: 0,
            checks_total: 0,
            meta_seen: false,
            last_refresh: None,
            last_checked: epoch(),
            last_activity: epoch(),
            last_item: None,
            last_progression: None,
        }
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("slot {}", self.position))
    }

    // ─── Item diff ───────────────────────────────────────────────────

    /// Diff an authoritative item list against the stored cursor.
    pub fn apply_rows(&mut self, mut rows: Vec<ItemRow>, ctx: &mut DiffContext<'_>) -> ItemDiff {
        let Some(max_order) = rows.iter().map(|r| r.order).max() else {
            return ItemDiff::empty(DiffOutcome::Unchanged);
        };
        rows.sort_by_key(|r| r.order);

        if max_order < self.latest_item {
            self.latest_item = NO_CURSOR;
            self.pending.push(NotificationEvent::Rollback);
            self.clear_failures();
            return ItemDiff::empty(DiffOutcome::Rollback);
        }
        if max_order == self.latest_item && !self.all_items.is_empty() {
            self.clear_failures();
            return ItemDiff::empty(DiffOutcome::Unchanged);
        }

        self.all_items.clear();
        for row in &rows {
            *self.all_items.entry(row.name.clone()).or_default() += row.quantity;
        }

        let game = self.game.clone().unwrap_or_default();
        let cursor = self.latest_item;
        let mut delta = Vec::new();
        for row in rows.into_iter().filter(|r| r.order > cursor) {
            let classification =
                resolve(row.flag, &game, &row.name, ctx.classifier, &mut *ctx.knowledge);
            if classification.is_progression() {
                self.last_progression = Some(Stamped {
                    name: row.name.clone(),
                    at: ctx.now,
                });
            }
            delta.push(NetworkItem {
                name: row.name,
                game: game.clone(),
                quantity: row.quantity,
                order: row.order,
                classification,
            });
        }

        self.latest_item = max_order;
        if let Some(last) = delta.last() {
            self.last_item = Some(Stamped {
                name: last.name.clone(),
                at: ctx.now,
            });
        }
        self.clear_failures();

        // Unknown items stay eligible for a prompt even when filtered out.
        let mut seen = BTreeSet::new();
        let unclassified: Vec<String> = delta
            .iter()
            .filter(|i| i.classification == Classification::Unknown)
            .filter(|i| seen.insert(i.name.clone()))
            .map(|i| i.name.clone())
            .collect();

        let filter = self
            .filters
            .or_inherit(ctx.default_filter)
            .or_inherit(ItemFilter::EVERYTHING);
        let before = self.notification_queue.len();
        self.notification_queue.extend(
            delta
                .iter()
                .filter(|i| filter.admits(i.classification))
                .cloned(),
        );
        let queued = self.notification_queue.len() - before;

        if !unclassified.is_empty() {
            self.pending.push(NotificationEvent::ClassificationNeeded {
                game,
                items: unclassified,
            });
        }

        ItemDiff {
            outcome: DiffOutcome::Advanced,
            delta,
            queued,
        }
    }

    // ─── Hints ───────────────────────────────────────────────────────

    /// Diff the session's hints for this slot. Returns the number of hint
    /// events queued.
    pub fn refresh_hints(&mut self, snapshot: &SessionSnapshot, default_filter: HintFilter) -> usize {
        let position = Some(self.position);
        let filter = self.hint_filters.or_inherit(default_filter);
        let is_useless = |h: &crate::snapshot::Hint| {
            h.receiver
                .and_then(|r| snapshot.slot(r))
                .is_some_and(SlotMeta::is_goal_complete)
        };

        let finder = snapshot.hints.iter().filter(|h| h.finder == position);
        let mut events = diff_hints(
            &mut self.finder_hints,
            finder,
            HintDirection::Finder,
            filter.allows(HintDirection::Finder),
            is_useless,
        );

        let receiver = snapshot
            .hints
            .iter()
            .filter(|h| h.receiver == position && h.finder != position);
        events.extend(diff_hints(
            &mut self.receiver_hints,
            receiver,
            HintDirection::Receiver,
            filter.allows(HintDirection::Receiver),
            is_useless,
        ));

        let count = events.len();
        self.pending.extend(events);
        count
    }

    // ─── Metadata ────────────────────────────────────────────────────

    /// Fold the session's view of this slot into the durable state.
    ///
    /// Progression and goal transitions queue events, except on the first
    /// observation.
    pub fn observe_meta(&mut self, meta: &SlotMeta) {
        if self.name.is_none() && !meta.name.is_empty() {
            self.name = Some(meta.name.clone());
        }
        if meta.game.is_some() {
            self.game.clone_from(&meta.game);
        }
        if meta.remote_id.is_some() {
            self.remote_id = meta.remote_id;
        }

        if self.meta_seen {
            if meta.progression != ProgressionStatus::Unknown
                && meta.progression != self.progression
            {
                self.pending.push(NotificationEvent::ProgressionChanged {
                    previous: self.progression,
                    current: meta.progression,
                });
            }
            if meta.is_goal_complete() && !self.is_goal_complete() {
                self.pending.push(NotificationEvent::GoalCompleted);
            }
        }
        if meta.progression != ProgressionStatus::Unknown {
            self.progression = meta.progression;
        }
        if meta.completion != CompletionStatus::Unknown {
            self.completion = meta.completion;
        }
        if meta.checks_total > 0 {
            self.checks_done = meta.checks_done;
            self.checks_total = meta.checks_total;
        }
        if let Some(activity) = meta.last_activity {
            self.last_activity = self.last_activity.max(activity);
        }
        self.meta_seen = true;
    }

    pub fn is_goal_complete(&self) -> bool {
        self.completion.is_terminal()
    }

    pub fn is_victorious(&self) -> bool {
        is_victory(self.completion, self.checks_done, self.checks_total)
    }

    // ─── Throttle ────────────────────────────────────────────────────

    /// Whether a per-slot refresh is worth the network calls.
    pub fn needs_refresh(
        &self,
        session_activity: DateTime<Utc>,
        now: DateTime<Utc>,
        force: bool,
    ) -> bool {
        force
            || self.last_refresh.is_none_or(|last| session_activity > last)
            || now - self.last_checked > STALE_CHECK
    }

    pub fn mark_checked(&mut self, now: DateTime<Utc>) {
        self.last_checked = now;
    }

    pub fn mark_refreshed(&mut self, now: DateTime<Utc>) {
        self.last_refresh = Some(now);
        self.last_checked = now;
    }

    // ─── Failures ────────────────────────────────────────────────────

    pub fn record_error(&mut self) {
        self.errors = self.errors.saturating_add(1);
    }

    pub fn record_silent_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    /// The slot's URL can never resolve; remove it at the next check.
    pub fn mark_unreachable(&mut self) {
        self.errors = u32::MAX;
    }

    pub fn clear_failures(&mut self) {
        self.failures = 0;
        self.errors = 0;
    }

    /// Why this slot should be dropped now, if at all.
    ///
    /// Abandonment only counts once the session has reported any activity.
    pub fn removal_reason(
        &self,
        session_activity: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<RemovalReason> {
        if self.errors == u32::MAX {
            return Some(RemovalReason::Unreachable);
        }
        if self.is_victorious() {
            return Some(RemovalReason::Victory);
        }
        if session_abandoned(session_activity, now) {
            return Some(RemovalReason::Abandoned);
        }
        if self.errors >= MAX_EXPLICIT_FAILURES || self.failures >= MAX_SILENT_FAILURES {
            return Some(RemovalReason::Errors);
        }
        None
    }

    // ─── Delivery ────────────────────────────────────────────────────

    /// Take every queued notification: received items first, then the other
    /// events in the order they occurred.
    pub fn drain_notifications(&mut self) -> Vec<NotificationEvent> {
        let mut events = Vec::with_capacity(self.pending.len() + 1);
        if !self.notification_queue.is_empty() {
            events.push(NotificationEvent::ItemsReceived {
                items: std::mem::take(&mut self.notification_queue),
            });
        }
        events.append(&mut self.pending);
        events
    }

    /// Put back events that could not be delivered, ahead of anything
    /// queued since.
    pub fn requeue(&mut self, events: Vec<NotificationEvent>) {
        let mut pending = Vec::with_capacity(events.len() + self.pending.len());
        for event in events {
            match event {
                NotificationEvent::ItemsReceived { mut items } => {
                    items.append(&mut self.notification_queue);
                    self.notification_queue = items;
                }
                other => pending.push(other),
            }
        }
        pending.append(&mut self.pending);
        self.pending = pending;
    }

    pub fn has_notifications(&self) -> bool {
        !self.notification_queue.is_empty() || !self.pending.is_empty()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
