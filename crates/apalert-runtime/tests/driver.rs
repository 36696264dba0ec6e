//! Full cycles against scripted agents and an in-memory transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use apalert_core::slot::{ItemRow, TrackedSlot};
use apalert_core::{
    AgentKind, CompletionStatus, NotificationEvent, ProgressionStatus, RemovalReason,
    SessionSnapshot, SlotMeta,
};
use apalert_runtime::{
    ClaimOutcome, JsonStore, MemorySink, NotificationSink, Player, SlotAddress, SyncPolicy,
    Tracker,
};
use apalert_session::SourceSet;
use apalert_sources::{SessionLink, SlotFetch, SourceAgent, SourceError};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use url::Url;

const ROOM: &str = "https://archipelago.gg/tracker/room";

// ─── Scripted Host ───────────────────────────────────────────────────

/// Shared, mutable view of what the fake host currently reports.
#[derive(Clone, Default)]
struct Host {
    snapshot: Arc<Mutex<SessionSnapshot>>,
    rows: Arc<Mutex<Vec<ItemRow>>>,
    session_calls: Arc<AtomicUsize>,
    slot_calls: Arc<AtomicUsize>,
    pushed: Arc<Mutex<Vec<(i64, ProgressionStatus)>>>,
}

impl Host {
    fn set_snapshot(&self, snapshot: SessionSnapshot) {
        *self.snapshot.lock().expect("lock") = snapshot;
    }

    fn set_items(&self, last: i64) {
        *self.rows.lock().expect("lock") =
            (1..=last).map(|i| ItemRow::new(i, format!("Item {i}"))).collect();
    }

    fn slot_calls(&self) -> usize {
        self.slot_calls.load(Ordering::SeqCst)
    }

    fn update_slot(&self, position: u32, f: impl FnOnce(&mut SlotMeta)) {
        let mut snapshot = self.snapshot.lock().expect("lock");
        if let Some(meta) = snapshot.slots.get_mut(&position) {
            f(meta);
        }
    }
}

struct HostAgent {
    kind: AgentKind,
    host: Host,
}

#[async_trait]
impl SourceAgent for HostAgent {
    fn kind(&self) -> AgentKind {
        self.kind
    }

    async fn fetch_session(
        &self,
        _link: &mut SessionLink,
    ) -> Result<Option<SessionSnapshot>, SourceError> {
        match self.kind {
            AgentKind::Aggregator => {
                self.host.session_calls.fetch_add(1, Ordering::SeqCst);
                Ok(Some(self.host.snapshot.lock().expect("lock").clone()))
            }
            _ => Ok(None),
        }
    }

    async fn fetch_slot(
        &self,
        _link: &mut SessionLink,
        _slot: &TrackedSlot,
    ) -> Result<SlotFetch, SourceError> {
        if self.kind != AgentKind::Native {
            return Ok(SlotFetch::Unsupported);
        }
        self.host.slot_calls.fetch_add(1, Ordering::SeqCst);
        Ok(SlotFetch::Rows {
            rows: self.host.rows.lock().expect("lock").clone(),
            checks: None,
        })
    }

    async fn set_progression(
        &self,
        _link: &SessionLink,
        remote_id: i64,
        status: ProgressionStatus,
    ) -> Result<(), SourceError> {
        self.host.pushed.lock().expect("lock").push((remote_id, status));
        self.host.update_slot(1, |meta| meta.progression = status);
        Ok(())
    }
}

// ─── Fixtures ────────────────────────────────────────────────────────

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 8, 19, 0, 0).single().expect("valid")
}

fn slot_meta(position: u32, owner: &str, activity: DateTime<Utc>) -> SlotMeta {
    let mut meta = SlotMeta::new(position);
    meta.name = format!("P{position}");
    meta.game = Some("Clique".into());
    meta.remote_id = Some(100 + i64::from(position));
    meta.owner = Some(owner.into());
    meta.progression = ProgressionStatus::Go;
    meta.checks_total = 4;
    meta.last_activity = Some(activity);
    meta
}

fn session_snapshot(activity: DateTime<Utc>) -> SessionSnapshot {
    SessionSnapshot {
        title: Some("Weekly".into()),
        slots: [(1, slot_meta(1, "alice", activity)), (2, slot_meta(2, "bob", activity))]
            .into_iter()
            .collect(),
        ..SessionSnapshot::default()
    }
}

fn tracker(host: &Host, sink: &MemorySink) -> Tracker {
    tracker_with(host, Box::new(sink.clone()), SyncPolicy::default())
}

fn tracker_with(host: &Host, sink: Box<dyn NotificationSink>, policy: SyncPolicy) -> Tracker {
    let sources = SourceSet {
        aggregator: Box::new(HostAgent {
            kind: AgentKind::Aggregator,
            host: host.clone(),
        }),
        native: Box::new(HostAgent {
            kind: AgentKind::Native,
            host: host.clone(),
        }),
        html: Box::new(HostAgent {
            kind: AgentKind::Html,
            host: host.clone(),
        }),
    };
    Tracker::new(
        sources,
        sink,
        policy,
        Url::parse("https://aggregator.example").expect("url"),
    )
}

/// Refuses every delivery for one slot position.
struct RefusingSlot {
    position: u32,
    inner: MemorySink,
}

#[async_trait]
impl NotificationSink for RefusingSlot {
    async fn deliver(
        &self,
        player: &str,
        slot: &SlotAddress,
        events: &[NotificationEvent],
    ) -> anyhow::Result<()> {
        if slot.position == self.position {
            anyhow::bail!("slot {} refused", slot.position);
        }
        self.inner.deliver(player, slot, events).await
    }
}

fn items_in(events: &[NotificationEvent]) -> Vec<i64> {
    events
        .iter()
        .filter_map(|e| match e {
            NotificationEvent::ItemsReceived { items } => Some(items.iter().map(|i| i.order)),
            _ => None,
        })
        .flatten()
        .collect()
}

// ─── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn claimed_slot_receives_only_new_items_and_idle_slots_are_throttled() {
    let host = Host::default();
    host.set_snapshot(session_snapshot(t0()));
    host.set_items(5);
    let sink = MemorySink::new();
    let mut tracker = tracker(&host, &sink);
    tracker.add_player(Player::new("u1"));

    let claimed = tracker
        .claim_slot("u1", &format!("{ROOM}/0/1"), t0())
        .await
        .expect("claim");
    assert!(matches!(claimed, ClaimOutcome::Claimed { position: 1, .. }));

    tracker.run_cycle(false, t0()).await.expect("cycle 1");
    let delivered = sink.take();
    assert_eq!(delivered.len(), 1);
    assert_eq!(items_in(&delivered[0].events), vec![1, 2, 3, 4, 5]);
    assert_eq!(delivered[0].slot.name, "P1");

    // Nothing new upstream and within the stale window: no slot fetch.
    host.set_items(7);
    tracker
        .run_cycle(false, t0() + TimeDelta::minutes(70))
        .await
        .expect("cycle 2");
    assert_eq!(host.slot_calls(), 1);
    assert!(sink.take().is_empty());

    // Activity moved: the slot is refreshed and only the delta is sent.
    host.update_slot(1, |meta| meta.last_activity = Some(t0() + TimeDelta::minutes(100)));
    tracker
        .run_cycle(false, t0() + TimeDelta::minutes(140))
        .await
        .expect("cycle 3");
    let delivered = sink.take();
    assert_eq!(items_in(&delivered[0].events), vec![6, 7]);
    assert_eq!(host.slot_calls(), 2);
}

#[tokio::test]
async fn claiming_twice_is_idempotent() {
    let host = Host::default();
    host.set_snapshot(session_snapshot(t0()));
    let sink = MemorySink::new();
    let mut tracker = tracker(&host, &sink);
    tracker.add_player(Player::new("u1"));

    let url = format!("{ROOM}/0/2");
    tracker.claim_slot("u1", &url, t0()).await.expect("claim");
    let again = tracker.claim_slot("u1", &url, t0()).await.expect("claim again");
    assert!(matches!(again, ClaimOutcome::AlreadyTracked { position: 2, .. }));
    assert_eq!(tracker.player("u1").expect("player").slots.len(), 1);

    assert!(tracker.claim_slot("u1", &format!("{ROOM}/0/9"), t0()).await.is_err());
    assert!(tracker.claim_slot("nobody", &url, t0()).await.is_err());
}

#[tokio::test]
async fn owner_handle_auto_claims_but_skips_victorious_slots() {
    let host = Host::default();
    let mut snapshot = session_snapshot(t0());
    let mut won = slot_meta(3, "alice", t0());
    won.completion = CompletionStatus::Done;
    snapshot.slots.insert(3, won);
    host.set_snapshot(snapshot);
    host.set_items(1);

    let sink = MemorySink::new();
    let mut tracker = tracker(&host, &sink);
    let mut alice = Player::new("u1");
    alice.aggregator_handle = Some("Alice".into());
    alice.watched.push(ROOM.into());
    tracker.add_player(alice);

    let report = tracker.run_cycle(false, t0()).await.expect("cycle");
    assert_eq!(report.claimed, 1);
    let slots = &tracker.player("u1").expect("player").slots;
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].position, 1);
    assert_eq!(slots[0].url, format!("{ROOM}/0/1"));
}

#[tokio::test]
async fn goal_and_full_checks_remove_slot_with_one_notice() {
    let host = Host::default();
    host.set_snapshot(session_snapshot(t0()));
    host.set_items(2);
    let sink = MemorySink::new();
    let mut tracker = tracker(&host, &sink);
    tracker.add_player(Player::new("u1"));
    tracker
        .claim_slot("u1", &format!("{ROOM}/0/1"), t0())
        .await
        .expect("claim");
    tracker.run_cycle(false, t0()).await.expect("cycle 1");
    sink.take();

    host.update_slot(1, |meta| {
        meta.completion = CompletionStatus::Goal;
        meta.checks_done = 4;
    });
    let report = tracker
        .run_cycle(true, t0() + TimeDelta::minutes(5))
        .await
        .expect("cycle 2");
    assert_eq!(report.removed, 1);
    assert!(tracker.player("u1").expect("player").slots.is_empty());

    let events: Vec<NotificationEvent> = sink.take().into_iter().flat_map(|d| d.events).collect();
    assert!(events.contains(&NotificationEvent::GoalCompleted));
    assert_eq!(
        events.last(),
        Some(&NotificationEvent::SlotRemoved {
            reason: RemovalReason::Victory
        })
    );
    // The unreferenced session is pruned at cycle end.
    assert!(tracker.registry().is_empty());
}

#[tokio::test]
async fn duplicate_slots_collapse_to_one() {
    let host = Host::default();
    host.set_snapshot(session_snapshot(t0()));
    host.set_items(1);
    let sink = MemorySink::new();
    let mut tracker = tracker(&host, &sink);
    let mut player = Player::new("u1");
    player.slots.push(TrackedSlot::new(format!("{ROOM}/0/1"), 1));
    player.slots.push(TrackedSlot::new(format!("{ROOM}/0/1"), 1));
    player
        .slots
        .push(TrackedSlot::new("https://archipelago.gg/generic_tracker/room/0/1", 1));
    tracker.add_player(player);

    tracker.run_cycle(false, t0()).await.expect("cycle");
    assert_eq!(tracker.player("u1").expect("player").slots.len(), 1);
    assert_eq!(sink.take().len(), 1);
}

#[tokio::test]
async fn one_players_delivery_failure_does_not_stop_the_cycle() {
    let host = Host::default();
    host.set_snapshot(session_snapshot(t0()));
    host.set_items(3);
    let sink = MemorySink::new();
    sink.refuse("a-broken");
    let mut tracker = tracker(&host, &sink);
    for id in ["a-broken", "b-fine"] {
        let mut player = Player::new(id);
        player.slots.push(TrackedSlot::new(format!("{ROOM}/0/1"), 1));
        tracker.add_player(player);
    }

    let report = tracker.run_cycle(false, t0()).await.expect("cycle");
    assert_eq!(report.delivery_failures, 1);
    assert_eq!(report.player_errors, 0);
    let delivered = sink.take();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].player, "b-fine");

    // Undelivered items stay queued on the failing player's slot.
    let broken = tracker.player("a-broken").expect("player");
    assert_eq!(broken.slots[0].notification_queue.len(), 3);
}

#[tokio::test]
async fn failed_delivery_for_one_slot_still_serves_the_players_other_slots() {
    let host = Host::default();
    host.set_snapshot(session_snapshot(t0()));
    host.set_items(3);
    let sink = MemorySink::new();
    let mut tracker = tracker_with(
        &host,
        Box::new(RefusingSlot {
            position: 2,
            inner: sink.clone(),
        }),
        SyncPolicy::default(),
    );
    let mut player = Player::new("u1");
    player.slots.push(TrackedSlot::new(format!("{ROOM}/0/2"), 2));
    player.slots.push(TrackedSlot::new(format!("{ROOM}/0/1"), 1));
    tracker.add_player(player);

    let report = tracker.run_cycle(false, t0()).await.expect("cycle");
    assert_eq!(report.player_errors, 0);
    assert_eq!(report.delivery_failures, 1);
    assert_eq!(report.slots_refreshed, 2);
    assert_eq!(report.deliveries, 1);

    let delivered = sink.take();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].slot.position, 1);
    assert_eq!(items_in(&delivered[0].events), vec![1, 2, 3]);

    let slots = &tracker.player("u1").expect("player").slots;
    assert_eq!(slots.len(), 2);
    assert_eq!(slots[0].notification_queue.len(), 3);
    assert!(slots[1].notification_queue.is_empty());
}

#[tokio::test]
async fn removal_waits_until_its_notice_is_delivered() {
    let host = Host::default();
    let sink = MemorySink::new();
    sink.refuse("u1");
    let mut tracker = tracker(&host, &sink);
    let mut player = Player::new("u1");
    player.slots.push(TrackedSlot::new("https://archipelago.gg/room/nowhere", 4));
    tracker.add_player(player);

    let report = tracker.run_cycle(false, t0()).await.expect("cycle");
    assert_eq!(report.removed, 0);
    assert_eq!(report.delivery_failures, 1);
    let slots = &tracker.player("u1").expect("player").slots;
    assert_eq!(slots.len(), 1);
    assert_eq!(
        slots[0].pending,
        vec![NotificationEvent::SlotRemoved {
            reason: RemovalReason::Unreachable
        }]
    );
}

#[tokio::test]
async fn aggregator_only_sessions_keep_every_owned_slot_without_slot_fetches() {
    let host = Host::default();
    let mut snapshot = session_snapshot(t0());
    snapshot.slots.insert(3, slot_meta(3, "alice", t0()));
    host.set_snapshot(snapshot);
    host.set_items(2);
    let sink = MemorySink::new();
    let mut tracker = tracker(&host, &sink);
    let mut alice = Player::new("u1");
    alice.aggregator_handle = Some("alice".into());
    alice.watched.push("https://aggregator.example/tracker/abc".into());
    tracker.add_player(alice);

    let mut claimed = 0;
    for minute in 0..12 {
        let report = tracker
            .run_cycle(true, t0() + TimeDelta::minutes(minute))
            .await
            .expect("cycle");
        claimed += report.claimed;
        assert_eq!(report.removed, 0);
    }
    assert_eq!(claimed, 2);
    assert_eq!(host.slot_calls(), 0);

    let slots = &tracker.player("u1").expect("player").slots;
    let positions: Vec<u32> = slots.iter().map(|s| s.position).collect();
    assert_eq!(positions, vec![1, 3]);
    assert!(slots.iter().all(|s| s.url == "https://aggregator.example/tracker/abc"));
    assert!(slots.iter().all(|s| s.failures == 0 && s.errors == 0));

    let removed = sink
        .take()
        .into_iter()
        .flat_map(|d| d.events)
        .any(|e| matches!(e, NotificationEvent::SlotRemoved { .. }));
    assert!(!removed);
}

#[tokio::test]
async fn zero_flush_interval_is_clamped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let host = Host::default();
    host.set_snapshot(session_snapshot(t0()));
    host.set_items(1);
    let sink = MemorySink::new();
    let policy = SyncPolicy {
        flush_every: 0,
        ..SyncPolicy::default()
    };
    let mut tracker = tracker_with(&host, Box::new(sink.clone()), policy)
        .with_store(JsonStore::open(dir.path()).expect("store"))
        .expect("load");
    assert_eq!(tracker.policy().flush_every, 1);

    let mut player = Player::new("u1");
    player.slots.push(TrackedSlot::new(format!("{ROOM}/0/1"), 1));
    tracker.add_player(player);
    let report = tracker.run_cycle(false, t0()).await.expect("cycle");
    assert_eq!(report.slots_processed, 1);
}

#[tokio::test]
async fn unresolvable_slot_is_removed_as_unreachable() {
    let host = Host::default();
    let sink = MemorySink::new();
    let mut tracker = tracker(&host, &sink);
    let mut player = Player::new("u1");
    player.slots.push(TrackedSlot::new("https://archipelago.gg/room/nowhere", 4));
    tracker.add_player(player);

    tracker.run_cycle(false, t0()).await.expect("cycle");
    assert!(tracker.player("u1").expect("player").slots.is_empty());
    let delivered = sink.take();
    assert_eq!(
        delivered[0].events,
        vec![NotificationEvent::SlotRemoved {
            reason: RemovalReason::Unreachable
        }]
    );
    assert_eq!(delivered[0].slot.session, None);
}

#[tokio::test]
async fn progression_push_surfaces_on_next_cycle() {
    let host = Host::default();
    host.set_snapshot(session_snapshot(t0()));
    host.set_items(1);
    let sink = MemorySink::new();
    let mut tracker = tracker(&host, &sink);
    tracker.add_player(Player::new("u1"));
    let url = format!("{ROOM}/0/1");
    tracker.claim_slot("u1", &url, t0()).await.expect("claim");
    tracker.run_cycle(false, t0()).await.expect("cycle 1");
    sink.take();

    tracker
        .set_progression(&url, ProgressionStatus::Bk, t0() + TimeDelta::minutes(1))
        .await
        .expect("push");
    assert_eq!(*host.pushed.lock().expect("lock"), vec![(101, ProgressionStatus::Bk)]);

    tracker
        .run_cycle(false, t0() + TimeDelta::minutes(2))
        .await
        .expect("cycle 2");
    let events: Vec<NotificationEvent> = sink.take().into_iter().flat_map(|d| d.events).collect();
    assert_eq!(
        events,
        vec![NotificationEvent::ProgressionChanged {
            previous: ProgressionStatus::Go,
            current: ProgressionStatus::Bk,
        }]
    );
}

#[tokio::test]
async fn state_survives_restart_through_the_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let host = Host::default();
    host.set_snapshot(session_snapshot(t0()));
    host.set_items(4);
    let sink = MemorySink::new();

    let mut first = tracker(&host, &sink)
        .with_store(JsonStore::open(dir.path()).expect("store"))
        .expect("load");
    first.add_player(Player::new("u1"));
    first
        .claim_slot("u1", &format!("{ROOM}/0/1"), t0())
        .await
        .expect("claim");
    first.run_cycle(false, t0()).await.expect("cycle");
    drop(first);

    let second = tracker(&host, &sink)
        .with_store(JsonStore::open(dir.path()).expect("store"))
        .expect("reload");
    let slot = &second.player("u1").expect("player").slots[0];
    assert_eq!(slot.latest_item, 4);
    assert_eq!(second.registry().len(), 1);
    assert!(!second.knowledge().is_empty());
}
