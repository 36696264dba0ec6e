//! Multi-poll scenarios for one tracked slot.

use apalert_core::knowledge::{ClassificationBook, GameRules, KnowledgeBase};
use apalert_core::slot::{DiffContext, DiffOutcome, ItemRow, NO_CURSOR, TrackedSlot};
use apalert_core::types::{Classification, ItemFilter};
use apalert_core::NotificationEvent;
use chrono::{DateTime, TimeZone, Utc};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 2, 14, 18, 30, 0).single().expect("valid")
}

fn rows(last: i64) -> Vec<ItemRow> {
    (1..=last).map(|i| ItemRow::new(i, format!("Item {i}"))).collect()
}

fn poll(slot: &mut TrackedSlot, book: &mut ClassificationBook, rows: Vec<ItemRow>) -> DiffOutcome {
    let rules = GameRules::default();
    let mut ctx = DiffContext {
        classifier: &rules,
        knowledge: book,
        default_filter: ItemFilter::UNSET,
        now: now(),
    };
    slot.apply_rows(rows, &mut ctx).outcome
}

#[test]
fn unchanged_then_advance_then_host_reset() {
    let mut book = ClassificationBook::new();
    let mut slot = TrackedSlot::new("https://archipelago.gg/tracker/room/0/3", 3);
    slot.game = Some("Clique".into());
    slot.latest_item = 5;
    for i in 1..=5 {
        slot.all_items.insert(format!("Item {i}"), 1);
    }

    assert_eq!(poll(&mut slot, &mut book, rows(5)), DiffOutcome::Unchanged);
    assert!(slot.drain_notifications().is_empty());
    assert_eq!(slot.latest_item, 5);

    assert_eq!(poll(&mut slot, &mut book, rows(7)), DiffOutcome::Advanced);
    assert_eq!(slot.latest_item, 7);
    assert_eq!(
        slot.last_item.as_ref().map(|l| l.name.as_str()),
        Some("Item 7")
    );
    let events = slot.drain_notifications();
    let NotificationEvent::ItemsReceived { items } = &events[0] else {
        panic!("expected items first, got {events:?}");
    };
    let orders: Vec<i64> = items.iter().map(|i| i.order).collect();
    assert_eq!(orders, vec![6, 7]);

    let inventory = slot.all_items.clone();
    assert_eq!(poll(&mut slot, &mut book, rows(3)), DiffOutcome::Rollback);
    assert_eq!(slot.latest_item, NO_CURSOR);
    assert_eq!(slot.all_items, inventory);
    assert_eq!(slot.drain_notifications(), vec![NotificationEvent::Rollback]);
}

#[test]
fn unknown_item_is_prompted_once_then_reused() {
    let mut book = ClassificationBook::new();
    let mut slot = TrackedSlot::new("https://archipelago.gg/tracker/room/0/2", 2);
    slot.game = Some("Ocarina of Time".into());
    slot.filters = ItemFilter::PROGRESSION;

    poll(&mut slot, &mut book, vec![ItemRow::new(1, "Whispering Idol")]);
    let events = slot.drain_notifications();
    let NotificationEvent::ItemsReceived { items } = &events[0] else {
        panic!("unknown item should pass a non-none filter, got {events:?}");
    };
    assert_eq!(items[0].classification, Classification::Unknown);
    assert_eq!(
        events[1],
        NotificationEvent::ClassificationNeeded {
            game: "Ocarina of Time".into(),
            items: vec!["Whispering Idol".into()],
        }
    );

    book.record("Ocarina of Time", "Whispering Idol", Classification::Progression);

    poll(
        &mut slot,
        &mut book,
        vec![ItemRow::new(1, "Whispering Idol"), ItemRow::new(2, "Whispering Idol")],
    );
    let events = slot.drain_notifications();
    assert_eq!(events.len(), 1, "no second prompt: {events:?}");
    let NotificationEvent::ItemsReceived { items } = &events[0] else {
        panic!("expected items, got {events:?}");
    };
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].classification, Classification::Progression);
    assert_eq!(slot.all_items.get("Whispering Idol"), Some(&2));
}

#[test]
fn slotlock_unlocks_bypass_the_knowledge_base() {
    let mut book = ClassificationBook::new();
    let mut slot = TrackedSlot::new("https://archipelago.gg/tracker/room/0/4", 4);
    slot.game = Some("SlotLock".into());
    poll(&mut slot, &mut book, vec![ItemRow::new(1, "Unlock Slot 2")]);
    assert!(book.is_empty());
    assert_eq!(
        slot.last_progression.as_ref().map(|p| p.name.as_str()),
        Some("Unlock Slot 2")
    );
}
