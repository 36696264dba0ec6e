//! Property tests for the item cursor and filter laws.

use apalert_core::knowledge::{ClassificationBook, GameRules};
use apalert_core::slot::{DiffContext, DiffOutcome, ItemRow, NO_CURSOR, TrackedSlot};
use apalert_core::types::{Classification, ItemFilter};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;

fn arb_classification() -> impl Strategy<Value = Option<Classification>> {
    prop_oneof![
        Just(None),
        Just(Some(Classification::Trap)),
        Just(Some(Classification::Filler)),
        Just(Some(Classification::Useful)),
        Just(Some(Classification::Progression)),
        Just(Some(Classification::Mcguffin)),
        Just(Some(Classification::BadName)),
    ]
}

fn arb_rows() -> impl Strategy<Value = Vec<ItemRow>> {
    proptest::collection::vec((0i64..40, arb_classification()), 1..30).prop_map(|entries| {
        entries
            .into_iter()
            .map(|(order, flag)| ItemRow {
                order,
                name: format!("Item {order}"),
                quantity: 1,
                flag,
            })
            .collect()
    })
}

fn arb_filter() -> impl Strategy<Value = ItemFilter> {
    (0u8..32).prop_map(|bits| {
        let mut f = ItemFilter::NONE;
        for (bit, flag) in [
            (1, ItemFilter::TRAP),
            (2, ItemFilter::FILLER),
            (4, ItemFilter::USEFUL),
            (8, ItemFilter::PROGRESSION),
            (16, ItemFilter::MCGUFFIN),
        ] {
            if bits & bit != 0 {
                f = f | flag;
            }
        }
        f
    })
}

fn slot_with(cursor: i64, populated: bool, filter: ItemFilter) -> TrackedSlot {
    let mut s = TrackedSlot::new("https://archipelago.gg/tracker/room/0/1", 1);
    s.game = Some("Clique".into());
    s.latest_item = cursor;
    s.filters = filter;
    if populated {
        s.all_items.insert("Seed".into(), 1);
    }
    s
}

fn run(slot: &mut TrackedSlot, rows: Vec<ItemRow>) -> apalert_core::ItemDiff {
    let rules = GameRules::empty();
    let mut book = ClassificationBook::new();
    let mut ctx = DiffContext {
        classifier: &rules,
        knowledge: &mut book,
        default_filter: ItemFilter::UNSET,
        now: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().expect("valid"),
    };
    slot.apply_rows(rows, &mut ctx)
}

proptest! {
    #[test]
    fn cursor_follows_max_order(rows in arb_rows(), cursor in -1i64..45) {
        let max = rows.iter().map(|r| r.order).max().expect("non-empty");
        let mut slot = slot_with(cursor, true, ItemFilter::UNSET);
        let inventory = slot.all_items.clone();
        let diff = run(&mut slot, rows.clone());

        if max < cursor {
            prop_assert_eq!(diff.outcome, DiffOutcome::Rollback);
            prop_assert_eq!(slot.latest_item, NO_CURSOR);
            prop_assert_eq!(&slot.all_items, &inventory);
            prop_assert!(diff.delta.is_empty());
        } else if max == cursor {
            prop_assert_eq!(diff.outcome, DiffOutcome::Unchanged);
            prop_assert_eq!(slot.latest_item, cursor);
            prop_assert!(diff.delta.is_empty());
        } else {
            let mut expected: Vec<i64> =
                rows.iter().map(|r| r.order).filter(|o| *o > cursor).collect();
            expected.sort_unstable();
            let got: Vec<i64> = diff.delta.iter().map(|i| i.order).collect();
            prop_assert_eq!(got, expected);
            prop_assert_eq!(slot.latest_item, max);
        }
    }

    #[test]
    fn second_identical_diff_is_empty(rows in arb_rows()) {
        let mut slot = slot_with(NO_CURSOR, false, ItemFilter::UNSET);
        run(&mut slot, rows.clone());
        let queued = slot.notification_queue.len();
        let again = run(&mut slot, rows);
        prop_assert!(again.delta.is_empty());
        prop_assert_eq!(slot.notification_queue.len(), queued);
    }

    #[test]
    fn filter_law(rows in arb_rows(), filter in arb_filter()) {
        let mut slot = slot_with(NO_CURSOR, false, filter);
        let diff = run(&mut slot, rows);
        let expected: Vec<_> = diff
            .delta
            .iter()
            .filter(|i| {
                if filter == ItemFilter::NONE {
                    false
                } else if filter == ItemFilter::EVERYTHING {
                    true
                } else {
                    i.classification.is_unclassified() || filter.admits(i.classification)
                }
            })
            .cloned()
            .collect();
        prop_assert_eq!(&slot.notification_queue, &expected);
        if filter == ItemFilter::NONE {
            prop_assert!(slot.notification_queue.is_empty());
        }
    }

    #[test]
    fn unset_filter_passes_whole_delta(rows in arb_rows()) {
        let mut slot = slot_with(NO_CURSOR, false, ItemFilter::UNSET);
        let diff = run(&mut slot, rows);
        prop_assert_eq!(&slot.notification_queue, &diff.delta);
    }
}
