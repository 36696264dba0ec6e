//! Hint diff state machine.
//!
//! [`reduce`] is the whole transition table for one hint id; [`diff_hints`]
//! applies it over one direction of a slot's hint map.
//!
//! ```text
//!   unseen ──(unfound)──▶ new ──(found)──▶ found | useless
//!     │                    │
//!     └─(already found)─▶ stored silently
//!                          └─(classification changed, unfound)──▶ classified
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::event::NotificationEvent;
use crate::snapshot::Hint;
use crate::types::{HintClassification, HintDirection, HintUpdate};

/// Emitted hint events per slot per direction per refresh.
pub const MAX_HINT_EVENTS: usize = 10;

/// A hint as last stored for a slot, with the update that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedHint {
    #[serde(flatten)]
    pub hint: Hint,
    #[serde(default)]
    pub update: HintUpdate,
}

/// Result of observing one hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    /// Persist without notifying.
    Store(TrackedHint),
    /// Persist and notify.
    Emit(TrackedHint),
}

/// `useless` is true when the hint's receiver already completed its goal.
pub fn reduce(previous: Option<&TrackedHint>, observed: &Hint, useless: bool) -> Transition {
    let stored = |update| TrackedHint {
        hint: observed.clone(),
        update,
    };
    let Some(previous) = previous else {
        return if observed.found {
            Transition::Store(stored(HintUpdate::None))
        } else {
            Transition::Emit(stored(HintUpdate::New))
        };
    };

    if observed.found && !previous.hint.found {
        return if useless {
            Transition::Store(stored(HintUpdate::Useless))
        } else {
            Transition::Emit(stored(HintUpdate::Found))
        };
    }

    if !observed.found && observed.classification != previous.hint.classification {
        // Clearing a classification is stored but not announced.
        return if observed.classification == HintClassification::Unset {
            Transition::Store(stored(HintUpdate::Classified))
        } else {
            Transition::Emit(stored(HintUpdate::Classified))
        };
    }

    Transition::Unchanged
}

/// Fold `observed` into `stored`, returning at most [`MAX_HINT_EVENTS`]
/// events. Every transition is persisted whether or not it is emitted.
pub fn diff_hints<'a>(
    stored: &mut BTreeMap<i64, TrackedHint>,
    observed: impl IntoIterator<Item = &'a Hint>,
    direction: HintDirection,
    emit: bool,
    is_useless: impl Fn(&Hint) -> bool,
) -> Vec<NotificationEvent> {
    let mut events = Vec::new();
    for hint in observed {
        let tracked = match reduce(stored.get(&hint.id), hint, is_useless(hint)) {
            Transition::Unchanged => continue,
            Transition::Store(tracked) => {
                stored.insert(hint.id, tracked);
                continue;
            }
            Transition::Emit(tracked) => tracked,
        };
        if emit && events.len() < MAX_HINT_EVENTS {
            events.push(NotificationEvent::Hint {
                direction,
                update: tracked.update,
                hint: tracked.clone(),
            });
        }
        stored.insert(hint.id, tracked);
    }
    events
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn hint(id: i64, found: bool) -> Hint {
        Hint {
            id,
            finder: Some(1),
            receiver: Some(2),
            item: format!("Item {id}"),
            location: format!("Location {id}"),
            entrance: String::new(),
            found,
            classification: HintClassification::Unset,
            item_link_name: None,
        }
    }

    fn tracked(h: Hint, update: HintUpdate) -> TrackedHint {
        TrackedHint { hint: h, update }
    }

    #[test]
    fn first_sight_unfound_is_new() {
        match reduce(None, &hint(1, false), false) {
            Transition::Emit(t) => assert_eq!(t.update, HintUpdate::New),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn first_sight_already_found_is_silent() {
        match reduce(None, &hint(1, true), false) {
            Transition::Store(t) => assert!(t.hint.found),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn found_flip_emits_once() {
        let prev = tracked(hint(1, false), HintUpdate::New);
        let next = match reduce(Some(&prev), &hint(1, true), false) {
            Transition::Emit(t) => t,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(next.update, HintUpdate::Found);
        assert_eq!(reduce(Some(&next), &hint(1, true), false), Transition::Unchanged);
    }

    #[test]
    fn found_flip_for_goaled_receiver_is_useless() {
        let prev = tracked(hint(1, false), HintUpdate::New);
        match reduce(Some(&prev), &hint(1, true), true) {
            Transition::Store(t) => {
                assert_eq!(t.update, HintUpdate::Useless);
                assert!(t.hint.found);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reclassification_while_unfound() {
        let prev = tracked(hint(1, false), HintUpdate::New);
        let mut observed = hint(1, false);
        observed.classification = HintClassification::Critical;
        match reduce(Some(&prev), &observed, false) {
            Transition::Emit(t) => assert_eq!(t.update, HintUpdate::Classified),
            other => panic!("unexpected {other:?}"),
        }

        let prev = tracked(observed, HintUpdate::Classified);
        match reduce(Some(&prev), &hint(1, false), false) {
            Transition::Store(t) => assert_eq!(t.hint.classification, HintClassification::Unset),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn diff_caps_events_but_persists_everything() {
        let mut stored = BTreeMap::new();
        let observed: Vec<Hint> = (0..15).map(|i| hint(i, false)).collect();
        let events = diff_hints(&mut stored, &observed, HintDirection::Finder, true, |_| false);
        assert_eq!(events.len(), MAX_HINT_EVENTS);
        assert_eq!(stored.len(), 15);

        let again = diff_hints(&mut stored, &observed, HintDirection::Finder, true, |_| false);
        assert!(again.is_empty());
    }

    #[test]
    fn diff_without_emit_still_stores() {
        let mut stored = BTreeMap::new();
        let observed = [hint(7, false)];
        let events = diff_hints(&mut stored, &observed, HintDirection::Receiver, false, |_| false);
        assert!(events.is_empty());
        assert_eq!(stored[&7].update, HintUpdate::New);
    }
}
