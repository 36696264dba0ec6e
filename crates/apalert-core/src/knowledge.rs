//! Item classification lookup: the knowledge-base capability, per-game
//! heuristics, and the resolution order that combines them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::Classification;

// ─── Capabilities ────────────────────────────────────────────────────

/// Store mapping `(game, item)` to a classification.
pub trait KnowledgeBase {
    /// Look up an item, seeding an `unknown` entry when none exists.
    fn lookup(&mut self, game: &str, item: &str) -> Classification;

    fn record(&mut self, game: &str, item: &str, classification: Classification);
}

/// Game-specific override consulted before the knowledge base.
pub trait Classifier {
    fn classify(&self, game: &str, item: &str) -> Option<Classification>;
}

/// Resolve one item: instance flag, then heuristics, then the knowledge base.
pub fn resolve(
    flag: Option<Classification>,
    game: &str,
    item: &str,
    classifier: &dyn Classifier,
    knowledge: &mut dyn KnowledgeBase,
) -> Classification {
    if let Some(c) = flag {
        return c;
    }
    if let Some(c) = classifier.classify(game, item) {
        return c;
    }
    knowledge.lookup(game, item)
}

// ─── Classification Book ─────────────────────────────────────────────

/// In-memory knowledge base, serialised as `{game: {item: classification}}`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassificationBook {
    games: BTreeMap<String, BTreeMap<String, Classification>>,
    #[serde(skip)]
    dirty: bool,
}

impl ClassificationBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, game: &str, item: &str) -> Option<Classification> {
        self.games.get(game)?.get(item).copied()
    }

    /// Items of `game` still waiting for a classification.
    pub fn unclassified(&self, game: &str) -> Vec<&str> {
        self.games
            .get(game)
            .map(|items| {
                items
                    .iter()
                    .filter(|(_, c)| **c == Classification::Unknown)
                    .map(|(name, _)| name.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.games.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when entries changed since the last [`mark_clean`](Self::mark_clean).
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

impl KnowledgeBase for ClassificationBook {
    fn lookup(&mut self, game: &str, item: &str) -> Classification {
        if let Some(c) = self.get(game, item) {
            return c;
        }
        self.record(game, item, Classification::Unknown);
        Classification::Unknown
    }

    fn record(&mut self, game: &str, item: &str, classification: Classification) {
        let previous = self
            .games
            .entry(game.to_owned())
            .or_default()
            .insert(item.to_owned(), classification);
        if previous != Some(classification) {
            self.dirty = true;
        }
    }
}

// ─── Game Rules ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum ItemRule {
    Prefix(&'static str, Classification),
}

impl ItemRule {
    fn apply(&self, item: &str) -> Option<Classification> {
        match self {
            Self::Prefix(prefix, c) => item.starts_with(prefix).then_some(*c),
        }
    }
}

/// Built-in per-game heuristics.
#[derive(Debug, Clone)]
pub struct GameRules {
    rules: Vec<(&'static str, ItemRule)>,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            rules: vec![(
                "SlotLock",
                ItemRule::Prefix("Unlock ", Classification::Progression),
            )],
        }
    }
}

impl GameRules {
    /// No heuristics at all.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }
}

impl Classifier for GameRules {
    fn classify(&self, game: &str, item: &str) -> Option<Classification> {
        self.rules
            .iter()
            .filter(|(g, _)| *g == game)
            .find_map(|(_, rule)| rule.apply(item))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
