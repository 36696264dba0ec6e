use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

use crate::error::CoreError;

// ─── Item Classification ──────────────────────────────────────────

/// Semantic category of a received item.
///
/// `BadName` marks an item the knowledge base could not resolve. It is
/// terminal: such items are never offered for classification again.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    #[default]
    Unknown,
    Trap,
    Filler,
    Useful,
    Progression,
    Mcguffin,
    BadName,
}

impl Classification {
    pub const ALL: [Self; 7] = [
        Self::Unknown,
        Self::Trap,
        Self::Filler,
        Self::Useful,
        Self::Progression,
        Self::Mcguffin,
        Self::BadName,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Trap => "trap",
            Self::Filler => "filler",
            Self::Useful => "useful",
            Self::Progression => "progression",
            Self::Mcguffin => "mcguffin",
            Self::BadName => "bad_name",
        }
    }

    /// Items nobody has classified yet. Filters never drop these.
    pub fn is_unclassified(self) -> bool {
        matches!(self, Self::Unknown | Self::BadName)
    }

    /// Progression-class items update a slot's "last progression" marker.
    pub fn is_progression(self) -> bool {
        matches!(self, Self::Progression | Self::Mcguffin)
    }

    /// Map an item-flags bitmask as carried on the host's wire format.
    ///
    /// Bit 0 = progression, bit 1 = useful, bit 2 = trap; zero is filler.
    pub fn from_item_flags(flags: u32) -> Self {
        if flags & 0b001 != 0 {
            Self::Progression
        } else if flags & 0b010 != 0 {
            Self::Useful
        } else if flags & 0b100 != 0 {
            Self::Trap
        } else {
            Self::Filler
        }
    }

    fn filter_bit(self) -> Option<ItemFilter> {
        match self {
            Self::Trap => Some(ItemFilter::TRAP),
            Self::Filler => Some(ItemFilter::FILLER),
            Self::Useful => Some(ItemFilter::USEFUL),
            Self::Progression => Some(ItemFilter::PROGRESSION),
            Self::Mcguffin => Some(ItemFilter::MCGUFFIN),
            Self::Unknown | Self::BadName => None,
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Classification {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| CoreError::UnknownClassification(s.to_owned()))
    }
}

// ─── Item Filter ──────────────────────────────────────────────────

/// Bitset over the filterable classifications.
///
/// `UNSET` is a sentinel meaning "inherit the player default"; it is never
/// combined with other bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemFilter(u8);

impl ItemFilter {
    pub const NONE: Self = Self(0);
    pub const TRAP: Self = Self(1 << 0);
    pub const FILLER: Self = Self(1 << 1);
    pub const USEFUL: Self = Self(1 << 2);
    pub const PROGRESSION: Self = Self(1 << 3);
    pub const MCGUFFIN: Self = Self(1 << 4);
    pub const EVERYTHING: Self = Self(0b1_1111);
    pub const UNSET: Self = Self(1 << 7);

    const NAMED: [(Self, &'static str); 5] = [
        (Self::TRAP, "trap"),
        (Self::FILLER, "filler"),
        (Self::USEFUL, "useful"),
        (Self::PROGRESSION, "progression"),
        (Self::MCGUFFIN, "mcguffin"),
    ];

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_unset(self) -> bool {
        self == Self::UNSET
    }

    pub fn contains(self, other: Self) -> bool {
        !self.is_unset() && self.0 & other.0 == other.0
    }

    /// Replace `UNSET` with `fallback`.
    #[must_use]
    pub fn or_inherit(self, fallback: Self) -> Self {
        if self.is_unset() { fallback } else { self }
    }

    /// Whether an item of `classification` passes this filter.
    ///
    /// `NONE` passes nothing; `UNSET` and `EVERYTHING` pass everything;
    /// any other mask passes its set bits plus unclassified items.
    pub fn admits(self, classification: Classification) -> bool {
        if self == Self::NONE {
            return false;
        }
        if self.is_unset() || self == Self::EVERYTHING {
            return true;
        }
        match classification.filter_bit() {
            Some(bit) => self.contains(bit),
            None => true,
        }
    }
}

impl Default for ItemFilter {
    fn default() -> Self {
        Self::UNSET
    }
}

impl BitOr for ItemFilter {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        match (self.is_unset(), rhs.is_unset()) {
            (true, true) => Self::UNSET,
            (true, false) => rhs,
            (false, true) => self,
            (false, false) => Self(self.0 | rhs.0),
        }
    }
}

impl fmt::Debug for ItemFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemFilter({self})")
    }
}

impl fmt::Display for ItemFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::UNSET => f.write_str("unset"),
            Self::NONE => f.write_str("none"),
            Self::EVERYTHING => f.write_str("everything"),
            _ => {
                let names: Vec<&str> = Self::NAMED
                    .iter()
                    .filter(|(bit, _)| self.contains(*bit))
                    .map(|(_, name)| *name)
                    .collect();
                f.write_str(&names.join("|"))
            }
        }
    }
}

impl FromStr for ItemFilter {
    type Err = CoreError;

    /// Parse `unset`, `none`, `everything`, or a `|`-separated list of
    /// classification names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "unset" => return Ok(Self::UNSET),
            "none" => return Ok(Self::NONE),
            "everything" | "all" => return Ok(Self::EVERYTHING),
            _ => {}
        }
        s.split('|').try_fold(Self::NONE, |acc, part| {
            let part = part.trim();
            Self::NAMED
                .iter()
                .find(|(_, name)| *name == part)
                .map(|(bit, _)| acc | *bit)
                .ok_or_else(|| CoreError::UnknownFilter(part.to_owned()))
        })
    }
}

// ─── Hint Filter ──────────────────────────────────────────────────

/// Which side of a hint a slot wants to hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HintDirection {
    /// The slot holds the location where someone else's item sits.
    Finder,
    /// The slot is waiting on the hinted item.
    Receiver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HintFilter(u8);

impl HintFilter {
    pub const NONE: Self = Self(0);
    pub const FINDER: Self = Self(1 << 0);
    pub const RECEIVER: Self = Self(1 << 1);
    pub const BOTH: Self = Self(0b11);
    pub const UNSET: Self = Self(1 << 7);

    pub fn is_unset(self) -> bool {
        self == Self::UNSET
    }

    #[must_use]
    pub fn or_inherit(self, fallback: Self) -> Self {
        if self.is_unset() { fallback } else { self }
    }

    /// `UNSET` behaves as `BOTH`.
    pub fn allows(self, direction: HintDirection) -> bool {
        if self.is_unset() {
            return true;
        }
        let bit = match direction {
            HintDirection::Finder => Self::FINDER,
            HintDirection::Receiver => Self::RECEIVER,
        };
        self.0 & bit.0 != 0
    }
}

impl Default for HintFilter {
    fn default() -> Self {
        Self::UNSET
    }
}

// ─── Slot Status ──────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Incomplete,
    AllChecks,
    Goal,
    Done,
    Released,
    #[default]
    #[serde(other)]
    Unknown,
}

impl CompletionStatus {
    /// `goal`, `done` and `released` end a slot's game.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Goal | Self::Done | Self::Released)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressionStatus {
    Bk,
    Go,
    SoftBk,
    Unblocked,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ProgressionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Bk => "bk",
            Self::Go => "go",
            Self::SoftBk => "soft_bk",
            Self::Unblocked => "unblocked",
        }
    }
}

impl fmt::Display for ProgressionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProgressionStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unknown" => Ok(Self::Unknown),
            "bk" | "blocked" => Ok(Self::Bk),
            "go" => Ok(Self::Go),
            "soft_bk" => Ok(Self::SoftBk),
            "unblocked" => Ok(Self::Unblocked),
            _ => Err(CoreError::UnknownStatus(s.to_owned())),
        }
    }
}

/// Connection state of a slot as reported by the host.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerStatus {
    Disconnected,
    Connected,
    Ready,
    Playing,
    GoalCompleted,
    #[default]
    #[serde(other)]
    Unknown,
}

impl TrackerStatus {
    /// Map the host's numeric client status.
    pub fn from_client_status(code: i64) -> Self {
        match code {
            5 => Self::Connected,
            10 => Self::Ready,
            20 => Self::Playing,
            30 => Self::GoalCompleted,
            _ => Self::Unknown,
        }
    }
}

// ─── Hints ────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintClassification {
    Critical,
    Progression,
    Qol,
    Trash,
    Unknown,
    #[default]
    #[serde(other)]
    Unset,
}

/// Derived per refresh, never read back as input.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintUpdate {
    #[default]
    None,
    New,
    Found,
    Classified,
    Useless,
}

// ─── Agents ───────────────────────────────────────────────────────

/// The three external sources a session can be served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Aggregator,
    Native,
    Html,
}

impl AgentKind {
    /// Fixed priority order, highest first.
    pub const PRIORITY: [Self; 3] = [Self::Aggregator, Self::Native, Self::Html];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aggregator => "aggregator",
            Self::Native => "native",
            Self::Html => "html",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Items ────────────────────────────────────────────────────────

/// One received item delta, as queued for notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkItem {
    pub name: String,
    pub game: String,
    pub quantity: u32,
    /// Host order index of the row this item came from.
    pub order: i64,
    pub classification: Classification,
}

// ─── Tests ────────────────────────────────────────────────────────
