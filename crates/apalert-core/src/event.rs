//! Notification events handed to the transport, in delivery order.

use serde::{Deserialize, Serialize};

use crate::hint::TrackedHint;
use crate::types::{HintDirection, HintUpdate, NetworkItem, ProgressionStatus};

/// Why a tracked slot was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// Goal reached and every check done.
    Victory,
    /// No session activity for 30 days.
    Abandoned,
    /// Failure budget exhausted.
    Errors,
    /// The slot's URL can never resolve.
    Unreachable,
}

impl RemovalReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Victory => "victory",
            Self::Abandoned => "abandoned",
            Self::Errors => "errors",
            Self::Unreachable => "unreachable",
        }
    }
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationEvent {
    ItemsReceived {
        items: Vec<NetworkItem>,
    },
    /// The host's item cursor moved backwards; the session was reset.
    Rollback,
    Hint {
        direction: HintDirection,
        update: HintUpdate,
        hint: TrackedHint,
    },
    ProgressionChanged {
        previous: ProgressionStatus,
        current: ProgressionStatus,
    },
    GoalCompleted,
    /// Received items nobody has classified yet.
    ClassificationNeeded {
        game: String,
        items: Vec<String>,
    },
    SlotRemoved {
        reason: RemovalReason,
    },
}

impl NotificationEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ItemsReceived { .. } => "items_received",
            Self::Rollback => "rollback",
            Self::Hint { .. } => "hint",
            Self::ProgressionChanged { .. } => "progression_changed",
            Self::GoalCompleted => "goal_completed",
            Self::ClassificationNeeded { .. } => "classification_needed",
            Self::SlotRemoved { .. } => "slot_removed",
        }
    }
}
