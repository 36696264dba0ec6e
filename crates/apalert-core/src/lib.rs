//! apalert-core: classification model, session snapshots, and the durable
//! per-slot cursor state that turns repeated polls into incremental deltas.
//!
//! Everything here is synchronous and I/O free; the sources, session and
//! runtime crates supply the network and storage around it.

pub mod agent_state;
pub mod error;
pub mod event;
pub mod hint;
pub mod knowledge;
pub mod slot;
pub mod snapshot;
pub mod types;

pub use agent_state::{Admission, AgentState};
pub use error::CoreError;
pub use event::{NotificationEvent, RemovalReason};
pub use hint::TrackedHint;
pub use knowledge::{ClassificationBook, Classifier, GameRules, KnowledgeBase};
pub use slot::{DiffContext, DiffOutcome, ItemDiff, ItemRow, TrackedSlot};
pub use snapshot::{Hint, SessionSnapshot, SlotMeta, SlotPosition};
pub use types::{
    AgentKind, Classification, CompletionStatus, HintClassification, HintDirection, HintFilter,
    HintUpdate, ItemFilter, NetworkItem, ProgressionStatus, TrackerStatus,
};
