//! apalert runtime: configuration, durable state, notification transports
//! and the synchronization driver that ties the session layer together.

pub mod cli;
pub mod config;
pub mod logging;
pub mod player;
pub mod status;
pub mod store;
pub mod tracker;
pub mod transport;

pub use config::{Settings, SyncPolicy};
pub use player::{Player, TrackerState};
pub use store::JsonStore;
pub use tracker::{ClaimOutcome, CycleReport, Tracker};
pub use transport::{LogSink, MemorySink, NotificationSink, OutboxSink, SlotAddress};
