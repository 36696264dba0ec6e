//! apalert-session: in-process aggregation of the source agents.
//!
//! A [`MultiworldSession`] decides which agent may serve a refresh and merges
//! what comes back; the [`SessionRegistry`] keeps exactly one session per
//! real game instance no matter how many URLs point at it.

pub mod error;
pub mod registry;
pub mod session;

pub use error::SessionError;
pub use registry::SessionRegistry;
pub use session::{
    AgentStates, MultiworldSession, RefreshReport, SessionAlias, SessionId, SlotRefresh, SourceSet,
};
