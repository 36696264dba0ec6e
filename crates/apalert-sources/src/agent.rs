//! The source-agent capability shared by the three concrete sources.

use std::collections::BTreeMap;

use apalert_core::slot::{ItemRow, TrackedSlot};
use apalert_core::{AgentKind, ProgressionStatus, SessionSnapshot};
use async_trait::async_trait;

use crate::error::SourceError;
use crate::locator::SessionLink;

/// Result of a per-slot fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotFetch {
    /// The host reports nothing past the slot's cursor; no further calls made.
    Unchanged,
    Rows {
        rows: Vec<ItemRow>,
        /// Location checks, when the source exposes them.
        checks: Option<BTreeMap<String, bool>>,
    },
    /// This agent cannot serve per-slot data.
    Unsupported,
    /// The source answered but carried no usable item data.
    NoData,
}

/// One external source of session and slot state.
///
/// Agents hold no per-session state of their own: everything they learn
/// about a session lives in its [`SessionLink`]. Admission (rate limits,
/// disablement) is decided by the caller.
#[async_trait]
pub trait SourceAgent: Send + Sync {
    fn kind(&self) -> AgentKind;

    /// Fetch a session-level snapshot. `Ok(None)` means the link does not
    /// carry enough to address this source yet.
    async fn fetch_session(
        &self,
        link: &mut SessionLink,
    ) -> Result<Option<SessionSnapshot>, SourceError>;

    async fn fetch_slot(
        &self,
        _link: &mut SessionLink,
        _slot: &TrackedSlot,
    ) -> Result<SlotFetch, SourceError> {
        Ok(SlotFetch::Unsupported)
    }

    /// Push a progression status for one slot back to the source.
    async fn set_progression(
        &self,
        _link: &SessionLink,
        _remote_id: i64,
        _status: ProgressionStatus,
    ) -> Result<(), SourceError> {
        Err(SourceError::Unsupported(self.kind()))
    }
}
