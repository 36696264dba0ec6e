use apalert_core::SlotPosition;
use apalert_sources::SourceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("bad identifier: {0}")]
    BadIdentifier(String),

    #[error("slot {0} is not known to this session")]
    UnknownSlot(SlotPosition),

    #[error("session {0} is not registered")]
    UnknownSession(crate::session::SessionId),

    #[error(transparent)]
    Source(#[from] SourceError),
}

impl SessionError {
    /// The locator can never resolve; retrying is pointless.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::BadIdentifier(_) | Self::Source(SourceError::BadIdentifier(_)))
    }
}
