use apalert_core::AgentKind;
use thiserror::Error;

/// Failures talking to one external source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The source can never serve this session (400/403/404 or a
    /// "Page Not Found" page).
    #[error("source disabled (HTTP {status})")]
    Disabled { status: u16 },

    #[error("request timed out: {url}")]
    Timeout { url: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    /// Missing table or field; treated as "no data this cycle".
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The URL structurally cannot resolve to a session.
    #[error("bad identifier: {0}")]
    BadIdentifier(String),

    #[error("operation not supported by the {0} agent")]
    Unsupported(AgentKind),
}

impl SourceError {
    /// Whether the agent should be disabled for the session for good.
    pub fn is_disabling(&self) -> bool {
        matches!(self, Self::Disabled { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Errors that count against a slot's explicit failure budget.
    pub fn is_explicit(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Transport(_) | Self::Status { .. }
        )
    }

    pub(crate) fn from_status(status: u16, url: &str) -> Self {
        match status {
            400 | 403 | 404 => Self::Disabled { status },
            _ => Self::Status {
                status,
                url: url.to_owned(),
            },
        }
    }

    pub(crate) fn from_reqwest(err: &reqwest::Error, url: &str) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_owned(),
            }
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}
