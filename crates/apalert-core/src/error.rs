//! Error types for the core model.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("unknown classification: {0}")]
    UnknownClassification(String),

    #[error("unknown filter component: {0}")]
    UnknownFilter(String),

    #[error("unknown status: {0}")]
    UnknownStatus(String),
}
