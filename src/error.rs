//! Errors reported by the session engine
//!
//! Every variant except [`Error::PersistenceFailure`] describes an expected,
//! recoverable condition caused by the client. They are reported to the
//! originating connection only and never change session state.

use serde::Serialize;
use thiserror::Error;

/// Errors returned by session operations
#[derive(Error, Serialize, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The actor does not hold the role required for the intent
    #[error("not authorized for this action")]
    Unauthorized,
    /// The intent is not valid in the session's current status
    #[error("action not valid in the current session state")]
    InvalidState,
    /// The quiz or question index is unknown
    #[error("quiz or question not found")]
    NotFound,
    /// The answer targets a question that is not the current one
    #[error("question is no longer or not yet active")]
    StaleQuestion,
    /// The participant already answered this question
    #[error("question already answered")]
    DuplicateSubmission,
    /// The session has reached the maximum number of participants
    #[error("maximum number of participants reached")]
    SessionFull,
    /// The intent payload failed validation
    #[error("malformed request: {0}")]
    Malformed(String),
    /// A read or write against the authoritative store failed
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

impl From<garde::Report> for Error {
    fn from(report: garde::Report) -> Self {
        Self::Malformed(report.to_string())
    }
}
