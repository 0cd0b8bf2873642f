//! Error taxonomy shared by the gateway, credential manager and schedulers.
//!
//! Local store integrity failures never reach callers (see [`crate::storage`]),
//! and per-repository failures are recorded on the repository they belong to.
//! What remains here is what a caller can act on.

use thiserror::Error;

pub type Result<T, E = MonitorError> = std::result::Result<T, E>;

/// Errors surfaced by the GitHub gateway and the components built on it.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Transport-level failure: DNS, connection reset, timeout.
    #[error("network error: {0}")]
    Network(String),

    /// The API answered with a non-success status.
    #[error("{message}")]
    Api { status: u16, message: String },

    /// A token was rejected before it could be stored.
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// A success response whose body did not match the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// An operation needed a valid credential and none was available.
    #[error("no valid credential available")]
    MissingCredential,
}

impl MonitorError {
    /// HTTP status of an API error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            MonitorError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 401 and 403 mean the token can no longer be trusted.
    pub fn is_credential_invalidating(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }
}

impl From<reqwest::Error> for MonitorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            MonitorError::InvalidResponse(e.to_string())
        } else {
            MonitorError::Network(e.to_string())
        }
    }
}
