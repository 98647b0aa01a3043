//! Error types for dlrelay core

use thiserror::Error;

/// Errors that can occur in dlrelay core
#[derive(Debug, Error)]
pub enum DlrelayError {
    #[error("Authentication required")]
    AuthRequired,

    #[error("Authentication failed")]
    AuthFailed,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Download engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Gid conflict on {gid}: {reason}")]
    GidConflict { gid: String, reason: String },

    #[error("Unknown gid: {0}")]
    UnknownGid(String),

    #[error("Gid already tracked: {0}")]
    AlreadyTracked(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DlrelayError {
    /// HTTP status the routing layer should answer with
    pub fn http_status(&self) -> u16 {
        match self {
            DlrelayError::AuthRequired => 401,
            DlrelayError::AuthFailed => 403,
            DlrelayError::Validation(_) => 400,
            DlrelayError::InvalidRequest(_) => 422,
            DlrelayError::GidConflict { .. } | DlrelayError::AlreadyTracked(_) => 409,
            DlrelayError::UnknownGid(_) => 404,
            DlrelayError::EngineUnavailable(_) => 503,
            DlrelayError::Database(_) | DlrelayError::Io(_) | DlrelayError::Internal(_) => 500,
        }
    }

    /// Check if the caller may reasonably retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, DlrelayError::EngineUnavailable(_))
    }

    pub(crate) fn conflict(gid: &str, reason: impl Into<String>) -> Self {
        DlrelayError::GidConflict {
            gid: gid.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for DlrelayError {
    fn from(error: reqwest::Error) -> Self {
        DlrelayError::EngineUnavailable(error.to_string())
    }
}
