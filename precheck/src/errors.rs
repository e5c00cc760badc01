//! Error types for the precheck engine

use thiserror::Error;

/// Failure code reported by the server when an update could not be applied
pub const PATCH_APPLY_FAILED: &str = "PATCH_APPLY_FAILED";

/// Typed failure returned by the remote pool service.
///
/// `description[0]` is the failure code, the remaining entries are its
/// parameters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", .description.join(" "))]
pub struct RemoteFailure {
    pub description: Vec<String>,
}

impl RemoteFailure {
    pub fn new(description: Vec<String>) -> Self {
        Self { description }
    }

    pub fn code(&self) -> &str {
        self.description.first().map(String::as_str).unwrap_or_default()
    }

    /// Host specific diagnostic output of a failed apply, if any
    pub fn apply_failure_detail(&self) -> Option<&str> {
        if self.description.len() > 1 && self.code() == PATCH_APPLY_FAILED {
            Some(self.description[1].as_str())
        } else {
            None
        }
    }
}

/// Main error type for the precheck engine
#[derive(Error, Debug)]
pub enum PrecheckError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Remote failure: {0}")]
    Remote(#[from] RemoteFailure),

    #[error("Session error: {0}")]
    SessionError(String),

    #[error("Check '{check}' failed on {host}: {reason}")]
    CheckFailed {
        check: String,
        host: String,
        reason: String,
    },

    #[error("Run state error: {0}")]
    RunStateError(String),

    #[error("Task error: {0}")]
    TaskError(String),

    #[error("Remediation error: {0}")]
    RemediationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Prechecks found {0} blocking problem(s)")]
    ProblemsFound(usize),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for PrecheckError {
    fn from(err: tokio::task::JoinError) -> Self {
        PrecheckError::Internal(err.to_string())
    }
}

impl PrecheckError {
    /// The remote failure behind this error, if any
    pub fn as_remote(&self) -> Option<&RemoteFailure> {
        match self {
            PrecheckError::Remote(failure) => Some(failure),
            _ => None,
        }
    }
}
