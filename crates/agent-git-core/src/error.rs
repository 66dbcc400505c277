//! Error taxonomy for agent attribution.
//!
//! Validation errors are caller mistakes and come back before anything is
//! touched. Resource errors come from the key store. Coordination errors
//! carry a [`RepoState`] so the caller knows whether to retry from staging
//! or from scratch.

use std::fmt;

use agent_keyring::KeyStoreError;
use serde::Serialize;

/// What a failed commit left behind in the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoState {
    /// Nothing was changed; retry the whole call.
    Unchanged,
    /// Paths were staged but no commit was recorded; retry from staging.
    StagedNotCommitted,
}

impl fmt::Display for RepoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoState::Unchanged => f.write_str("repository unchanged"),
            RepoState::StagedNotCommitted => f.write_str("staged but not committed"),
        }
    }
}

/// Errors from the pure identity and message formatting rules.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("unrecognized author format: {0}")]
    UnrecognizedFormat(String),
}

/// Errors from the version-control engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("`{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("revision not found: {0}")]
    RevisionNotFound(String),

    #[error("malformed commit object: {0}")]
    MalformedObject(String),

    #[error("HEAD moved: expected {expected}, found {actual}")]
    HeadMoved { expected: String, actual: String },

    #[error("engine failure: {0}")]
    Failed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Failures of one attributed commit.
#[derive(Debug, thiserror::Error)]
pub enum AttributionError {
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("missing identity: no value for {0}")]
    MissingIdentity(String),

    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("staging failed ({state}): {reason}")]
    StagingFailed { state: RepoState, reason: String },

    #[error("signing failed ({state}): {reason}")]
    SigningFailed { state: RepoState, reason: String },

    #[error("commit failed ({state}): {reason}")]
    CommitFailed { state: RepoState, reason: String },

    #[error("key store error: {0}")]
    KeyStore(#[from] KeyStoreError),
}

impl AttributionError {
    /// Repository state after this failure.
    pub fn repo_state(&self) -> RepoState {
        match self {
            AttributionError::StagingFailed { state, .. }
            | AttributionError::SigningFailed { state, .. }
            | AttributionError::CommitFailed { state, .. } => *state,
            _ => RepoState::Unchanged,
        }
    }

    /// Caller mistakes that will fail the same way on retry.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AttributionError::InvalidMessage(_)
                | AttributionError::MissingIdentity(_)
                | AttributionError::InvalidIdentity(_)
        )
    }
}

impl From<FormatError> for AttributionError {
    fn from(err: FormatError) -> Self {
        match err {
            FormatError::InvalidMessage(m) => AttributionError::InvalidMessage(m),
            FormatError::InvalidIdentity(m) | FormatError::UnrecognizedFormat(m) => {
                AttributionError::InvalidIdentity(m)
            }
        }
    }
}

/// Result type for attribution operations.
pub type Result<T> = std::result::Result<T, AttributionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordination_errors_report_state() {
        let err = AttributionError::CommitFailed {
            state: RepoState::StagedNotCommitted,
            reason: "HEAD moved".to_string(),
        };
        assert_eq!(err.repo_state(), RepoState::StagedNotCommitted);
        assert!(err.to_string().contains("staged but not committed"));
        assert!(!err.is_validation());
    }

    #[test]
    fn validation_errors_leave_repo_unchanged() {
        let err = AttributionError::from(FormatError::InvalidMessage("empty".to_string()));
        assert!(matches!(err, AttributionError::InvalidMessage(_)));
        assert!(err.is_validation());
        assert_eq!(err.repo_state(), RepoState::Unchanged);
    }

    #[test]
    fn key_store_errors_convert() {
        let err: AttributionError =
            KeyStoreError::KeyStoreUnavailable("disk gone".to_string()).into();
        assert!(err.to_string().contains("disk gone"));
        assert_eq!(err.repo_state(), RepoState::Unchanged);
    }
}
