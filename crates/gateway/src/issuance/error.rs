//! Issuance error types.

use std::path::PathBuf;
use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

use crate::policy::PolicyError;

/// Per-request issuance failures
///
/// Each variant maps to the HTTP status the front controller answers with;
/// the `Display` text is sent to the caller unredacted.
#[derive(Debug, Error)]
pub enum IssuanceError {
    #[error("post only")]
    MethodNotAllowed,

    #[error("cannot read request body: {0}")]
    BodyRead(String),

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("cannot stage CSR: {0}")]
    Staging(#[source] std::io::Error),

    #[error("cannot start issuance agent: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("agent result code: {detail}")]
    Failed { detail: String },

    #[error("issuance agent timed out after {0:?}")]
    Timeout(Duration),

    #[error("issuance task failed: {0}")]
    Task(#[source] tokio::task::JoinError),

    #[error("cannot read cert {path:?}: {source}")]
    ResultRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IssuanceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            IssuanceError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            IssuanceError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            IssuanceError::Policy(_) => StatusCode::FORBIDDEN,
            IssuanceError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            IssuanceError::BodyRead(_)
            | IssuanceError::Staging(_)
            | IssuanceError::Spawn(_)
            | IssuanceError::Failed { .. }
            | IssuanceError::Task(_)
            | IssuanceError::ResultRead { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            IssuanceError::MethodNotAllowed.status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            IssuanceError::Failed {
                detail: "exit status: 1".to_string()
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            IssuanceError::Policy(PolicyError::PolicyDenied("evil.com".to_string())).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            IssuanceError::Timeout(Duration::from_secs(1)).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_failure_text_carries_detail() {
        let err = IssuanceError::Failed {
            detail: "exit status: 1: challenge failed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "agent result code: exit status: 1: challenge failed"
        );
    }
}
