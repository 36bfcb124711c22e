//! ACME error types.

use thiserror::Error;

use crate::policy::PolicyError;
use crate::tls::TlsError;

/// Certificate cache failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid metadata: {0}")]
    Json(#[from] serde_json::Error),

    #[error("refusing to store certificate for host {0:?}")]
    InvalidHost(String),
}

/// Failures while supplying the gateway's own certificate
#[derive(Debug, Error)]
pub enum AcmeError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("ACME account error: {0}")]
    Account(String),

    #[error("order creation failed: {0}")]
    OrderCreation(String),

    #[error("challenge error: {0}")]
    Challenge(String),

    #[error("authorization failed: {0}")]
    Authorization(String),

    #[error("order finalization failed: {0}")]
    Finalization(String),

    #[error("certificate generation error: {0}")]
    CertGeneration(String),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("certificate cache: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Tls(#[from] TlsError),
}

impl From<rcgen::Error> for AcmeError {
    fn from(e: rcgen::Error) -> Self {
        AcmeError::CertGeneration(e.to_string())
    }
}
