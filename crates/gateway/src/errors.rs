//! Startup errors
//!
//! Everything that prevents the gateway from serving at all. Per-request
//! failures live in [`crate::issuance::IssuanceError`] and never stop the
//! process.

use thiserror::Error;

use crate::acme::StorageError;
use crate::issuance::IssuanceError;
use crate::policy::PolicyError;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("cannot find issuance agent '{0}' (is it installed and on PATH?)")]
    AgentMissing(String),

    #[error("issuance agent registration failed: {0}")]
    Registration(#[source] IssuanceError),

    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("certificate cache: {0}")]
    Cache(#[from] StorageError),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] rustls::Error),
}
