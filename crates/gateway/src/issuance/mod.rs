//! CSR issuance
//!
//! Turns a submitted CSR into a signed certificate by handing it to the
//! external issuance agent:
//!
//! 1. Optionally check the requested names against the domain policy
//! 2. Stage the CSR in a private temporary file
//! 3. Take the [`SerializationToken`]
//! 4. Run the agent's `certonly` command and wait for it (bounded)
//! 5. Return the agent's `0000_cert.pem`
//!
//! The staged CSR and every result file are removed on all exit paths.

mod agent;
mod artifact;
mod csr;
mod error;
mod token;

pub use agent::IssuanceAgent;
pub use artifact::{ResultArtifacts, TemporaryCsrArtifact, RESULT_CERT_FILE};
pub use csr::{common_name, inspect, CsrSubject, IssuanceRequest};
pub use error::IssuanceError;
pub use token::{SerializationToken, TokenGuard};

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::policy::{DomainPolicy, PolicyError};

/// Media type of issued certificates
pub const CERTIFICATE_CONTENT_TYPE: &str = "text/plain";

/// A certificate returned by the agent
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    /// PEM text as written by the agent
    pub pem: Bytes,
    pub host: Option<String>,
}

impl IssuedCertificate {
    pub fn content_type(&self) -> &'static str {
        CERTIFICATE_CONTENT_TYPE
    }
}

/// Drives one agent run per CSR, one run at a time
#[derive(Debug, Clone)]
pub struct CsrOrchestrator {
    agent: Arc<IssuanceAgent>,
    token: SerializationToken,
    policy: Option<DomainPolicy>,
    staging_dir: Option<PathBuf>,
}

impl CsrOrchestrator {
    pub fn new(agent: IssuanceAgent, token: SerializationToken) -> Self {
        Self {
            agent: Arc::new(agent),
            token,
            policy: None,
            staging_dir: None,
        }
    }

    /// Reject CSRs asking for names outside the whitelist
    pub fn with_policy(mut self, policy: DomainPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Stage CSRs in `dir` instead of the system temp dir
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    pub fn agent(&self) -> &IssuanceAgent {
        &self.agent
    }

    pub fn token(&self) -> &SerializationToken {
        &self.token
    }

    fn authorize(&self, request: &IssuanceRequest) -> Result<(), PolicyError> {
        let Some(policy) = &self.policy else {
            return Ok(());
        };

        let mut names = request.names().peekable();
        if names.peek().is_none() {
            return Err(PolicyError::NoHost);
        }
        names.try_for_each(|name| policy.authorize(name))
    }

    /// Issue a certificate for one CSR
    ///
    /// Once the token is held the agent run continues in its own task, so a
    /// caller that goes away does not interrupt the agent mid-exchange. The
    /// run stays bounded by the agent timeout.
    pub async fn issue(&self, request: IssuanceRequest) -> Result<IssuedCertificate, IssuanceError> {
        if let Err(e) = self.authorize(&request) {
            warn!(host = ?request.host, error = %e, "CSR rejected by policy");
            return Err(e.into());
        }

        let staging_dir = self.staging_dir.clone();
        let csr_bytes = request.csr.clone();
        let csr = tokio::task::spawn_blocking(move || {
            TemporaryCsrArtifact::stage(&csr_bytes, staging_dir.as_deref())
        })
        .await
        .map_err(IssuanceError::Task)?
        .map_err(IssuanceError::Staging)?;

        let token = self.token.acquire("csr-issuance").await;

        info!(host = ?request.host, csr_bytes = request.csr.len(), "Issuing certificate from CSR");
        let agent = Arc::clone(&self.agent);
        let host = request.host.clone();
        let run = tokio::spawn(async move {
            let _token = token;
            let results = ResultArtifacts::claim(agent.state_dir()).await;
            let outcome = run_agent(&agent, &csr, host.as_deref(), &results).await;
            results.release().await;
            drop(csr);
            outcome
        });

        let pem = run.await.map_err(IssuanceError::Task)??;

        debug!(host = ?request.host, bytes = pem.len(), "Read issued certificate");
        Ok(IssuedCertificate {
            pem: Bytes::from(pem),
            host: request.host,
        })
    }
}

/// One `certonly` run and its result; the caller holds the token
async fn run_agent(
    agent: &IssuanceAgent,
    csr: &TemporaryCsrArtifact,
    host: Option<&str>,
    results: &ResultArtifacts,
) -> Result<Vec<u8>, IssuanceError> {
    agent.certonly(csr.path(), host).await?;

    let cert_path = results.certificate_path();
    tokio::fs::read(&cert_path)
        .await
        .map_err(|source| IssuanceError::ResultRead {
            path: cert_path,
            source,
        })
}
