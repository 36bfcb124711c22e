//! Domain whitelist policy
//!
//! Decides which host names may be issued certificates. The same
//! [`DomainPolicy`] value gates the gateway's own TLS certificates and, when
//! enabled, the names submitted in CSRs.
//!
//! A host is authorized when its *base domain* (every label but the
//! leftmost one) is in the whitelist, so with `example.org` whitelisted,
//! `certomat.example.org` and `HOST.Example.Org.` pass while
//! `a.b.example.org` (base `b.example.org`) does not.

use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;
use tracing::trace;

/// Errors produced by the domain policy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// The host has fewer than two labels
    #[error("host {0} has no dots")]
    MalformedHost(String),

    /// The host's base domain is not whitelisted
    #[error("certomat: domain {0} not allowed")]
    PolicyDenied(String),

    /// There was no host name to check
    #[error("no host name to authorize")]
    NoHost,

    /// Whitelist construction was given no usable domain
    #[error("domain whitelist is empty")]
    EmptyWhitelist,
}

/// Strip one trailing dot and lower-case
fn normalize(host: &str) -> String {
    host.strip_suffix('.').unwrap_or(host).to_lowercase()
}

/// Base domain of an already normalized host
fn base_domain(host: &str) -> Result<&str, PolicyError> {
    match host.split_once('.') {
        Some((_, base)) => Ok(base),
        None => Err(PolicyError::MalformedHost(host.to_string())),
    }
}

/// Immutable set of authorized base domains
#[derive(Clone, PartialEq, Eq)]
pub struct DomainPolicy {
    domains: BTreeSet<String>,
}

impl DomainPolicy {
    /// Build a policy from configured base domains
    ///
    /// Entries are normalized the same way as hosts. Blank entries are
    /// dropped; an empty result is rejected.
    pub fn new<I, S>(domains: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains: BTreeSet<String> = domains
            .into_iter()
            .map(|d| normalize(d.as_ref().trim()))
            .filter(|d| !d.is_empty())
            .collect();

        if domains.is_empty() {
            return Err(PolicyError::EmptyWhitelist);
        }

        Ok(Self { domains })
    }

    /// Authorize a host name
    pub fn authorize(&self, host: &str) -> Result<(), PolicyError> {
        let host = normalize(host);
        let base = base_domain(&host)?;

        if self.domains.contains(base) {
            trace!(host = %host, base = %base, "Host authorized");
            Ok(())
        } else {
            Err(PolicyError::PolicyDenied(base.to_string()))
        }
    }

    /// `true` iff [`authorize`](Self::authorize) succeeds
    pub fn is_authorized(&self, host: &str) -> bool {
        self.authorize(host).is_ok()
    }

    /// The whitelisted base domains
    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.domains.iter().map(String::as_str)
    }
}

impl fmt::Debug for DomainPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.domains.iter()).finish()
    }
}
