//! TLS-ALPN-01 challenge management
//!
//! While an order is pending, the CA connects to the gateway with ALPN
//! `acme-tls/1` and SNI set to the host being validated. It expects a
//! self-signed certificate for that host carrying the `acmeIdentifier`
//! extension (SHA-256 of the key authorization).

use std::sync::Arc;

use dashmap::DashMap;
use rcgen::{CertificateParams, CustomExtension, KeyPair};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::sign::CertifiedKey;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use super::error::AcmeError;
use crate::tls::{self, ACME_TLS_ALPN_NAME};

/// Pending TLS-ALPN-01 challenges, keyed by host
///
/// Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct ChallengeManager {
    challenges: Arc<DashMap<String, Arc<CertifiedKey>>>,
}

impl ChallengeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the validation certificate for `host`
    pub fn add_challenge(&self, host: &str, key_authorization: &str) -> Result<(), AcmeError> {
        let key = challenge_certificate(host, key_authorization)?;
        debug!(host = %host, "Registering ACME TLS-ALPN-01 challenge");
        self.challenges.insert(host.to_lowercase(), Arc::new(key));
        Ok(())
    }

    /// Remove a completed or abandoned challenge
    pub fn remove_challenge(&self, host: &str) {
        if self.challenges.remove(&host.to_lowercase()).is_some() {
            debug!(host = %host, "Removed ACME challenge");
        }
    }

    /// Validation certificate for `host`, if a challenge is pending
    pub fn get_response(&self, host: &str) -> Option<Arc<CertifiedKey>> {
        let result = self
            .challenges
            .get(&host.to_lowercase())
            .map(|v| Arc::clone(v.value()));
        trace!(host = %host, found = result.is_some(), "ACME challenge lookup");
        result
    }

    /// Whether a ClientHello's ALPN list marks a validation handshake
    pub fn is_challenge_alpn<'a>(mut alpn: impl Iterator<Item = &'a [u8]>) -> bool {
        alpn.any(|protocol| protocol == ACME_TLS_ALPN_NAME)
    }

    pub fn pending_count(&self) -> usize {
        self.challenges.len()
    }

    pub fn clear(&self) {
        let count = self.challenges.len();
        self.challenges.clear();
        if count > 0 {
            debug!(cleared = count, "Cleared all pending ACME challenges");
        }
    }
}

fn challenge_certificate(host: &str, key_authorization: &str) -> Result<CertifiedKey, AcmeError> {
    let digest = Sha256::digest(key_authorization.as_bytes());

    let mut params = CertificateParams::new(vec![host.to_string()])?;
    params.custom_extensions = vec![CustomExtension::new_acme_identifier(&digest)];

    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;

    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    Ok(tls::certified_key(vec![cert.der().clone()], &key)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use x509_parser::oid_registry::Oid;

    #[test]
    fn test_add_and_get_challenge() {
        let manager = ChallengeManager::new();
        manager.add_challenge("certomat.example.org", "token.thumbprint").unwrap();

        assert!(manager.get_response("certomat.example.org").is_some());
        assert!(manager.get_response("CERTOMAT.example.org").is_some());
        assert!(manager.get_response("other.example.org").is_none());
    }

    #[test]
    fn test_remove_challenge() {
        let manager = ChallengeManager::new();
        manager.add_challenge("certomat.example.org", "auth").unwrap();
        assert_eq!(manager.pending_count(), 1);

        manager.remove_challenge("certomat.example.org");
        assert_eq!(manager.pending_count(), 0);
        assert!(manager.get_response("certomat.example.org").is_none());
    }

    #[test]
    fn test_certificate_carries_identifier() {
        let manager = ChallengeManager::new();
        manager.add_challenge("certomat.example.org", "token.thumbprint").unwrap();

        let key = manager.get_response("certomat.example.org").unwrap();
        let (_, cert) = x509_parser::parse_x509_certificate(key.cert[0].as_ref()).unwrap();

        let acme_identifier = Oid::from(&[1, 3, 6, 1, 5, 5, 7, 1, 31]).unwrap();
        let extension = cert
            .extensions()
            .iter()
            .find(|ext| ext.oid == acme_identifier)
            .expect("acmeIdentifier extension");
        assert!(extension.critical);

        let digest = Sha256::digest(b"token.thumbprint");
        assert!(extension.value.ends_with(digest.as_slice()));
    }

    #[test]
    fn test_challenge_alpn() {
        let offered: Vec<&[u8]> = vec![b"h2", b"acme-tls/1"];
        assert!(ChallengeManager::is_challenge_alpn(offered.into_iter()));

        let offered: Vec<&[u8]> = vec![b"h2", b"http/1.1"];
        assert!(!ChallengeManager::is_challenge_alpn(offered.into_iter()));
    }

    #[test]
    fn test_clone_shares_state() {
        let manager1 = ChallengeManager::new();
        let manager2 = manager1.clone();

        manager1.add_challenge("certomat.example.org", "auth").unwrap();
        assert!(manager2.get_response("certomat.example.org").is_some());

        manager2.clear();
        assert_eq!(manager1.pending_count(), 0);
    }
}
