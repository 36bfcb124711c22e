//! Self-certificate manager
//!
//! Supplies the certificate for every TLS handshake: from memory when
//! possible, then from the persistent cache, and otherwise by running an
//! ACME order for exactly the requested host. Orders run under the shared
//! [`SerializationToken`] so they never overlap with CSR issuance.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rustls::sign::CertifiedKey;
use tracing::{debug, info, warn};

use super::challenge::ChallengeManager;
use super::client::{AcmeDirectory, CertificateAuthority};
use super::error::AcmeError;
use super::storage::{renewal_due, CertificateCache, CertificateMeta, StoredCertificate};
use crate::issuance::SerializationToken;
use crate::policy::DomainPolicy;
use crate::tls;

/// Minimum time between handshake-driven renewal attempts for a host
/// whose previous attempt failed
const RENEWAL_RETRY_BACKOFF: Duration = Duration::from_secs(600);

/// A loaded identity ready for handshakes
#[derive(Clone)]
struct CachedIdentity {
    key: Arc<CertifiedKey>,
    expires: DateTime<Utc>,
    /// Set when this identity is being served after a failed renewal
    renewal_failed_at: Option<Instant>,
}

impl CachedIdentity {
    fn from_stored(stored: &StoredCertificate) -> Result<Self, AcmeError> {
        let key = tls::certified_key_from_pem(&stored.cert_pem, &stored.key_pem)?;
        Ok(Self {
            key: Arc::new(key),
            expires: stored.meta.expires,
            renewal_failed_at: None,
        })
    }

    fn needs_renewal(&self, renew_before: chrono::Duration) -> bool {
        renewal_due(self.expires, renew_before)
    }

    fn is_expired(&self) -> bool {
        self.expires <= Utc::now()
    }

    /// Servable without another renewal attempt
    fn is_usable(&self, renew_before: chrono::Duration) -> bool {
        if self.is_expired() {
            return false;
        }
        let backing_off = self
            .renewal_failed_at
            .is_some_and(|at| at.elapsed() < RENEWAL_RETRY_BACKOFF);
        backing_off || !self.needs_renewal(renew_before)
    }
}

/// How an order under the token ended
enum Issued {
    /// A new certificate from the authority, or one another task just obtained
    Fresh(Arc<CertifiedKey>),
    /// The authority failed; an expiring but valid certificate is served
    Fallback(Arc<CertifiedKey>),
}

impl Issued {
    fn into_key(self) -> Arc<CertifiedKey> {
        match self {
            Issued::Fresh(key) | Issued::Fallback(key) => key,
        }
    }
}

/// Strip one trailing dot and lower-case
fn normalize_host(host: &str) -> String {
    host.strip_suffix('.').unwrap_or(host).to_lowercase()
}

/// Owner of the gateway's TLS identities
pub struct SelfCertManager {
    policy: Arc<DomainPolicy>,
    canonical_host: String,
    directory: AcmeDirectory,
    authority: Arc<dyn CertificateAuthority>,
    cache: Arc<dyn CertificateCache>,
    challenges: ChallengeManager,
    token: SerializationToken,
    memory: DashMap<String, CachedIdentity>,
    renew_before: chrono::Duration,
}

impl SelfCertManager {
    pub fn new(
        policy: Arc<DomainPolicy>,
        canonical_host: impl Into<String>,
        directory: AcmeDirectory,
        authority: Arc<dyn CertificateAuthority>,
        cache: Arc<dyn CertificateCache>,
        token: SerializationToken,
    ) -> Self {
        Self {
            policy,
            canonical_host: normalize_host(&canonical_host.into()),
            directory,
            authority,
            cache,
            challenges: ChallengeManager::new(),
            token,
            memory: DashMap::new(),
            renew_before: chrono::Duration::days(30),
        }
    }

    /// Renew certificates this many days before they expire
    pub fn with_renew_before_days(mut self, days: u32) -> Self {
        self.renew_before =
            chrono::Duration::try_days(i64::from(days)).unwrap_or(chrono::Duration::MAX);
        self
    }

    pub fn directory(&self) -> &AcmeDirectory {
        &self.directory
    }

    pub fn challenges(&self) -> &ChallengeManager {
        &self.challenges
    }

    pub fn canonical_host(&self) -> &str {
        &self.canonical_host
    }

    /// Certificate for a handshake's SNI host
    ///
    /// Without SNI the canonical hostname is used. Unauthorized hosts fail,
    /// which fails the handshake.
    pub async fn get_certificate(&self, sni: Option<&str>) -> Result<Arc<CertifiedKey>, AcmeError> {
        let host = sni.map_or_else(|| self.canonical_host.clone(), normalize_host);
        self.policy.authorize(&host)?;

        if let Some(key) = self.lookup(&host)? {
            return Ok(key);
        }

        self.issue(&host, false).await.map(Issued::into_key)
    }

    /// Fresh identity from memory or the persistent cache
    fn lookup(&self, host: &str) -> Result<Option<Arc<CertifiedKey>>, AcmeError> {
        if let Some(identity) = self.memory.get(host) {
            if identity.is_usable(self.renew_before) {
                return Ok(Some(Arc::clone(&identity.key)));
            }
        }

        let stored = match self.cache.load_certificate(host) {
            Ok(Some(stored)) => stored,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(host = %host, error = %e, "Cannot read cached certificate");
                return Ok(None);
            }
        };
        if stored.needs_renewal(self.renew_before) {
            debug!(host = %host, expires = %stored.meta.expires, "Cached certificate inside renewal window");
            return Ok(None);
        }

        let identity = match CachedIdentity::from_stored(&stored) {
            Ok(identity) => identity,
            Err(e) => {
                warn!(host = %host, error = %e, "Ignoring unusable cached certificate");
                return Ok(None);
            }
        };
        debug!(host = %host, expires = %identity.expires, "Loaded certificate from cache");
        let key = Arc::clone(&identity.key);
        self.memory.insert(host.to_string(), identity);
        Ok(Some(key))
    }

    /// Best still-valid identity we have, even inside the renewal window
    fn stale(&self, host: &str) -> Option<CachedIdentity> {
        if let Some(identity) = self.memory.get(host) {
            if !identity.is_expired() {
                return Some(identity.clone());
            }
        }

        let stored = self.cache.load_certificate(host).ok().flatten()?;
        if stored.is_expired() {
            return None;
        }
        CachedIdentity::from_stored(&stored).ok()
    }

    /// Run an ACME order for `host` under the issuance token
    ///
    /// Unless `force` is set, the caches are consulted again once the token
    /// is held, since another task may have finished the same order.
    async fn issue(&self, host: &str, force: bool) -> Result<Issued, AcmeError> {
        let _token = self.token.acquire("self-certificate").await;

        if !force {
            if let Some(key) = self.lookup(host)? {
                debug!(host = %host, "Certificate obtained by another task");
                return Ok(Issued::Fresh(key));
            }
        }

        match self.obtain(host).await {
            Ok(key) => Ok(Issued::Fresh(key)),
            Err(e) => match self.stale(host) {
                Some(mut identity) => {
                    identity.renewal_failed_at = Some(Instant::now());
                    warn!(
                        host = %host,
                        error = %e,
                        expires = %identity.expires,
                        "Renewal failed; serving existing certificate"
                    );
                    let key = Arc::clone(&identity.key);
                    self.memory.insert(host.to_string(), identity);
                    Ok(Issued::Fallback(key))
                }
                None => Err(e),
            },
        }
    }

    async fn obtain(&self, host: &str) -> Result<Arc<CertifiedKey>, AcmeError> {
        let issued = self.authority.obtain(host, &self.challenges).await?;

        let stored = StoredCertificate {
            meta: CertificateMeta {
                expires: tls::certificate_expiry(&issued.cert_pem)?,
                issued: Utc::now(),
                domains: vec![host.to_string()],
                directory: Some(self.directory.namespace()),
            },
            cert_pem: issued.cert_pem,
            key_pem: issued.key_pem,
        };
        let identity = CachedIdentity::from_stored(&stored)?;

        if let Err(e) = self.cache.save_certificate(host, &stored) {
            warn!(host = %host, error = %e, "Cannot persist certificate; keeping it in memory");
        }

        info!(host = %host, expires = %identity.expires, "Gateway certificate ready");
        let key = Arc::clone(&identity.key);
        self.memory.insert(host.to_string(), identity);
        Ok(key)
    }

    /// Hosts whose in-memory certificate is inside the renewal window
    pub fn expiring_hosts(&self) -> Vec<String> {
        self.memory
            .iter()
            .filter(|entry| entry.value().needs_renewal(self.renew_before))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Renew every expiring in-memory certificate; returns how many succeeded
    pub async fn renew_expiring(&self) -> usize {
        let hosts = self.expiring_hosts();
        if hosts.is_empty() {
            debug!("No gateway certificates need renewal");
            return 0;
        }

        let mut renewed = 0;
        for host in hosts {
            info!(host = %host, "Renewing gateway certificate");
            match self.issue(&host, true).await {
                Ok(Issued::Fresh(_)) => renewed += 1,
                Ok(Issued::Fallback(_)) => {}
                Err(e) => warn!(host = %host, error = %e, "Gateway certificate renewal failed"),
            }
        }
        renewed
    }

    /// Number of identities held in memory
    pub fn cached_count(&self) -> usize {
        self.memory.len()
    }
}

impl fmt::Debug for SelfCertManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfCertManager")
            .field("canonical_host", &self.canonical_host)
            .field("directory", &self.directory)
            .field("cached", &self.memory.len())
            .field("pending_challenges", &self.challenges.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::client::IssuedIdentity;
    use crate::acme::storage::CertificateStorage;
    use crate::policy::PolicyError;
    use async_trait::async_trait;
    use rcgen::{CertificateParams, KeyPair};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Self-signs whatever it is asked for, counting calls
    #[derive(Default)]
    struct StubAuthority {
        calls: AtomicUsize,
        fail: bool,
        valid_days: i64,
    }

    #[async_trait]
    impl CertificateAuthority for StubAuthority {
        async fn obtain(
            &self,
            host: &str,
            _challenges: &ChallengeManager,
        ) -> Result<IssuedIdentity, AcmeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AcmeError::OrderCreation("stub failure".to_string()));
            }
            Ok(self_signed(host, self.valid_days))
        }
    }

    fn self_signed(host: &str, valid_days: i64) -> IssuedIdentity {
        use chrono::Datelike;

        let expires = (Utc::now() + chrono::Duration::days(valid_days)).date_naive();
        let mut params = CertificateParams::new(vec![host.to_string()]).unwrap();
        params.not_after =
            rcgen::date_time_ymd(expires.year(), expires.month() as u8, expires.day() as u8);
        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        IssuedIdentity {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        }
    }

    fn manager(authority: Arc<StubAuthority>, dir: &TempDir) -> SelfCertManager {
        let cache = Arc::new(CertificateStorage::new(dir.path(), "staging").unwrap());
        SelfCertManager::new(
            Arc::new(DomainPolicy::new(["example.org"]).unwrap()),
            "certomat.example.org",
            AcmeDirectory::Staging,
            authority,
            cache,
            SerializationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_first_handshake_issues_then_memory_hit() {
        let dir = TempDir::new().unwrap();
        let authority = Arc::new(StubAuthority { valid_days: 90, ..Default::default() });
        let manager = manager(Arc::clone(&authority), &dir);

        manager.get_certificate(Some("certomat.example.org")).await.unwrap();
        manager.get_certificate(Some("CERTOMAT.example.org.")).await.unwrap();
        manager.get_certificate(None).await.unwrap();

        assert_eq!(authority.calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.cached_count(), 1);
    }

    #[tokio::test]
    async fn test_persistent_cache_survives_restart() {
        let dir = TempDir::new().unwrap();
        let first = Arc::new(StubAuthority { valid_days: 90, ..Default::default() });
        manager(Arc::clone(&first), &dir)
            .get_certificate(Some("certomat.example.org"))
            .await
            .unwrap();

        let second = Arc::new(StubAuthority { valid_days: 90, ..Default::default() });
        manager(Arc::clone(&second), &dir)
            .get_certificate(Some("certomat.example.org"))
            .await
            .unwrap();

        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unauthorized_sni_rejected() {
        let dir = TempDir::new().unwrap();
        let authority = Arc::new(StubAuthority { valid_days: 90, ..Default::default() });
        let manager = manager(Arc::clone(&authority), &dir);

        let err = manager.get_certificate(Some("evil.com")).await.unwrap_err();
        assert!(matches!(err, AcmeError::Policy(PolicyError::PolicyDenied(_))));
        assert_eq!(authority.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expiring_certificate_served_when_renewal_fails() {
        let dir = TempDir::new().unwrap();
        let good = Arc::new(StubAuthority { valid_days: 10, ..Default::default() });
        manager(good, &dir)
            .get_certificate(Some("certomat.example.org"))
            .await
            .unwrap();

        let failing = Arc::new(StubAuthority { fail: true, ..Default::default() });
        let manager = manager(Arc::clone(&failing), &dir);
        manager.get_certificate(Some("certomat.example.org")).await.unwrap();
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);

        // Backing off: the next handshake does not retry immediately
        manager.get_certificate(Some("certomat.example.org")).await.unwrap();
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_without_fallback() {
        let dir = TempDir::new().unwrap();
        let failing = Arc::new(StubAuthority { fail: true, ..Default::default() });
        let manager = manager(failing, &dir);

        assert!(manager.get_certificate(Some("certomat.example.org")).await.is_err());
        assert_eq!(manager.cached_count(), 0);
    }

    #[tokio::test]
    async fn test_renew_expiring() {
        let dir = TempDir::new().unwrap();
        let authority = Arc::new(StubAuthority { valid_days: 10, ..Default::default() });
        let manager = manager(Arc::clone(&authority), &dir);

        manager.get_certificate(Some("certomat.example.org")).await.unwrap();
        assert_eq!(manager.expiring_hosts(), vec!["certomat.example.org"]);

        assert_eq!(manager.renew_expiring().await, 1);
        assert_eq!(authority.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_renewal_not_counted() {
        let dir = TempDir::new().unwrap();
        let good = Arc::new(StubAuthority { valid_days: 10, ..Default::default() });
        manager(good, &dir)
            .get_certificate(Some("certomat.example.org"))
            .await
            .unwrap();

        let failing = Arc::new(StubAuthority { fail: true, ..Default::default() });
        let manager = manager(Arc::clone(&failing), &dir);
        manager.get_certificate(Some("certomat.example.org")).await.unwrap();

        assert_eq!(manager.renew_expiring().await, 0);
        assert_eq!(failing.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_huge_renewal_window_does_not_panic() {
        let dir = TempDir::new().unwrap();
        let authority = Arc::new(StubAuthority { valid_days: 90, ..Default::default() });
        let manager = manager(Arc::clone(&authority), &dir).with_renew_before_days(u32::MAX);

        manager.get_certificate(Some("certomat.example.org")).await.unwrap();
        assert_eq!(manager.expiring_hosts(), vec!["certomat.example.org"]);
    }
}
