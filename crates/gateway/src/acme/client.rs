//! ACME client implementation using instant-acme
//!
//! Obtains single-host certificates for the gateway itself, validating with
//! TLS-ALPN-01 on the gateway's own listener.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, Order, OrderStatus,
};
use rcgen::{CertificateParams, DistinguishedName, KeyPair};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use certomat_config::{LETSENCRYPT_PRODUCTION, LETSENCRYPT_STAGING};

use super::challenge::ChallengeManager;
use super::error::AcmeError;
use super::storage::CertificateCache;

/// Delay between order/authorization polls
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Upper bound on polls per wait
const MAX_POLL_ATTEMPTS: u32 = 30;

/// ACME directory the process talks to, fixed at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcmeDirectory {
    Staging,
    Production,
    /// Any other RFC 8555 directory (e.g. a local Pebble)
    Custom(String),
}

impl AcmeDirectory {
    /// Pick the directory for a configured URL
    pub fn from_url(url: &str) -> Self {
        match url {
            LETSENCRYPT_PRODUCTION => AcmeDirectory::Production,
            LETSENCRYPT_STAGING => AcmeDirectory::Staging,
            other => AcmeDirectory::Custom(other.to_string()),
        }
    }

    pub fn url(&self) -> &str {
        match self {
            AcmeDirectory::Staging => LETSENCRYPT_STAGING,
            AcmeDirectory::Production => LETSENCRYPT_PRODUCTION,
            AcmeDirectory::Custom(url) => url,
        }
    }

    /// Cache namespace; distinct for every directory
    pub fn namespace(&self) -> String {
        match self {
            AcmeDirectory::Staging => "staging".to_string(),
            AcmeDirectory::Production => "production".to_string(),
            AcmeDirectory::Custom(url) => {
                let sanitized: String = url
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
                    .collect();
                format!("custom-{}", sanitized.trim_start_matches('.'))
            }
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, AcmeDirectory::Production)
    }
}

impl fmt::Display for AcmeDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url())
    }
}

/// PEM certificate chain and private key for one host
#[derive(Clone)]
pub struct IssuedIdentity {
    pub cert_pem: String,
    pub key_pem: String,
}

impl fmt::Debug for IssuedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedIdentity")
            .field("cert_pem_len", &self.cert_pem.len())
            .finish_non_exhaustive()
    }
}

/// Something that can issue a certificate for one host
///
/// Callers hold the issuance token for the whole call.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    async fn obtain(
        &self,
        host: &str,
        challenges: &ChallengeManager,
    ) -> Result<IssuedIdentity, AcmeError>;
}

/// instant-acme backed [`CertificateAuthority`]
pub struct AcmeClient {
    directory: AcmeDirectory,
    email: Option<String>,
    cache: Arc<dyn CertificateCache>,
    account: RwLock<Option<Account>>,
}

impl AcmeClient {
    /// The account is created or restored lazily on first use
    pub fn new(
        directory: AcmeDirectory,
        email: Option<String>,
        cache: Arc<dyn CertificateCache>,
    ) -> Self {
        Self {
            directory,
            email,
            cache,
            account: RwLock::new(None),
        }
    }

    pub fn directory(&self) -> &AcmeDirectory {
        &self.directory
    }

    /// Restore the cached account or register a new one
    pub async fn ensure_account(&self) -> Result<(), AcmeError> {
        let mut account_guard = self.account.write().await;
        if account_guard.is_some() {
            return Ok(());
        }

        if let Some(credentials_json) = self.cache.load_credentials_json()? {
            info!(directory = %self.directory, "Restoring ACME account from cache");
            let credentials: AccountCredentials = serde_json::from_str(&credentials_json)
                .map_err(|e| AcmeError::Account(format!("failed to parse credentials: {}", e)))?;

            let account = Account::from_credentials(credentials)
                .await
                .map_err(|e| AcmeError::Account(format!("failed to restore account: {}", e)))?;

            *account_guard = Some(account);
            return Ok(());
        }

        info!(directory = %self.directory, email = ?self.email, "Creating new ACME account");

        let contact: Vec<String> = self
            .email
            .iter()
            .map(|email| format!("mailto:{}", email))
            .collect();
        let contact_refs: Vec<&str> = contact.iter().map(String::as_str).collect();

        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &contact_refs,
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            self.directory.url(),
            None,
        )
        .await
        .map_err(|e| AcmeError::Account(format!("failed to create account: {}", e)))?;

        let credentials_json = serde_json::to_string_pretty(&credentials)
            .map_err(|e| AcmeError::Account(format!("failed to serialize credentials: {}", e)))?;
        self.cache.save_credentials_json(&credentials_json)?;

        info!("ACME account created and credentials saved");
        *account_guard = Some(account);
        Ok(())
    }

    async fn create_order(&self, host: &str) -> Result<Order, AcmeError> {
        let account_guard = self.account.read().await;
        let account = account_guard
            .as_ref()
            .ok_or_else(|| AcmeError::Account("account not initialized".to_string()))?;

        account
            .new_order(&NewOrder {
                identifiers: &[Identifier::Dns(host.to_string())],
            })
            .await
            .map_err(|e| AcmeError::OrderCreation(e.to_string()))
    }

    /// Answer every pending authorization with a TLS-ALPN-01 challenge
    async fn prepare_challenges(
        &self,
        order: &mut Order,
        host: &str,
        challenges: &ChallengeManager,
    ) -> Result<(), AcmeError> {
        let authorizations = order
            .authorizations()
            .await
            .map_err(|e| AcmeError::Authorization(e.to_string()))?;

        for authz in &authorizations {
            match authz.status {
                AuthorizationStatus::Valid => continue,
                AuthorizationStatus::Pending => {}
                ref status => {
                    return Err(AcmeError::Authorization(format!(
                        "authorization for {:?} is {:?}",
                        authz.identifier, status
                    )))
                }
            }

            let challenge = authz
                .challenges
                .iter()
                .find(|c| c.r#type == ChallengeType::TlsAlpn01)
                .ok_or_else(|| {
                    AcmeError::Challenge(format!(
                        "no TLS-ALPN-01 challenge offered for {:?}",
                        authz.identifier
                    ))
                })?;

            let key_authorization = order.key_authorization(challenge);
            challenges.add_challenge(host, key_authorization.as_str())?;

            order
                .set_challenge_ready(&challenge.url)
                .await
                .map_err(|e| AcmeError::Challenge(e.to_string()))?;
            debug!(host = %host, "TLS-ALPN-01 challenge ready");
        }

        Ok(())
    }

    async fn wait_for_ready(&self, order: &mut Order) -> Result<(), AcmeError> {
        for _ in 0..MAX_POLL_ATTEMPTS {
            let state = order
                .refresh()
                .await
                .map_err(|e| AcmeError::Authorization(e.to_string()))?;

            match state.status {
                OrderStatus::Ready | OrderStatus::Valid => return Ok(()),
                OrderStatus::Invalid => {
                    return Err(AcmeError::Authorization(format!(
                        "order became invalid: {:?}",
                        state.error
                    )))
                }
                _ => {
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }

        Err(AcmeError::Timeout("order validation"))
    }

    async fn finalize(&self, order: &mut Order, host: &str) -> Result<IssuedIdentity, AcmeError> {
        let mut params = CertificateParams::new(vec![host.to_string()])?;
        params.distinguished_name = DistinguishedName::new();
        let key_pair = KeyPair::generate()?;
        let csr = params.serialize_request(&key_pair)?;

        order
            .finalize(csr.der())
            .await
            .map_err(|e| AcmeError::Finalization(e.to_string()))?;

        for _ in 0..MAX_POLL_ATTEMPTS {
            match order.certificate().await {
                Ok(Some(cert_pem)) => {
                    return Ok(IssuedIdentity {
                        cert_pem,
                        key_pem: key_pair.serialize_pem(),
                    })
                }
                Ok(None) => {
                    debug!("Certificate not ready yet, waiting...");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(e) => return Err(AcmeError::Finalization(e.to_string())),
            }
        }

        Err(AcmeError::Timeout("certificate download"))
    }
}

#[async_trait]
impl CertificateAuthority for AcmeClient {
    async fn obtain(
        &self,
        host: &str,
        challenges: &ChallengeManager,
    ) -> Result<IssuedIdentity, AcmeError> {
        self.ensure_account().await?;

        info!(host = %host, directory = %self.directory, "Ordering certificate");
        let mut order = self.create_order(host).await?;

        let validated = match self.prepare_challenges(&mut order, host, challenges).await {
            Ok(()) => self.wait_for_ready(&mut order).await,
            Err(e) => Err(e),
        };
        challenges.remove_challenge(host);
        if let Err(e) = validated {
            warn!(host = %host, error = %e, "ACME validation failed");
            return Err(e);
        }

        let identity = self.finalize(&mut order, host).await?;
        info!(host = %host, "Certificate issued");
        Ok(identity)
    }
}

impl fmt::Debug for AcmeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcmeClient")
            .field("directory", &self.directory)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_from_url() {
        assert_eq!(AcmeDirectory::from_url(LETSENCRYPT_STAGING), AcmeDirectory::Staging);
        assert_eq!(AcmeDirectory::from_url(LETSENCRYPT_PRODUCTION), AcmeDirectory::Production);
        assert!(AcmeDirectory::Production.is_production());
        assert!(!AcmeDirectory::Staging.is_production());
    }

    #[test]
    fn test_namespaces() {
        assert_eq!(AcmeDirectory::Staging.namespace(), "staging");
        assert_eq!(AcmeDirectory::Production.namespace(), "production");

        let pebble = AcmeDirectory::from_url("https://localhost:14000/dir");
        assert_eq!(pebble.url(), "https://localhost:14000/dir");
        assert_eq!(pebble.namespace(), "custom-localhost_14000_dir");
    }
}
