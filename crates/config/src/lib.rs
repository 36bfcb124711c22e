//! Certomat configuration
//!
//! Configuration model for the certomat certificate gateway, with loading
//! from KDL files and validation.
//!
//! Every option has a default except the administrative `domain`, which must
//! come from the command line, the environment or a configuration file.
//!
//! # Example
//!
//! ```kdl
//! gateway {
//!     domain "example.org"
//!     production #false
//!     email "ops@example.org"
//! }
//!
//! acme {
//!     cache "/var/lib/certomat/cache"
//!     renew-before-days 30
//! }
//!
//! agent {
//!     binary "certbot"
//!     state-dir "/var/lib/certomat/certbot"
//!     timeout-secs 300
//! }
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub mod kdl;
pub mod validate;

pub use validate::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};

/// Let's Encrypt production directory
pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Let's Encrypt staging directory
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Path that accepts CSR submissions
pub const ISSUANCE_PATH: &str = "/get-cert-from-csr";

/// Top-level gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub acme: AcmeConfig,

    #[serde(default)]
    pub agent: AgentConfig,
}

/// Listener and request handling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Administrative base domain whose subdomains are authorized
    #[serde(default)]
    pub domain: String,

    /// Talk to the production CA instead of the staging one
    #[serde(default)]
    pub production: bool,

    /// Leftmost label of the gateway's own hostname (`<prefix>.<domain>`)
    #[serde(default = "default_hostname_prefix")]
    pub hostname_prefix: String,

    /// Listen address; defaults to `<canonical hostname>:443`
    #[serde(default)]
    pub listen: Option<String>,

    /// Contact email for CA account registration
    #[serde(default)]
    pub email: Option<String>,

    /// Check the CSR subject name against the domain whitelist before issuing
    #[serde(default)]
    pub enforce_csr_policy: bool,

    /// Maximum accepted CSR body size in bytes
    #[serde(default = "default_request_body_limit")]
    pub request_body_limit: usize,

    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    #[serde(default = "default_graceful_shutdown_timeout")]
    pub graceful_shutdown_timeout_secs: u64,
}

fn default_hostname_prefix() -> String { "certomat".to_string() }
fn default_request_body_limit() -> usize { 64 * 1024 }
fn default_handshake_timeout() -> u64 { 10 }
fn default_graceful_shutdown_timeout() -> u64 { 30 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            production: false,
            hostname_prefix: default_hostname_prefix(),
            listen: None,
            email: None,
            enforce_csr_policy: false,
            request_body_limit: default_request_body_limit(),
            handshake_timeout_secs: default_handshake_timeout(),
            graceful_shutdown_timeout_secs: default_graceful_shutdown_timeout(),
        }
    }
}

impl GatewayConfig {
    /// The gateway's own fully qualified hostname, lower-cased
    pub fn canonical_hostname(&self) -> String {
        let domain = self.domain.strip_suffix('.').unwrap_or(&self.domain);
        format!("{}.{}", self.hostname_prefix, domain).to_lowercase()
    }

    /// Effective listen address
    pub fn listen_address(&self) -> String {
        self.listen
            .clone()
            .unwrap_or_else(|| format!("{}:443", self.canonical_hostname()))
    }
}

/// Self-certificate (ACME) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcmeConfig {
    /// Directory for the persisted certificate cache
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Renew certificates this many days before expiry
    #[serde(default = "default_renew_before_days")]
    pub renew_before_days: u32,

    /// How often the background scheduler looks for expiring certificates
    #[serde(default = "default_check_interval_hours")]
    pub check_interval_hours: u64,

    /// Directory URL override; when unset the Let's Encrypt directory matching
    /// `gateway.production` is used
    #[serde(default)]
    pub directory_url: Option<String>,
}

fn default_cache_dir() -> PathBuf { PathBuf::from("cache") }
fn default_renew_before_days() -> u32 { 30 }
fn default_check_interval_hours() -> u64 { 12 }

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            renew_before_days: default_renew_before_days(),
            check_interval_hours: default_check_interval_hours(),
            directory_url: None,
        }
    }
}

/// External issuance agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent executable, resolved on `PATH` unless it contains a separator
    #[serde(default = "default_agent_binary")]
    pub binary: String,

    /// Directory holding the agent's config/work/logs dirs and result files
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Upper bound on a single agent run
    #[serde(default = "default_agent_timeout")]
    pub timeout_secs: u64,

    /// Port for the agent's standalone HTTP-01 responder
    #[serde(default)]
    pub http01_port: Option<u16>,
}

fn default_agent_binary() -> String { "certbot".to_string() }
fn default_state_dir() -> PathBuf { PathBuf::from(".") }
fn default_agent_timeout() -> u64 { 300 }

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: default_agent_binary(),
            state_dir: default_state_dir(),
            timeout_secs: default_agent_timeout(),
            http01_port: None,
        }
    }
}

impl Config {
    /// Load configuration from a KDL file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config = kdl::parse_config(&content, &path.display().to_string())?;

        info!(
            path = %path.display(),
            domain = %config.gateway.domain,
            production = config.gateway.production,
            "Loaded configuration file"
        );
        Ok(config)
    }

    /// Effective ACME directory URL
    pub fn directory_url(&self) -> &str {
        match self.acme.directory_url.as_deref() {
            Some(url) => url,
            None if self.gateway.production => LETSENCRYPT_PRODUCTION,
            None => LETSENCRYPT_STAGING,
        }
    }

    /// Run the static configuration checks
    ///
    /// Returns an error describing every problem found; warnings are logged.
    pub fn validate(&self) -> Result<()> {
        let result = validate::lint::lint_config(self);

        for warning in &result.warnings {
            tracing::warn!("{}", warning.message);
        }

        if !result.errors.is_empty() {
            let messages: Vec<String> = result.errors.iter().map(|e| e.to_string()).collect();
            anyhow::bail!(messages.join("; "));
        }

        debug!("Configuration passed static validation");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_hostname() {
        let gateway = GatewayConfig {
            domain: "example.org".to_string(),
            ..Default::default()
        };
        assert_eq!(gateway.canonical_hostname(), "certomat.example.org");
        assert_eq!(gateway.listen_address(), "certomat.example.org:443");

        let gateway = GatewayConfig {
            domain: "Example.ORG.".to_string(),
            ..Default::default()
        };
        assert_eq!(gateway.canonical_hostname(), "certomat.example.org");
    }

    #[test]
    fn test_listen_override() {
        let gateway = GatewayConfig {
            domain: "example.org".to_string(),
            listen: Some("0.0.0.0:8443".to_string()),
            ..Default::default()
        };
        assert_eq!(gateway.listen_address(), "0.0.0.0:8443");
    }

    #[test]
    fn test_directory_follows_production_flag() {
        let mut config = Config::default();
        assert_eq!(config.directory_url(), LETSENCRYPT_STAGING);

        config.gateway.production = true;
        assert_eq!(config.directory_url(), LETSENCRYPT_PRODUCTION);

        config.acme.directory_url = Some("https://pebble:14000/dir".to_string());
        assert_eq!(config.directory_url(), "https://pebble:14000/dir");
    }

    #[test]
    fn test_validate_requires_domain() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("domain"));
    }
}
