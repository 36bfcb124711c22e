//! Static configuration checks
//!
//! Catches configurations the gateway cannot serve with, and flags settings
//! that work but are probably not what an operator wants in production.

use super::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::Config;

/// Longest accepted renewal window
pub const MAX_RENEW_BEFORE_DAYS: u32 = 365;

/// Longest accepted renewal check interval (one year)
pub const MAX_CHECK_INTERVAL_HOURS: u64 = 24 * 366;

/// Lint configuration
pub fn lint_config(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();
    let gateway = &config.gateway;

    // Domain
    let domain = gateway.domain.as_str();
    if domain.is_empty() {
        result.add_error(ValidationError::new(
            ErrorCategory::Domain,
            "A domain is required (--domain, CERTOMAT_DOMAIN or gateway.domain)",
        ));
    } else {
        let trimmed = domain.strip_suffix('.').unwrap_or(domain);
        if trimmed.split('.').any(|label| label.is_empty())
            || trimmed.chars().any(|c| c.is_whitespace() || c == '/' || c == ':')
        {
            result.add_error(ValidationError::new(
                ErrorCategory::Domain,
                format!("Domain '{}' is not a valid DNS name", domain),
            ));
        } else if trimmed != domain || trimmed.chars().any(|c| c.is_ascii_uppercase()) {
            result.add_warning(ValidationWarning::new(format!(
                "Domain '{}' will be normalized to '{}'",
                domain,
                trimmed.to_ascii_lowercase()
            )));
        }
    }

    if gateway.hostname_prefix.is_empty() || gateway.hostname_prefix.contains('.') {
        result.add_error(ValidationError::new(
            ErrorCategory::Domain,
            format!(
                "Hostname prefix '{}' must be a single DNS label",
                gateway.hostname_prefix
            ),
        ));
    }

    // Listener
    let listen = gateway.listen_address();
    match listen.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
        _ => {
            result.add_error(ValidationError::new(
                ErrorCategory::Listener,
                format!("Listen address '{}' must be host:port", listen),
            ));
        }
    }

    if gateway.request_body_limit == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Listener,
            "request-body-limit must be greater than zero",
        ));
    }

    if gateway.handshake_timeout_secs == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Listener,
            "handshake-timeout-secs must be greater than zero",
        ));
    }

    // Agent
    if config.agent.binary.trim().is_empty() {
        result.add_error(ValidationError::new(
            ErrorCategory::Agent,
            "Agent binary must not be empty",
        ));
    }

    if config.agent.timeout_secs == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Agent,
            "Agent timeout must be greater than zero",
        ));
    }

    // Renewal
    if config.acme.renew_before_days > MAX_RENEW_BEFORE_DAYS {
        result.add_error(ValidationError::new(
            ErrorCategory::Certificate,
            format!(
                "renew-before-days {} exceeds the maximum of {}",
                config.acme.renew_before_days, MAX_RENEW_BEFORE_DAYS
            ),
        ));
    }

    if config.acme.check_interval_hours == 0
        || config.acme.check_interval_hours > MAX_CHECK_INTERVAL_HOURS
    {
        result.add_error(ValidationError::new(
            ErrorCategory::Certificate,
            format!(
                "check-interval-hours must be between 1 and {}",
                MAX_CHECK_INTERVAL_HOURS
            ),
        ));
    }

    // Operational warnings
    if !gateway.production && config.acme.directory_url.is_none() {
        result.add_warning(ValidationWarning::new(
            "Running against the staging CA: issued certificates are not publicly trusted",
        ));
    }

    if !gateway.enforce_csr_policy {
        result.add_warning(ValidationWarning::new(
            "CSR subject names are not checked against the domain whitelist",
        ));
    }

    if (90..=MAX_RENEW_BEFORE_DAYS).contains(&config.acme.renew_before_days) {
        result.add_warning(ValidationWarning::new(format!(
            "renew-before-days {} is at least a full certificate lifetime; every check will renew",
            config.acme.renew_before_days
        )));
    }

    result
}
