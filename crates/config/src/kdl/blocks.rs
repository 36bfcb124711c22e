//! Gateway, ACME and agent block parsing.

use anyhow::Result;
use std::path::PathBuf;
use tracing::trace;

use crate::{AcmeConfig, AgentConfig, GatewayConfig};

use super::helpers::{get_bool_entry, get_int_entry, get_string_entry};

/// Convert an integer setting, rejecting values that do not fit
fn int_setting<T: TryFrom<i128>>(node: &::kdl::KdlNode, name: &str) -> Result<Option<T>> {
    match get_int_entry(node, name) {
        Some(v) => T::try_from(v)
            .map(Some)
            .map_err(|_| anyhow::anyhow!("Value {} is out of range for '{}'", v, name)),
        None => Ok(None),
    }
}

/// Parse the `gateway { ... }` block
pub fn parse_gateway_config(node: &::kdl::KdlNode) -> Result<GatewayConfig> {
    trace!("Parsing gateway configuration block");
    let defaults = GatewayConfig::default();

    let config = GatewayConfig {
        domain: get_string_entry(node, "domain").unwrap_or_default(),
        production: get_bool_entry(node, "production").unwrap_or(false),
        hostname_prefix: get_string_entry(node, "hostname-prefix")
            .unwrap_or(defaults.hostname_prefix),
        listen: get_string_entry(node, "listen"),
        email: get_string_entry(node, "email"),
        enforce_csr_policy: get_bool_entry(node, "enforce-csr-policy").unwrap_or(false),
        request_body_limit: int_setting(node, "request-body-limit")?
            .unwrap_or(defaults.request_body_limit),
        handshake_timeout_secs: int_setting(node, "handshake-timeout-secs")?
            .unwrap_or(defaults.handshake_timeout_secs),
        graceful_shutdown_timeout_secs: int_setting(node, "graceful-shutdown-timeout-secs")?
            .unwrap_or(defaults.graceful_shutdown_timeout_secs),
    };

    trace!(
        domain = %config.domain,
        production = config.production,
        listen = ?config.listen,
        "Parsed gateway configuration"
    );

    Ok(config)
}

/// Parse the `acme { ... }` block
pub fn parse_acme_config(node: &::kdl::KdlNode) -> Result<AcmeConfig> {
    trace!("Parsing ACME configuration block");
    let defaults = AcmeConfig::default();

    Ok(AcmeConfig {
        cache_dir: get_string_entry(node, "cache")
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir),
        renew_before_days: int_setting(node, "renew-before-days")?
            .unwrap_or(defaults.renew_before_days),
        check_interval_hours: int_setting(node, "check-interval-hours")?
            .unwrap_or(defaults.check_interval_hours),
        directory_url: get_string_entry(node, "directory-url"),
    })
}

/// Parse the `agent { ... }` block
pub fn parse_agent_config(node: &::kdl::KdlNode) -> Result<AgentConfig> {
    trace!("Parsing agent configuration block");
    let defaults = AgentConfig::default();

    let config = AgentConfig {
        binary: get_string_entry(node, "binary").unwrap_or(defaults.binary),
        state_dir: get_string_entry(node, "state-dir")
            .map(PathBuf::from)
            .unwrap_or(defaults.state_dir),
        timeout_secs: int_setting(node, "timeout-secs")?.unwrap_or(defaults.timeout_secs),
        http01_port: int_setting(node, "http01-port")?,
    };

    trace!(
        binary = %config.binary,
        state_dir = %config.state_dir.display(),
        timeout_secs = config.timeout_secs,
        "Parsed agent configuration"
    );

    Ok(config)
}
