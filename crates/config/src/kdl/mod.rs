//! KDL configuration parsing.

use anyhow::Result;
use tracing::{trace, warn};

use crate::Config;

mod blocks;
mod helpers;

pub use blocks::{parse_acme_config, parse_agent_config, parse_gateway_config};

/// Parse a KDL document into a [`Config`]
///
/// `source_name` is only used to label diagnostics.
pub fn parse_config(content: &str, source_name: &str) -> Result<Config> {
    let doc: ::kdl::KdlDocument = content.parse().map_err(|e: ::kdl::KdlError| {
        let report = miette::Report::new(e).with_source_code(miette::NamedSource::new(
            source_name,
            content.to_string(),
        ));
        anyhow::anyhow!("Failed to parse {}:\n{:?}", source_name, report)
    })?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "gateway" => config.gateway = parse_gateway_config(node)?,
            "acme" => config.acme = parse_acme_config(node)?,
            "agent" => config.agent = parse_agent_config(node)?,
            other => {
                warn!(block = %other, source = %source_name, "Ignoring unknown configuration block");
            }
        }
    }

    trace!(source = %source_name, "Parsed KDL configuration");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_full_config() {
        let kdl = r#"
            gateway {
                domain "example.org"
                production #true
                hostname-prefix "certs"
                listen "0.0.0.0:8443"
                email "ops@example.org"
                enforce-csr-policy #true
                request-body-limit 4096
            }
            acme {
                cache "/var/lib/certomat/cache"
                renew-before-days 20
                check-interval-hours 6
            }
            agent {
                binary "/usr/bin/certbot"
                state-dir "/var/lib/certomat/certbot"
                timeout-secs 120
                http01-port 8080
            }
        "#;

        let config = parse_config(kdl, "test.kdl").unwrap();

        assert_eq!(config.gateway.domain, "example.org");
        assert!(config.gateway.production);
        assert_eq!(config.gateway.canonical_hostname(), "certs.example.org");
        assert_eq!(config.gateway.listen_address(), "0.0.0.0:8443");
        assert_eq!(config.gateway.email.as_deref(), Some("ops@example.org"));
        assert!(config.gateway.enforce_csr_policy);
        assert_eq!(config.gateway.request_body_limit, 4096);

        assert_eq!(config.acme.cache_dir, PathBuf::from("/var/lib/certomat/cache"));
        assert_eq!(config.acme.renew_before_days, 20);
        assert_eq!(config.acme.check_interval_hours, 6);

        assert_eq!(config.agent.binary, "/usr/bin/certbot");
        assert_eq!(config.agent.state_dir, PathBuf::from("/var/lib/certomat/certbot"));
        assert_eq!(config.agent.timeout_secs, 120);
        assert_eq!(config.agent.http01_port, Some(8080));
    }

    #[test]
    fn test_defaults_when_blocks_missing() {
        let config = parse_config("gateway {\n    domain \"example.org\"\n}\n", "test.kdl").unwrap();

        assert!(!config.gateway.production);
        assert_eq!(config.gateway.hostname_prefix, "certomat");
        assert_eq!(config.acme.cache_dir, PathBuf::from("cache"));
        assert_eq!(config.agent.binary, "certbot");
        assert_eq!(config.agent.timeout_secs, 300);
    }

    #[test]
    fn test_bare_boolean_node() {
        let config = parse_config(
            "gateway {\n    domain \"example.org\"\n    production\n}\n",
            "test.kdl",
        )
        .unwrap();
        assert!(config.gateway.production);
    }

    #[test]
    fn test_syntax_error_names_source() {
        let err = parse_config("gateway {", "broken.kdl").unwrap_err();
        assert!(err.to_string().contains("broken.kdl"));
    }

    #[test]
    fn test_negative_port_rejected() {
        let err = parse_config("agent {\n    http01-port -1\n}\n", "test.kdl").unwrap_err();
        assert!(err.to_string().contains("http01-port"));
    }
}
