//! TLS helpers
//!
//! PEM to [`CertifiedKey`] conversion, certificate expiry lookup and the
//! per-connection [`ServerConfig`] built once a handshake's certificate is
//! known.

use std::io::BufReader;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rustls::crypto::aws_lc_rs;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use thiserror::Error;

/// ALPN protocol of TLS-ALPN-01 validation handshakes
pub const ACME_TLS_ALPN_NAME: &[u8] = b"acme-tls/1";

/// ALPN protocol offered to ordinary clients
pub const HTTP_11_ALPN_NAME: &[u8] = b"http/1.1";

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("invalid PEM: {0}")]
    Pem(#[source] std::io::Error),

    #[error("no certificate in PEM input")]
    NoCertificate,

    #[error("no private key in PEM input")]
    NoPrivateKey,

    #[error("cannot parse certificate: {0}")]
    Parse(String),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

/// Build a signing identity from a DER chain and key
pub fn certified_key(
    chain: Vec<CertificateDer<'static>>,
    key: &PrivateKeyDer<'_>,
) -> Result<CertifiedKey, TlsError> {
    if chain.is_empty() {
        return Err(TlsError::NoCertificate);
    }
    let signing_key = aws_lc_rs::sign::any_supported_type(key)?;
    Ok(CertifiedKey::new(chain, signing_key))
}

/// Build a signing identity from PEM certificate chain and key
pub fn certified_key_from_pem(cert_pem: &str, key_pem: &str) -> Result<CertifiedKey, TlsError> {
    let chain = rustls_pemfile::certs(&mut BufReader::new(cert_pem.as_bytes()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(TlsError::Pem)?;

    let key = rustls_pemfile::private_key(&mut BufReader::new(key_pem.as_bytes()))
        .map_err(TlsError::Pem)?
        .ok_or(TlsError::NoPrivateKey)?;

    certified_key(chain, &key)
}

/// `notAfter` of the first certificate in a PEM chain
pub fn certificate_expiry(cert_pem: &str) -> Result<DateTime<Utc>, TlsError> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(cert_pem.as_bytes())
        .map_err(|e| TlsError::Parse(e.to_string()))?;
    let (_, cert) = x509_parser::parse_x509_certificate(&pem.contents)
        .map_err(|e| TlsError::Parse(e.to_string()))?;

    let timestamp = cert.validity().not_after.timestamp();
    DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| TlsError::Parse(format!("notAfter out of range: {}", timestamp)))
}

/// Resolver that always answers with one identity
#[derive(Debug)]
struct FixedCertResolver(Arc<CertifiedKey>);

impl ResolvesServerCert for FixedCertResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(Arc::clone(&self.0))
    }
}

/// Server configuration for one handshake
pub fn server_config(
    key: Arc<CertifiedKey>,
    alpn: &[u8],
) -> Result<Arc<ServerConfig>, TlsError> {
    let mut config = ServerConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(FixedCertResolver(key)));
    config.alpn_protocols = vec![alpn.to_vec()];
    Ok(Arc::new(config))
}
