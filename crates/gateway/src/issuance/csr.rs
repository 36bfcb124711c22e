//! CSR inspection
//!
//! The subject common name becomes the agent's target name; the DNS names
//! are only used when the CSR policy is enforced. Parse failures are not
//! errors here: the agent validates the CSR itself and reports anything it
//! cannot use.

use bytes::Bytes;
use tracing::debug;
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::FromDer;

/// Names requested by a CSR
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsrSubject {
    pub common_name: Option<String>,
    /// DNS entries of the requested subjectAltName extension
    pub dns_names: Vec<String>,
}

/// One inbound issuance request
#[derive(Debug, Clone)]
pub struct IssuanceRequest {
    /// Subject common name from the CSR, if it could be read
    pub host: Option<String>,
    pub dns_names: Vec<String>,
    /// The CSR exactly as submitted
    pub csr: Bytes,
}

impl IssuanceRequest {
    /// Build a request from raw CSR bytes (DER or PEM)
    pub fn from_csr(csr: Bytes) -> Self {
        let subject = inspect(&csr).unwrap_or_default();
        Self {
            host: subject.common_name,
            dns_names: subject.dns_names,
            csr,
        }
    }

    /// Every name the CSR asks for, common name first
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.host
            .iter()
            .chain(self.dns_names.iter())
            .map(String::as_str)
    }
}

/// Subject common name of a DER or PEM encoded CSR
pub fn common_name(csr: &[u8]) -> Option<String> {
    inspect(csr)?.common_name
}

/// Read the requested names of a DER or PEM encoded CSR
pub fn inspect(csr: &[u8]) -> Option<CsrSubject> {
    if csr.starts_with(b"-----BEGIN") {
        let (_, pem) = match parse_x509_pem(csr) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(error = %e, "CSR is not valid PEM");
                return None;
            }
        };
        if !pem.label.contains("CERTIFICATE REQUEST") {
            debug!(label = %pem.label, "PEM block is not a certificate request");
            return None;
        }
        return inspect_der(&pem.contents);
    }

    inspect_der(csr)
}

fn inspect_der(der: &[u8]) -> Option<CsrSubject> {
    let (_, request) = match X509CertificationRequest::from_der(der) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!(error = %e, "Cannot parse CSR");
            return None;
        }
    };

    let common_name = request
        .certification_request_info
        .subject
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(|cn| cn.trim().to_string())
        .filter(|cn| !cn.is_empty());

    let mut dns_names = Vec::new();
    if let Some(extensions) = request.requested_extensions() {
        for extension in extensions {
            if let ParsedExtension::SubjectAlternativeName(san) = extension {
                for name in &san.general_names {
                    if let GeneralName::DNSName(dns) = name {
                        dns_names.push(dns.to_string());
                    }
                }
            }
        }
    }

    Some(CsrSubject {
        common_name,
        dns_names,
    })
}
