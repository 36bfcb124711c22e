//! Cached certificate validation
//!
//! Inspects the gateway's own certificates in the ACME cache. Expired or
//! soon-to-expire entries are only warnings since the gateway re-issues them
//! on demand; an unreadable certificate is an error because it points at a
//! corrupted cache.

use super::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::Config;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Validate cached gateway certificates
pub fn validate_certificates(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();
    let renew_window = Duration::from_secs(u64::from(config.acme.renew_before_days) * 86400);

    for cert_path in find_cached_certificates(&config.acme.cache_dir) {
        match load_and_validate_cert(&cert_path, renew_window) {
            Ok(Some(warning)) => result.add_warning(warning),
            Ok(None) => {}
            Err(e) => result.add_error(e),
        }
    }

    result
}

/// Every `cert.pem` at most three levels below the cache root
fn find_cached_certificates(cache_dir: &Path) -> Vec<PathBuf> {
    fn walk(dir: &Path, depth: usize, found: &mut Vec<PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() && depth > 0 {
                walk(&path, depth - 1, found);
            } else if path.file_name().is_some_and(|n| n == "cert.pem") {
                found.push(path);
            }
        }
    }

    let mut found = Vec::new();
    walk(cache_dir, 3, &mut found);
    found.sort();
    found
}

/// Load a certificate and check its expiry
fn load_and_validate_cert(
    cert_path: &Path,
    renew_window: Duration,
) -> Result<Option<ValidationWarning>, ValidationError> {
    let cert_pem = std::fs::read(cert_path).map_err(|e| {
        ValidationError::new(
            ErrorCategory::Certificate,
            format!("Failed to read certificate {:?}: {}", cert_path, e),
        )
    })?;

    let pem = pem::parse(&cert_pem).map_err(|e| {
        ValidationError::new(
            ErrorCategory::Certificate,
            format!("Failed to parse certificate {:?}: {}", cert_path, e),
        )
    })?;

    let (_, cert) = x509_parser::parse_x509_certificate(pem.contents()).map_err(|e| {
        ValidationError::new(
            ErrorCategory::Certificate,
            format!("Invalid X509 certificate {:?}: {}", cert_path, e),
        )
    })?;

    let now = SystemTime::now();
    let not_after = cert.validity().not_after.timestamp().max(0) as u64;
    let expiry_time = SystemTime::UNIX_EPOCH + Duration::from_secs(not_after);

    if expiry_time < now {
        return Ok(Some(ValidationWarning::new(format!(
            "Cached certificate expired: {:?} (expired at {}); it will be re-issued",
            cert_path,
            cert.validity().not_after
        ))));
    }

    if expiry_time < now + renew_window {
        return Ok(Some(ValidationWarning::new(format!(
            "Cached certificate inside renewal window: {:?} (expires at {})",
            cert_path,
            cert.validity().not_after
        ))));
    }

    Ok(None)
}
