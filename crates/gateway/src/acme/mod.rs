//! ACME automatic certificate management for the gateway itself
//!
//! The gateway's HTTPS listener needs a publicly trusted certificate for
//! `certomat.<domain>` (and any other authorized host a client names in
//! SNI). Certificates are obtained on the first handshake that needs them
//! and renewed before expiry.
//!
//! # Architecture
//!
//! - [`SelfCertManager`] - Per-handshake certificate supply, gated by the
//!   domain policy, backed by memory and the persistent cache
//! - [`AcmeClient`] - [`CertificateAuthority`] over `instant-acme`
//! - [`CertificateStorage`] - Directory-backed [`CertificateCache`]
//! - [`ChallengeManager`] - Pending TLS-ALPN-01 validation certificates
//! - [`RenewalScheduler`] - Background renewal of expiring certificates
//!
//! # Challenge Flow
//!
//! 1. A handshake arrives for a host with no usable certificate
//! 2. [`SelfCertManager`] takes the issuance token and asks the
//!    [`CertificateAuthority`] for a certificate
//! 3. [`AcmeClient`] orders it and registers a validation certificate with
//!    the [`ChallengeManager`]
//! 4. The CA connects with ALPN `acme-tls/1`; the listener answers with the
//!    validation certificate and closes
//! 5. Once the order is valid the certificate is downloaded, cached and
//!    served to the waiting handshake

mod challenge;
mod client;
mod error;
mod manager;
mod scheduler;
mod storage;

pub use challenge::ChallengeManager;
pub use client::{AcmeClient, AcmeDirectory, CertificateAuthority, IssuedIdentity};
pub use error::{AcmeError, StorageError};
pub use manager::SelfCertManager;
pub use scheduler::RenewalScheduler;
pub use storage::{CertificateCache, CertificateMeta, CertificateStorage, StoredCertificate};
