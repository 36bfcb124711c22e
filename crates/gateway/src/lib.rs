//! Certomat Gateway Library
//!
//! An HTTPS gateway that lets hosts under one administrative domain obtain
//! publicly trusted TLS certificates by submitting a CSR, without access to
//! the certificate authority's credentials.
//!
//! - **Policy**: base-domain whitelist gating every certificate
//! - **Self-certificates**: the gateway's own TLS identity via ACME
//!   (TLS-ALPN-01), cached on disk and renewed in the background
//! - **Issuance**: CSRs handed to an external certbot-compatible agent, one
//!   run at a time
//! - **Server**: TLS listener, routing, graceful shutdown
//!
//! # Example
//!
//! ```ignore
//! use certomat::Gateway;
//! use certomat_config::Config;
//!
//! let config = Config::from_file("certomat.kdl")?;
//! let gateway = Gateway::bootstrap(&config).await?;
//! gateway.run(certomat::server::shutdown_signal()).await?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod app;
pub mod errors;
pub mod issuance;
pub mod policy;
pub mod server;
pub mod tls;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Bootstrap
pub use app::Gateway;
pub use errors::StartupError;

// Policy
pub use policy::{DomainPolicy, PolicyError};

// Self-certificate management
pub use acme::{AcmeDirectory, CertificateAuthority, SelfCertManager};

// CSR issuance
pub use issuance::{
    CsrOrchestrator, IssuanceAgent, IssuanceError, IssuanceRequest, IssuedCertificate,
    SerializationToken,
};

// Front controller
pub use server::{FrontController, GatewayServer};
