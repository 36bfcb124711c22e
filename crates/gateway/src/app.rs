//! Process bootstrap
//!
//! Builds every component from a validated [`Config`] and wires the shared
//! pieces together: one [`DomainPolicy`], one [`SerializationToken`] and
//! one certificate cache per process.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use certomat_config::Config;

use crate::acme::{
    AcmeClient, AcmeDirectory, CertificateCache, CertificateStorage, RenewalScheduler,
    SelfCertManager,
};
use crate::errors::StartupError;
use crate::issuance::{CsrOrchestrator, IssuanceAgent, SerializationToken};
use crate::policy::DomainPolicy;
use crate::server::{FrontController, GatewayServer};

/// A fully constructed gateway, ready to bind and serve
#[derive(Debug)]
pub struct Gateway {
    listen: String,
    manager: Arc<SelfCertManager>,
    server: GatewayServer,
    renewal_interval: Duration,
}

impl Gateway {
    /// Locate and register the agent, open the cache and build the server
    pub async fn bootstrap(config: &Config) -> Result<Self, StartupError> {
        let policy = Arc::new(DomainPolicy::new([&config.gateway.domain])?);
        let canonical_host = config.gateway.canonical_hostname();
        let token = SerializationToken::new();

        let agent = IssuanceAgent::from_config(config)?;
        agent.ensure_registered(&token).await?;

        let directory = AcmeDirectory::from_url(config.directory_url());
        let cache: Arc<dyn CertificateCache> = Arc::new(CertificateStorage::new(
            &config.acme.cache_dir,
            &directory.namespace(),
        )?);
        let client = Arc::new(AcmeClient::new(
            directory.clone(),
            config.gateway.email.clone(),
            Arc::clone(&cache),
        ));

        let manager = Arc::new(
            SelfCertManager::new(
                Arc::clone(&policy),
                canonical_host.clone(),
                directory,
                client,
                cache,
                token.clone(),
            )
            .with_renew_before_days(config.acme.renew_before_days),
        );

        let mut orchestrator = CsrOrchestrator::new(agent, token);
        if config.gateway.enforce_csr_policy {
            orchestrator = orchestrator.with_policy(policy.as_ref().clone());
        }

        let controller = FrontController::new(orchestrator, canonical_host.clone())
            .with_body_limit(config.gateway.request_body_limit);
        let server = GatewayServer::new(Arc::clone(&manager), controller)
            .with_handshake_timeout(Duration::from_secs(config.gateway.handshake_timeout_secs))
            .with_drain_timeout(Duration::from_secs(
                config.gateway.graceful_shutdown_timeout_secs,
            ));

        info!(
            host = %canonical_host,
            directory = %manager.directory(),
            production = manager.directory().is_production(),
            enforce_csr_policy = config.gateway.enforce_csr_policy,
            "Gateway initialized"
        );

        Ok(Self {
            listen: config.gateway.listen_address(),
            manager,
            server,
            renewal_interval: Duration::from_secs(
                config.acme.check_interval_hours.saturating_mul(3600),
            ),
        })
    }

    pub fn manager(&self) -> &Arc<SelfCertManager> {
        &self.manager
    }

    /// Bind, serve until `shutdown` resolves, then drain
    pub async fn run<F>(self, shutdown: F) -> Result<(), StartupError>
    where
        F: Future<Output = ()>,
    {
        let listener = GatewayServer::bind(&self.listen).await?;

        let scheduler =
            RenewalScheduler::new(Arc::clone(&self.manager)).with_interval(self.renewal_interval);
        let renewals = tokio::spawn(scheduler.run());

        self.server.serve(listener, shutdown).await;

        renewals.abort();
        info!("Gateway stopped");
        Ok(())
    }
}
