//! HTTPS front controller
//!
//! One tokio task per TCP connection. Each handshake starts with
//! [`LazyConfigAcceptor`] so the ClientHello can be inspected first:
//!
//! - ALPN `acme-tls/1`: answer with the pending TLS-ALPN-01 validation
//!   certificate for the SNI host, then close
//! - otherwise: ask the [`SelfCertManager`] for the SNI host's certificate
//!   and serve HTTP/1.1 with the [`FrontController`]

mod drain;
mod pages;
mod routes;

pub use drain::{shutdown_signal, ConnectionGuard, DrainCoordinator};
pub use pages::{page_for, strip_port, GATEWAY_PAGE, UNCONFIGURED_DNS_PAGE};
pub use routes::{is_issuance_path, FrontController, REQUEST_ID_HEADER};

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_rustls::LazyConfigAcceptor;
use tracing::{debug, error, info, trace, warn};

use crate::acme::{ChallengeManager, SelfCertManager};
use crate::errors::StartupError;
use crate::tls::{self, ACME_TLS_ALPN_NAME, HTTP_11_ALPN_NAME};

/// TLS listener plus everything a connection needs
#[derive(Debug, Clone)]
pub struct GatewayServer {
    manager: Arc<SelfCertManager>,
    controller: Arc<FrontController>,
    handshake_timeout: Duration,
    drain: Arc<DrainCoordinator>,
}

/// Resolves once shutdown has been signalled
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopping| *stopping).await;
}

/// ClientHello facts needed after the hello is released
struct HelloSummary {
    sni: Option<String>,
    challenge: bool,
}

impl GatewayServer {
    pub fn new(manager: Arc<SelfCertManager>, controller: FrontController) -> Self {
        Self {
            manager,
            controller: Arc::new(controller),
            handshake_timeout: Duration::from_secs(10),
            drain: Arc::new(DrainCoordinator::new(Duration::from_secs(30))),
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// How long shutdown waits for open connections
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain = Arc::new(DrainCoordinator::new(timeout));
        self
    }

    pub fn drain(&self) -> &DrainCoordinator {
        &self.drain
    }

    /// Bind the listening socket
    pub async fn bind(addr: &str) -> Result<TcpListener, StartupError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| StartupError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        info!(addr = %addr, "HTTPS listener bound");
        Ok(listener)
    }

    /// Accept connections until `shutdown` resolves, then drain
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let server = self.clone();
                        let guard = self.drain.track();
                        let stop = stop_rx.clone();
                        tokio::spawn(async move {
                            let _guard = guard;
                            server.handle_connection(stream, remote, stop).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                _ = &mut shutdown => break,
            }
        }

        drop(listener);
        self.drain.request_shutdown();
        let _ = stop_tx.send(true);
        self.drain.wait_for_drain().await;
    }

    async fn handle_connection(&self, stream: TcpStream, remote: SocketAddr, mut stop: watch::Receiver<bool>) {
        let acceptor = LazyConfigAcceptor::new(rustls::server::Acceptor::default(), stream);
        let start = match timeout(self.handshake_timeout, acceptor).await {
            Ok(Ok(start)) => start,
            Ok(Err(e)) => {
                debug!(remote = %remote, error = %e, "Invalid ClientHello");
                return;
            }
            Err(_) => {
                debug!(remote = %remote, "Handshake timed out");
                return;
            }
        };

        let hello = {
            let client_hello = start.client_hello();
            HelloSummary {
                sni: client_hello.server_name().map(str::to_string),
                challenge: client_hello
                    .alpn()
                    .is_some_and(|alpn| ChallengeManager::is_challenge_alpn(alpn)),
            }
        };

        if hello.challenge {
            let Some(host) = hello.sni else {
                debug!(remote = %remote, "Validation handshake without SNI");
                return;
            };
            let Some(key) = self.manager.challenges().get_response(&host) else {
                warn!(remote = %remote, host = %host, "Validation handshake for unknown challenge");
                return;
            };

            let config = match tls::server_config(key, ACME_TLS_ALPN_NAME) {
                Ok(config) => config,
                Err(e) => {
                    error!(error = %e, "Cannot build validation TLS config");
                    return;
                }
            };
            match timeout(self.handshake_timeout, start.into_stream(config)).await {
                Ok(Ok(mut stream)) => {
                    info!(remote = %remote, host = %host, "Answered TLS-ALPN-01 validation");
                    let _ = stream.shutdown().await;
                }
                Ok(Err(e)) => debug!(remote = %remote, error = %e, "Validation handshake failed"),
                Err(_) => debug!(remote = %remote, "Validation handshake timed out"),
            }
            return;
        }

        let key = match self.manager.get_certificate(hello.sni.as_deref()).await {
            Ok(key) => key,
            Err(e) => {
                warn!(remote = %remote, sni = ?hello.sni, error = %e, "No certificate for handshake");
                return;
            }
        };
        let config = match tls::server_config(key, HTTP_11_ALPN_NAME) {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "Cannot build TLS config");
                return;
            }
        };

        let stream = match timeout(self.handshake_timeout, start.into_stream(config)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                debug!(remote = %remote, error = %e, "TLS handshake failed");
                return;
            }
            Err(_) => {
                debug!(remote = %remote, "TLS handshake timed out");
                return;
            }
        };
        trace!(remote = %remote, sni = ?hello.sni, "TLS established");

        let controller = Arc::clone(&self.controller);
        let service = service_fn(move |req| {
            let controller = Arc::clone(&controller);
            async move { Ok::<_, Infallible>(controller.handle(req).await) }
        });

        let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
        tokio::pin!(connection);

        let result = tokio::select! {
            result = connection.as_mut() => result,
            _ = stopped(&mut stop) => {
                connection.as_mut().graceful_shutdown();
                connection.as_mut().await
            }
        };

        if let Err(e) = result {
            debug!(remote = %remote, error = %e, "Connection closed with error");
        }
    }
}
