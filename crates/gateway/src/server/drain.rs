//! Graceful shutdown coordination.
//!
//! Tracks open connections so shutdown can wait for in-flight requests, and
//! turns SIGINT/SIGTERM into a shutdown future.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

/// Connection counter and drain wait
#[derive(Debug)]
pub struct DrainCoordinator {
    active_connections: Arc<AtomicUsize>,
    max_drain_time: Duration,
}

impl DrainCoordinator {
    pub fn new(max_drain_time: Duration) -> Self {
        debug!(
            max_drain_time_secs = max_drain_time.as_secs(),
            "Creating drain coordinator"
        );
        Self {
            active_connections: Arc::new(AtomicUsize::new(0)),
            max_drain_time,
        }
    }

    /// Count a connection until the returned guard is dropped
    pub fn track(&self) -> ConnectionGuard {
        let count = self.active_connections.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(active_connections = count, "Connection opened");
        ConnectionGuard {
            active_connections: Arc::clone(&self.active_connections),
        }
    }

    /// Wait for tracked connections to finish
    ///
    /// Returns `false` if the drain timeout passed with connections still open.
    pub async fn wait_for_drain(&self) -> bool {
        let start = Instant::now();
        let initial_count = self.active_count();

        info!(
            active_connections = initial_count,
            max_drain_time_secs = self.max_drain_time.as_secs(),
            "Starting connection drain"
        );

        let mut last_logged_count = initial_count;

        while self.active_count() > 0 {
            if start.elapsed() > self.max_drain_time {
                warn!(
                    remaining_connections = self.active_count(),
                    elapsed_secs = start.elapsed().as_secs(),
                    "Drain timeout reached, connections still active"
                );
                return false;
            }

            let current_count = self.active_count();
            if current_count != last_logged_count {
                debug!(
                    remaining_connections = current_count,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Draining connections"
                );
                last_logged_count = current_count;
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            initial_connections = initial_count,
            "All connections drained"
        );
        true
    }

    pub fn active_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        info!(
            active_connections = self.active_count(),
            "Shutdown requested"
        );
    }
}

/// Decrements the connection count on drop
#[derive(Debug)]
pub struct ConnectionGuard {
    active_connections: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let count = self.active_connections.fetch_sub(1, Ordering::Relaxed) - 1;
        trace!(active_connections = count, "Connection closed");
    }
}

/// Resolves on SIGINT or (Unix) SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
