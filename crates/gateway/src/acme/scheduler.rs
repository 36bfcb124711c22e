//! Background certificate renewal scheduler
//!
//! Periodically renews gateway certificates that entered the renewal
//! window, so long-lived processes keep a valid identity even when no
//! handshake triggers a renewal.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::manager::SelfCertManager;

/// Default check interval (12 hours)
const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(12 * 3600);

/// Minimum check interval (1 hour)
const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(3600);

/// Maximum check interval (366 days)
const MAX_CHECK_INTERVAL: Duration = Duration::from_secs(366 * 24 * 3600);

/// Background certificate renewal scheduler
pub struct RenewalScheduler {
    manager: Arc<SelfCertManager>,
    check_interval: Duration,
}

impl RenewalScheduler {
    pub fn new(manager: Arc<SelfCertManager>) -> Self {
        Self {
            manager,
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }

    /// Set the check interval
    ///
    /// The interval is clamped to between 1 hour and 366 days.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval.clamp(MIN_CHECK_INTERVAL, MAX_CHECK_INTERVAL);
        self
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Run the renewal loop until the task is aborted
    pub async fn run(self) {
        info!(
            check_interval_hours = self.check_interval.as_secs() / 3600,
            "Starting certificate renewal scheduler"
        );

        let mut interval = interval(self.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; startup already has fresh certificates
        interval.tick().await;

        loop {
            interval.tick().await;
            debug!("Running scheduled certificate renewal check");
            self.check_renewals().await;
        }
    }

    /// One pass over the expiring certificates
    pub async fn check_renewals(&self) -> usize {
        let start = Instant::now();
        let renewed = self.manager.renew_expiring().await;

        if renewed > 0 {
            info!(
                renewed,
                elapsed_secs = start.elapsed().as_secs(),
                "Certificate renewal check completed"
            );
        }
        renewed
    }
}

impl std::fmt::Debug for RenewalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalScheduler")
            .field("check_interval", &self.check_interval)
            .field("manager", &self.manager)
            .finish()
    }
}
