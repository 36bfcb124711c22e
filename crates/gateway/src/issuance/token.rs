//! Process-wide serialization of issuance work
//!
//! The external agent keeps its account, locks and result files in one
//! working directory and does not tolerate concurrent runs. Every code path
//! that drives issuance (CSR requests, agent registration, the gateway's own
//! ACME orders) holds the [`SerializationToken`] for its full duration.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace};

/// Shared handle to the single issuance slot
///
/// Cloning yields another handle to the same slot.
#[derive(Debug, Clone, Default)]
pub struct SerializationToken {
    slot: Arc<Mutex<()>>,
}

impl SerializationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the slot and hold it until the guard is dropped
    ///
    /// `holder` names the caller in logs.
    pub async fn acquire(&self, holder: &'static str) -> TokenGuard {
        let waiting_since = Instant::now();
        trace!(holder, "Waiting for issuance token");

        let guard = Arc::clone(&self.slot).lock_owned().await;

        debug!(
            holder,
            waited_ms = waiting_since.elapsed().as_millis() as u64,
            "Acquired issuance token"
        );

        TokenGuard {
            _guard: guard,
            holder,
            acquired_at: Instant::now(),
        }
    }

    /// Whether some caller currently holds the slot
    pub fn is_held(&self) -> bool {
        self.slot.try_lock().is_err()
    }
}

/// Proof of holding the issuance slot
#[must_use = "the token is released as soon as the guard is dropped"]
pub struct TokenGuard {
    _guard: OwnedMutexGuard<()>,
    holder: &'static str,
    acquired_at: Instant,
}

impl Drop for TokenGuard {
    fn drop(&mut self) {
        debug!(
            holder = self.holder,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "Released issuance token"
        );
    }
}
