//! Background lease renewal

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::LeasePlugin;
use super::BankError;

/// Lease timing windows.
///
/// Invariant: `renew_interval` < `validity_window` < `expire_window`, so the
/// holder renews well before validity runs out and validity runs out well
/// before the marker expires.
#[derive(Debug, Clone)]
pub struct LeaseConfig {
    /// How long an acquired/renewed lease marker stays valid
    pub expire_window: Duration,
    /// Interval between background renewal ticks
    pub renew_interval: Duration,
    /// Minimum remaining validity required for a write to proceed
    pub validity_window: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            expire_window: Duration::from_secs(600),
            renew_interval: Duration::from_secs(120),
            validity_window: Duration::from_secs(300),
        }
    }
}

/// Periodic background renewal of a bank lease.
///
/// Started when the backend connection is established and stopped when the
/// bank is torn down. A failed renewal is logged and retried on the next
/// tick rather than failing the bank; the renewal loop holds no lock that
/// blocking bank I/O needs.
pub struct LeaseKeeper {
    handle: Option<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl LeaseKeeper {
    /// Acquire the lease once, then spawn the renewal loop
    pub async fn start(
        plugin: Arc<dyn LeasePlugin>,
        config: LeaseConfig,
    ) -> Result<Self, BankError> {
        plugin.acquire_lease().await?;

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let interval = config.renew_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick; the lease was just acquired.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match plugin.renew_lease().await {
                            Ok(()) => debug!("lease renewed"),
                            Err(e) => warn!(error = %e, "lease renewal failed, retrying next tick"),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        info!("lease keeper stopping");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            handle: Some(handle),
            shutdown,
        })
    }

    /// Stop the renewal loop and wait for it to exit
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for LeaseKeeper {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
