//! Periodic failback to higher-weight endpoints.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::registry::EndpointRegistry;

pub struct FailbackChecker {
    registry: Weak<EndpointRegistry>,
    interval: Duration,
}

impl FailbackChecker {
    pub fn new(registry: Weak<EndpointRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Sweep every `interval` until shutdown or the registry is dropped.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Failback checker starting");

        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(registry) = self.registry.upgrade() else {
                        break;
                    };
                    if let Err(e) = registry.failback_sweep().await {
                        tracing::error!(error = %e, "Error during periodic failback check");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Failback checker received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
