//! PING health probe.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::PoolConfig;
use crate::health::probe::{HealthProbe, ProbeError, ProbeSettings};
use crate::health::state::HealthStatus;
use crate::net::{Connector, Endpoint};
use crate::pool::TrackingPool;
use crate::resilience::timeouts::with_timeout;

/// Connections kept by the probe's private pool.
const PING_POOL_SIZE: usize = 2;

/// Healthy iff PONG arrives within the probe timeout.
#[derive(Debug)]
pub struct PingProbe {
    pool: TrackingPool,
    settings: ProbeSettings,
}

impl PingProbe {
    pub fn new(endpoint: Endpoint, connector: Arc<dyn Connector>, settings: ProbeSettings) -> Self {
        let timeout_ms = settings.timeout.as_millis() as u64;
        let pool_config = PoolConfig {
            max_connections: PING_POOL_SIZE,
            acquire_timeout_ms: timeout_ms,
            connect_timeout_ms: timeout_ms,
        };
        Self {
            pool: TrackingPool::new(endpoint, connector, &pool_config),
            settings,
        }
    }
}

#[async_trait]
impl HealthProbe for PingProbe {
    fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    async fn probe(&self, _endpoint: &Endpoint) -> Result<HealthStatus, ProbeError> {
        let pong = with_timeout(self.settings.timeout, async {
            let conn = self.pool.acquire().await?;
            conn.ping().await
        })
        .await?;
        Ok(if pong {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
