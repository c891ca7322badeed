//! Remote availability probe.
//!
//! # Responsibilities
//! - Resolve the database uid serving the configured host, once
//! - Ask the management API whether that database is available
//!
//! # Design Decisions
//! - The uid is cached; any error invalidates it so the next round resolves
//!   again (databases can be recreated behind the same host)
//! - Lag-aware checks are opt-in per endpoint

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use url::Url;

use crate::config::HealthCheckConfig;
use crate::health::probe::{HealthProbe, ProbeError, ProbeSettings};
use crate::health::rest_api::{BdbInfo, RestApiClient};
use crate::health::state::HealthStatus;
use crate::net::Endpoint;

#[derive(Debug)]
pub struct RemoteAvailabilityProbe {
    client: RestApiClient,
    db_host: String,
    extended_lag_check: bool,
    lag_tolerance: Option<Duration>,
    cached_uid: Mutex<Option<String>>,
    settings: ProbeSettings,
}

impl RemoteAvailabilityProbe {
    pub fn new(
        endpoint: &Endpoint,
        config: &HealthCheckConfig,
        settings: ProbeSettings,
    ) -> Result<Self, ProbeError> {
        let username = config
            .username
            .clone()
            .ok_or_else(|| ProbeError::Config("remote availability requires a username".into()))?;
        let password = config.password.clone().unwrap_or_default();
        let api_host = config.api_host.as_deref().unwrap_or(endpoint.host());
        let scheme = if config.api_tls { "https" } else { "http" };
        let base = Url::parse(&format!("{scheme}://{api_host}:{}", config.api_port))
            .map_err(|e| ProbeError::Config(format!("invalid API address: {e}")))?;
        let client = RestApiClient::new(
            base,
            username,
            password,
            settings.timeout,
            config.accept_invalid_certs,
        )?;
        Ok(Self {
            client,
            db_host: endpoint.host().to_string(),
            extended_lag_check: config.extended_lag_check,
            lag_tolerance: config.lag_tolerance_ms.map(Duration::from_millis),
            cached_uid: Mutex::new(None),
            settings,
        })
    }

    async fn resolve_uid(&self) -> Result<String, ProbeError> {
        let mut cached = self.cached_uid.lock().await;
        if let Some(uid) = cached.as_ref() {
            return Ok(uid.clone());
        }
        let bdbs = self.client.get_bdbs().await?;
        let bdb = BdbInfo::find_matching(&bdbs, &self.db_host)
            .ok_or_else(|| ProbeError::Resolution(self.db_host.clone()))?;
        tracing::debug!(host = %self.db_host, uid = %bdb.uid, "Resolved database uid");
        *cached = Some(bdb.uid.clone());
        Ok(bdb.uid.clone())
    }

    async fn check(&self) -> Result<HealthStatus, ProbeError> {
        let uid = self.resolve_uid().await?;
        let available = self
            .client
            .check_availability(&uid, self.extended_lag_check, self.lag_tolerance)
            .await?;
        Ok(if available {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        })
    }
}

#[async_trait]
impl HealthProbe for RemoteAvailabilityProbe {
    fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    async fn probe(&self, _endpoint: &Endpoint) -> Result<HealthStatus, ProbeError> {
        match self.check().await {
            Ok(status) => Ok(status),
            Err(e) => {
                self.cached_uid.lock().await.take();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealthCheckKind;

    #[test]
    fn test_username_is_required() {
        let config = HealthCheckConfig {
            kind: HealthCheckKind::RemoteAvailability,
            username: None,
            ..HealthCheckConfig::default()
        };
        let endpoint: Endpoint = "db1:6379".parse().unwrap();
        let err = RemoteAvailabilityProbe::new(&endpoint, &config, ProbeSettings::default()).unwrap_err();
        assert!(matches!(err, ProbeError::Config(_)));
    }

    #[test]
    fn test_api_address_defaults_to_endpoint_host() {
        let config = HealthCheckConfig {
            kind: HealthCheckKind::RemoteAvailability,
            username: Some("admin".into()),
            password: Some("pw".into()),
            ..HealthCheckConfig::default()
        };
        let endpoint: Endpoint = "redis-1.example.com:12000".parse().unwrap();
        let probe = RemoteAvailabilityProbe::new(&endpoint, &config, ProbeSettings::default()).unwrap();
        assert_eq!(probe.client.base().as_str(), "https://redis-1.example.com:9443/");
    }
}
