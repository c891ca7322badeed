//! Health probe contract and round policies.
//!
//! # Responsibilities
//! - Define the pluggable `HealthProbe` strategy
//! - Decide a round's status from individual probe results (`ProbePolicy`)
//! - Build the configured probe for an endpoint
//!
//! # Design Decisions
//! - A probe returns `Err` for anything that is not a clear answer; the
//!   monitor resolves errors to UNHEALTHY, so they never reach callers
//! - Rounds stop as soon as the policy can decide

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{HealthCheckConfig, HealthCheckKind};
use crate::error::ConnectionError;
use crate::health::availability::RemoteAvailabilityProbe;
use crate::health::echo::EchoProbe;
use crate::health::ping::PingProbe;
use crate::health::state::HealthStatus;
use crate::net::{Connector, Endpoint};

/// Why a single probe could not produce an answer.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("could not resolve database for {0}")]
    Resolution(String),

    #[error("invalid probe configuration: {0}")]
    Config(String),
}

/// How individual probe results combine into one round result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbePolicy {
    #[default]
    AllSuccess,
    Majority,
    AnySuccess,
}

impl ProbePolicy {
    /// Decide a round, or `None` while more probes are needed.
    pub fn evaluate(&self, successes: u32, failures: u32, total: u32) -> Option<HealthStatus> {
        match self {
            ProbePolicy::AllSuccess => {
                if failures > 0 {
                    Some(HealthStatus::Unhealthy)
                } else if successes >= total {
                    Some(HealthStatus::Healthy)
                } else {
                    None
                }
            }
            ProbePolicy::Majority => {
                if successes * 2 > total {
                    Some(HealthStatus::Healthy)
                } else if failures * 2 >= total {
                    Some(HealthStatus::Unhealthy)
                } else {
                    None
                }
            }
            ProbePolicy::AnySuccess => {
                if successes > 0 {
                    Some(HealthStatus::Healthy)
                } else if failures >= total {
                    Some(HealthStatus::Unhealthy)
                } else {
                    None
                }
            }
        }
    }
}

/// Scheduling parameters shared by every probe strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSettings {
    pub interval: Duration,
    pub timeout: Duration,
    pub num_probes: u32,
    pub delay_between_probes: Duration,
    pub policy: ProbePolicy,
}

impl ProbeSettings {
    pub fn from_config(config: &HealthCheckConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_ms),
            timeout: Duration::from_millis(config.timeout_ms),
            num_probes: config.num_probes.max(1),
            delay_between_probes: Duration::from_millis(config.delay_between_probes_ms),
            policy: config.policy,
        }
    }

    /// Upper bound on one round: `(timeout + delay) × num_probes`.
    pub fn max_wait_for(&self) -> Duration {
        (self.timeout + self.delay_between_probes) * self.num_probes
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self::from_config(&HealthCheckConfig::default())
    }
}

/// One health check strategy bound to one endpoint.
#[async_trait]
pub trait HealthProbe: Send + Sync + std::fmt::Debug {
    fn settings(&self) -> &ProbeSettings;

    /// Perform one check.
    async fn probe(&self, endpoint: &Endpoint) -> Result<HealthStatus, ProbeError>;

    /// Release resources held by the probe.
    async fn close(&self) {}
}

/// Always healthy.
#[derive(Debug, Default)]
pub struct NoopProbe {
    settings: ProbeSettings,
}

impl NoopProbe {
    pub fn new(settings: ProbeSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl HealthProbe for NoopProbe {
    fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    async fn probe(&self, _endpoint: &Endpoint) -> Result<HealthStatus, ProbeError> {
        Ok(HealthStatus::Healthy)
    }
}

/// Build the probe configured for `endpoint`. `None` means untracked.
pub fn build_probe(
    endpoint: &Endpoint,
    config: &HealthCheckConfig,
    connector: Arc<dyn Connector>,
) -> Result<Option<Arc<dyn HealthProbe>>, ProbeError> {
    let settings = ProbeSettings::from_config(config);
    let probe: Arc<dyn HealthProbe> = match config.kind {
        HealthCheckKind::None => return Ok(None),
        HealthCheckKind::Noop => Arc::new(NoopProbe::new(settings)),
        HealthCheckKind::Ping => Arc::new(PingProbe::new(endpoint.clone(), connector, settings)),
        HealthCheckKind::Echo => Arc::new(EchoProbe::new(endpoint.clone(), connector, settings)),
        HealthCheckKind::RemoteAvailability => {
            Arc::new(RemoteAvailabilityProbe::new(endpoint, config, settings)?)
        }
    };
    Ok(Some(probe))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_success_policy() {
        let p = ProbePolicy::AllSuccess;
        assert_eq!(p.evaluate(1, 0, 3), None);
        assert_eq!(p.evaluate(2, 1, 3), Some(HealthStatus::Unhealthy));
        assert_eq!(p.evaluate(3, 0, 3), Some(HealthStatus::Healthy));
    }

    #[test]
    fn test_majority_policy_resolves_early() {
        let p = ProbePolicy::Majority;
        assert_eq!(p.evaluate(2, 0, 3), Some(HealthStatus::Healthy));
        assert_eq!(p.evaluate(0, 2, 3), Some(HealthStatus::Unhealthy));
        assert_eq!(p.evaluate(1, 1, 3), None);
        // an even split is not a majority
        assert_eq!(p.evaluate(1, 2, 4), Some(HealthStatus::Unhealthy));
        assert_eq!(p.evaluate(2, 1, 4), None);
    }

    #[test]
    fn test_any_success_policy() {
        let p = ProbePolicy::AnySuccess;
        assert_eq!(p.evaluate(0, 2, 3), None);
        assert_eq!(p.evaluate(1, 2, 3), Some(HealthStatus::Healthy));
        assert_eq!(p.evaluate(0, 3, 3), Some(HealthStatus::Unhealthy));
    }

    #[test]
    fn test_max_wait_for() {
        let settings = ProbeSettings {
            interval: Duration::from_secs(5),
            timeout: Duration::from_millis(1000),
            num_probes: 3,
            delay_between_probes: Duration::from_millis(200),
            policy: ProbePolicy::AllSuccess,
        };
        assert_eq!(settings.max_wait_for(), Duration::from_millis(3600));
    }

    #[test]
    fn test_none_kind_is_untracked() {
        let config = HealthCheckConfig {
            kind: HealthCheckKind::None,
            ..HealthCheckConfig::default()
        };
        let connector = Arc::new(crate::net::TcpConnector::default());
        let probe = build_probe(&"db1:6379".parse().unwrap(), &config, connector).unwrap();
        assert!(probe.is_none());
    }
}
