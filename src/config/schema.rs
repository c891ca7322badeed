//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the failover
//! client. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::config::secret::SecretBytes;
use crate::error::ErrorKind;
use crate::health::{InitializationPolicy, ProbePolicy};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FailoverConfig {
    /// Readiness rule applied during construction.
    pub initialization_policy: InitializationPolicy,

    /// Sever every connection of the old endpoint on switch.
    pub fast_failover: bool,

    /// Wrap failures on a no-longer-active endpoint as failed-during-failover.
    pub retry_on_failover: bool,

    /// How long a failed-over endpoint stays ineligible.
    pub grace_period_ms: u64,

    /// Attempts without a healthy endpoint before errors become permanent.
    pub max_failover_attempts: u32,

    /// Minimum time between two counted attempts.
    pub failover_cooldown_ms: u64,

    /// Failovers a single command may trigger before giving up.
    pub max_failover_hops: u32,

    /// Error kinds that make the executor fail over and re-issue.
    pub fallback: Vec<ErrorKind>,

    /// Retry policy applied per endpoint.
    pub retry: RetryConfig,

    /// Failure detector thresholds.
    pub detector: DetectorConfig,

    /// Periodic failback to higher-weight endpoints.
    pub failback: FailbackConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Endpoint definitions, in priority-tie order.
    pub endpoints: Vec<EndpointConfig>,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            initialization_policy: InitializationPolicy::MajorityAvailable,
            fast_failover: false,
            retry_on_failover: false,
            grace_period_ms: 60_000,
            max_failover_attempts: 10,
            failover_cooldown_ms: 12_000,
            max_failover_hops: 5,
            fallback: vec![ErrorKind::CircuitOpen, ErrorKind::FailedDuringFailover],
            retry: RetryConfig::default(),
            detector: DetectorConfig::default(),
            failback: FailbackConfig::default(),
            observability: ObservabilityConfig::default(),
            endpoints: Vec::new(),
        }
    }
}

fn default_tracked_kinds() -> Vec<ErrorKind> {
    vec![
        ErrorKind::Io,
        ErrorKind::Timeout,
        ErrorKind::Disconnected,
        ErrorKind::Unavailable,
    ]
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total calls, including the first one.
    pub max_attempts: u32,

    /// Wait before the first retry in milliseconds.
    pub wait_ms: u64,

    /// Factor applied to the wait after each retry.
    pub backoff_multiplier: f64,

    /// Cap on a single wait in milliseconds.
    pub max_wait_ms: u64,

    /// Retryable error kinds.
    pub include: Vec<ErrorKind>,

    /// Never retried, even if included.
    pub ignore: Vec<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            wait_ms: 500,
            backoff_multiplier: 2.0,
            max_wait_ms: 10_000,
            include: default_tracked_kinds(),
            ignore: Vec::new(),
        }
    }
}

/// Failure detector configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Failures required in the window before tripping.
    pub min_failure_count: u32,

    /// Failure percentage required before tripping.
    pub failure_rate_threshold: f32,

    /// Window length in seconds.
    pub sliding_window_secs: u64,

    /// Kinds recorded as failures.
    pub include: Vec<ErrorKind>,

    /// Kinds not recorded at all.
    pub ignore: Vec<ErrorKind>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_failure_count: 1000,
            failure_rate_threshold: 10.0,
            sliding_window_secs: 2,
            include: default_tracked_kinds(),
            ignore: Vec::new(),
        }
    }
}

/// Failback configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FailbackConfig {
    pub enabled: bool,

    /// Sweep interval in milliseconds.
    pub interval_ms: u64,
}

impl Default for FailbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 120_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// One database endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// Endpoint address (e.g., "10.0.0.1:6379").
    pub address: String,

    /// Selection priority; higher wins.
    #[serde(default = "default_weight")]
    pub weight: f32,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub health_check: HealthCheckConfig,
}

fn default_weight() -> f32 {
    1.0
}

impl EndpointConfig {
    pub fn new(address: impl Into<String>, weight: f32) -> Self {
        Self {
            address: address.into(),
            weight,
            pool: PoolConfig::default(),
            health_check: HealthCheckConfig::default(),
        }
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum concurrent connections to this endpoint.
    pub max_connections: usize,

    /// Wait for a free connection in milliseconds.
    pub acquire_timeout_ms: u64,

    /// Connection establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 8,
            acquire_timeout_ms: 2000,
            connect_timeout_ms: 2000,
        }
    }
}

/// Health check strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheckKind {
    /// Untracked; treated as always healthy.
    None,
    /// Monitored, always healthy.
    Noop,
    #[default]
    Ping,
    Echo,
    RemoteAvailability,
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub kind: HealthCheckKind,

    /// Round interval in milliseconds.
    pub interval_ms: u64,

    /// Single probe timeout in milliseconds.
    pub timeout_ms: u64,

    /// Probes per round.
    pub num_probes: u32,

    /// Pause between probes of one round in milliseconds.
    pub delay_between_probes_ms: u64,

    pub policy: ProbePolicy,

    /// Management API host; the endpoint host when unset.
    pub api_host: Option<String>,

    pub api_port: u16,

    /// Use HTTPS for the management API.
    pub api_tls: bool,

    pub username: Option<String>,

    #[serde(skip_serializing)]
    pub password: Option<SecretBytes>,

    /// Also require replication lag within tolerance.
    pub extended_lag_check: bool,

    pub lag_tolerance_ms: Option<u64>,

    pub accept_invalid_certs: bool,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            kind: HealthCheckKind::Ping,
            interval_ms: 5000,
            timeout_ms: 1000,
            num_probes: 1,
            delay_between_probes_ms: 0,
            policy: ProbePolicy::AllSuccess,
            api_host: None,
            api_port: 9443,
            api_tls: true,
            username: None,
            password: None,
            extended_lag_check: false,
            lag_tolerance_ms: None,
            accept_invalid_certs: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: FailoverConfig = toml::from_str(
            r#"
            [[endpoints]]
            address = "10.0.0.1:6379"
            "#,
        )
        .unwrap();
        assert_eq!(config.endpoints.len(), 1);
        assert_eq!(config.endpoints[0].weight, 1.0);
        assert_eq!(config.endpoints[0].health_check.kind, HealthCheckKind::Ping);
        assert_eq!(config.initialization_policy, InitializationPolicy::MajorityAvailable);
        assert_eq!(config.grace_period_ms, 60_000);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.detector.min_failure_count, 1000);
        assert!(config.failback.enabled);
    }

    #[test]
    fn test_full_endpoint_config() {
        let config: FailoverConfig = toml::from_str(
            r#"
            initialization_policy = "one_available"
            fast_failover = true
            fallback = ["circuit_open"]

            [detector]
            min_failure_count = 5
            failure_rate_threshold = 50.0

            [[endpoints]]
            address = "east:6379"
            weight = 2.0
            [endpoints.pool]
            max_connections = 4
            [endpoints.health_check]
            kind = "remote_availability"
            username = "admin"
            password = "pw"
            extended_lag_check = true
            lag_tolerance_ms = 100
            policy = "majority"
            num_probes = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.initialization_policy, InitializationPolicy::OneAvailable);
        assert!(config.fast_failover);
        assert_eq!(config.fallback, vec![ErrorKind::CircuitOpen]);
        assert_eq!(config.detector.min_failure_count, 5);
        let ep = &config.endpoints[0];
        assert_eq!(ep.pool.max_connections, 4);
        assert_eq!(ep.pool.acquire_timeout_ms, 2000);
        assert_eq!(ep.health_check.kind, HealthCheckKind::RemoteAvailability);
        assert_eq!(ep.health_check.policy, ProbePolicy::Majority);
        assert_eq!(ep.health_check.lag_tolerance_ms, Some(100));
        assert_eq!(ep.health_check.password.as_ref().unwrap().expose(), b"pw");

        let printed = format!("{config:?}");
        assert!(printed.contains("SecretBytes(***)"));
        assert!(!printed.contains("\"pw\""));
    }
}
