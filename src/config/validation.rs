//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check endpoint addresses parse and are unique
//! - Validate value ranges (timeouts > 0, thresholds in range)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: FailoverConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::{EndpointConfig, FailoverConfig, HealthCheckKind};
use crate::net::Endpoint;

/// One semantic problem, located by a dotted field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validate a whole configuration.
pub fn validate_config(config: &FailoverConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.endpoints.is_empty() {
        errors.push(ValidationError::new("endpoints", "at least one endpoint is required"));
    }

    let mut seen = HashSet::new();
    for (i, endpoint) in config.endpoints.iter().enumerate() {
        let prefix = format!("endpoints[{i}]");
        validate_endpoint(&prefix, endpoint, &mut errors);
        if let Ok(parsed) = endpoint.address.parse::<Endpoint>() {
            if !seen.insert(parsed) {
                errors.push(ValidationError::new(
                    format!("{prefix}.address"),
                    format!("duplicate endpoint '{}'", endpoint.address),
                ));
            }
        }
    }

    let retry = &config.retry;
    if retry.max_attempts < 1 {
        errors.push(ValidationError::new("retry.max_attempts", "must be at least 1"));
    }
    if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
        errors.push(ValidationError::new("retry.backoff_multiplier", "must be finite and >= 1.0"));
    }

    let detector = &config.detector;
    if detector.min_failure_count < 1 {
        errors.push(ValidationError::new("detector.min_failure_count", "must be at least 1"));
    }
    if !(detector.failure_rate_threshold > 0.0 && detector.failure_rate_threshold <= 100.0) {
        errors.push(ValidationError::new(
            "detector.failure_rate_threshold",
            "must be in (0, 100]",
        ));
    }
    if detector.sliding_window_secs < 1 {
        errors.push(ValidationError::new("detector.sliding_window_secs", "must be at least 1"));
    }

    if config.failback.enabled && config.failback.interval_ms == 0 {
        errors.push(ValidationError::new("failback.interval_ms", "must be > 0 when failback is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate one endpoint entry; also used for runtime additions.
pub fn validate_endpoint(prefix: &str, endpoint: &EndpointConfig, errors: &mut Vec<ValidationError>) {
    if let Err(e) = endpoint.address.parse::<Endpoint>() {
        errors.push(ValidationError::new(format!("{prefix}.address"), e.to_string()));
    }
    if !endpoint.weight.is_finite() || endpoint.weight < 0.0 {
        errors.push(ValidationError::new(format!("{prefix}.weight"), "must be finite and >= 0"));
    }
    if endpoint.pool.max_connections < 1 {
        errors.push(ValidationError::new(format!("{prefix}.pool.max_connections"), "must be at least 1"));
    }

    let hc = &endpoint.health_check;
    if hc.kind == HealthCheckKind::None {
        return;
    }
    if hc.num_probes < 1 {
        errors.push(ValidationError::new(format!("{prefix}.health_check.num_probes"), "must be at least 1"));
    }
    if hc.interval_ms == 0 {
        errors.push(ValidationError::new(format!("{prefix}.health_check.interval_ms"), "must be > 0"));
    }
    if hc.timeout_ms == 0 {
        errors.push(ValidationError::new(format!("{prefix}.health_check.timeout_ms"), "must be > 0"));
    }
    if hc.kind == HealthCheckKind::RemoteAvailability && hc.username.as_deref().unwrap_or("").is_empty() {
        errors.push(ValidationError::new(
            format!("{prefix}.health_check.username"),
            "remote availability checks require a username",
        ));
    }
}
