//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define failover metrics (switches, health, commands, retries)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-endpoint and aggregate metrics
//!
//! # Metrics
//! - `failover_switch_total` (counter): active-endpoint switches by reason, endpoint
//! - `failover_endpoint_health` (gauge): 1=healthy, 0=otherwise
//! - `failover_commands_total` (counter): commands by endpoint, outcome
//! - `failover_retries_total` (counter): retries by endpoint
//! - `failover_circuit_open_total` (counter): calls refused by an open breaker
//! - `failover_unavailable_total` (counter): no-healthy-endpoint errors by kind
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so library users opt in
//! - Labels for endpoint, reason, outcome

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::net::Endpoint;

/// Install the Prometheus recorder with an HTTP scrape listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    describe_counter!("failover_switch_total", "Active endpoint switches");
    describe_gauge!("failover_endpoint_health", "Endpoint health (1 healthy, 0 otherwise)");
    describe_counter!("failover_commands_total", "Commands executed by outcome");
    describe_counter!("failover_retries_total", "Command retries");
    describe_counter!("failover_circuit_open_total", "Calls refused by an open circuit");
    describe_counter!("failover_unavailable_total", "No-healthy-endpoint errors");

    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_switch(reason: &'static str, endpoint: &Endpoint) {
    counter!("failover_switch_total", "reason" => reason, "endpoint" => endpoint.to_string()).increment(1);
}

pub fn record_endpoint_health(endpoint: &Endpoint, healthy: bool) {
    gauge!("failover_endpoint_health", "endpoint" => endpoint.to_string()).set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_command(endpoint: &Endpoint, outcome: &'static str) {
    counter!("failover_commands_total", "endpoint" => endpoint.to_string(), "outcome" => outcome).increment(1);
}

pub fn record_retry(endpoint: &Endpoint) {
    counter!("failover_retries_total", "endpoint" => endpoint.to_string()).increment(1);
}

pub fn record_circuit_open(endpoint: &Endpoint) {
    counter!("failover_circuit_open_total", "endpoint" => endpoint.to_string()).increment(1);
}

pub fn record_unavailable(kind: &'static str) {
    counter!("failover_unavailable_total", "kind" => kind).increment(1);
}
