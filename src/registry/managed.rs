//! One endpoint under failover management.
//!
//! # Responsibilities
//! - Bundle the endpoint's pool, retrier, failure detector and weight
//! - Answer "may this endpoint receive traffic right now"
//! - Track the grace period that keeps a failed-over endpoint out of selection
//!
//! # Design Decisions
//! - Health is derived, never stored: monitor status, breaker state, the
//!   disabled flag and the grace deadline are combined on every read
//! - Endpoints without a health check report HEALTHY

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConnectionError;
use crate::health::{HealthRegistry, HealthStatus};
use crate::net::Endpoint;
use crate::pool::{PooledConnection, TrackingPool};
use crate::registry::deadline::Deadline;
use crate::resilience::{CircuitState, FailureDetector, Retrier};

pub struct ManagedEndpoint {
    endpoint: Endpoint,
    ordinal: usize,
    weight: f32,
    pool: TrackingPool,
    retrier: Retrier,
    detector: FailureDetector,
    health: Arc<HealthRegistry>,
    has_health_check: bool,
    disabled: AtomicBool,
    grace: Deadline,
    grace_period: Duration,
}

impl ManagedEndpoint {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        endpoint: Endpoint,
        ordinal: usize,
        weight: f32,
        pool: TrackingPool,
        retrier: Retrier,
        detector: FailureDetector,
        health: Arc<HealthRegistry>,
        has_health_check: bool,
        grace_period: Duration,
    ) -> Self {
        Self {
            endpoint,
            ordinal,
            weight,
            pool,
            retrier,
            detector,
            health,
            has_health_check,
            disabled: AtomicBool::new(false),
            grace: Deadline::new(),
            grace_period,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Position in configuration order; breaks weight ties.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    pub fn pool(&self) -> &TrackingPool {
        &self.pool
    }

    pub fn retrier(&self) -> &Retrier {
        &self.retrier
    }

    pub fn detector(&self) -> &FailureDetector {
        &self.detector
    }

    pub fn has_health_check(&self) -> bool {
        self.has_health_check
    }

    pub fn health_status(&self) -> HealthStatus {
        if self.has_health_check {
            self.health.status(&self.endpoint)
        } else {
            HealthStatus::Healthy
        }
    }

    /// Eligible for traffic: HEALTHY, breaker not forced open, enabled and
    /// outside its grace period.
    pub fn is_healthy(&self) -> bool {
        self.health_status().is_healthy()
            && !self.is_forced_open()
            && !self.is_disabled()
            && !self.is_in_grace_period()
    }

    /// Whether the breaker is FORCED_OPEN. Closes it once the grace period ended.
    pub fn is_forced_open(&self) -> bool {
        if self.detector.state() == CircuitState::ForcedOpen && !self.is_in_grace_period() {
            tracing::info!(
                endpoint = %self.endpoint,
                "Grace period ended, closing forced-open circuit breaker"
            );
            self.detector.force_closed();
        }
        self.detector.state() == CircuitState::ForcedOpen
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::Release);
    }

    pub fn is_in_grace_period(&self) -> bool {
        self.grace.is_active()
    }

    pub fn grace_remaining(&self) -> Duration {
        self.grace.remaining()
    }

    /// Start the configured grace period.
    pub fn set_grace_period(&self) {
        self.grace.extend(self.grace_period);
    }

    pub fn extend_grace_period(&self, period: Duration) {
        self.grace.extend(period);
    }

    pub fn clear_grace_period(&self) {
        self.grace.clear();
    }

    /// Check out a connection, refusing while the endpoint is ineligible.
    pub async fn acquire(&self) -> Result<PooledConnection, ConnectionError> {
        if !self.is_healthy() {
            return Err(ConnectionError::Unavailable(self.endpoint.clone()));
        }
        self.pool.acquire().await
    }

    pub async fn close(&self) {
        self.set_disabled(true);
        self.pool.close().await;
    }
}

impl fmt::Debug for ManagedEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedEndpoint")
            .field("endpoint", &self.endpoint)
            .field("weight", &self.weight)
            .field("ordinal", &self.ordinal)
            .field("breaker", &self.detector.state())
            .field("health", &self.health_status())
            .field("disabled", &self.is_disabled())
            .finish_non_exhaustive()
    }
}
