//! Dual-threshold failure detector.
//!
//! # Responsibilities
//! - Gate calls to one endpoint (refuse while OPEN or FORCED_OPEN)
//! - Classify outcomes by `ErrorKind` and record them in the sliding window
//! - Trip CLOSED → OPEN when BOTH the failure count and failure rate cross
//!   their thresholds
//!
//! # Design Decisions
//! - The wrapped breaker's own evaluation is neutralised with thresholds it
//!   can never reach; it only stores state and window metrics
//! - Thresholds are checked before the failure is recorded, so the current
//!   failure is counted once via `already_counted = false`

use std::future::Future;
use std::time::Duration;

use crate::config::DetectorConfig;
use crate::error::{ErrorKind, FailoverError, FailoverResult};
use crate::net::Endpoint;
use crate::observability::metrics;
use crate::resilience::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, WindowMetrics,
};

/// How long a tripped (not forced) breaker stays open before trial calls.
const WAIT_IN_OPEN: Duration = Duration::from_secs(60);

/// Per-endpoint failure detector.
#[derive(Debug)]
pub struct FailureDetector {
    endpoint: Endpoint,
    breaker: CircuitBreaker,
    min_failure_count: u32,
    failure_rate_threshold: f32,
    include: Vec<ErrorKind>,
    ignore: Vec<ErrorKind>,
}

impl FailureDetector {
    pub fn new(endpoint: Endpoint, config: &DetectorConfig) -> Self {
        let breaker = CircuitBreaker::new(
            endpoint.to_string(),
            CircuitBreakerConfig {
                failure_rate_threshold: 100.0,
                minimum_calls: u32::MAX,
                sliding_window: Duration::from_secs(config.sliding_window_secs.max(1)),
                wait_in_open: WAIT_IN_OPEN,
                permitted_half_open_calls: config.min_failure_count.max(1),
            },
        );
        Self {
            endpoint,
            breaker,
            min_failure_count: config.min_failure_count,
            failure_rate_threshold: config.failure_rate_threshold,
            include: config.include.clone(),
            ignore: config.ignore.clone(),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn metrics(&self) -> WindowMetrics {
        self.breaker.metrics()
    }

    /// Whether `kind` is tracked as a failure by this detector.
    pub fn tracks(&self, kind: ErrorKind) -> bool {
        !self.ignore.contains(&kind) && self.include.contains(&kind)
    }

    /// Run `op` through the breaker, recording its outcome.
    pub async fn call<T, F, Fut>(&self, op: F) -> FailoverResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FailoverResult<T>>,
    {
        if !self.breaker.try_acquire_permission() {
            metrics::record_circuit_open(&self.endpoint);
            return Err(FailoverError::CircuitOpen(self.endpoint.clone()));
        }
        match op().await {
            Ok(value) => {
                self.breaker.on_success();
                Ok(value)
            }
            Err(e) => {
                self.record_error(e.kind());
                Err(e)
            }
        }
    }

    /// Record a failed outcome of `kind`.
    pub fn record_error(&self, kind: ErrorKind) {
        if self.ignore.contains(&kind) {
            self.breaker.release_permission();
        } else if self.include.contains(&kind) {
            self.evaluate_thresholds(false);
            self.breaker.on_failure();
        } else {
            self.breaker.on_success();
        }
    }

    /// Trip CLOSED → OPEN when both thresholds are met.
    ///
    /// `already_counted` tells whether the failure being handled is already
    /// part of the window metrics.
    pub fn evaluate_thresholds(&self, already_counted: bool) {
        if self.breaker.state() != CircuitState::Closed {
            return;
        }
        let window = self.breaker.metrics();
        let fails = window.failures + if already_counted { 0 } else { 1 };
        let total = fails + window.successes;
        if fails < u64::from(self.min_failure_count) {
            return;
        }
        let rate = fails as f32 * 100.0 / total as f32;
        if rate >= self.failure_rate_threshold {
            tracing::warn!(
                endpoint = %self.endpoint,
                failures = fails,
                successes = window.successes,
                failure_rate = rate,
                "Failure thresholds reached, opening circuit"
            );
            self.breaker.transition_to_open();
        }
    }

    pub fn force_open(&self) {
        self.breaker.transition_to_forced_open();
    }

    pub fn force_closed(&self) {
        self.breaker.transition_to_closed();
    }
}
