//! Circuit breaker for endpoint protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: endpoint assumed down, calls fail fast
//! - Half-Open: a limited number of trial calls decide recovery
//! - Forced-Open: held open by an external owner; never recovers on its own
//!
//! # State Transitions
//! ```text
//! Closed → Open: calls >= minimum_calls AND failure rate >= threshold
//! Open → Half-Open: after wait_in_open elapses, on the next permission request
//! Half-Open → Closed: trial calls finish below the failure-rate threshold
//! Half-Open → Open: trial calls finish at or above the threshold
//! any → Forced-Open / Closed / Open: explicit transition calls
//! ```
//!
//! # Design Decisions
//! - Per-endpoint circuit breaker (not global)
//! - Time-based sliding window of one-second buckets
//! - Metrics reset on every state transition

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
    ForcedOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
            CircuitState::ForcedOpen => "forced_open",
        }
    }
}

/// Tuning for the breaker's own evaluation.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failure percentage at which the breaker trips.
    pub failure_rate_threshold: f32,
    /// Calls required in the window before the rate is evaluated.
    pub minimum_calls: u32,
    /// Window length, rounded to whole seconds (at least one).
    pub sliding_window: Duration,
    /// How long Open lasts before trial calls are permitted.
    pub wait_in_open: Duration,
    /// Trial calls permitted while Half-Open.
    pub permitted_half_open_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            minimum_calls: 100,
            sliding_window: Duration::from_secs(10),
            wait_in_open: Duration::from_secs(60),
            permitted_half_open_calls: 10,
        }
    }
}

/// Outcome counts recorded inside the sliding window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowMetrics {
    pub successes: u64,
    pub failures: u64,
}

impl WindowMetrics {
    pub fn total(&self) -> u64 {
        self.successes + self.failures
    }

    /// Failure percentage, 0 when nothing was recorded.
    pub fn failure_rate(&self) -> f32 {
        if self.total() == 0 {
            return 0.0;
        }
        self.failures as f32 * 100.0 / self.total() as f32
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    second: u64,
    metrics: WindowMetrics,
}

#[derive(Debug)]
struct SlidingWindow {
    origin: Instant,
    buckets: Vec<Bucket>,
}

impl SlidingWindow {
    fn new(length: Duration) -> Self {
        let seconds = length.as_secs().max(1) as usize;
        Self {
            origin: Instant::now(),
            buckets: vec![Bucket::default(); seconds],
        }
    }

    fn current_second(&self) -> u64 {
        Instant::now().saturating_duration_since(self.origin).as_secs()
    }

    fn record(&mut self, success: bool) {
        let second = self.current_second();
        let len = self.buckets.len() as u64;
        let bucket = &mut self.buckets[(second % len) as usize];
        if bucket.second != second {
            *bucket = Bucket {
                second,
                metrics: WindowMetrics::default(),
            };
        }
        if success {
            bucket.metrics.successes += 1;
        } else {
            bucket.metrics.failures += 1;
        }
    }

    fn snapshot(&self) -> WindowMetrics {
        let second = self.current_second();
        let len = self.buckets.len() as u64;
        self.buckets
            .iter()
            .filter(|b| second.saturating_sub(b.second) < len)
            .fold(WindowMetrics::default(), |acc, b| WindowMetrics {
                successes: acc.successes + b.metrics.successes,
                failures: acc.failures + b.metrics.failures,
            })
    }

    fn reset(&mut self) {
        let len = self.buckets.len();
        self.origin = Instant::now();
        self.buckets = vec![Bucket::default(); len];
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    window: SlidingWindow,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
    half_open: WindowMetrics,
}

/// Generic circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let window = SlidingWindow::new(config.sliding_window);
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                window,
                opened_at: None,
                half_open_in_flight: 0,
                half_open: WindowMetrics::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("circuit breaker mutex poisoned").state
    }

    pub fn metrics(&self) -> WindowMetrics {
        self.inner
            .lock()
            .expect("circuit breaker mutex poisoned")
            .window
            .snapshot()
    }

    /// Ask to place a call. Moves Open to Half-Open once the wait is over.
    pub fn try_acquire_permission(&self) -> bool {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::ForcedOpen => false,
            CircuitState::Open => {
                let waited = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.wait_in_open)
                    .unwrap_or(true);
                if !waited {
                    return false;
                }
                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.half_open_in_flight = 1;
                true
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.config.permitted_half_open_calls {
                    inner.half_open_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Give back a permission whose outcome will not be recorded.
    pub fn release_permission(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    pub fn on_success(&self) {
        self.on_result(true);
    }

    pub fn on_failure(&self) {
        self.on_result(false);
    }

    fn on_result(&self, success: bool) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.window.record(success);
        match inner.state {
            CircuitState::Closed if !success => {
                let metrics = inner.window.snapshot();
                if metrics.total() >= u64::from(self.config.minimum_calls)
                    && metrics.failure_rate() >= self.config.failure_rate_threshold
                {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                if success {
                    inner.half_open.successes += 1;
                } else {
                    inner.half_open.failures += 1;
                }
                if inner.half_open.total() >= u64::from(self.config.permitted_half_open_calls) {
                    let next = if inner.half_open.failure_rate() >= self.config.failure_rate_threshold {
                        CircuitState::Open
                    } else {
                        CircuitState::Closed
                    };
                    self.transition(&mut inner, next);
                }
            }
            _ => {}
        }
    }

    pub fn transition_to_open(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        self.transition(&mut inner, CircuitState::Open);
    }

    pub fn transition_to_forced_open(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        self.transition(&mut inner, CircuitState::ForcedOpen);
    }

    pub fn transition_to_closed(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        self.transition(&mut inner, CircuitState::Closed);
    }

    fn transition(&self, inner: &mut BreakerInner, next: CircuitState) {
        if inner.state == next {
            return;
        }
        tracing::info!(
            breaker = %self.name,
            from = inner.state.as_str(),
            to = next.as_str(),
            "Circuit breaker state transition"
        );
        inner.state = next;
        inner.window.reset();
        inner.half_open_in_flight = 0;
        inner.half_open = WindowMetrics::default();
        inner.opened_at = match next {
            CircuitState::Open | CircuitState::ForcedOpen => Some(Instant::now()),
            _ => None,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(minimum_calls: u32, threshold: f32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_rate_threshold: threshold,
                minimum_calls,
                sliding_window: Duration::from_secs(2),
                wait_in_open: Duration::from_secs(5),
                permitted_half_open_calls: 2,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_trips_on_rate_after_minimum_calls() {
        let cb = breaker(4, 50.0);
        cb.on_success();
        cb.on_success();
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.try_acquire_permission());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_forgets_old_outcomes() {
        let cb = breaker(1000, 100.0);
        cb.on_failure();
        cb.on_failure();
        assert_eq!(cb.metrics().failures, 2);
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(cb.metrics(), WindowMetrics::default());
        cb.on_success();
        assert_eq!(cb.metrics().successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_recovers() {
        let cb = breaker(1, 50.0);
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cb.try_acquire_permission());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.try_acquire_permission());
        assert!(!cb.try_acquire_permission());
        cb.on_success();
        cb.on_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_open_never_recovers_by_itself() {
        let cb = breaker(1, 50.0);
        cb.transition_to_forced_open();
        tokio::time::advance(Duration::from_secs(600)).await;
        assert!(!cb.try_acquire_permission());
        cb.transition_to_closed();
        assert!(cb.try_acquire_permission());
    }
}
