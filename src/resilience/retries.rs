//! Retry logic.
//!
//! # Responsibilities
//! - Classify errors as retryable by `ErrorKind`
//! - Execute retries with exponential backoff + jitter
//! - Stop after `max_attempts` total calls
//!
//! # Design Decisions
//! - `ignore` wins over `include`; anything in neither list is terminal
//! - The retrier is the outer wrapper, so a call refused by an open breaker
//!   is only retried when `circuit_open` is listed explicitly

use std::future::Future;

use crate::config::RetryConfig;
use crate::error::{ErrorKind, FailoverResult};
use crate::net::Endpoint;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

/// Bounded retrier for one endpoint.
#[derive(Debug, Clone)]
pub struct Retrier {
    endpoint: Endpoint,
    max_attempts: u32,
    wait_ms: u64,
    multiplier: f64,
    max_wait_ms: u64,
    include: Vec<ErrorKind>,
    ignore: Vec<ErrorKind>,
}

impl Retrier {
    pub fn new(endpoint: Endpoint, config: &RetryConfig) -> Self {
        Self {
            endpoint,
            max_attempts: config.max_attempts.max(1),
            wait_ms: config.wait_ms,
            multiplier: config.backoff_multiplier,
            max_wait_ms: config.max_wait_ms,
            include: config.include.clone(),
            ignore: config.ignore.clone(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        !self.ignore.contains(&kind) && self.include.contains(&kind)
    }

    /// Run `op` until it succeeds, fails terminally, or attempts run out.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> FailoverResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FailoverResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && self.is_retryable(e.kind()) => {
                    let delay = calculate_backoff(attempt, self.wait_ms, self.multiplier, self.max_wait_ms);
                    tracing::warn!(
                        endpoint = %self.endpoint,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Command failed, retrying"
                    );
                    metrics::record_retry(&self.endpoint);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConnectionError, FailoverError};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn retrier(max_attempts: u32) -> Retrier {
        let config = RetryConfig {
            max_attempts,
            wait_ms: 10,
            ..RetryConfig::default()
        };
        Retrier::new("db1:6379".parse().unwrap(), &config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = retrier(3)
            .run(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(FailoverError::from(ConnectionError::Disconnected))
                } else {
                    Ok("ok")
                }
            })
            .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: FailoverResult<()> = retrier(3)
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ConnectionError::Disconnected.into())
            })
            .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Disconnected);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: FailoverResult<()> = retrier(5)
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ConnectionError::Server("WRONGTYPE".into()).into())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_wait_is_capped_by_max_wait() {
        let config = RetryConfig {
            max_attempts: 2,
            wait_ms: u64::MAX,
            max_wait_ms: 1_000,
            ..RetryConfig::default()
        };
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let result = Retrier::new("db1:6379".parse().unwrap(), &config)
            .run(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(FailoverError::from(ConnectionError::Disconnected))
                } else {
                    Ok(())
                }
            })
            .await;
        assert!(result.is_ok());
        let elapsed = started.elapsed();
        assert!(elapsed >= std::time::Duration::from_millis(1_000));
        assert!(elapsed < std::time::Duration::from_millis(1_100));
    }

    #[test]
    fn test_ignore_overrides_include() {
        let config = RetryConfig {
            include: vec![ErrorKind::Io, ErrorKind::Timeout],
            ignore: vec![ErrorKind::Timeout],
            ..RetryConfig::default()
        };
        let r = Retrier::new("db1:6379".parse().unwrap(), &config);
        assert!(r.is_retryable(ErrorKind::Io));
        assert!(!r.is_retryable(ErrorKind::Timeout));
        assert!(!r.is_retryable(ErrorKind::CircuitOpen));
    }
}
