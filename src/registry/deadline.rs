//! Monotonic deadlines shared between tasks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

/// A point in time that only ever moves forward, except for an explicit `clear`.
///
/// Stored as milliseconds since the deadline's own origin.
#[derive(Debug)]
pub struct Deadline {
    origin: Instant,
    until_ms: AtomicU64,
}

impl Default for Deadline {
    fn default() -> Self {
        Self::new()
    }
}

impl Deadline {
    /// An already expired deadline.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            until_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        saturating_millis(self.origin.elapsed())
    }

    /// Push the deadline to `now + period` unless it already lies further out.
    pub fn extend(&self, period: Duration) {
        let target = self.now_ms().saturating_add(saturating_millis(period));
        let _ = self
            .until_ms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (target > current).then_some(target)
            });
    }

    pub fn is_active(&self) -> bool {
        self.now_ms() < self.until_ms.load(Ordering::Acquire)
    }

    pub fn remaining(&self) -> Duration {
        let until = self.until_ms.load(Ordering::Acquire);
        Duration::from_millis(until.saturating_sub(self.now_ms()))
    }

    /// If expired, move the deadline to `now + period`.
    ///
    /// Returns true for exactly one caller per expiry.
    pub fn try_advance(&self, period: Duration) -> bool {
        let current = self.until_ms.load(Ordering::Acquire);
        let now = self.now_ms();
        if now < current {
            return false;
        }
        let next = now.saturating_add(saturating_millis(period));
        self.until_ms
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn clear(&self) {
        self.until_ms.store(0, Ordering::Release);
    }
}

fn saturating_millis(period: Duration) -> u64 {
    u64::try_from(period.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_extend_never_moves_backwards() {
        let deadline = Deadline::new();
        assert!(!deadline.is_active());

        deadline.extend(Duration::from_secs(10));
        deadline.extend(Duration::from_secs(2));
        assert_eq!(deadline.remaining(), Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(deadline.is_active());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!deadline.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_advance_once_per_period() {
        let deadline = Deadline::new();
        assert!(deadline.try_advance(Duration::from_secs(5)));
        assert!(!deadline.try_advance(Duration::from_secs(5)));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(deadline.try_advance(Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periods_beyond_u64_millis_saturate() {
        let huge = Duration::from_millis(u64::MAX) + Duration::from_millis(1);

        let deadline = Deadline::new();
        deadline.extend(huge);
        assert!(deadline.is_active());
        assert!(deadline.remaining() > Duration::from_secs(86_400 * 365));

        let deadline = Deadline::new();
        assert!(deadline.try_advance(huge));
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(deadline.is_active());
        assert!(!deadline.try_advance(huge));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear() {
        let deadline = Deadline::new();
        deadline.extend(Duration::from_secs(60));
        deadline.clear();
        assert!(!deadline.is_active());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }
}
