//! Failover attempt accounting for the no-healthy-endpoint path.
//!
//! # Design Decisions
//! - One counted attempt per cooldown window, no matter how many callers
//!   hit the path concurrently (CAS on the freeze deadline)
//! - The counter resets on every successful switch

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::error::FailoverError;
use crate::observability::metrics;
use crate::registry::deadline::Deadline;

#[derive(Debug)]
pub struct FailoverAttempts {
    max: u32,
    cooldown: Duration,
    count: AtomicU32,
    freeze: Deadline,
}

impl FailoverAttempts {
    pub fn new(max: u32, cooldown: Duration) -> Self {
        Self {
            max,
            cooldown,
            count: AtomicU32::new(0),
            freeze: Deadline::new(),
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::Release);
    }

    /// Account for one attempt that found no healthy endpoint and return
    /// the error to raise.
    pub fn on_no_healthy(&self) -> FailoverError {
        tracing::error!("No healthy endpoint available to switch to");
        if self.count() > self.max {
            return self.permanent();
        }
        let current = if self.freeze.try_advance(self.cooldown) {
            self.count.fetch_add(1, Ordering::AcqRel) + 1
        } else {
            self.count()
        };
        if current > self.max {
            self.permanent()
        } else {
            metrics::record_unavailable("temporary");
            FailoverError::TemporarilyUnavailable
        }
    }

    fn permanent(&self) -> FailoverError {
        metrics::record_unavailable("permanent");
        FailoverError::PermanentlyUnavailable
    }
}
