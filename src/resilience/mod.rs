//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Command to endpoint:
//!     → retries.rs (outer: retry retryable kinds with backoff.rs delays)
//!     → failure_detector.rs (inner: refuse while open, record outcome)
//!     → circuit_breaker.rs (state machine + sliding-window metrics)
//!     → timeouts.rs (every connect / acquire has a deadline)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Retry and detector classify errors by `ErrorKind` lists from config
//! - The detector owns the trip decision; the breaker only keeps state

pub mod backoff;
pub mod circuit_breaker;
pub mod failure_detector;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{CircuitBreaker, CircuitState, WindowMetrics};
pub use failure_detector::FailureDetector;
pub use retries::Retrier;
