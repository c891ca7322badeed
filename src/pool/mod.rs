//! Connection pooling subsystem.
//!
//! # Data Flow
//! ```text
//! Executor snapshot of active endpoint
//!     → tracking.rs acquire() (bounded wait for a permit)
//!     → idle connection, or Connector::connect()
//!     → PooledConnection guard (execute / ping)
//!     → drop returns it to the idle queue
//!
//! Fast failover:
//!     force_disconnect_all() → every issued connection severed
//! ```
//!
//! # Design Decisions
//! - One pool per managed endpoint
//! - The pool, not the caller, remembers what it handed out

pub mod tracking;

pub use tracking::{PoolStats, PooledConnection, TrackingPool};
