//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Probe strategies (probe.rs, ping.rs, echo.rs, availability.rs):
//!     One check against one endpoint → HEALTHY / UNHEALTHY / error
//!
//! Monitor (monitor.rs):
//!     Periodic timer
//!     → Spawned probe round, bounded by max_wait_for
//!     → CAS into last result (state.rs)
//!     → Status-change event only on transition
//!
//! Registry (registry.rs):
//!     Monitor callback → global + per-endpoint listeners
//!
//! Tracker (tracker.rs):
//!     Listeners → readiness policy → construction unblocks
//! ```
//!
//! # Design Decisions
//! - Probe errors never leave the monitor; they become UNHEALTHY
//! - Status is per-endpoint and never reverts to UNKNOWN
//! - Endpoints without a probe are untracked and treated as healthy

pub mod availability;
pub mod echo;
pub mod monitor;
pub mod ping;
pub mod probe;
pub mod registry;
pub mod rest_api;
pub mod state;
pub mod tracker;

pub use monitor::HealthMonitor;
pub use probe::{build_probe, HealthProbe, NoopProbe, ProbeError, ProbePolicy, ProbeSettings};
pub use registry::HealthRegistry;
pub use state::{HealthStatus, HealthStatusChange};
pub use tracker::{Decision, InitializationPolicy, StatusTracker};
