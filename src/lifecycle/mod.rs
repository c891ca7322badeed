//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Logging/metrics → EndpointRegistry::connect → Agent
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop agent → Close registry (monitors, pools)
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then observability, then the registry
//! - Background tasks subscribe to one broadcast shutdown channel

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{Agent, AgentOptions, StartupError};
