//! Multi-endpoint database client failover core.
//!
//! Routes commands to one active endpoint out of several equivalent ones,
//! detects degradation through health probes and a dual-threshold failure
//! detector, and switches traffic to the next healthy endpoint by weight.

pub mod config;
pub mod error;
pub mod executor;
pub mod health;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod observer;
pub mod pool;
pub mod registry;
pub mod resilience;

pub use config::FailoverConfig;
pub use error::{ConnectionError, ErrorKind, FailoverError, FailoverResult};
pub use executor::CommandExecutor;
pub use lifecycle::Shutdown;
pub use net::{Command, Connection, Connector, Endpoint, Reply};
pub use registry::{EndpointRegistry, ManagedEndpoint, SwitchEvent, SwitchReason};
