//! Active endpoint switch events.

use std::fmt;
use std::sync::Arc;

use crate::net::Endpoint;
use crate::registry::managed::ManagedEndpoint;

/// Why the active endpoint changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchReason {
    CircuitBreaker,
    HealthCheck,
    Failback,
    Forced,
}

impl SwitchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchReason::CircuitBreaker => "circuit_breaker",
            SwitchReason::HealthCheck => "health_check",
            SwitchReason::Failback => "failback",
            SwitchReason::Forced => "forced",
        }
    }
}

impl fmt::Display for SwitchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published after a new endpoint was installed as active.
#[derive(Debug, Clone)]
pub struct SwitchEvent {
    pub reason: SwitchReason,
    pub endpoint: Endpoint,
    pub managed: Arc<ManagedEndpoint>,
}
