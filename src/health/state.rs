//! Endpoint health status.
//!
//! # States
//! - Unknown: no probe round has completed yet
//! - Healthy: last accepted round passed
//! - Unhealthy: last accepted round failed, timed out, or errored
//!
//! # State Transitions
//! ```text
//! Unknown → Healthy | Unhealthy: first completed round
//! Healthy ←→ Unhealthy: any later completed round
//! (never back to Unknown)
//! ```

use std::fmt;

use crate::net::Endpoint;

/// Health status of one endpoint.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthStatus {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthStatus {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthStatus::Healthy,
            2 => HealthStatus::Unhealthy,
            _ => HealthStatus::Unknown,
        }
    }
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }

    pub fn is_known(&self) -> bool {
        *self != HealthStatus::Unknown
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published when an endpoint's accepted status changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatusChange {
    pub endpoint: Endpoint,
    pub old: HealthStatus,
    pub new: HealthStatus,
}
