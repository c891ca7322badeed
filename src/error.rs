//! Error taxonomy shared by every subsystem.
//!
//! # Design Decisions
//! - Transport errors (`ConnectionError`) are distinct from routing outcomes
//!   (`FailoverError`) so retry and detector policies can classify them
//! - Every error maps to an `ErrorKind`; configuration lists kinds, not types
//! - Probe failures never appear here: monitors resolve them to UNHEALTHY

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::net::Endpoint;

/// Classification used by retry, failure-detector and fallback policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Io,
    Timeout,
    Disconnected,
    PoolExhausted,
    PoolClosed,
    Unavailable,
    Server,
    Protocol,
    CircuitOpen,
    FailedDuringFailover,
    Validation,
    TemporarilyUnavailable,
    PermanentlyUnavailable,
    Initialization,
}

impl ErrorKind {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Io => "io",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Disconnected => "disconnected",
            ErrorKind::PoolExhausted => "pool_exhausted",
            ErrorKind::PoolClosed => "pool_closed",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Server => "server",
            ErrorKind::Protocol => "protocol",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::FailedDuringFailover => "failed_during_failover",
            ErrorKind::Validation => "validation",
            ErrorKind::TemporarilyUnavailable => "temporarily_unavailable",
            ErrorKind::PermanentlyUnavailable => "permanently_unavailable",
            ErrorKind::Initialization => "initialization",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by a single connection or pool.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Socket level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation did not complete within its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The connection was severed by a forced pool disconnect.
    #[error("connection was force-disconnected")]
    Disconnected,

    /// No connection became available within the acquire timeout.
    #[error("pool for {endpoint} exhausted after waiting {waited:?}")]
    PoolExhausted { endpoint: Endpoint, waited: Duration },

    /// The pool was closed or is draining.
    #[error("pool for {0} is closed")]
    PoolClosed(Endpoint),

    /// The endpoint is currently excluded from traffic.
    #[error("endpoint {0} is not healthy")]
    Unavailable(Endpoint),

    /// The server answered with an error reply.
    #[error("server error: {0}")]
    Server(String),

    /// The reply could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ConnectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectionError::Io(_) => ErrorKind::Io,
            ConnectionError::Timeout(_) => ErrorKind::Timeout,
            ConnectionError::Disconnected => ErrorKind::Disconnected,
            ConnectionError::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            ConnectionError::PoolClosed(_) => ErrorKind::PoolClosed,
            ConnectionError::Unavailable(_) => ErrorKind::Unavailable,
            ConnectionError::Server(_) => ErrorKind::Server,
            ConnectionError::Protocol(_) => ErrorKind::Protocol,
        }
    }
}

/// Errors surfaced to callers of the registry and executor.
#[derive(Debug, Error)]
pub enum FailoverError {
    /// Transport failure that survived the retry policy.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The endpoint's failure detector refused the call.
    #[error("circuit breaker for {0} is open")]
    CircuitOpen(Endpoint),

    /// Bad input from an operator or configuration; never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No healthy endpoint right now; the failover budget is not spent yet.
    #[error("no healthy endpoint is available; retry later")]
    TemporarilyUnavailable,

    /// The failover budget is spent; operator action is required.
    #[error("no healthy endpoint is available and failover attempts are exhausted")]
    PermanentlyUnavailable,

    /// A command on a no-longer-active endpoint failed mid-switch.
    #[error("command failed during failover away from {endpoint}: {source}")]
    FailedDuringFailover {
        endpoint: Endpoint,
        #[source]
        source: Box<FailoverError>,
    },

    /// Construction could not select an initial endpoint.
    #[error("initialization failed: {0}")]
    Initialization(String),
}

impl FailoverError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FailoverError::Connection(e) => e.kind(),
            FailoverError::CircuitOpen(_) => ErrorKind::CircuitOpen,
            FailoverError::Validation(_) => ErrorKind::Validation,
            FailoverError::TemporarilyUnavailable => ErrorKind::TemporarilyUnavailable,
            FailoverError::PermanentlyUnavailable => ErrorKind::PermanentlyUnavailable,
            FailoverError::FailedDuringFailover { .. } => ErrorKind::FailedDuringFailover,
            FailoverError::Initialization(_) => ErrorKind::Initialization,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        FailoverError::Validation(message.into())
    }
}

/// Result type for registry and executor operations.
pub type FailoverResult<T> = Result<T, FailoverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let endpoint: Endpoint = "db1:6379".parse().unwrap();
        assert_eq!(ConnectionError::Disconnected.kind(), ErrorKind::Disconnected);
        assert_eq!(
            FailoverError::from(ConnectionError::Timeout(Duration::from_secs(1))).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(FailoverError::CircuitOpen(endpoint).kind(), ErrorKind::CircuitOpen);
    }

    #[test]
    fn test_kind_deserializes_snake_case() {
        #[derive(Deserialize)]
        struct Kinds {
            kinds: Vec<ErrorKind>,
        }
        let parsed: Kinds = toml::from_str(r#"kinds = ["io", "circuit_open", "failed_during_failover"]"#).unwrap();
        assert_eq!(
            parsed.kinds,
            vec![ErrorKind::Io, ErrorKind::CircuitOpen, ErrorKind::FailedDuringFailover]
        );
    }

    #[test]
    fn test_error_display() {
        let endpoint: Endpoint = "db1:6379".parse().unwrap();
        let err = FailoverError::FailedDuringFailover {
            endpoint,
            source: Box::new(ConnectionError::Disconnected.into()),
        };
        assert!(err.to_string().contains("db1:6379"));
        assert!(err.to_string().contains("force-disconnected"));
    }
}
