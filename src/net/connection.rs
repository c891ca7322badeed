//! Connection seams consumed by the failover core.
//!
//! # Responsibilities
//! - Define what the core needs from a physical connection
//! - Define how pools obtain new connections for an endpoint
//! - Generate unique connection IDs for tracing and tracking
//!
//! # Design Decisions
//! - Methods take `&self` so a forced disconnect can race an in-flight call
//! - Commands and replies stay opaque; encoding is the connector's business

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ConnectionError;
use crate::net::Endpoint;

/// Global atomic counter for connection IDs.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A command name plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Vec<String>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Reply payload returned by a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply(pub String);

impl Reply {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One physical connection to an endpoint.
#[async_trait]
pub trait Connection: Send + Sync + fmt::Debug {
    /// Send a command and wait for its reply.
    async fn execute(&self, command: &Command) -> Result<Reply, ConnectionError>;

    /// Liveness round-trip. `Ok(false)` means an unexpected reply.
    async fn ping(&self) -> Result<bool, ConnectionError>;

    /// Close the underlying transport. Must be safe to call more than once.
    async fn close(&self);
}

/// Factory for connections to a given endpoint.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Connection>, ConnectionError>;
}
