//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Pool needs a connection
//!     → connection.rs (Connector / Connection seams)
//!     → tcp.rs (default TCP connector, line protocol)
//!     → endpoint.rs (host:port identity used as map key everywhere)
//! ```
//!
//! # Design Decisions
//! - The core depends only on the traits; tests plug in scripted connectors
//! - Endpoints are immutable and cheap to clone

pub mod connection;
pub mod endpoint;
pub mod tcp;

pub use connection::{Command, Connection, ConnectionId, Connector, Reply};
pub use endpoint::Endpoint;
pub use tcp::TcpConnector;
