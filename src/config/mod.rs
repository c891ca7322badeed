//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, all errors at once)
//!     → FailoverConfig (validated, immutable)
//!     → EndpointRegistry::connect
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → agent calls EndpointRegistry::reconcile with the new endpoint list
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only the endpoint list is hot-reloaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod secret;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    DetectorConfig, EndpointConfig, FailbackConfig, FailoverConfig, HealthCheckConfig,
    HealthCheckKind, ObservabilityConfig, PoolConfig, RetryConfig,
};
pub use secret::SecretBytes;
pub use validation::{validate_config, ValidationError};
pub use watcher::ConfigWatcher;
