//! Command execution with retry, failure detection and failover.
//!
//! # Responsibilities
//! - Route each command to the active endpoint
//! - Wrap the call in the endpoint's retrier (outer) and failure detector (inner)
//! - Fail over and re-issue on fallback error kinds, in a bounded loop
//!
//! # Data Flow
//! ```text
//! execute(cmd)
//!     → registry.assert_operability()
//!     → snapshot = registry.active()
//!     → retrier.run(detector.call(acquire → execute → release))
//!     → error kind in fallback list? fail_over_from(snapshot), next hop
//! ```
//!
//! # Design Decisions
//! - The active endpoint is read once per hop; a switch mid-call does not
//!   redirect the call already in progress
//! - Failures on an endpoint that stopped being active are reported as
//!   failed-during-failover (when enabled) so they are re-issued, not retried

use std::sync::Arc;

use crate::error::{ErrorKind, FailoverError, FailoverResult};
use crate::net::{Command, Reply};
use crate::observability::metrics;
use crate::registry::{EndpointRegistry, ManagedEndpoint};
use crate::resilience::CircuitState;

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    registry: Arc<EndpointRegistry>,
    fallback: Vec<ErrorKind>,
    retry_on_failover: bool,
    max_hops: u32,
}

impl CommandExecutor {
    pub fn new(registry: Arc<EndpointRegistry>) -> Self {
        let config = registry.config();
        let fallback = config.fallback.clone();
        let retry_on_failover = config.retry_on_failover;
        let max_hops = config.max_failover_hops;
        Self {
            registry,
            fallback,
            retry_on_failover,
            max_hops,
        }
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    pub async fn execute(&self, command: &Command) -> FailoverResult<Reply> {
        let mut hops = 0;
        loop {
            self.registry.assert_operability()?;
            let snapshot = self.registry.active();

            let error = match self.execute_on(&snapshot, command).await {
                Ok(reply) => {
                    metrics::record_command(snapshot.endpoint(), "success");
                    return Ok(reply);
                }
                Err(e) => e,
            };
            metrics::record_command(snapshot.endpoint(), "error");

            if self.fallback.contains(&error.kind()) && hops < self.max_hops {
                hops += 1;
                tracing::warn!(
                    endpoint = %snapshot.endpoint(),
                    error = %error,
                    hop = hops,
                    "Command failed, failing over and re-issuing"
                );
                self.registry.fail_over_from(&snapshot).await?;
                continue;
            }

            if snapshot.detector().state() == CircuitState::Open && self.registry.is_active(&snapshot) {
                if let Err(e) = self.registry.fail_over_from(&snapshot).await {
                    tracing::error!(endpoint = %snapshot.endpoint(), error = %e, "Failover after tripped circuit did not complete");
                }
            }
            return Err(error);
        }
    }

    async fn execute_on(&self, snapshot: &Arc<ManagedEndpoint>, command: &Command) -> FailoverResult<Reply> {
        snapshot
            .retrier()
            .run(move || async move {
                snapshot
                    .detector()
                    .call(move || async move {
                        self.attempt(snapshot, command)
                            .await
                            .map_err(|e| self.classify(snapshot, e))
                    })
                    .await
            })
            .await
    }

    async fn attempt(&self, snapshot: &ManagedEndpoint, command: &Command) -> FailoverResult<Reply> {
        let conn = snapshot.acquire().await?;
        let result = conn.execute(command).await;
        snapshot.pool().release(conn);
        Ok(result?)
    }

    fn classify(&self, snapshot: &Arc<ManagedEndpoint>, error: FailoverError) -> FailoverError {
        if self.retry_on_failover
            && !self.registry.is_active(snapshot)
            && snapshot.detector().tracks(error.kind())
        {
            return FailoverError::FailedDuringFailover {
                endpoint: snapshot.endpoint().clone(),
                source: Box::new(error),
            };
        }
        error
    }
}
