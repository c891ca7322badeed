//! Initialization gate.
//!
//! # Responsibilities
//! - Block construction until a readiness policy is satisfied
//! - Wait for one endpoint's first health result, bounded
//!
//! # Design Decisions
//! - Event driven: listeners feed a channel, nothing polls
//! - Listen first, then re-check the status, so a result landing between
//!   the check and the registration is never missed
//! - Endpoints without a health check count as available immediately

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};

use crate::error::{FailoverError, FailoverResult};
use crate::health::registry::HealthRegistry;
use crate::health::state::HealthStatus;
use crate::net::Endpoint;

/// Upper bound on the policy wait when no endpoint is monitored.
const DEFAULT_POLICY_WAIT: Duration = Duration::from_secs(30);

/// Outcome of evaluating a readiness policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Success,
    Fail,
}

/// Readiness rule for finishing initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitializationPolicy {
    AllAvailable,
    #[default]
    MajorityAvailable,
    OneAvailable,
}

impl InitializationPolicy {
    pub fn evaluate(&self, available: usize, failed: usize, pending: usize) -> Decision {
        let total = available + failed + pending;
        match self {
            InitializationPolicy::AllAvailable => {
                if failed > 0 {
                    Decision::Fail
                } else if pending == 0 {
                    Decision::Success
                } else {
                    Decision::Continue
                }
            }
            InitializationPolicy::MajorityAvailable => {
                if available * 2 > total {
                    Decision::Success
                } else if (available + pending) * 2 <= total {
                    Decision::Fail
                } else {
                    Decision::Continue
                }
            }
            InitializationPolicy::OneAvailable => {
                if available > 0 {
                    Decision::Success
                } else if pending == 0 {
                    Decision::Fail
                } else {
                    Decision::Continue
                }
            }
        }
    }
}

/// Waits on health results during construction.
#[derive(Debug, Clone)]
pub struct StatusTracker {
    health: Arc<HealthRegistry>,
}

impl StatusTracker {
    pub fn new(health: Arc<HealthRegistry>) -> Self {
        Self { health }
    }

    /// Block until `policy` resolves over `endpoints`.
    pub async fn wait_for_policy(
        &self,
        endpoints: &[Endpoint],
        policy: InitializationPolicy,
    ) -> FailoverResult<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<(Endpoint, HealthStatus)>();
        let mut subscriptions = Vec::new();
        let mut pending: HashSet<Endpoint> = HashSet::new();
        let (mut available, mut failed) = (0usize, 0usize);
        let mut max_wait = Duration::ZERO;

        for endpoint in endpoints {
            let Some(wait) = self.health.max_wait_for(endpoint) else {
                available += 1;
                continue;
            };
            max_wait = max_wait.max(wait);
            let tx = tx.clone();
            subscriptions.push(self.health.subscribe_endpoint(endpoint, move |change| {
                if change.new.is_known() {
                    let _ = tx.send((change.endpoint.clone(), change.new));
                }
            }));
            match self.health.status(endpoint) {
                HealthStatus::Healthy => available += 1,
                HealthStatus::Unhealthy => failed += 1,
                HealthStatus::Unknown => {
                    pending.insert(endpoint.clone());
                }
            }
        }
        drop(tx);
        if max_wait.is_zero() {
            max_wait = DEFAULT_POLICY_WAIT;
        }
        let deadline = Instant::now() + max_wait;

        loop {
            match policy.evaluate(available, failed, pending.len()) {
                Decision::Success => return Ok(()),
                Decision::Fail => {
                    return Err(FailoverError::Initialization(format!(
                        "readiness policy {policy:?} failed: {available} available, {failed} unavailable"
                    )))
                }
                Decision::Continue => {}
            }
            match time::timeout_at(deadline, rx.recv()).await {
                Ok(Some((endpoint, status))) => {
                    if pending.remove(&endpoint) {
                        if status.is_healthy() {
                            available += 1;
                        } else {
                            failed += 1;
                        }
                    }
                }
                Ok(None) | Err(_) => {
                    return Err(FailoverError::Initialization(format!(
                        "readiness policy {policy:?} unresolved after {max_wait:?}: {} endpoint(s) still pending",
                        pending.len()
                    )))
                }
            }
        }
    }

    /// Wait for the first known status of `endpoint`.
    ///
    /// Unmonitored endpoints are reported healthy.
    pub async fn wait_for_status(&self, endpoint: &Endpoint) -> FailoverResult<HealthStatus> {
        let Some(max_wait) = self.health.max_wait_for(endpoint) else {
            return Ok(HealthStatus::Healthy);
        };
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let _subscription = self.health.subscribe_endpoint(endpoint, move |change| {
            if change.new.is_known() {
                if let Some(tx) = tx.lock().expect("status waiter mutex poisoned").take() {
                    let _ = tx.send(change.new);
                }
            }
        });

        let current = self.health.status(endpoint);
        if current.is_known() {
            return Ok(current);
        }
        match time::timeout(max_wait, rx).await {
            Ok(Ok(status)) => Ok(status),
            _ => Err(FailoverError::Initialization(format!(
                "no health result for {endpoint} within {max_wait:?}"
            ))),
        }
    }
}
