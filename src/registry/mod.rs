//! Active endpoint registry.
//!
//! # Responsibilities
//! - Own every managed endpoint and the single active pointer
//! - Fail over on health-check and circuit-breaker triggers, fail back on a timer
//! - Apply operator overrides (set/force active, add/remove endpoints)
//! - Publish switch events
//!
//! # Data Flow
//! ```text
//! connect(config)
//!     → build managed endpoints (pool, retrier, detector, probe)
//!     → StatusTracker: readiness policy, then first HEALTHY by weight
//!     → install active, start event task + failback checker
//!
//! HealthMonitor ──status change──▶ mpsc ──▶ event task ──▶ switch_to_healthy
//! CommandExecutor ──fallback error──▶ fail_over_from ──▶ switch_to_healthy
//! FailbackChecker ──tick──▶ failback_sweep ──▶ set_active (validated)
//! ```
//!
//! # Design Decisions
//! - Reads of the active endpoint are lock-free (`ArcSwap`)
//! - Writes happen only under a fair async mutex; `install_locked` takes the
//!   guard so the pointer cannot be swapped without it
//! - Health events are consumed in order by one task; events raised during
//!   construction queue up and are re-checked against current status
//! - Fast failover severs the old pool after the lock is released

mod attempts;
mod deadline;
mod events;
mod failback;
mod managed;
mod selection;

pub use attempts::FailoverAttempts;
pub use deadline::Deadline;
pub use events::{SwitchEvent, SwitchReason};
pub use managed::ManagedEndpoint;
pub use selection::{compare_priority, select_best, sort_by_priority, Weighted};

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

use crate::config::{validate_config, validation::validate_endpoint, EndpointConfig, FailoverConfig};
use crate::error::{ConnectionError, FailoverError, FailoverResult};
use crate::health::{
    build_probe, HealthProbe, HealthRegistry, HealthStatusChange, InitializationPolicy,
    StatusTracker,
};
use crate::lifecycle::shutdown::Shutdown;
use crate::net::{Connector, Endpoint};
use crate::observability::metrics;
use crate::observer::{ListenerTable, Subscription};
use crate::pool::TrackingPool;
use crate::resilience::{CircuitState, FailureDetector, Retrier};

use failback::FailbackChecker;

/// How long `close` waits for a background task before aborting it.
const TASK_STOP_GRACE: Duration = Duration::from_secs(1);

/// Outcome of applying a reloaded endpoint list.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: Vec<Endpoint>,
    pub removed: Vec<Endpoint>,
    pub failed: usize,
}

#[derive(Debug)]
pub struct EndpointRegistry {
    config: FailoverConfig,
    connector: Arc<dyn Connector>,
    endpoints: DashMap<Endpoint, Arc<ManagedEndpoint>>,
    active: ArcSwap<ManagedEndpoint>,
    change_lock: Mutex<()>,
    failover_lock: Mutex<()>,
    attempts: FailoverAttempts,
    health: Arc<HealthRegistry>,
    health_events: mpsc::UnboundedSender<HealthStatusChange>,
    health_subscriptions: DashMap<Endpoint, Subscription>,
    switch_listeners: ListenerTable<SwitchEvent>,
    next_ordinal: AtomicUsize,
    shutdown: Shutdown,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl EndpointRegistry {
    /// Build every endpoint, wait for the readiness policy and select the
    /// initial active endpoint.
    pub async fn connect(config: &FailoverConfig, connector: Arc<dyn Connector>) -> FailoverResult<Arc<Self>> {
        if let Err(errors) = validate_config(config) {
            return Err(FailoverError::validation(join_errors(&errors)));
        }

        let health = Arc::new(HealthRegistry::new());
        let mut built = Vec::with_capacity(config.endpoints.len());
        for (ordinal, endpoint_config) in config.endpoints.iter().enumerate() {
            built.push(build_managed(config, endpoint_config, ordinal, &connector, &health)?);
        }
        let Some((first, _)) = built.first() else {
            return Err(FailoverError::validation("at least one endpoint is required"));
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            config: config.clone(),
            connector,
            endpoints: DashMap::new(),
            active: ArcSwap::new(first.clone()),
            change_lock: Mutex::new(()),
            failover_lock: Mutex::new(()),
            attempts: FailoverAttempts::new(
                config.max_failover_attempts,
                Duration::from_millis(config.failover_cooldown_ms),
            ),
            health,
            health_events: events_tx,
            health_subscriptions: DashMap::new(),
            switch_listeners: ListenerTable::new(),
            next_ordinal: AtomicUsize::new(built.len()),
            shutdown: Shutdown::new(),
            tasks: std::sync::Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        for (managed, probe) in built {
            registry.register(managed, probe).await;
        }

        tracing::info!(
            endpoints = registry.endpoints.len(),
            policy = ?config.initialization_policy,
            "Selecting initial endpoint"
        );
        if let Err(e) = registry.initialize(config.initialization_policy).await {
            tracing::error!(error = %e, "Endpoint registry initialization failed");
            registry.close().await;
            return Err(e);
        }
        registry.spawn_background(events_rx);
        Ok(registry)
    }

    async fn initialize(&self, policy: InitializationPolicy) -> FailoverResult<()> {
        let tracker = StatusTracker::new(self.health.clone());
        tracker.wait_for_policy(&self.endpoints(), policy).await?;

        let initial = self.wait_for_initial_healthy(&tracker).await?;
        {
            let guard = self.change_lock.lock().await;
            self.install_locked(&guard, initial.clone());
        }
        tracing::info!(
            endpoint = %initial.endpoint(),
            weight = initial.weight(),
            "Initial active endpoint selected"
        );

        if !initial.is_healthy() {
            self.switch_to_healthy(SwitchReason::HealthCheck, Some(&initial)).await?;
        }
        Ok(())
    }

    /// First endpoint, by descending weight, whose first health result is HEALTHY.
    async fn wait_for_initial_healthy(&self, tracker: &StatusTracker) -> FailoverResult<Arc<ManagedEndpoint>> {
        let mut ordered = self.managed_endpoints();
        sort_by_priority(&mut ordered);
        for managed in ordered {
            let status = tracker.wait_for_status(managed.endpoint()).await?;
            if status.is_healthy() {
                return Ok(managed);
            }
            tracing::info!(endpoint = %managed.endpoint(), status = %status, "Endpoint not healthy, trying next");
        }
        Err(FailoverError::Initialization(
            "all configured endpoints are unhealthy".to_string(),
        ))
    }

    fn spawn_background(self: &Arc<Self>, events_rx: mpsc::UnboundedReceiver<HealthStatusChange>) {
        let weak = Arc::downgrade(self);
        let mut tasks = vec![tokio::spawn(process_health_events(
            weak.clone(),
            events_rx,
            self.shutdown.subscribe(),
        ))];
        if self.config.failback.enabled {
            let checker = FailbackChecker::new(weak, Duration::from_millis(self.config.failback.interval_ms));
            tasks.push(tokio::spawn(checker.run(self.shutdown.subscribe())));
        }
        self.tasks.lock().expect("registry task mutex poisoned").extend(tasks);
    }

    async fn register(&self, managed: Arc<ManagedEndpoint>, probe: Option<Arc<dyn HealthProbe>>) {
        let endpoint = managed.endpoint().clone();
        if let Some(probe) = probe {
            let tx = self.health_events.clone();
            let subscription = self.health.subscribe_endpoint(&endpoint, move |change| {
                let _ = tx.send(change.clone());
            });
            self.health_subscriptions.insert(endpoint.clone(), subscription);
            self.health.add(endpoint.clone(), probe).await;
        }
        self.endpoints.insert(endpoint, managed);
    }

    async fn on_health_change(&self, change: &HealthStatusChange) {
        tracing::debug!(
            endpoint = %change.endpoint,
            old = %change.old,
            new = %change.new,
            "Health status changed"
        );
        let Some(managed) = self.get(&change.endpoint) else {
            return;
        };
        if change.new.is_healthy() || managed.health_status().is_healthy() {
            return;
        }
        if !self.is_active(&managed) {
            return;
        }
        managed.set_grace_period();
        if let Err(e) = self.switch_to_healthy(SwitchReason::HealthCheck, Some(&managed)).await {
            tracing::error!(endpoint = %change.endpoint, error = %e, "Failover after failed health check did not complete");
        }
    }

    // --- Active pointer ---

    pub fn active(&self) -> Arc<ManagedEndpoint> {
        self.active.load_full()
    }

    pub fn active_endpoint(&self) -> Endpoint {
        self.active.load().endpoint().clone()
    }

    pub fn is_active(&self, managed: &Arc<ManagedEndpoint>) -> bool {
        Arc::ptr_eq(&*self.active.load(), managed)
    }

    fn install_locked(&self, _guard: &MutexGuard<'_, ()>, next: Arc<ManagedEndpoint>) -> Arc<ManagedEndpoint> {
        self.active.swap(next)
    }

    /// Install `candidate` as active. Returns the previous active endpoint, or
    /// `None` when nothing changed.
    async fn swap_active(
        &self,
        guard: &MutexGuard<'_, ()>,
        candidate: &Arc<ManagedEndpoint>,
        validate: bool,
    ) -> FailoverResult<Option<Arc<ManagedEndpoint>>> {
        let current = self.active.load_full();
        let same = Arc::ptr_eq(&current, candidate);
        if same && !candidate.is_forced_open() {
            return Ok(None);
        }
        if validate {
            self.validate_target(candidate).await?;
        }
        if same {
            tracing::warn!(endpoint = %candidate.endpoint(), "Active endpoint closed its circuit breaker");
        } else {
            tracing::warn!(
                from = %current.endpoint(),
                to = %candidate.endpoint(),
                "Active endpoint updated"
            );
        }
        Ok(Some(self.install_locked(guard, candidate.clone())))
    }

    /// Returns true when the pointer moved to a different endpoint.
    async fn finish_swap(&self, old: Option<Arc<ManagedEndpoint>>, candidate: &Arc<ManagedEndpoint>) -> bool {
        let Some(old) = old else {
            return false;
        };
        if Arc::ptr_eq(&old, candidate) {
            return false;
        }
        if self.config.fast_failover {
            tracing::info!(endpoint = %old.endpoint(), "Forcing disconnect of all connections to previous endpoint");
            old.pool().force_disconnect_all().await;
        }
        true
    }

    async fn set_active_internal(&self, candidate: &Arc<ManagedEndpoint>, validate: bool) -> FailoverResult<bool> {
        let old = {
            let guard = self.change_lock.lock().await;
            self.swap_active(&guard, candidate, validate).await?
        };
        Ok(self.finish_swap(old, candidate).await)
    }

    /// Close the candidate's breaker and PING it; restores FORCED_OPEN on failure.
    async fn validate_target(&self, candidate: &ManagedEndpoint) -> FailoverResult<()> {
        let detector = candidate.detector();
        let original = detector.state();
        detector.force_closed();

        let pool = candidate.pool();
        let result: Result<(), ConnectionError> = async {
            let conn = pool.acquire().await?;
            let pong = conn.ping().await;
            pool.release(conn);
            if pong? {
                Ok(())
            } else {
                Err(ConnectionError::Protocol("unexpected PING reply".to_string()))
            }
        }
        .await;

        if let Err(e) = result {
            if original == CircuitState::ForcedOpen {
                detector.force_open();
            }
            return Err(FailoverError::validation(format!(
                "{} failed to connect: {e}",
                candidate.endpoint()
            )));
        }
        Ok(())
    }

    // --- Failover ---

    fn find_healthy(&self, excluding: Option<&Arc<ManagedEndpoint>>) -> Option<Arc<ManagedEndpoint>> {
        let all = self.managed_endpoints();
        select_best(&all, excluding, ManagedEndpoint::is_healthy)
    }

    /// Switch to the best healthy endpoint other than `excluding`.
    ///
    /// Returns the new active endpoint, or `None` if the pointer did not move.
    pub async fn switch_to_healthy(
        &self,
        reason: SwitchReason,
        excluding: Option<&Arc<ManagedEndpoint>>,
    ) -> FailoverResult<Option<Endpoint>> {
        let Some(candidate) = self.find_healthy(excluding) else {
            return Err(self.attempts.on_no_healthy());
        };
        if !self.set_active_internal(&candidate, false).await? {
            return Ok(None);
        }
        self.attempts.reset();
        self.publish(reason, &candidate);
        Ok(Some(candidate.endpoint().clone()))
    }

    /// Fail over away from `snapshot` after a command failed on it.
    pub async fn fail_over_from(&self, snapshot: &Arc<ManagedEndpoint>) -> FailoverResult<()> {
        let _guard = self.failover_lock.lock().await;
        if snapshot.detector().state() != CircuitState::ForcedOpen {
            snapshot.detector().force_open();
            snapshot.set_grace_period();
            self.switch_to_healthy(SwitchReason::CircuitBreaker, Some(snapshot)).await?;
        } else if self.is_active(snapshot) {
            self.assert_operability()?;
        }
        Ok(())
    }

    /// Error out when the active endpoint is unusable and nothing can replace it.
    pub fn assert_operability(&self) -> FailoverResult<()> {
        let current = self.active();
        if !current.is_healthy() && self.find_healthy(Some(&current)).is_none() {
            return Err(self.attempts.on_no_healthy());
        }
        Ok(())
    }

    /// Promote the best healthy endpoint whose weight beats the active one.
    pub async fn failback_sweep(&self) -> FailoverResult<Option<Endpoint>> {
        let active = self.active();
        let all = self.managed_endpoints();
        let Some(best) = select_best(&all, Some(&active), |m| m.weight() > active.weight() && m.is_healthy())
        else {
            return Ok(None);
        };
        tracing::info!(
            from = %active.endpoint(),
            to = %best.endpoint(),
            "Performing failback to higher-weight endpoint"
        );
        if self.set_active_internal(&best, true).await? {
            self.publish(SwitchReason::Failback, &best);
            return Ok(Some(best.endpoint().clone()));
        }
        Ok(None)
    }

    pub fn failover_attempts(&self) -> u32 {
        self.attempts.count()
    }

    // --- Operator API ---

    /// Make `endpoint` active after validating it with a PING.
    pub async fn set_active(&self, endpoint: &Endpoint) -> FailoverResult<()> {
        let managed = self.require(endpoint)?;
        if self.set_active_internal(&managed, true).await? {
            self.publish(SwitchReason::Forced, &managed);
        }
        Ok(())
    }

    /// Make `endpoint` active and keep every other endpoint ineligible for `duration`.
    pub async fn force_active(&self, endpoint: &Endpoint, duration: Duration) -> FailoverResult<()> {
        let managed = self.require(endpoint)?;
        managed.clear_grace_period();
        if !managed.is_healthy() {
            return Err(FailoverError::validation(format!(
                "endpoint {endpoint} is not healthy; choose a healthy endpoint"
            )));
        }
        for other in self.managed_endpoints() {
            if !Arc::ptr_eq(&other, &managed) {
                other.extend_grace_period(duration);
            }
        }
        self.set_active(endpoint).await
    }

    pub async fn add(&self, endpoint_config: &EndpointConfig) -> FailoverResult<()> {
        let mut errors = Vec::new();
        validate_endpoint("endpoint", endpoint_config, &mut errors);
        if !errors.is_empty() {
            return Err(FailoverError::validation(join_errors(&errors)));
        }

        let _guard = self.change_lock.lock().await;
        let ordinal = self.next_ordinal.fetch_add(1, Ordering::Relaxed);
        let (managed, probe) = build_managed(&self.config, endpoint_config, ordinal, &self.connector, &self.health)?;
        if self.endpoints.contains_key(managed.endpoint()) {
            return Err(FailoverError::validation(format!(
                "endpoint {} already exists",
                managed.endpoint()
            )));
        }
        tracing::info!(endpoint = %managed.endpoint(), weight = managed.weight(), "Adding endpoint");
        self.register(managed, probe).await;
        Ok(())
    }

    /// Remove `endpoint`, failing over first when it is active.
    pub async fn remove(&self, endpoint: &Endpoint) -> FailoverResult<()> {
        let target = self.require(endpoint)?;
        let (old, replacement) = {
            let guard = self.change_lock.lock().await;
            if self.endpoints.len() < 2 {
                return Err(FailoverError::validation("cannot remove the last remaining endpoint"));
            }
            let mut old = None;
            let mut replacement = None;
            if self.is_active(&target) {
                tracing::info!(endpoint = %endpoint, "Active endpoint is being removed, selecting a replacement");
                let Some(candidate) = self.find_healthy(Some(&target)) else {
                    return Err(FailoverError::validation(format!(
                        "cannot remove {endpoint}: no healthy endpoint to switch to"
                    )));
                };
                old = self.swap_active(&guard, &candidate, true).await?;
                replacement = Some(candidate);
            }
            self.health_subscriptions.remove(endpoint);
            self.endpoints.remove(endpoint);
            target.set_disabled(true);
            (old, replacement)
        };

        if let Some(candidate) = replacement {
            if self.finish_swap(old, &candidate).await {
                self.publish(SwitchReason::Forced, &candidate);
            }
        }
        self.health.remove(endpoint).await;
        target.close().await;
        tracing::info!(endpoint = %endpoint, "Endpoint removed");
        Ok(())
    }

    /// Converge the endpoint set to `configs`: add new endpoints, remove
    /// unlisted ones. Existing endpoints keep their settings.
    pub async fn reconcile(&self, configs: &[EndpointConfig]) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        let mut desired = HashSet::new();

        for endpoint_config in configs {
            let endpoint = match endpoint_config.address.parse::<Endpoint>() {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    tracing::warn!(address = %endpoint_config.address, error = %e, "Skipping invalid endpoint");
                    summary.failed += 1;
                    continue;
                }
            };
            desired.insert(endpoint.clone());
            if self.endpoints.contains_key(&endpoint) {
                continue;
            }
            match self.add(endpoint_config).await {
                Ok(()) => summary.added.push(endpoint),
                Err(e) => {
                    tracing::warn!(endpoint = %endpoint, error = %e, "Failed to add endpoint");
                    summary.failed += 1;
                }
            }
        }

        if desired.is_empty() {
            tracing::warn!("Reloaded endpoint list is empty, keeping current endpoints");
            return summary;
        }
        for endpoint in self.endpoints() {
            if desired.contains(&endpoint) {
                continue;
            }
            match self.remove(&endpoint).await {
                Ok(()) => summary.removed.push(endpoint),
                Err(e) => {
                    tracing::warn!(endpoint = %endpoint, error = %e, "Failed to remove endpoint");
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    // --- Queries ---

    pub fn get(&self, endpoint: &Endpoint) -> Option<Arc<ManagedEndpoint>> {
        self.endpoints.get(endpoint).map(|e| e.value().clone())
    }

    fn require(&self, endpoint: &Endpoint) -> FailoverResult<Arc<ManagedEndpoint>> {
        self.get(endpoint)
            .ok_or_else(|| FailoverError::validation(format!("endpoint {endpoint} is not configured")))
    }

    pub fn is_healthy(&self, endpoint: &Endpoint) -> FailoverResult<bool> {
        Ok(self.require(endpoint)?.is_healthy())
    }

    /// Configured endpoints in configuration order.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.managed_endpoints()
            .iter()
            .map(|m| m.endpoint().clone())
            .collect()
    }

    fn managed_endpoints(&self) -> Vec<Arc<ManagedEndpoint>> {
        let mut all: Vec<Arc<ManagedEndpoint>> = self.endpoints.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|m| m.ordinal());
        all
    }

    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    pub fn config(&self) -> &FailoverConfig {
        &self.config
    }

    // --- Events ---

    pub fn subscribe_switch<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SwitchEvent) + Send + Sync + 'static,
    {
        self.switch_listeners.subscribe(listener)
    }

    fn publish(&self, reason: SwitchReason, managed: &Arc<ManagedEndpoint>) {
        tracing::info!(
            reason = %reason,
            endpoint = %managed.endpoint(),
            weight = managed.weight(),
            "Active endpoint switched"
        );
        metrics::record_switch(reason.as_str(), managed.endpoint());
        self.switch_listeners.emit(&SwitchEvent {
            reason,
            endpoint: managed.endpoint().clone(),
            managed: managed.clone(),
        });
    }

    // --- Shutdown ---

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop background tasks and monitors, then close every pool.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.trigger();
        let tasks = std::mem::take(&mut *self.tasks.lock().expect("registry task mutex poisoned"));
        for mut task in tasks {
            if tokio::time::timeout(TASK_STOP_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
        self.health_subscriptions.clear();
        self.health.close().await;
        for managed in self.managed_endpoints() {
            managed.close().await;
        }
        tracing::info!("Endpoint registry closed");
    }
}

async fn process_health_events(
    registry: Weak<EndpointRegistry>,
    mut events: mpsc::UnboundedReceiver<HealthStatusChange>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            change = events.recv() => {
                let Some(change) = change else {
                    break;
                };
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.on_health_change(&change).await;
            }
            _ = shutdown.recv() => break,
        }
    }
}

type BuiltEndpoint = (Arc<ManagedEndpoint>, Option<Arc<dyn HealthProbe>>);

fn build_managed(
    config: &FailoverConfig,
    endpoint_config: &EndpointConfig,
    ordinal: usize,
    connector: &Arc<dyn Connector>,
    health: &Arc<HealthRegistry>,
) -> FailoverResult<BuiltEndpoint> {
    let endpoint: Endpoint = endpoint_config.address.parse().map_err(|e| {
        FailoverError::validation(format!("invalid endpoint address {}: {e}", endpoint_config.address))
    })?;
    let probe = build_probe(&endpoint, &endpoint_config.health_check, connector.clone())
        .map_err(|e| FailoverError::validation(format!("health check for {endpoint}: {e}")))?;

    let managed = ManagedEndpoint::new(
        endpoint.clone(),
        ordinal,
        endpoint_config.weight,
        TrackingPool::new(endpoint.clone(), connector.clone(), &endpoint_config.pool),
        Retrier::new(endpoint.clone(), &config.retry),
        FailureDetector::new(endpoint, &config.detector),
        health.clone(),
        probe.is_some(),
        Duration::from_millis(config.grace_period_ms),
    );
    Ok((Arc::new(managed), probe))
}

fn join_errors<E: ToString>(errors: &[E]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}
