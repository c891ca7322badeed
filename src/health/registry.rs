//! Health monitor registry and status fan-out.
//!
//! # Responsibilities
//! - Own one monitor per endpoint
//! - Dispatch status changes to global and per-endpoint listeners
//! - Answer "last known status of E"

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::health::monitor::{HealthMonitor, StatusCallback};
use crate::health::probe::HealthProbe;
use crate::health::state::{HealthStatus, HealthStatusChange};
use crate::net::Endpoint;
use crate::observer::{ListenerTable, Subscription};

#[derive(Debug, Default)]
struct Listeners {
    global: ListenerTable<HealthStatusChange>,
    per_endpoint: DashMap<Endpoint, Arc<ListenerTable<HealthStatusChange>>>,
}

impl Listeners {
    fn dispatch(&self, change: &HealthStatusChange) {
        self.global.emit(change);
        let table = self.per_endpoint.get(&change.endpoint).map(|t| t.value().clone());
        if let Some(table) = table {
            table.emit(change);
        }
    }
}

/// Registry of health monitors.
#[derive(Debug, Default)]
pub struct HealthRegistry {
    monitors: DashMap<Endpoint, Arc<HealthMonitor>>,
    listeners: Arc<Listeners>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start monitoring `endpoint`, replacing and stopping any prior monitor.
    pub async fn add(&self, endpoint: Endpoint, probe: Arc<dyn HealthProbe>) -> Arc<HealthMonitor> {
        let listeners = self.listeners.clone();
        let callback: StatusCallback = Arc::new(move |change| listeners.dispatch(&change));
        let monitor = HealthMonitor::new(endpoint.clone(), probe, callback);
        let previous = self.monitors.insert(endpoint, monitor.clone());
        monitor.start();
        if let Some(previous) = previous {
            previous.stop().await;
        }
        monitor
    }

    /// Stop and forget the monitor for `endpoint`.
    pub async fn remove(&self, endpoint: &Endpoint) {
        let removed = self.monitors.remove(endpoint);
        if let Some((_, monitor)) = removed {
            monitor.stop().await;
        }
        self.listeners.per_endpoint.remove(endpoint);
    }

    /// Last accepted status; `Unknown` when unmonitored.
    pub fn status(&self, endpoint: &Endpoint) -> HealthStatus {
        self.monitors
            .get(endpoint)
            .map(|m| m.status())
            .unwrap_or(HealthStatus::Unknown)
    }

    pub fn has_health_check(&self, endpoint: &Endpoint) -> bool {
        self.monitors.contains_key(endpoint)
    }

    pub fn max_wait_for(&self, endpoint: &Endpoint) -> Option<Duration> {
        self.monitors.get(endpoint).map(|m| m.max_wait_for())
    }

    pub fn monitored(&self) -> Vec<Endpoint> {
        self.monitors.iter().map(|e| e.key().clone()).collect()
    }

    /// Listen to changes of every endpoint.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&HealthStatusChange) + Send + Sync + 'static,
    {
        self.listeners.global.subscribe(listener)
    }

    /// Listen to changes of one endpoint.
    pub fn subscribe_endpoint<F>(&self, endpoint: &Endpoint, listener: F) -> Subscription
    where
        F: Fn(&HealthStatusChange) + Send + Sync + 'static,
    {
        let table = self
            .listeners
            .per_endpoint
            .entry(endpoint.clone())
            .or_default()
            .value()
            .clone();
        table.subscribe(listener)
    }

    /// Stop every monitor.
    pub async fn close(&self) {
        let monitors: Vec<Arc<HealthMonitor>> = self.monitors.iter().map(|e| e.value().clone()).collect();
        self.monitors.clear();
        for monitor in monitors {
            monitor.stop().await;
        }
    }
}
