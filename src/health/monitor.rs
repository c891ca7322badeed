//! Per-endpoint health monitor.
//!
//! # Responsibilities
//! - Run probe rounds on a fixed interval
//! - Bound each round, cancelling the probe task on timeout
//! - Publish a status change only when the accepted status differs
//!
//! # Design Decisions
//! - The result slot is swapped with compare-and-swap keyed by the round's
//!   start time; a slow round cannot overwrite a newer one
//! - Rounds run in their own task so a hung probe never stalls the ticker
//! - `stop()` clears the callback first, so late completions are dropped

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::health::probe::HealthProbe;
use crate::health::state::{HealthStatus, HealthStatusChange};
use crate::net::Endpoint;
use crate::observability::metrics;

/// Time given to the loop to exit on its own before it is aborted.
const STOP_GRACE: Duration = Duration::from_secs(1);

/// Receives accepted status changes.
pub type StatusCallback = Arc<dyn Fn(HealthStatusChange) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct ProbeResult {
    started: Option<Instant>,
    status: HealthStatus,
}

/// Scheduled probe loop for one endpoint.
pub struct HealthMonitor {
    endpoint: Endpoint,
    probe: Arc<dyn HealthProbe>,
    last: ArcSwap<ProbeResult>,
    callback: Mutex<Option<StatusCallback>>,
    stopped: AtomicBool,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    inflight: Mutex<Option<AbortHandle>>,
}

impl HealthMonitor {
    pub fn new(endpoint: Endpoint, probe: Arc<dyn HealthProbe>, callback: StatusCallback) -> Arc<Self> {
        let (stop_tx, _) = watch::channel(false);
        Arc::new(Self {
            endpoint,
            probe,
            last: ArcSwap::from_pointee(ProbeResult {
                started: None,
                status: HealthStatus::Unknown,
            }),
            callback: Mutex::new(Some(callback)),
            stopped: AtomicBool::new(false),
            stop_tx,
            task: Mutex::new(None),
            inflight: Mutex::new(None),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn status(&self) -> HealthStatus {
        self.last.load().status
    }

    pub fn max_wait_for(&self) -> Duration {
        self.probe.settings().max_wait_for()
    }

    /// Spawn the schedule loop. The first round starts immediately.
    pub fn start(self: &Arc<Self>) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        let weak = Arc::downgrade(self);
        let stop_rx = self.stop_tx.subscribe();
        let interval = self.probe.settings().interval;
        let handle = tokio::spawn(Self::run(weak, interval, stop_rx));
        if let Some(previous) = self.task.lock().expect("monitor task mutex poisoned").replace(handle) {
            previous.abort();
        }
        tracing::debug!(
            endpoint = %self.endpoint,
            interval_ms = interval.as_millis() as u64,
            "Health monitor started"
        );
    }

    async fn run(weak: Weak<Self>, interval: Duration, mut stop_rx: watch::Receiver<bool>) {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(monitor) = weak.upgrade() else { break };
                    monitor.check_once().await;
                }
                _ = stop_rx.changed() => {
                    break;
                }
            }
        }
    }

    /// Run one bounded round and record its result.
    pub async fn check_once(&self) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        let started = Instant::now();
        let probe = self.probe.clone();
        let endpoint = self.endpoint.clone();
        let handle = tokio::spawn(async move { run_round(probe.as_ref(), &endpoint).await });
        let abort = handle.abort_handle();
        *self.inflight.lock().expect("monitor inflight mutex poisoned") = Some(abort.clone());

        let status = match time::timeout(self.max_wait_for(), handle).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                if !e.is_cancelled() {
                    tracing::warn!(endpoint = %self.endpoint, error = %e, "Health probe task failed");
                }
                HealthStatus::Unhealthy
            }
            Err(_) => {
                abort.abort();
                tracing::warn!(
                    endpoint = %self.endpoint,
                    max_wait_ms = self.max_wait_for().as_millis() as u64,
                    "Health probe timed out"
                );
                HealthStatus::Unhealthy
            }
        };
        self.inflight.lock().expect("monitor inflight mutex poisoned").take();
        self.record(started, status);
    }

    /// Accept `status` unless a newer round already landed.
    fn record(&self, started: Instant, status: HealthStatus) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        loop {
            let current = self.last.load_full();
            if matches!(current.started, Some(prev) if started < prev) {
                return;
            }
            let next = Arc::new(ProbeResult {
                started: Some(started),
                status,
            });
            let previous = self.last.compare_and_swap(&current, next);
            if Arc::ptr_eq(&*previous, &current) {
                if current.status != status {
                    self.publish(current.status, status);
                }
                return;
            }
        }
    }

    fn publish(&self, old: HealthStatus, new: HealthStatus) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        let callback = self.callback.lock().expect("monitor callback mutex poisoned").clone();
        let Some(callback) = callback else { return };
        tracing::info!(endpoint = %self.endpoint, from = %old, to = %new, "Health status changed");
        metrics::record_endpoint_health(&self.endpoint, new.is_healthy());
        callback(HealthStatusChange {
            endpoint: self.endpoint.clone(),
            old,
            new,
        });
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stop the loop and any probe in flight. Safe to call repeatedly.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.callback.lock().expect("monitor callback mutex poisoned").take();
        let _ = self.stop_tx.send(true);
        if let Some(inflight) = self.inflight.lock().expect("monitor inflight mutex poisoned").take() {
            inflight.abort();
        }
        let task = self.task.lock().expect("monitor task mutex poisoned").take();
        if let Some(mut task) = task {
            if time::timeout(STOP_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
        self.probe.close().await;
        tracing::debug!(endpoint = %self.endpoint, "Health monitor stopped");
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("endpoint", &self.endpoint)
            .field("status", &self.status())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Run up to `num_probes` probes and let the policy decide.
async fn run_round(probe: &dyn HealthProbe, endpoint: &Endpoint) -> HealthStatus {
    let settings = probe.settings().clone();
    let total = settings.num_probes.max(1);
    let (mut successes, mut failures) = (0u32, 0u32);

    for attempt in 0..total {
        let ok = match time::timeout(settings.timeout, probe.probe(endpoint)).await {
            Ok(Ok(status)) => status.is_healthy(),
            Ok(Err(e)) => {
                tracing::warn!(endpoint = %endpoint, attempt, error = %e, "Health probe failed");
                false
            }
            Err(_) => {
                tracing::warn!(endpoint = %endpoint, attempt, "Health probe timed out");
                false
            }
        };
        if ok {
            successes += 1;
        } else {
            failures += 1;
        }
        if let Some(status) = settings.policy.evaluate(successes, failures, total) {
            return status;
        }
        if attempt + 1 < total && !settings.delay_between_probes.is_zero() {
            time::sleep(settings.delay_between_probes).await;
        }
    }
    HealthStatus::Unhealthy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::probe::{ProbeError, ProbePolicy, ProbeSettings};
    use async_trait::async_trait;
    use std::collections::VecDeque;

    #[derive(Debug)]
    struct ScriptedProbe {
        settings: ProbeSettings,
        script: Mutex<VecDeque<HealthStatus>>,
        hang: bool,
    }

    impl ScriptedProbe {
        fn new(statuses: &[HealthStatus]) -> Self {
            Self {
                settings: ProbeSettings {
                    interval: Duration::from_millis(100),
                    timeout: Duration::from_millis(50),
                    num_probes: 1,
                    delay_between_probes: Duration::ZERO,
                    policy: ProbePolicy::AllSuccess,
                },
                script: Mutex::new(statuses.iter().copied().collect()),
                hang: false,
            }
        }
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        fn settings(&self) -> &ProbeSettings {
            &self.settings
        }

        async fn probe(&self, _endpoint: &Endpoint) -> Result<HealthStatus, ProbeError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.ok_or_else(|| ProbeError::UnexpectedReply("script exhausted".into()))
        }
    }

    fn collecting() -> (StatusCallback, Arc<Mutex<Vec<HealthStatusChange>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let callback: StatusCallback = Arc::new(move |change| sink.lock().unwrap().push(change));
        (callback, events)
    }

    fn endpoint() -> Endpoint {
        "db1:6379".parse().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_healthy_rounds_emit_one_event() {
        let probe = Arc::new(ScriptedProbe::new(&[HealthStatus::Healthy; 3]));
        let (callback, events) = collecting();
        let monitor = HealthMonitor::new(endpoint(), probe, callback);

        for _ in 0..3 {
            monitor.check_once().await;
        }

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].old, HealthStatus::Unknown);
        assert_eq!(events[0].new, HealthStatus::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transitions_are_published() {
        let probe = Arc::new(ScriptedProbe::new(&[
            HealthStatus::Healthy,
            HealthStatus::Unhealthy,
            HealthStatus::Unhealthy,
            HealthStatus::Healthy,
        ]));
        let (callback, events) = collecting();
        let monitor = HealthMonitor::new(endpoint(), probe, callback);
        for _ in 0..4 {
            monitor.check_once().await;
        }
        let news: Vec<_> = events.lock().unwrap().iter().map(|c| c.new).collect();
        assert_eq!(
            news,
            vec![HealthStatus::Healthy, HealthStatus::Unhealthy, HealthStatus::Healthy]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_probe_times_out_unhealthy() {
        let mut probe = ScriptedProbe::new(&[]);
        probe.hang = true;
        let (callback, events) = collecting();
        let monitor = HealthMonitor::new(endpoint(), Arc::new(probe), callback);
        monitor.check_once().await;
        assert_eq!(monitor.status(), HealthStatus::Unhealthy);
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_round_is_discarded() {
        let probe = Arc::new(ScriptedProbe::new(&[]));
        let (callback, events) = collecting();
        let monitor = HealthMonitor::new(endpoint(), probe, callback);

        let older = Instant::now();
        time::advance(Duration::from_millis(10)).await;
        let newer = Instant::now();
        monitor.record(newer, HealthStatus::Healthy);
        monitor.record(older, HealthStatus::Unhealthy);

        assert_eq!(monitor.status(), HealthStatus::Healthy);
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_silences_callback() {
        let probe = Arc::new(ScriptedProbe::new(&[HealthStatus::Healthy; 10]));
        let (callback, events) = collecting();
        let monitor = HealthMonitor::new(endpoint(), probe, callback);
        monitor.start();
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(monitor.status(), HealthStatus::Healthy);

        monitor.stop().await;
        monitor.stop().await;
        assert!(monitor.is_stopped());

        monitor.record(Instant::now(), HealthStatus::Unhealthy);
        assert_eq!(monitor.status(), HealthStatus::Healthy);
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_aborted_by_stop_is_not_recorded() {
        let mut probe = ScriptedProbe::new(&[]);
        probe.hang = true;
        let (callback, events) = collecting();
        let monitor = HealthMonitor::new(endpoint(), Arc::new(probe), callback);
        monitor.start();
        time::sleep(Duration::from_millis(10)).await;

        monitor.stop().await;
        time::sleep(Duration::from_millis(100)).await;

        assert_eq!(monitor.status(), HealthStatus::Unknown);
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_majority_round() {
        let mut probe = ScriptedProbe::new(&[
            HealthStatus::Unhealthy,
            HealthStatus::Healthy,
            HealthStatus::Healthy,
        ]);
        probe.settings.num_probes = 3;
        probe.settings.policy = ProbePolicy::Majority;
        let status = run_round(&probe, &endpoint()).await;
        assert_eq!(status, HealthStatus::Healthy);
        assert!(probe.script.lock().unwrap().is_empty());
    }
}
