//! Connection pool that tracks every connection it ever issued.
//!
//! # Responsibilities
//! - Bound concurrent connections per endpoint (semaphore)
//! - Reuse idle connections, create new ones through the `Connector`
//! - Sever every issued connection on demand, including checked-out ones
//!
//! # Design Decisions
//! - RAII guard returns the connection to the idle queue on drop
//! - A severed connection fails its next call with `Disconnected`
//! - Broken connections (I/O, timeout, protocol errors) are closed, not reused
//! - `force_disconnect_all` raises a fail-fast counter so acquisitions racing
//!   the drain error out instead of handing out fresh connections

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::PoolConfig;
use crate::error::{ConnectionError, ErrorKind};
use crate::net::{Command, Connection, ConnectionId, Connector, Endpoint, Reply};
use crate::resilience::timeouts::with_timeout;

#[derive(Debug)]
struct Slot {
    id: ConnectionId,
    conn: Arc<dyn Connection>,
    severed: AtomicBool,
    broken: AtomicBool,
}

impl Slot {
    fn is_usable(&self) -> bool {
        !self.severed.load(Ordering::Acquire) && !self.broken.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct PoolInner {
    endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    permits: Arc<Semaphore>,
    acquire_timeout: Duration,
    connect_timeout: Duration,
    idle: Mutex<VecDeque<Arc<Slot>>>,
    issued: DashMap<ConnectionId, Arc<Slot>>,
    fail_fast: AtomicUsize,
    creating: AtomicUsize,
    closed: AtomicBool,
}

impl PoolInner {
    fn discard(&self, slot: &Arc<Slot>) {
        self.issued.remove(&slot.id);
        let conn = slot.conn.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { conn.close().await });
            }
            Err(_) => tracing::debug!(connection = %slot.id, "No runtime to close connection on"),
        }
    }

    fn give_back(&self, slot: Arc<Slot>) {
        if slot.is_usable() && !self.closed.load(Ordering::Acquire) && self.issued.contains_key(&slot.id) {
            self.idle.lock().expect("pool idle mutex poisoned").push_back(slot);
        } else {
            self.discard(&slot);
        }
    }
}

/// One connection creation in flight, counted until dropped.
struct CreationGuard<'a> {
    creating: &'a AtomicUsize,
}

impl<'a> CreationGuard<'a> {
    fn enter(creating: &'a AtomicUsize) -> Self {
        creating.fetch_add(1, Ordering::AcqRel);
        Self { creating }
    }
}

impl Drop for CreationGuard<'_> {
    fn drop(&mut self) {
        self.creating.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub issued: usize,
    pub idle: usize,
    pub available_permits: usize,
}

/// Bounded, tracking connection pool for one endpoint.
#[derive(Debug, Clone)]
pub struct TrackingPool {
    inner: Arc<PoolInner>,
}

impl TrackingPool {
    pub fn new(endpoint: Endpoint, connector: Arc<dyn Connector>, config: &PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                endpoint,
                connector,
                permits: Arc::new(Semaphore::new(config.max_connections.max(1))),
                acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
                connect_timeout: Duration::from_millis(config.connect_timeout_ms),
                idle: Mutex::new(VecDeque::new()),
                issued: DashMap::new(),
                fail_fast: AtomicUsize::new(0),
                creating: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Check out a connection, waiting at most the acquire timeout.
    pub async fn acquire(&self) -> Result<PooledConnection, ConnectionError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(ConnectionError::PoolClosed(inner.endpoint.clone()));
        }
        if inner.fail_fast.load(Ordering::Acquire) > 0 {
            return Err(ConnectionError::Disconnected);
        }

        let permit = match tokio::time::timeout(
            inner.acquire_timeout,
            inner.permits.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(ConnectionError::PoolClosed(inner.endpoint.clone())),
            Err(_) => {
                return Err(ConnectionError::PoolExhausted {
                    endpoint: inner.endpoint.clone(),
                    waited: inner.acquire_timeout,
                })
            }
        };

        loop {
            let next = inner.idle.lock().expect("pool idle mutex poisoned").pop_front();
            match next {
                Some(slot) if slot.is_usable() => {
                    return Ok(PooledConnection::new(slot, inner.clone(), permit));
                }
                Some(slot) => inner.discard(&slot),
                None => break,
            }
        }

        let slot = self.create().await?;
        Ok(PooledConnection::new(slot, inner.clone(), permit))
    }

    async fn create(&self) -> Result<Arc<Slot>, ConnectionError> {
        let inner = &self.inner;
        let creating = CreationGuard::enter(&inner.creating);
        let connected = with_timeout(inner.connect_timeout, inner.connector.connect(&inner.endpoint)).await;
        let result = connected.map(|conn| {
            let slot = Arc::new(Slot {
                id: ConnectionId::new(),
                conn,
                severed: AtomicBool::new(false),
                broken: AtomicBool::new(false),
            });
            inner.issued.insert(slot.id, slot.clone());
            slot
        });
        drop(creating);

        let slot = result?;
        if inner.fail_fast.load(Ordering::Acquire) > 0 || inner.closed.load(Ordering::Acquire) {
            slot.severed.store(true, Ordering::Release);
            inner.discard(&slot);
            return Err(ConnectionError::Disconnected);
        }
        tracing::debug!(endpoint = %inner.endpoint, connection = %slot.id, "Pool created connection");
        Ok(slot)
    }

    /// Return a connection. Same as dropping the guard.
    pub fn release(&self, conn: PooledConnection) {
        drop(conn);
    }

    /// Sever every connection this pool ever issued.
    ///
    /// New acquisitions fail while the drain runs. Connections created
    /// concurrently are caught by retrying until no creation is in flight.
    pub async fn force_disconnect_all(&self) {
        let inner = &self.inner;
        inner.fail_fast.fetch_add(1, Ordering::AcqRel);
        let mut severed = 0usize;
        loop {
            let slots: Vec<Arc<Slot>> = inner.issued.iter().map(|e| e.value().clone()).collect();
            for slot in slots {
                slot.severed.store(true, Ordering::Release);
                inner.issued.remove(&slot.id);
                slot.conn.close().await;
                severed += 1;
            }
            inner.idle.lock().expect("pool idle mutex poisoned").clear();
            if inner.creating.load(Ordering::Acquire) == 0 && inner.issued.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        inner.fail_fast.fetch_sub(1, Ordering::AcqRel);
        tracing::info!(endpoint = %inner.endpoint, severed, "Force-disconnected all pool connections");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Close the pool permanently and every connection it issued.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.permits.close();
        self.force_disconnect_all().await;
        tracing::debug!(endpoint = %self.inner.endpoint, "Pool closed");
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            issued: self.inner.issued.len(),
            idle: self.inner.idle.lock().expect("pool idle mutex poisoned").len(),
            available_permits: self.inner.permits.available_permits(),
        }
    }
}

/// A checked-out connection. Returned to the pool on drop.
#[derive(Debug)]
pub struct PooledConnection {
    slot: Option<Arc<Slot>>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn new(slot: Arc<Slot>, pool: Arc<PoolInner>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            slot: Some(slot),
            pool,
            _permit: permit,
        }
    }

    fn slot(&self) -> Result<&Arc<Slot>, ConnectionError> {
        match &self.slot {
            Some(slot) if !slot.severed.load(Ordering::Acquire) => Ok(slot),
            _ => Err(ConnectionError::Disconnected),
        }
    }

    pub fn id(&self) -> Option<ConnectionId> {
        self.slot.as_ref().map(|s| s.id)
    }

    pub fn is_severed(&self) -> bool {
        self.slot().is_err()
    }

    pub async fn execute(&self, command: &Command) -> Result<Reply, ConnectionError> {
        let slot = self.slot()?;
        let result = slot.conn.execute(command).await;
        self.observe(slot, result)
    }

    pub async fn ping(&self) -> Result<bool, ConnectionError> {
        let slot = self.slot()?;
        let result = slot.conn.ping().await;
        self.observe(slot, result)
    }

    fn observe<T>(&self, slot: &Slot, result: Result<T, ConnectionError>) -> Result<T, ConnectionError> {
        match result {
            Err(e) if slot.severed.load(Ordering::Acquire) => {
                tracing::debug!(connection = %slot.id, error = %e, "Call failed on severed connection");
                Err(ConnectionError::Disconnected)
            }
            Err(e) => {
                if matches!(
                    e.kind(),
                    ErrorKind::Io | ErrorKind::Timeout | ErrorKind::Disconnected | ErrorKind::Protocol
                ) {
                    slot.broken.store(true, Ordering::Release);
                }
                Err(e)
            }
            ok => ok,
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.give_back(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    #[derive(Debug, Default)]
    struct EchoConnection {
        closed: AtomicBool,
    }

    #[async_trait]
    impl Connection for EchoConnection {
        async fn execute(&self, command: &Command) -> Result<Reply, ConnectionError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(ConnectionError::Disconnected);
            }
            Ok(Reply(command.to_string()))
        }

        async fn ping(&self) -> Result<bool, ConnectionError> {
            Ok(!self.closed.load(Ordering::SeqCst))
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Debug, Default)]
    struct CountingConnector {
        created: AtomicU32,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self, _endpoint: &Endpoint) -> Result<Arc<dyn Connection>, ConnectionError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(EchoConnection::default()))
        }
    }

    fn pool(max_connections: usize) -> (TrackingPool, Arc<CountingConnector>) {
        let connector = Arc::new(CountingConnector::default());
        let config = PoolConfig {
            max_connections,
            acquire_timeout_ms: 50,
            connect_timeout_ms: 50,
        };
        (TrackingPool::new("db1:6379".parse().unwrap(), connector.clone(), &config), connector)
    }

    #[tokio::test]
    async fn test_connections_are_reused() {
        let (pool, connector) = pool(2);
        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.execute(&Command::new("GET").arg("k")).await.unwrap().as_str(), "GET k");
        pool.release(conn);
        let _again = pool.acquire().await.unwrap();
        assert_eq!(connector.created.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().issued, 1);
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_exhausted() {
        let (pool, _) = pool(1);
        let _held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PoolExhausted);
    }

    #[tokio::test]
    async fn test_force_disconnect_severs_checked_out_connections() {
        let (pool, _) = pool(4);
        let held = pool.acquire().await.unwrap();
        let idle = pool.acquire().await.unwrap();
        drop(idle);
        assert_eq!(pool.stats().issued, 2);

        pool.force_disconnect_all().await;

        assert!(held.is_severed());
        let err = held.execute(&Command::new("PING")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Disconnected);
        assert_eq!(pool.stats().issued, 0);
        assert_eq!(pool.stats().idle, 0);

        drop(held);
        // Fail-fast is cleared once the drain finishes.
        let fresh = pool.acquire().await.unwrap();
        assert!(fresh.ping().await.unwrap());
    }

    #[derive(Debug, Default)]
    struct HangingConnector;

    #[async_trait]
    impl Connector for HangingConnector {
        async fn connect(&self, _endpoint: &Endpoint) -> Result<Arc<dyn Connection>, ConnectionError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_acquire_does_not_block_close() {
        let config = PoolConfig {
            max_connections: 2,
            acquire_timeout_ms: 50,
            connect_timeout_ms: 60_000,
        };
        let pool = TrackingPool::new("db1:6379".parse().unwrap(), Arc::new(HangingConnector), &config);

        let cancelled = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(cancelled.is_err());
        assert_eq!(pool.inner.creating.load(Ordering::SeqCst), 0);

        let closed = tokio::time::timeout(Duration::from_secs(3), pool.close()).await;
        assert!(closed.is_ok());
        assert!(pool.is_closed());
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_acquire() {
        let (pool, _) = pool(1);
        pool.close().await;
        assert!(pool.is_closed());
        assert_eq!(pool.acquire().await.unwrap_err().kind(), ErrorKind::PoolClosed);
    }
}
