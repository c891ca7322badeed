//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Notify;

use multidb_failover::config::{EndpointConfig, FailoverConfig, HealthCheckKind};
use multidb_failover::{Command, Connection, ConnectionError, Connector, Endpoint, Reply};

/// Probe interval used by `config`.
pub const PROBE_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct Shared {
    down: DashMap<Endpoint, ()>,
    executed: DashMap<Endpoint, usize>,
    failing: DashMap<Endpoint, usize>,
    stalled: DashMap<Endpoint, Arc<Notify>>,
    hanging: DashMap<Endpoint, ()>,
    connects: AtomicUsize,
}

impl Shared {
    fn is_down(&self, endpoint: &Endpoint) -> bool {
        self.down.contains_key(endpoint)
    }

    fn take_failure(&self, endpoint: &Endpoint) -> bool {
        match self.failing.get_mut(endpoint) {
            Some(mut left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }
}

/// In-memory connector whose endpoints can be switched up and down.
///
/// PING answers PONG, every other command answers OK. A down endpoint
/// refuses new connections and fails calls on existing ones.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    shared: Arc<Shared>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_down(&self, endpoint: &Endpoint, down: bool) {
        if down {
            self.shared.down.insert(endpoint.clone(), ());
        } else {
            self.shared.down.remove(endpoint);
        }
    }

    /// Fail the next `n` non-PING commands on `endpoint` with an I/O error.
    pub fn fail_next(&self, endpoint: &Endpoint, n: usize) {
        self.shared.failing.insert(endpoint.clone(), n);
    }

    /// Park the next non-PING command on `endpoint` until the returned
    /// notify fires, then fail it with an I/O error.
    pub fn stall_next(&self, endpoint: &Endpoint) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.shared.stalled.insert(endpoint.clone(), gate.clone());
        gate
    }

    /// Make every new connection attempt to `endpoint` wait forever.
    pub fn hang(&self, endpoint: &Endpoint) {
        self.shared.hanging.insert(endpoint.clone(), ());
    }

    /// Non-PING commands executed against `endpoint`.
    pub fn executed(&self, endpoint: &Endpoint) -> usize {
        self.shared.executed.get(endpoint).map(|c| *c).unwrap_or(0)
    }

    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn arc(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Connection>, ConnectionError> {
        if self.shared.hanging.contains_key(endpoint) {
            std::future::pending::<()>().await;
        }
        if self.shared.is_down(endpoint) {
            return Err(ConnectionError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("{endpoint} is down"),
            )));
        }
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedConnection {
            endpoint: endpoint.clone(),
            shared: self.shared.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

#[derive(Debug)]
struct ScriptedConnection {
    endpoint: Endpoint,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn execute(&self, command: &Command) -> Result<Reply, ConnectionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Disconnected);
        }
        if self.shared.is_down(&self.endpoint) {
            return Err(ConnectionError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                format!("{} went away", self.endpoint),
            )));
        }
        if command.name.eq_ignore_ascii_case("PING") {
            return Ok(Reply("PONG".to_string()));
        }
        let gate = self.shared.stalled.remove(&self.endpoint).map(|(_, gate)| gate);
        if let Some(gate) = gate {
            gate.notified().await;
            return Err(io_error(format!("{} stalled", self.endpoint)));
        }
        if self.shared.take_failure(&self.endpoint) {
            return Err(io_error(format!("{} injected failure", self.endpoint)));
        }
        *self.shared.executed.entry(self.endpoint.clone()).or_insert(0) += 1;
        Ok(Reply("OK".to_string()))
    }

    async fn ping(&self) -> Result<bool, ConnectionError> {
        let reply = self.execute(&Command::new("PING")).await?;
        Ok(reply.as_str() == "PONG")
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn io_error(message: String) -> ConnectionError {
    ConnectionError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, message))
}

pub fn endpoint(addr: &str) -> Endpoint {
    addr.parse().unwrap()
}

/// Fast-probing config over `endpoints` with failback disabled.
pub fn config(endpoints: &[(&str, f32)]) -> FailoverConfig {
    let mut config = FailoverConfig::default();
    config.failback.enabled = false;
    config.grace_period_ms = 1_000;
    config.failover_cooldown_ms = 0;
    config.retry.wait_ms = 10;
    for (address, weight) in endpoints {
        let mut endpoint = EndpointConfig::new(*address, *weight);
        endpoint.health_check.interval_ms = PROBE_INTERVAL.as_millis() as u64;
        endpoint.health_check.timeout_ms = 50;
        config.endpoints.push(endpoint);
    }
    config
}

/// Same as `config`, without health checks.
pub fn unmonitored_config(endpoints: &[(&str, f32)]) -> FailoverConfig {
    let mut config = config(endpoints);
    for endpoint in &mut config.endpoints {
        endpoint.health_check.kind = HealthCheckKind::None;
    }
    config
}

/// Collects values pushed from listener callbacks.
#[derive(Debug, Clone, Default)]
pub struct Recorder<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone> Recorder<T> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, item: T) {
        self.items.lock().unwrap().push(item);
    }

    pub fn items(&self) -> Vec<T> {
        self.items.lock().unwrap().clone()
    }
}

/// Start a programmable HTTP backend. `f` receives the request target
/// (path and query) and returns status and body.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let (read, mut write) = socket.into_split();
                        let mut reader = BufReader::new(read);
                        let mut request_line = String::new();
                        if reader.read_line(&mut request_line).await.is_err() {
                            return;
                        }
                        loop {
                            let mut header = String::new();
                            match reader.read_line(&mut header).await {
                                Ok(0) => break,
                                Ok(_) if header == "\r\n" => break,
                                Ok(_) => continue,
                                Err(_) => return,
                            }
                        }
                        let target = request_line.split_whitespace().nth(1).unwrap_or("/").to_string();
                        let (status, body) = f(target).await;
                        let status_text = match status {
                            200 => "200 OK",
                            401 => "401 Unauthorized",
                            404 => "404 Not Found",
                            503 => "503 Service Unavailable",
                            _ => "500 Internal Server Error",
                        };
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = write.write_all(response.as_bytes()).await;
                        let _ = write.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}
