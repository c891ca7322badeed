//! TCP connector speaking a minimal line protocol.
//!
//! # Responsibilities
//! - Open TCP connections with a connect timeout
//! - Send `NAME arg...\r\n` and read exactly one reply line
//! - Map `-` replies to server errors
//!
//! # Design Decisions
//! - Only the inline form is spoken; full protocol encoding is out of scope
//! - A `$<len>` header is followed by one payload line, `$-1` is empty

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::error::ConnectionError;
use crate::net::{Command, Connection, Connector, Endpoint, Reply};
use crate::resilience::timeouts::with_timeout;

/// Creates `TcpConnection`s.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            io_timeout,
        }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(2))
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Connection>, ConnectionError> {
        let addr = (endpoint.host().to_string(), endpoint.port());
        let stream = with_timeout(self.connect_timeout, async {
            TcpStream::connect(addr).await.map_err(ConnectionError::from)
        })
        .await?;
        stream.set_nodelay(true)?;
        tracing::debug!(endpoint = %endpoint, "TCP connection established");
        Ok(Arc::new(TcpConnection {
            endpoint: endpoint.clone(),
            stream: Mutex::new(Some(BufReader::new(stream))),
            closed: AtomicBool::new(false),
            io_timeout: self.io_timeout,
        }))
    }
}

/// One TCP connection.
#[derive(Debug)]
pub struct TcpConnection {
    endpoint: Endpoint,
    stream: Mutex<Option<BufReader<TcpStream>>>,
    closed: AtomicBool,
    io_timeout: Duration,
}

impl TcpConnection {
    async fn round_trip(&self, line: String) -> Result<String, ConnectionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnectionError::Disconnected);
        }
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(ConnectionError::Disconnected)?;

        let result = with_timeout(self.io_timeout, async {
            stream.get_mut().write_all(line.as_bytes()).await?;
            stream.get_mut().write_all(b"\r\n").await?;
            let header = read_line(stream).await?;
            match header.as_bytes().first() {
                Some(b'-') => Err(ConnectionError::Server(header[1..].to_string())),
                Some(b'+') | Some(b':') => Ok(header[1..].to_string()),
                Some(b'$') if header == "$-1" => Ok(String::new()),
                Some(b'$') => read_line(stream).await,
                _ => Ok(header),
            }
        })
        .await;

        if result.is_err() || self.closed.load(Ordering::Acquire) {
            // Framing is unknown after a failure, never reuse the socket.
            guard.take();
        }
        result
    }
}

async fn read_line(stream: &mut BufReader<TcpStream>) -> Result<String, ConnectionError> {
    let mut buf = String::new();
    let n = stream.read_line(&mut buf).await?;
    if n == 0 {
        return Err(ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed by peer",
        )));
    }
    Ok(buf.trim_end_matches(['\r', '\n']).to_string())
}

#[async_trait]
impl Connection for TcpConnection {
    async fn execute(&self, command: &Command) -> Result<Reply, ConnectionError> {
        self.round_trip(command.to_string()).await.map(Reply)
    }

    async fn ping(&self) -> Result<bool, ConnectionError> {
        let reply = self.round_trip("PING".to_string()).await?;
        Ok(reply.eq_ignore_ascii_case("PONG"))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // A call in flight holds the lock and drops the socket itself.
        if let Ok(mut guard) = self.stream.try_lock() {
            if let Some(mut stream) = guard.take() {
                let _ = stream.get_mut().shutdown().await;
            }
        }
        tracing::debug!(endpoint = %self.endpoint, "TCP connection closed");
    }
}
