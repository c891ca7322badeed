//! ECHO health probe.
//!
//! Round-trips a sentinel payload on one dedicated connection. The
//! connection is opened lazily and dropped after any failure.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::ConnectionError;
use crate::health::probe::{HealthProbe, ProbeError, ProbeSettings};
use crate::health::state::HealthStatus;
use crate::net::{Command, Connection, Connector, Endpoint};

const SENTINEL: &str = "healthcheck";

#[derive(Debug)]
pub struct EchoProbe {
    endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    conn: Mutex<Option<Arc<dyn Connection>>>,
    settings: ProbeSettings,
}

impl EchoProbe {
    pub fn new(endpoint: Endpoint, connector: Arc<dyn Connector>, settings: ProbeSettings) -> Self {
        Self {
            endpoint,
            connector,
            conn: Mutex::new(None),
            settings,
        }
    }

    async fn round_trip(&self) -> Result<String, ProbeError> {
        let mut slot = self.conn.lock().await;
        let conn = match slot.as_ref() {
            Some(conn) => conn.clone(),
            None => {
                let conn = self.connector.connect(&self.endpoint).await?;
                *slot = Some(conn.clone());
                conn
            }
        };
        match conn.execute(&Command::new("ECHO").arg(SENTINEL)).await {
            Ok(reply) => Ok(reply.0),
            Err(e) => {
                slot.take();
                conn.close().await;
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl HealthProbe for EchoProbe {
    fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    async fn probe(&self, _endpoint: &Endpoint) -> Result<HealthStatus, ProbeError> {
        let reply = match tokio::time::timeout(self.settings.timeout, self.round_trip()).await {
            Ok(reply) => reply?,
            Err(_) => {
                // Reply may still arrive on this socket; do not reuse it.
                if let Some(conn) = self.conn.lock().await.take() {
                    conn.close().await;
                }
                return Err(ConnectionError::Timeout(self.settings.timeout).into());
            }
        };
        if reply == SENTINEL {
            Ok(HealthStatus::Healthy)
        } else {
            Err(ProbeError::UnexpectedReply(reply))
        }
    }

    async fn close(&self) {
        if let Some(conn) = self.conn.lock().await.take() {
            conn.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Reply;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Debug)]
    struct ScriptedConnection {
        reply: &'static str,
        fail: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Connection for ScriptedConnection {
        async fn execute(&self, command: &Command) -> Result<Reply, ConnectionError> {
            assert_eq!(command.name, "ECHO");
            if self.fail.load(Ordering::SeqCst) {
                return Err(ConnectionError::Disconnected);
            }
            Ok(Reply(self.reply.to_string()))
        }
        async fn ping(&self) -> Result<bool, ConnectionError> {
            Ok(true)
        }
        async fn close(&self) {}
    }

    #[derive(Debug)]
    struct ScriptedConnector {
        reply: &'static str,
        fail: Arc<AtomicBool>,
        connects: AtomicU32,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, _: &Endpoint) -> Result<Arc<dyn Connection>, ConnectionError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(ScriptedConnection {
                reply: self.reply,
                fail: self.fail.clone(),
            }))
        }
    }

    fn probe(reply: &'static str) -> (EchoProbe, Arc<ScriptedConnector>, Arc<AtomicBool>) {
        let fail = Arc::new(AtomicBool::new(false));
        let connector = Arc::new(ScriptedConnector {
            reply,
            fail: fail.clone(),
            connects: AtomicU32::new(0),
        });
        let endpoint: Endpoint = "db1:6379".parse().unwrap();
        (
            EchoProbe::new(endpoint, connector.clone(), ProbeSettings::default()),
            connector,
            fail,
        )
    }

    #[tokio::test]
    async fn test_echo_round_trip_reuses_connection() {
        let (probe, connector, _) = probe(SENTINEL);
        let endpoint: Endpoint = "db1:6379".parse().unwrap();
        assert_eq!(probe.probe(&endpoint).await.unwrap(), HealthStatus::Healthy);
        assert_eq!(probe.probe(&endpoint).await.unwrap(), HealthStatus::Healthy);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wrong_payload_is_an_error() {
        let (probe, _, _) = probe("something-else");
        let endpoint: Endpoint = "db1:6379".parse().unwrap();
        assert!(matches!(probe.probe(&endpoint).await, Err(ProbeError::UnexpectedReply(_))));
    }

    #[tokio::test]
    async fn test_failure_drops_connection() {
        let (probe, connector, fail) = probe(SENTINEL);
        let endpoint: Endpoint = "db1:6379".parse().unwrap();
        fail.store(true, Ordering::SeqCst);
        assert!(probe.probe(&endpoint).await.is_err());
        fail.store(false, Ordering::SeqCst);
        assert!(probe.probe(&endpoint).await.is_ok());
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }
}
