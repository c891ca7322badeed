//! Agent startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Initialize logging, metrics and the endpoint registry in order
//! - Run the PING loop and config reloads until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Reloads only reconcile the endpoint list; other settings need a restart

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time;

use crate::config::{load_config, ConfigError, ConfigWatcher, FailoverConfig};
use crate::error::FailoverError;
use crate::executor::CommandExecutor;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals;
use crate::net::{Command, TcpConnector};
use crate::observability::{logging, metrics};
use crate::registry::EndpointRegistry;

/// Errors that abort the agent.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Failover(#[from] FailoverError),

    #[error("config watcher error: {0}")]
    Watch(#[from] notify::Error),
}

/// Command line options of the agent binary.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub config_path: PathBuf,
    pub watch: bool,
    pub ping_interval: Duration,
}

/// Load the config, start every subsystem and run until a signal arrives.
pub async fn run(options: AgentOptions) -> Result<(), StartupError> {
    let config = load_config(&options.config_path)?;
    logging::init_logging(&config.observability.log_level);
    tracing::info!(
        path = ?options.config_path,
        endpoints = config.endpoints.len(),
        "Configuration loaded"
    );
    init_metrics(&config);

    let registry = EndpointRegistry::connect(&config, Arc::new(TcpConnector::default())).await?;
    tracing::info!(active = %registry.active_endpoint(), "Endpoint registry ready");

    let _switches = registry.subscribe_switch(|event| {
        tracing::info!(reason = %event.reason, endpoint = %event.endpoint, "Switched active endpoint");
    });

    let mut agent = Agent::new(registry.clone(), options.ping_interval);
    let _watcher = if options.watch {
        let (watcher, reloads) = ConfigWatcher::new(&options.config_path);
        agent = agent.with_reloads(reloads);
        Some(watcher.run()?)
    } else {
        None
    };

    let shutdown = Shutdown::new();
    let agent_task = tokio::spawn(agent.run(shutdown.subscribe()));
    signals::forward_to(&shutdown).await;

    if let Err(e) = agent_task.await {
        tracing::error!(error = %e, "Agent task failed");
    }
    registry.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

fn init_metrics(config: &FailoverConfig) {
    if !config.observability.metrics_enabled {
        return;
    }
    match config.observability.metrics_address.parse() {
        Ok(addr) => {
            if let Err(e) = metrics::init_metrics(addr) {
                tracing::error!(error = %e, "Failed to install metrics exporter");
            }
        }
        Err(_) => tracing::error!(
            metrics_address = %config.observability.metrics_address,
            "Failed to parse metrics address"
        ),
    }
}

/// Background driver for a connected registry.
pub struct Agent {
    registry: Arc<EndpointRegistry>,
    executor: CommandExecutor,
    ping_interval: Duration,
    reloads: Option<mpsc::UnboundedReceiver<FailoverConfig>>,
}

impl Agent {
    pub fn new(registry: Arc<EndpointRegistry>, ping_interval: Duration) -> Self {
        Self {
            executor: CommandExecutor::new(registry.clone()),
            registry,
            ping_interval,
            reloads: None,
        }
    }

    /// Reconcile the endpoint list whenever a new config arrives.
    pub fn with_reloads(mut self, reloads: mpsc::UnboundedReceiver<FailoverConfig>) -> Self {
        self.reloads = Some(reloads);
        self
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = time::interval(self.ping_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.ping().await,
                Some(next) = next_reload(&mut self.reloads) => {
                    let summary = self.registry.reconcile(&next.endpoints).await;
                    tracing::info!(
                        added = summary.added.len(),
                        removed = summary.removed.len(),
                        failed = summary.failed,
                        "Endpoint list reconciled"
                    );
                }
                _ = shutdown.recv() => {
                    tracing::info!("Agent received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    async fn ping(&self) {
        match self.executor.execute(&Command::new("PING")).await {
            Ok(reply) => tracing::debug!(
                endpoint = %self.registry.active_endpoint(),
                reply = %reply.as_str(),
                "PING"
            ),
            Err(e) => tracing::warn!(error = %e, kind = %e.kind(), "PING failed"),
        }
    }
}

async fn next_reload(reloads: &mut Option<mpsc::UnboundedReceiver<FailoverConfig>>) -> Option<FailoverConfig> {
    match reloads {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
