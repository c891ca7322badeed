//! Multi-endpoint failover agent.
//!
//! Keeps a registry of database endpoints healthy-routed and issues a
//! periodic PING through it, so failover and failback can be observed in logs
//! and metrics.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────────────────────────────────┐
//!                  │                 FAILOVER AGENT                   │
//!                  │                                                  │
//!    PING loop ───▶│  executor ──▶ registry.active() ──▶ pool ──▶ conn├──▶ Endpoint A
//!                  │     │             ▲                              │
//!                  │     │ fallback    │ switch                       │    Endpoint B
//!                  │     ▼             │                              │
//!                  │  fail_over_from ──┘◀── health monitors (probes) ─┼──▶ Endpoint C
//!                  │                   ◀── failback checker           │
//!                  │                                                  │
//!                  │  config (watch/reload) · observability · lifecycle│
//!                  └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use multidb_failover::lifecycle::{startup, AgentOptions};

#[derive(Parser)]
#[command(name = "multidb-failover")]
#[command(about = "Multi-endpoint database failover agent", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Reload the endpoint list when the config file changes
    #[arg(short, long)]
    watch: bool,

    /// Interval between PING commands
    #[arg(long, default_value_t = 1000)]
    ping_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    startup::run(AgentOptions {
        config_path: cli.config,
        watch: cli.watch,
        ping_interval: Duration::from_millis(cli.ping_interval_ms.max(1)),
    })
    .await?;
    Ok(())
}
