//! faildctl controller binary
//!
//! Usage: `faildctl [fleet.json]`. SIGUSR1 starts faild on every agent,
//! SIGUSR2 stops it, Ctrl-C shuts the controller down.

use anyhow::{bail, Context, Result};
use faildctl::{Fleet, FleetConfig, StatsStore, TcpConnector};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info};

const DEFAULT_CONFIG_PATH: &str = "fleet.json";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = FleetConfig::load(&path).with_context(|| format!("failed to load {}", path))?;
    info!("Loaded {} agents from {}", config.agents.len(), path);

    let store = StatsStore::new();
    let connector = Arc::new(TcpConnector::new(config.client_config()));
    let mut fleet = Fleet::register(&config, connector, store.clone());

    let report = fleet.bootstrap().await;
    if !report.is_success() {
        for (agent, reason) in report.failures() {
            error!(agent = %agent, "Init failed: {}", reason);
        }
        fleet.shutdown().await;
        bail!("bootstrap failed, refusing to run a partial fleet");
    }
    info!("All agents initialized");

    let mut start_signal = signal(SignalKind::user_defined1()).context("failed to install SIGUSR1 handler")?;
    let mut stop_signal = signal(SignalKind::user_defined2()).context("failed to install SIGUSR2 handler")?;
    let mut report_interval = tokio::time::interval(config.poll_interval());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            _ = start_signal.recv() => fleet.start_faild_all().await,
            _ = stop_signal.recv() => fleet.stop_faild_all().await,
            _ = report_interval.tick() => {
                for gauge in store.gauges() {
                    debug!(agent = %gauge.agent, metric = %gauge.metric, value = gauge.value, "gauge");
                }
            }
        }
    }

    fleet.shutdown().await;
    Ok(())
}
