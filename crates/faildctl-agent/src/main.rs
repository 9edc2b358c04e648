//! faildctl agent binary
//!
//! Usage: `faildctl-agent <iface>`. `FAILD_AGENT_LISTEN` overrides the listen
//! address and `FAILD_BINARY` the faild executable.

use anyhow::{bail, Context, Result};
use faildctl_agent::{AgentServer, FaildService, ServiceConfig, SystemHost, DEFAULT_LISTEN_ADDR};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "faildctl-agent".to_string());
    let Some(iface) = args.next() else {
        bail!("Usage: {} iface", program);
    };

    let mut config = ServiceConfig::new(iface);
    if let Ok(binary) = std::env::var("FAILD_BINARY") {
        config = config.with_faild_binary(binary);
    }
    let listen = std::env::var("FAILD_AGENT_LISTEN").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string());

    info!("Starting faild agent for interface {}", config.iface);

    let service = Arc::new(FaildService::new(config, Arc::new(SystemHost)));
    let server = AgentServer::bind(listen.as_str(), service)
        .await
        .with_context(|| format!("failed to listen on {}", listen))?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    });

    if let Err(e) = server.run(shutdown).await {
        error!("Agent error: {}", e);
        std::process::exit(1);
    }

    info!("Agent shutting down");
    Ok(())
}
