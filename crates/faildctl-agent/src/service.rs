//! The faild RPC operations

use crate::agent::Handler;
use crate::host::{Host, TcpState};
use crate::stats::parse_faild_stats;
use crate::vip::Vip;
use anyhow::Result;
use async_trait::async_trait;
use faildctl_proto::{Request, Response, Stats, Status};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Statistic holding the number of established TCP sessions on the VIP
pub const ESTABLISHED_TCP_SESSIONS: &str = "established_tcp_sessions";

/// Agent service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Interface faild plugs in and out
    pub iface: String,
    /// Interface the VIP is assigned to
    pub loopback: String,
    /// faild executable
    pub faild_binary: String,
}

impl ServiceConfig {
    /// Configuration for `iface` with default loopback and faild binary
    pub fn new(iface: impl Into<String>) -> Self {
        Self {
            iface: iface.into(),
            loopback: "lo".to_string(),
            faild_binary: "faild".to_string(),
        }
    }

    /// Set the interface the VIP is assigned to
    pub fn with_loopback(mut self, loopback: impl Into<String>) -> Self {
        self.loopback = loopback.into();
        self
    }

    /// Set the faild executable
    pub fn with_faild_binary(mut self, binary: impl Into<String>) -> Self {
        self.faild_binary = binary.into();
        self
    }
}

/// Mutable agent state. Written by `init`, read by `get_statistics`.
#[derive(Debug, Clone)]
pub struct ConnectionServerState {
    /// Interface faild plugs in and out
    pub iface: String,
    /// VIP assigned by the last successful `init`
    pub vip: Option<Vip>,
}

/// Implements the four agent operations on top of a [`Host`].
pub struct FaildService {
    host: Arc<dyn Host>,
    loopback: String,
    faild_binary: String,
    state: RwLock<ConnectionServerState>,
}

impl FaildService {
    /// Create a service with no VIP assigned yet
    pub fn new(config: ServiceConfig, host: Arc<dyn Host>) -> Self {
        Self {
            host,
            loopback: config.loopback,
            faild_binary: config.faild_binary,
            state: RwLock::new(ConnectionServerState { iface: config.iface, vip: None }),
        }
    }

    /// Snapshot of the current state
    pub async fn state(&self) -> ConnectionServerState {
        self.state.read().await.clone()
    }

    /// Assign `vip` to the loopback interface.
    pub async fn init(&self, vip: &str) -> Status {
        if let Err(e) = self.host.find_link(&self.loopback).await {
            error!("unable to find loopback device: {}", e);
            return Status::execution_failed("unable to find loopback device");
        }

        info!("Initializing with Virtual IP: {}", vip);
        let parsed: Vip = match vip.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                error!("unable to parse VIP address {:?}: {}", vip, e);
                return Status::invalid_argument("unable to parse VIP address");
            }
        };

        if let Err(e) = self.host.replace_address(&self.loopback, &parsed).await {
            error!("unable to assign VIP address {}: {}", parsed, e);
            return Status::invalid_argument("unable to assign VIP address");
        }

        self.state.write().await.vip = Some(parsed);
        Status::success()
    }

    /// Plug the interface into faild
    pub async fn start(&self) -> Status {
        self.faild("-p", "unable to start faild").await
    }

    /// Unplug the interface from faild
    pub async fn stop(&self) -> Status {
        self.faild("-u", "unable to stop faild").await
    }

    async fn faild(&self, flag: &str, failure: &str) -> Status {
        let iface = self.state.read().await.iface.clone();
        match self.host.run(&self.faild_binary, &[flag, iface.as_str()]).await {
            Ok(_) => Status::success(),
            Err(e) => {
                error!("{}: {}", failure, e);
                Status::execution_failed(failure)
            }
        }
    }

    /// Count established sessions on the VIP and merge in faild's own counters.
    ///
    /// faild failures are logged; whatever was collected is still returned.
    pub async fn get_statistics(&self) -> Stats {
        let state = self.state().await;
        let mut stats = Stats::new();

        let established = match state.vip {
            Some(vip) => match self.host.tcp_connections().await {
                Ok(connections) => connections
                    .iter()
                    .filter(|c| c.state == TcpState::Established && c.involves(vip.addr()))
                    .count() as i64,
                Err(e) => {
                    warn!("unable to read TCP connection table: {}", e);
                    0
                }
            },
            None => 0,
        };
        stats.insert(ESTABLISHED_TCP_SESSIONS.to_string(), established);

        if let Err(e) = self.collect_faild_stats(&state.iface, &mut stats).await {
            warn!("unable to parse faild statistics: {}", e);
        }
        stats
    }

    async fn collect_faild_stats(&self, iface: &str, stats: &mut Stats) -> Result<()> {
        let output = self.host.run(&self.faild_binary, &["-s", iface]).await?;
        parse_faild_stats(&output, stats)?;
        Ok(())
    }
}

#[async_trait]
impl Handler for FaildService {
    async fn handle(&self, request: Request) -> Result<Response> {
        let id = request.id();
        let response = match request {
            Request::Init { vip, .. } => Response::status(id, self.init(&vip).await),
            Request::Start { .. } => Response::status(id, self.start().await),
            Request::Stop { .. } => Response::status(id, self.stop().await),
            Request::GetStatistics { .. } => Response::Stats {
                request_id: id,
                stats: self.get_statistics().await,
            },
        };
        Ok(response)
    }
}
