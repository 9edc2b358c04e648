//! Fleet dispatcher
//!
//! Owns every agent handle, bootstraps the agents one at a time and fans
//! operator commands out to all of them.

use crate::client::Connector;
use crate::config::FleetConfig;
use crate::control::{AgentControlLoop, AgentHandle, Command};
use crate::stats::StatsStore;
use faildctl_proto::Status;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Init outcome of one agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapOutcome {
    /// Agent id
    pub agent: String,
    /// Status returned by the agent, or why init failed
    pub result: Result<Status, String>,
}

/// Result of [`Fleet::bootstrap`], one outcome per agent in registration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    outcomes: Vec<BootstrapOutcome>,
}

impl BootstrapReport {
    /// All outcomes
    pub fn outcomes(&self) -> &[BootstrapOutcome] {
        &self.outcomes
    }

    /// Whether every agent initialized
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    /// Agents that failed, with the reason
    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|o| match &o.result {
            Ok(_) => None,
            Err(reason) => Some((o.agent.as_str(), reason.as_str())),
        })
    }
}

struct FleetAgent {
    handle: AgentHandle,
    /// Taken and spawned on bootstrap
    control: Option<AgentControlLoop>,
    task: Option<JoinHandle<()>>,
}

/// Registry of the agents the controller drives
pub struct Fleet {
    agents: Vec<FleetAgent>,
    settle_interval: Duration,
    cancel: CancellationToken,
}

impl Fleet {
    /// Build one handle and control loop per configured agent. No I/O happens
    /// until [`bootstrap`](Self::bootstrap).
    pub fn register(config: &FleetConfig, connector: Arc<dyn Connector>, store: StatsStore) -> Self {
        let cancel = CancellationToken::new();
        let agents = config
            .agents
            .iter()
            .map(|agent| {
                let (control, handle) = AgentControlLoop::new(
                    agent.clone(),
                    connector.clone(),
                    store.clone(),
                    config.poll_interval(),
                    cancel.child_token(),
                );
                FleetAgent {
                    handle,
                    control: Some(control),
                    task: None,
                }
            })
            .collect();

        Self {
            agents,
            settle_interval: config.settle_interval(),
            cancel,
        }
    }

    /// Number of registered agents
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether no agents are registered
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Handles in registration order
    pub fn handles(&self) -> impl Iterator<Item = &AgentHandle> {
        self.agents.iter().map(|a| &a.handle)
    }

    /// Handle of one agent
    pub fn handle(&self, id: &str) -> Option<&AgentHandle> {
        self.handles().find(|h| h.id() == id)
    }

    /// Start every control loop and initialize the agents one after another.
    ///
    /// Each agent is sent `init`, then the fleet waits the settling interval
    /// before looking at the outcome, so no two agents claim the VIP at the
    /// same time. Agents that initialized are sent `start`. Failures are
    /// reported, not acted on.
    pub async fn bootstrap(&mut self) -> BootstrapReport {
        let mut report = BootstrapReport::default();

        for agent in &mut self.agents {
            if let Some(control) = agent.control.take() {
                agent.task = Some(tokio::spawn(control.run()));
            }
            let id = agent.handle.id().to_string();

            info!(agent = %id, vip = %agent.handle.vip(), "Bootstrapping agent");
            if agent.handle.send(Command::Init).await.is_err() {
                report.outcomes.push(BootstrapOutcome {
                    agent: id,
                    result: Err("control loop stopped".to_string()),
                });
                continue;
            }

            tokio::time::sleep(self.settle_interval).await;

            let result = agent.handle.wait_initialized().await;
            match &result {
                Ok(_) => {
                    if agent.handle.send(Command::Start).await.is_err() {
                        warn!(agent = %id, "Control loop stopped before start");
                    }
                }
                Err(reason) => error!(agent = %id, "Bootstrap failed: {}", reason),
            }
            report.outcomes.push(BootstrapOutcome { agent: id, result });
        }

        report
    }

    /// Hand `command` to every running control loop in registration order.
    ///
    /// Returns once each loop has accepted the command; the RPCs it triggers
    /// complete in the background and their errors are only logged.
    pub async fn broadcast(&self, command: Command) {
        for agent in &self.agents {
            if agent.control.is_some() {
                warn!(agent = %agent.handle.id(), "{} not sent: agent not bootstrapped", command);
                continue;
            }
            if agent.handle.send(command).await.is_err() {
                warn!(agent = %agent.handle.id(), "{} not sent: control loop stopped", command);
            }
        }
    }

    /// Plug every host into faild
    pub async fn start_faild_all(&self) {
        info!("Starting faild on all agents");
        self.broadcast(Command::StartFaild).await;
    }

    /// Unplug every host from faild
    pub async fn stop_faild_all(&self) {
        info!("Stopping faild on all agents");
        self.broadcast(Command::StopFaild).await;
    }

    /// Cancel every control loop and polling task and wait for the loops to exit
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        for agent in &mut self.agents {
            if let Some(task) = agent.task.take() {
                if let Err(e) = task.await {
                    error!(agent = %agent.handle.id(), "Control loop panicked: {}", e);
                }
            }
        }
        info!("Fleet shut down");
    }
}

impl Drop for Fleet {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
