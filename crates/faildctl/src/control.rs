//! Per-agent control loop
//!
//! Each agent gets one [`AgentControlLoop`] task that owns its RPC connection
//! and processes [`Command`]s strictly in order. The dispatcher keeps the
//! matching [`AgentHandle`].

use crate::client::{Connector, FaildRpc};
use crate::config::AgentConfig;
use crate::stats::{StatsSnapshot, StatsStore};
use faildctl_proto::Status;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Commands accepted by a control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Connect and assign the VIP
    Init,
    /// Start polling statistics
    Start,
    /// Stop polling statistics
    Stop,
    /// Plug the host into faild
    StartFaild,
    /// Unplug the host from faild
    StopFaild,
}

impl Command {
    /// Name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::StartFaild => "start_faild",
            Self::StopFaild => "stop_faild",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one agent as seen by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentState {
    /// Control loop created, no connection yet
    Uninitialized,
    /// VIP assigned; holds the status the agent returned
    Initialized(Status),
    /// Statistics polling is running
    Polling,
    /// Init failed; the loop ignores everything but shutdown
    Failed(String),
}

impl AgentState {
    /// Whether init has succeeded
    pub fn is_initialized(&self) -> bool {
        matches!(self, Self::Initialized(_) | Self::Polling)
    }
}

/// The command channel applies back-pressure: a send completes only once the
/// loop has taken the previous command.
const COMMAND_CHANNEL_CAPACITY: usize = 1;

/// Dispatcher-side handle of one agent
#[derive(Debug)]
pub struct AgentHandle {
    config: AgentConfig,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<AgentState>,
    cancel: CancellationToken,
}

impl AgentHandle {
    /// Agent id
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Agent RPC address
    pub fn addr(&self) -> &str {
        &self.config.addr
    }

    /// VIP assigned on init
    pub fn vip(&self) -> &str {
        &self.config.vip
    }

    /// Queue a command, waiting until the control loop accepts it
    pub async fn send(&self, command: Command) -> Result<(), mpsc::error::SendError<Command>> {
        self.commands.send(command).await
    }

    /// Current state
    pub fn state(&self) -> AgentState {
        self.state.borrow().clone()
    }

    /// Subscribe to state changes
    pub fn watch_state(&self) -> watch::Receiver<AgentState> {
        self.state.clone()
    }

    /// Wait for the init outcome
    pub async fn wait_initialized(&self) -> Result<Status, String> {
        let mut state = self.state.clone();
        let settled = state
            .wait_for(|s| !matches!(s, AgentState::Uninitialized))
            .await
            .map(|s| (*s).clone());

        match settled {
            Ok(AgentState::Initialized(status)) => Ok(status),
            Ok(AgentState::Polling) => Ok(Status::success()),
            Ok(AgentState::Failed(reason)) => Err(reason),
            Ok(AgentState::Uninitialized) | Err(_) => Err("control loop stopped before init completed".to_string()),
        }
    }

    /// Stop this agent's control loop and polling
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Single consumer of one agent's command channel
pub struct AgentControlLoop {
    config: AgentConfig,
    commands: mpsc::Receiver<Command>,
    state: watch::Sender<AgentState>,
    connector: Arc<dyn Connector>,
    store: StatsStore,
    poll_interval: Duration,
    cancel: CancellationToken,
    rpc: Option<Arc<dyn FaildRpc>>,
    init_status: Option<Status>,
    poller: Option<CancellationToken>,
}

impl AgentControlLoop {
    /// Create a loop and the handle that drives it. `cancel` stops the loop
    /// and any polling it started. Nothing runs until [`run`](Self::run) is
    /// spawned.
    pub fn new(
        config: AgentConfig,
        connector: Arc<dyn Connector>,
        store: StatsStore,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> (Self, AgentHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(AgentState::Uninitialized);

        let handle = AgentHandle {
            config: config.clone(),
            commands: command_tx,
            state: state_rx,
            cancel: cancel.clone(),
        };
        let control = Self {
            config,
            commands: command_rx,
            state: state_tx,
            connector,
            store,
            poll_interval,
            cancel,
            rpc: None,
            init_status: None,
            poller: None,
        };
        (control, handle)
    }

    /// Process commands until cancelled or every handle is dropped
    pub async fn run(mut self) {
        info!(agent = %self.config.id, "Control loop started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(agent = %self.config.id, "Control loop cancelled");
                    break;
                }

                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }

        self.stop_polling();
        info!(agent = %self.config.id, "Control loop stopped");
    }

    async fn handle(&mut self, command: Command) {
        debug!(agent = %self.config.id, command = %command, "Processing command");

        match command {
            Command::Init => self.init().await,
            Command::Start => self.start_polling(),
            Command::Stop => {
                if self.stop_polling() {
                    if let Some(status) = self.init_status.clone() {
                        self.state.send_replace(AgentState::Initialized(status));
                    }
                } else {
                    warn!(agent = %self.config.id, "Stop ignored: not polling");
                }
            }
            Command::StartFaild | Command::StopFaild => self.fire_faild(command),
        }
    }

    async fn init(&mut self) {
        let current = self.state.borrow().clone();
        if current != AgentState::Uninitialized {
            warn!(agent = %self.config.id, "Init ignored in state {:?}", current);
            return;
        }

        let rpc = match self.connector.connect(&self.config.addr).await {
            Ok(rpc) => rpc,
            Err(e) => {
                error!(agent = %self.config.id, "Failed to connect to {}: {}", self.config.addr, e);
                self.state.send_replace(AgentState::Failed(e.to_string()));
                return;
            }
        };

        match rpc.init(&self.config.vip).await {
            Ok(status) => {
                info!(agent = %self.config.id, vip = %self.config.vip, "Agent initialized: {}", status);
                self.rpc = Some(rpc);
                self.init_status = Some(status.clone());
                self.state.send_replace(AgentState::Initialized(status));
            }
            Err(e) => {
                error!(agent = %self.config.id, vip = %self.config.vip, "Init failed: {}", e);
                self.state.send_replace(AgentState::Failed(e.to_string()));
            }
        }
    }

    fn start_polling(&mut self) {
        let Some(rpc) = self.rpc.clone() else {
            warn!(agent = %self.config.id, "Start ignored: agent not initialized");
            return;
        };
        if self.poller.is_some() {
            warn!(agent = %self.config.id, "Start ignored: already polling");
            return;
        }

        let token = self.cancel.child_token();
        tokio::spawn(poll_statistics(
            self.config.id.clone(),
            rpc,
            self.store.clone(),
            self.poll_interval,
            token.clone(),
        ));
        self.poller = Some(token);
        self.state.send_replace(AgentState::Polling);
        info!(agent = %self.config.id, "Statistics polling started");
    }

    /// Returns whether a poller was running
    fn stop_polling(&mut self) -> bool {
        match self.poller.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn fire_faild(&self, command: Command) {
        let Some(rpc) = self.rpc.clone() else {
            warn!(agent = %self.config.id, "{} ignored: agent not initialized", command);
            return;
        };

        let agent = self.config.id.clone();
        tokio::spawn(async move {
            let result = match command {
                Command::StopFaild => rpc.stop().await,
                _ => rpc.start().await,
            };
            match result {
                Ok(status) => debug!(agent = %agent, "{} done: {}", command, status),
                Err(e) => warn!(agent = %agent, "{} failed: {}", command, e),
            }
        });
    }
}

/// Poll `rpc` until `cancel` fires: fetch, wait one interval, then publish.
/// A failed fetch leaves the previous snapshot in place.
pub async fn poll_statistics(
    agent: String,
    rpc: Arc<dyn FaildRpc>,
    store: StatsStore,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = rpc.get_statistics() => result,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        match result {
            Ok(stats) => store.set(agent.as_str(), StatsSnapshot::new(stats)),
            Err(e) => warn!(agent = %agent, "Failed to get statistics: {}", e),
        }
    }

    debug!(agent = %agent, "Statistics polling stopped");
}
