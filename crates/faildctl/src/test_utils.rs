//! Scriptable agents for controller tests

use crate::client::{Connector, FaildRpc};
use crate::{ControlError, Result};
use async_trait::async_trait;
use faildctl_proto::{Stats, Status};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// An RPC as observed by a fake agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect,
    Init(String),
    Start,
    Stop,
    GetStatistics,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub agent: String,
    pub call: Call,
    pub at: Instant,
}

/// Calls across every fake agent, in the order they happened
#[derive(Debug, Default)]
pub struct CallLog {
    events: Mutex<Vec<Event>>,
}

impl CallLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, agent: &str, call: Call) {
        self.events.lock().push(Event {
            agent: agent.to_string(),
            call,
            at: Instant::now(),
        });
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn calls(&self, agent: &str) -> Vec<Call> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.agent == agent)
            .map(|e| e.call.clone())
            .collect()
    }

    pub fn count(&self, agent: &str, call: &Call) -> usize {
        self.calls(agent).iter().filter(|c| *c == call).count()
    }
}

pub struct FakeRpc {
    agent: String,
    log: Arc<CallLog>,
    init_status: Status,
    stats: Mutex<Stats>,
    failing_statistics: AtomicBool,
    /// When set, start/stop wait for a permit before answering
    faild_gate: Option<Semaphore>,
}

impl FakeRpc {
    pub fn new(agent: &str, log: Arc<CallLog>) -> Self {
        Self {
            agent: agent.to_string(),
            log,
            init_status: Status::success(),
            stats: Mutex::new(Stats::new()),
            failing_statistics: AtomicBool::new(false),
            faild_gate: None,
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn rejecting_init(mut self, status: Status) -> Self {
        self.init_status = status;
        self
    }

    pub fn blocking_faild(mut self) -> Self {
        self.faild_gate = Some(Semaphore::new(0));
        self
    }

    pub fn release_faild(&self, calls: usize) {
        if let Some(gate) = &self.faild_gate {
            gate.add_permits(calls);
        }
    }

    pub fn set_stats(&self, pairs: &[(&str, i64)]) {
        *self.stats.lock() = pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect();
    }

    pub fn set_failing_statistics(&self, failing: bool) {
        self.failing_statistics.store(failing, Ordering::SeqCst);
    }

    async fn faild(&self, call: Call) -> Result<Status> {
        self.log.record(&self.agent, call);
        if let Some(gate) = &self.faild_gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| ControlError::Transport("gate closed".to_string()))?;
            permit.forget();
        }
        Ok(Status::success())
    }
}

#[async_trait]
impl FaildRpc for FakeRpc {
    async fn init(&self, vip: &str) -> Result<Status> {
        self.log.record(&self.agent, Call::Init(vip.to_string()));
        if self.init_status.is_success() {
            Ok(self.init_status.clone())
        } else {
            Err(ControlError::Rejected(self.init_status.clone()))
        }
    }

    async fn start(&self) -> Result<Status> {
        self.faild(Call::Start).await
    }

    async fn stop(&self) -> Result<Status> {
        self.faild(Call::Stop).await
    }

    async fn get_statistics(&self) -> Result<Stats> {
        self.log.record(&self.agent, Call::GetStatistics);
        if self.failing_statistics.load(Ordering::SeqCst) {
            return Err(ControlError::Transport("connection reset".to_string()));
        }
        Ok(self.stats.lock().clone())
    }
}

/// Hands out fake agents by address; unknown addresses fail to connect
#[derive(Default)]
pub struct FakeConnector {
    agents: HashMap<String, Arc<FakeRpc>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(mut self, addr: &str, rpc: Arc<FakeRpc>) -> Self {
        self.agents.insert(addr.to_string(), rpc);
        self
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, addr: &str) -> Result<Arc<dyn FaildRpc>> {
        match self.agents.get(addr) {
            Some(rpc) => {
                rpc.log.record(&rpc.agent, Call::Connect);
                let rpc: Arc<dyn FaildRpc> = rpc.clone();
                Ok(rpc)
            }
            None => Err(ControlError::Connection(format!("Failed to connect to {}: refused", addr))),
        }
    }
}

/// Poll `condition` every few milliseconds for up to two seconds
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
