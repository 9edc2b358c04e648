//! Fleet configuration

use crate::client::ClientConfig;
use crate::{ControlError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// One managed host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Identifier used in logs and as the stats key
    pub id: String,
    /// `host:port` of the agent's RPC listener
    pub addr: String,
    /// VIP in CIDR notation, e.g. `198.51.100.1/32`
    pub vip: String,
}

impl AgentConfig {
    /// Create an agent entry
    pub fn new(id: impl Into<String>, addr: impl Into<String>, vip: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            addr: addr.into(),
            vip: vip.into(),
        }
    }
}

/// Controller configuration, usually loaded from a JSON file.
///
/// ```json
/// {
///   "agents": [
///     { "id": "host_a", "addr": "10.0.0.1:9000", "vip": "198.51.100.1/32" }
///   ],
///   "settle_interval_ms": 1000,
///   "poll_interval_ms": 3000,
///   "request_timeout_ms": 30000
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Agents in bootstrap order
    pub agents: Vec<AgentConfig>,
    /// Pause between bootstrapping consecutive agents
    pub settle_interval_ms: u64,
    /// Pause between statistics polls
    pub poll_interval_ms: u64,
    /// Per-request deadline, `null` disables it
    pub request_timeout_ms: Option<u64>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            agents: Vec::new(),
            settle_interval_ms: 1_000,
            poll_interval_ms: 3_000,
            request_timeout_ms: Some(30_000),
        }
    }
}

impl FleetConfig {
    /// Read and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ControlError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&contents)
    }

    /// Parse and validate a JSON config
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that agent ids are present and unique, every agent has a VIP and
    /// the poll interval is non-zero
    pub fn validate(&self) -> Result<()> {
        if self.agents.is_empty() {
            return Err(ControlError::Config("No agents configured".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ControlError::Config("poll_interval_ms must be greater than zero".to_string()));
        }

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.id.trim().is_empty() {
                return Err(ControlError::Config("Agent id must not be empty".to_string()));
            }
            if !seen.insert(agent.id.as_str()) {
                return Err(ControlError::Config(format!("Duplicate agent id: {}", agent.id)));
            }
            if agent.addr.trim().is_empty() {
                return Err(ControlError::Config(format!("Agent {} has no address", agent.id)));
            }
            if agent.vip.trim().is_empty() {
                return Err(ControlError::Config(format!("Agent {} has no VIP", agent.id)));
            }
        }
        Ok(())
    }

    /// Add an agent
    pub fn with_agent(mut self, agent: AgentConfig) -> Self {
        self.agents.push(agent);
        self
    }

    /// Set the bootstrap settling interval
    pub fn with_settle_interval(mut self, interval: Duration) -> Self {
        self.settle_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the statistics poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the per-request deadline
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    /// Bootstrap settling interval
    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_interval_ms)
    }

    /// Statistics poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Transport settings derived from this config
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::default().with_request_timeout(self.request_timeout_ms.map(Duration::from_millis))
    }
}
