//! # faildctl
//!
//! Fleet controller for hosts running the faild failover daemon.
//!
//! The controller connects to a `faildctl-agent` on every host, assigns the
//! shared virtual IP one host at a time, polls each agent's statistics into a
//! [`StatsStore`] and broadcasts start/stop of faild to the whole fleet.

#![warn(missing_docs)]

pub use faildctl_proto as proto;

/// Error types for the controller
pub mod error;

/// Agent RPC client
pub mod client;

/// Fleet configuration
pub mod config;

/// Per-agent control loop
pub mod control;

/// Fleet dispatcher
pub mod fleet;

/// Statistics store
pub mod stats;

#[cfg(test)]
mod test_utils;

pub use client::{AgentClient, ClientConfig, Connector, FaildRpc, TcpConnector};
pub use config::{AgentConfig, FleetConfig};
pub use control::{AgentControlLoop, AgentHandle, AgentState, Command};
pub use error::ControlError;
pub use fleet::{BootstrapOutcome, BootstrapReport, Fleet};
pub use stats::{GaugeSample, StatsSnapshot, StatsStore};

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, ControlError>;
