//! # faildctl agent
//!
//! Runs on every host of a failover group. Assigns the virtual IP to the
//! loopback interface, plugs the host in and out of faild, and reports
//! connection and faild statistics to the controller.

#![warn(missing_docs)]

/// TCP server loop and request dispatch
pub mod agent;

/// Host primitives: interfaces, subprocesses, the TCP connection table
pub mod host;

/// The faild RPC operations
pub mod service;

/// Parsing of `faild -s` output
pub mod stats;

/// Virtual IP parsing
pub mod vip;

/// In-memory host for tests
pub mod test_utils;

pub use agent::{AgentServer, Handler, DEFAULT_LISTEN_ADDR};
pub use host::{Host, HostError, SystemHost, TcpConnection, TcpState};
pub use service::{ConnectionServerState, FaildService, ServiceConfig, ESTABLISHED_TCP_SESSIONS};
pub use stats::{parse_faild_stats, StatsParseError};
pub use vip::{Vip, VipParseError};
