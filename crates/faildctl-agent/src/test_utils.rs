//! In-memory [`Host`] for exercising the service without touching the system

use crate::host::{Host, HostError, TcpConnection};
use crate::vip::Vip;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct FakeHostState {
    links: HashSet<String>,
    addresses: HashMap<String, Vec<Vip>>,
    commands: Vec<Vec<String>>,
    failing_flags: HashSet<String>,
    stats_output: String,
    connections: Vec<TcpConnection>,
    reject_addresses: bool,
}

/// Scriptable host. Subprocess calls are recorded and answered by their
/// first argument (the faild flag).
#[derive(Debug, Default)]
pub struct FakeHost {
    state: Mutex<FakeHostState>,
}

impl FakeHost {
    /// Host with a `lo` link and nothing else
    pub fn new() -> Self {
        Self::without_links().with_link("lo")
    }

    /// Host with no links at all
    pub fn without_links() -> Self {
        Self::default()
    }

    /// Add a link
    pub fn with_link(self, name: &str) -> Self {
        self.lock().links.insert(name.to_string());
        self
    }

    /// Output printed by `faild -s`
    pub fn with_stats_output(self, output: &str) -> Self {
        self.lock().stats_output = output.to_string();
        self
    }

    /// Make every invocation with `flag` exit unsuccessfully
    pub fn with_failing_flag(self, flag: &str) -> Self {
        self.lock().failing_flags.insert(flag.to_string());
        self
    }

    /// Contents of the TCP connection table
    pub fn with_connections(self, connections: Vec<TcpConnection>) -> Self {
        self.lock().connections = connections;
        self
    }

    /// Make address assignment fail
    pub fn rejecting_addresses(self) -> Self {
        self.lock().reject_addresses = true;
        self
    }

    /// Addresses currently assigned to `link`
    pub fn addresses(&self, link: &str) -> Vec<Vip> {
        self.lock().addresses.get(link).cloned().unwrap_or_default()
    }

    /// Every subprocess invocation so far, program first
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.lock().commands.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeHostState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Host for FakeHost {
    async fn find_link(&self, name: &str) -> Result<(), HostError> {
        if self.lock().links.contains(name) {
            Ok(())
        } else {
            Err(HostError::LinkNotFound(name.to_string()))
        }
    }

    async fn replace_address(&self, link: &str, vip: &Vip) -> Result<(), HostError> {
        let mut state = self.lock();
        if state.reject_addresses {
            return Err(HostError::CommandFailed {
                program: "ip".to_string(),
                status: "exit status: 2".to_string(),
                stdout: String::new(),
            });
        }
        let assigned = state.addresses.entry(link.to_string()).or_default();
        if !assigned.contains(vip) {
            assigned.push(*vip);
        }
        Ok(())
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<String, HostError> {
        let mut state = self.lock();
        let mut command = vec![program.to_string()];
        command.extend(args.iter().map(|a| a.to_string()));
        state.commands.push(command);

        let flag = args.first().copied().unwrap_or_default();
        if state.failing_flags.contains(flag) {
            return Err(HostError::CommandFailed {
                program: program.to_string(),
                status: "exit status: 1".to_string(),
                stdout: String::new(),
            });
        }
        Ok(if flag == "-s" { state.stats_output.clone() } else { String::new() })
    }

    async fn tcp_connections(&self) -> Result<Vec<TcpConnection>, HostError> {
        Ok(self.lock().connections.clone())
    }
}
