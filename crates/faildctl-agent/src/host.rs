//! Host primitives used by the faild service

use crate::vip::Vip;
use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Failures of host-level operations
#[derive(Debug, Error)]
pub enum HostError {
    /// Network interface does not exist
    #[error("link not found: {0}")]
    LinkNotFound(String),

    /// Subprocess could not be started
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program name
        program: String,
        /// Underlying error
        source: io::Error,
    },

    /// Subprocess exited unsuccessfully
    #[error("{program} exited with {status}, stdout: {stdout:?}")]
    CommandFailed {
        /// Program name
        program: String,
        /// Exit status as reported by the OS
        status: String,
        /// Captured standard output
        stdout: String,
    },

    /// Connection table line could not be understood
    #[error("malformed connection table entry: {0:?}")]
    MalformedEntry(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// State column of the kernel TCP table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    /// `01`
    Established,
    /// `0A`
    Listen,
    /// Any other kernel state code
    Other(u8),
}

impl TcpState {
    fn from_code(code: u8) -> Self {
        match code {
            0x01 => Self::Established,
            0x0A => Self::Listen,
            other => Self::Other(other),
        }
    }
}

/// One entry of the host's TCP connection table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpConnection {
    /// Local endpoint
    pub local: SocketAddr,
    /// Remote endpoint
    pub remote: SocketAddr,
    /// Connection state
    pub state: TcpState,
}

impl TcpConnection {
    /// Whether either endpoint uses `addr`
    pub fn involves(&self, addr: IpAddr) -> bool {
        self.local.ip() == addr || self.remote.ip() == addr
    }
}

/// Host-mutating and host-inspecting primitives.
#[async_trait]
pub trait Host: Send + Sync {
    /// Resolve a network interface by name
    async fn find_link(&self, name: &str) -> Result<(), HostError>;

    /// Assign `vip` to `link`, replacing any previous assignment of it
    async fn replace_address(&self, link: &str, vip: &Vip) -> Result<(), HostError>;

    /// Run a program and capture its standard output
    async fn run(&self, program: &str, args: &[&str]) -> Result<String, HostError>;

    /// Enumerate the current TCP connection table
    async fn tcp_connections(&self) -> Result<Vec<TcpConnection>, HostError>;
}

/// [`Host`] backed by the running Linux system.
#[derive(Debug, Clone, Default)]
pub struct SystemHost;

#[async_trait]
impl Host for SystemHost {
    async fn find_link(&self, name: &str) -> Result<(), HostError> {
        let path = Path::new("/sys/class/net").join(name);
        tokio::fs::metadata(&path)
            .await
            .map(|_| ())
            .map_err(|_| HostError::LinkNotFound(name.to_string()))
    }

    async fn replace_address(&self, link: &str, vip: &Vip) -> Result<(), HostError> {
        let vip = vip.to_string();
        self.run("ip", &["addr", "replace", vip.as_str(), "dev", link]).await?;
        Ok(())
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<String, HostError> {
        debug!("Running: {} {}", program, args.join(" "));

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| HostError::Spawn { program: program.to_string(), source })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            return Err(HostError::CommandFailed {
                program: program.to_string(),
                status: output.status.to_string(),
                stdout,
            });
        }
        Ok(stdout)
    }

    async fn tcp_connections(&self) -> Result<Vec<TcpConnection>, HostError> {
        let mut connections = Vec::new();
        for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
            match tokio::fs::read_to_string(table).await {
                Ok(contents) => connections.extend(parse_proc_net_tcp(&contents)?),
                // tcp6 is absent on hosts without IPv6
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(connections)
    }
}

/// Parse the contents of `/proc/net/tcp` or `/proc/net/tcp6`.
pub fn parse_proc_net_tcp(contents: &str) -> Result<Vec<TcpConnection>, HostError> {
    contents
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let malformed = || HostError::MalformedEntry(line.to_string());
            let mut fields = line.split_whitespace().skip(1);
            let local = fields.next().and_then(parse_endpoint).ok_or_else(malformed)?;
            let remote = fields.next().and_then(parse_endpoint).ok_or_else(malformed)?;
            let state = fields
                .next()
                .and_then(|st| u8::from_str_radix(st, 16).ok())
                .ok_or_else(malformed)?;
            Ok(TcpConnection { local, remote, state: TcpState::from_code(state) })
        })
        .collect()
}

/// `0100007F:0035` -> `127.0.0.1:53`. Addresses are stored as 32-bit words in
/// host (little-endian) byte order.
fn parse_endpoint(field: &str) -> Option<SocketAddr> {
    let (addr, port) = field.split_once(':')?;
    let port = u16::from_str_radix(port, 16).ok()?;
    let ip = match addr.len() {
        8 => IpAddr::V4(Ipv4Addr::from(u32::from_str_radix(addr, 16).ok()?.to_le_bytes())),
        32 => {
            let mut octets = [0u8; 16];
            for (i, chunk) in octets.chunks_mut(4).enumerate() {
                let word = u32::from_str_radix(&addr[i * 8..i * 8 + 8], 16).ok()?;
                chunk.copy_from_slice(&word.to_le_bytes());
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return None,
    };
    Some(SocketAddr::new(ip, port))
}
