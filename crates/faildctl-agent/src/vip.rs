//! Virtual IP parsing

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

/// Reasons a VIP string is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VipParseError {
    /// No `/prefix` part
    #[error("missing prefix length in {0:?}")]
    MissingPrefix(String),

    /// Address part is not an IP address
    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    /// Prefix part is not a number
    #[error("invalid prefix length {0:?}")]
    InvalidPrefix(String),

    /// Prefix longer than the address family allows
    #[error("prefix length {prefix} exceeds {max}")]
    PrefixOutOfRange {
        /// Parsed prefix
        prefix: u8,
        /// Address family maximum
        max: u8,
    },
}

/// A virtual IP in CIDR notation, e.g. `198.51.100.1/32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vip {
    addr: IpAddr,
    prefix: u8,
}

impl Vip {
    /// Build a VIP from its parts
    pub fn new(addr: IpAddr, prefix: u8) -> Result<Self, VipParseError> {
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(VipParseError::PrefixOutOfRange { prefix, max });
        }
        Ok(Self { addr, prefix })
    }

    /// The host address
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// The prefix length
    pub fn prefix(&self) -> u8 {
        self.prefix
    }
}

impl FromStr for Vip {
    type Err = VipParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| VipParseError::MissingPrefix(s.to_string()))?;
        let addr: IpAddr = addr
            .parse()
            .map_err(|_| VipParseError::InvalidAddress(addr.to_string()))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| VipParseError::InvalidPrefix(prefix.to_string()))?;
        Self::new(addr, prefix)
    }
}

impl fmt::Display for Vip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}
