//! Error types for the controller

use faildctl_proto::{ProtocolError, Status};
use std::time::Duration;
use thiserror::Error;

/// Main error type for controller operations
#[derive(Debug, Error)]
pub enum ControlError {
    /// The connection to an agent broke or closed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Could not connect to an agent
    #[error("Connection error: {0}")]
    Connection(String),

    /// The agent sent something we did not expect
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The agent answered with a non-zero status
    #[error("Agent rejected request: {0}")]
    Rejected(Status),

    /// The agent could not serve the request at all
    #[error("Agent error: {0}")]
    Agent(String),

    /// Timeout errors
    #[error("Timeout after {duration:?}")]
    Timeout {
        /// Duration that was exceeded
        duration: Duration,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid fleet configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ControlError {
    /// The agent status carried by a rejection, if any
    pub fn status(&self) -> Option<&Status> {
        match self {
            Self::Rejected(status) => Some(status),
            _ => None,
        }
    }
}

impl From<ProtocolError> for ControlError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(e) => Self::Io(e),
            ProtocolError::Serialization(msg) => Self::Serialization(msg),
            other => Self::Protocol(other.to_string()),
        }
    }
}

impl From<rmp_serde::encode::Error> for ControlError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Serialization(format!("MessagePack encode error: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for ControlError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Serialization(format!("MessagePack decode error: {}", err))
    }
}

impl From<serde_json::Error> for ControlError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON error: {}", err))
    }
}
