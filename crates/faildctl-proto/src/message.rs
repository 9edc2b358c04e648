//! Request, response and status types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use bytes::Bytes;
use uuid::Uuid;
use crate::{Frame, ProtocolError};

/// Statistics map returned by `GetStatistics`: metric name to value.
pub type Stats = HashMap<String, i64>;

/// Top-level message wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Request message
    Request(Request),
    /// Response message
    Response(Response),
}

impl Message {
    /// Get the correlation id of this message
    pub fn request_id(&self) -> Uuid {
        match self {
            Self::Request(req) => req.id(),
            Self::Response(resp) => resp.request_id(),
        }
    }

    /// Wrap this message into a data frame
    pub fn to_frame(&self, stream_id: u32) -> Result<Frame, ProtocolError> {
        let payload = rmp_serde::to_vec(self)?;
        Ok(Frame::data(stream_id, Bytes::from(payload)))
    }

    /// Decode the message carried by a data frame
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        Ok(rmp_serde::from_slice(&frame.payload)?)
    }
}

/// Operations exposed by a faild agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// Assign the virtual IP to the agent's loopback interface
    Init {
        /// Request ID for correlation
        id: Uuid,
        /// VIP in CIDR notation, e.g. `198.51.100.1/32`
        vip: String,
    },

    /// Plug the agent's interface into faild
    Start {
        /// Request ID for correlation
        id: Uuid,
    },

    /// Unplug the agent's interface from faild
    Stop {
        /// Request ID for correlation
        id: Uuid,
    },

    /// Collect a statistics snapshot
    GetStatistics {
        /// Request ID for correlation
        id: Uuid,
    },
}

impl Request {
    /// Get the request ID
    pub fn id(&self) -> Uuid {
        match self {
            Self::Init { id, .. } => *id,
            Self::Start { id } => *id,
            Self::Stop { id } => *id,
            Self::GetStatistics { id } => *id,
        }
    }

    /// Short operation name, used in logs
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Start { .. } => "start",
            Self::Stop { .. } => "stop",
            Self::GetStatistics { .. } => "get_statistics",
        }
    }

    /// Create an init request
    pub fn init(vip: impl Into<String>) -> Self {
        Self::Init { id: Uuid::new_v4(), vip: vip.into() }
    }

    /// Create a start request
    pub fn start() -> Self {
        Self::Start { id: Uuid::new_v4() }
    }

    /// Create a stop request
    pub fn stop() -> Self {
        Self::Stop { id: Uuid::new_v4() }
    }

    /// Create a statistics request
    pub fn get_statistics() -> Self {
        Self::GetStatistics { id: Uuid::new_v4() }
    }
}

/// Agent replies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    /// Result of a mutating operation
    Status {
        /// Request ID this responds to
        request_id: Uuid,
        /// Outcome
        status: Status,
    },

    /// Statistics snapshot
    Stats {
        /// Request ID this responds to
        request_id: Uuid,
        /// Metric name to value
        stats: Stats,
    },

    /// The request could not be served at all
    Error {
        /// Request ID this responds to
        request_id: Uuid,
        /// Error details
        error: ErrorDetails,
    },
}

impl Response {
    /// Get the request ID this response corresponds to
    pub fn request_id(&self) -> Uuid {
        match self {
            Self::Status { request_id, .. } => *request_id,
            Self::Stats { request_id, .. } => *request_id,
            Self::Error { request_id, .. } => *request_id,
        }
    }

    /// Create a status response
    pub fn status(request_id: Uuid, status: Status) -> Self {
        Self::Status { request_id, status }
    }

    /// Create an error response
    pub fn error(request_id: Uuid, error: ErrorDetails) -> Self {
        Self::Error { request_id, error }
    }
}

/// Outcome of a mutating agent operation.
///
/// Code 0 is success, 3 a validation failure and 5 an execution failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Numeric outcome code
    pub code: i32,
    /// Human-readable message
    pub message: String,
}

impl Status {
    /// Operation succeeded
    pub const OK: i32 = 0;
    /// Input could not be parsed or applied
    pub const INVALID_ARGUMENT: i32 = 3;
    /// Host lookup or subprocess execution failed
    pub const EXECUTION_FAILED: i32 = 5;

    /// Create a status with an explicit code
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    /// The canonical success status
    pub fn success() -> Self {
        Self::new(Self::OK, "Success")
    }

    /// Code 3 status
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_ARGUMENT, message)
    }

    /// Code 5 status
    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::new(Self::EXECUTION_FAILED, message)
    }

    /// Whether the code signals success
    pub fn is_success(&self) -> bool {
        self.code == Self::OK
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code {}: {}", self.code, self.message)
    }
}

/// Error details for error responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
}

/// Error codes for requests that never reached an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Invalid request format
    InvalidRequest,
    /// Internal server error
    InternalError,
    /// Unsupported operation
    Unsupported,
    /// Resource exhausted
    ResourceExhausted,
}

impl ErrorDetails {
    /// Create a new error details
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}
