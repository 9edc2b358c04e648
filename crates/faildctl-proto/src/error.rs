//! Error types for protocol operations

use thiserror::Error;
use crate::message::{ErrorCode, ErrorDetails};

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O failure on the underlying stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Truncated or malformed frame
    #[error("Invalid frame format")]
    InvalidFrame,

    /// Frame too large
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },
}

impl From<rmp_serde::encode::Error> for ProtocolError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Serialization(format!("MessagePack encode error: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for ProtocolError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Serialization(format!("MessagePack decode error: {}", err))
    }
}

impl From<&ProtocolError> for ErrorDetails {
    fn from(error: &ProtocolError) -> Self {
        match error {
            ProtocolError::FrameTooLarge { .. } => {
                ErrorDetails::new(ErrorCode::ResourceExhausted, error.to_string())
            }
            ProtocolError::Io(_) => ErrorDetails::new(ErrorCode::InternalError, error.to_string()),
            ProtocolError::Serialization(_) | ProtocolError::InvalidFrame => {
                ErrorDetails::new(ErrorCode::InvalidRequest, error.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_details_mapping() {
        let details = ErrorDetails::from(&ProtocolError::FrameTooLarge { size: 10, max: 5 });
        assert_eq!(details.code, ErrorCode::ResourceExhausted);
        assert!(details.message.contains("10 bytes"));

        let details = ErrorDetails::from(&ProtocolError::InvalidFrame);
        assert_eq!(details.code, ErrorCode::InvalidRequest);
    }
}
