//! Frame structure and serialization

use serde::{Deserialize, Serialize};
use bytes::Bytes;
use crate::ProtocolError;

/// Frame flags for protocol control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFlags(pub u8);

impl FrameFlags {
    /// No special flags
    pub const NONE: Self = Self(0);
    /// Payload carries `ErrorDetails` instead of a `Message`
    pub const ERROR: Self = Self(2);

    /// Check if a flag is set
    pub fn has_flag(self, flag: FrameFlags) -> bool {
        (self.0 & flag.0) != 0
    }
}

/// A single unit on the wire.
///
/// `stream_id` is assigned by the sender per connection and echoed back on the
/// reply frame; request/response correlation happens on the message id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Stream identifier
    pub stream_id: u32,
    /// Frame flags
    pub flags: FrameFlags,
    /// MessagePack-encoded payload
    pub payload: Bytes,
}

impl Frame {
    /// Create a data frame
    pub fn data(stream_id: u32, payload: Bytes) -> Self {
        Self { stream_id, flags: FrameFlags::NONE, payload }
    }

    /// Create an error frame
    pub fn error(stream_id: u32, payload: Bytes) -> Self {
        Self { stream_id, flags: FrameFlags::ERROR, payload }
    }

    /// Serialize frame to MessagePack bytes
    pub fn to_msgpack(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(rmp_serde::to_vec(self)?)
    }

    /// Deserialize frame from MessagePack bytes
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Check if this is an error frame
    pub fn is_error(&self) -> bool {
        self.flags.has_flag(FrameFlags::ERROR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_flags() {
        assert!(!FrameFlags::NONE.has_flag(FrameFlags::ERROR));
        assert!(FrameFlags::ERROR.has_flag(FrameFlags::ERROR));
    }

    #[test]
    fn test_error_frame() {
        let frame = Frame::error(7, Bytes::from("boom"));
        assert!(frame.is_error());
        assert_eq!(frame.stream_id, 7);

        let frame = Frame::data(7, Bytes::new());
        assert!(!frame.is_error());
    }

    #[test]
    fn test_garbage_is_rejected() {
        let result = Frame::from_msgpack(&[0xc1, 0xc1]);
        assert!(matches!(result, Err(ProtocolError::Serialization(_))));
    }
}
