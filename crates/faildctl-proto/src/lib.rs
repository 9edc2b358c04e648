//! # faildctl protocol
//!
//! Message types, status values and the length-prefixed frame codec spoken
//! between the fleet controller and the per-host faild agents.

#![warn(missing_docs)]

/// Frame structure and serialization
pub mod frame;

/// Request, response and status types
pub mod message;

/// Frame codec for async streams
pub mod codec;

/// Error types for protocol operations
pub mod error;

pub use codec::FrameCodec;
pub use error::ProtocolError;
pub use frame::{Frame, FrameFlags};
pub use message::{ErrorCode, ErrorDetails, Message, Request, Response, Stats, Status};
