//! Error types for the rwalk wire protocol.

use crate::types::MsgType;
use thiserror::Error;

/// Errors raised while framing or parsing protocol messages.
///
/// Everything except [`WireError::Io`] is a protocol violation: the peer sent
/// bytes that cannot be a valid frame and the connection should be torn down.
#[derive(Debug, Error)]
pub enum WireError {
    /// Underlying socket read/write failed (includes EOF mid-frame)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Header declared a payload above the configured ceiling
    #[error("Declared payload of {len} bytes exceeds limit of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    /// Header carried a type this protocol does not define
    #[error("Unknown message type: {0}")]
    UnknownType(u32),

    /// Payload length does not match the fixed layout of its type
    #[error("{msg_type:?} payload must be {expected} bytes, got {actual}")]
    BadLength {
        msg_type: MsgType,
        expected: usize,
        actual: usize,
    },

    /// Mode field was neither INTERACTIVE nor SUMMARY
    #[error("Invalid mode value: {0}")]
    InvalidMode(u32),

    /// Payload was structurally unusable for another reason
    #[error("Malformed payload: {0}")]
    Malformed(String),
}

impl WireError {
    /// Creates a malformed-payload error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// Returns true when the peer violated the protocol (as opposed to the
    /// transport simply failing).
    pub fn is_protocol_violation(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}
