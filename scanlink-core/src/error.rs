//! Error types for scanlink-core

use crate::session::SessionState;

/// Result type alias for scanlink-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Frame decoding errors
///
/// Both are recoverable: the offending frame is dropped. Repeated
/// `Malformed` frames indicate the stream lost sync.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Opcode outside the known enumeration
    #[error("Unknown opcode: {0}")]
    UnknownOpcode(u16),

    /// Truncated frame or payload that violates the frame layout
    #[error("Malformed frame: {0}")]
    Malformed(String),
}

impl CodecError {
    /// Check if this error counts towards stream desync
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

/// Core protocol errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Frame could not be decoded
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Result byte outside the known set
    #[error("Invalid result code: {0}")]
    InvalidResultCode(u8),

    /// Session state machine violation
    #[error("Invalid session transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },

    /// Payload too large
    #[error("Payload too large: {size} bytes (max: {max} bytes)")]
    PayloadTooLarge {
        size: usize,
        max: usize,
    },
}
