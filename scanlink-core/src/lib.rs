//! # scanlink-core
//!
//! Core protocol implementation for wireless barcode scanners.
//!
//! This crate provides the low-level protocol primitives:
//! - Opcode and result code definitions
//! - Frame structure and encoding/decoding
//! - Session state machine and correlation tokens
//! - Protocol constants

pub mod constants;
pub mod error;
pub mod frame;
pub mod opcode;
pub mod result;
pub mod session;

pub use error::{CodecError, Error, Result};
pub use frame::{Command, DecodedFrame, FirmwareProgress, FrameBuffer, Notification, Response};
pub use opcode::Opcode;
pub use result::ResultCode;
pub use session::{SessionState, TokenGenerator};

/// Protocol version information
pub const PROTOCOL_VERSION: &str = "1.0";

/// Frame header size
pub const HEADER_SIZE: usize = frame::HEADER_SIZE;

/// Maximum frame payload size
pub const MAX_PAYLOAD_SIZE: usize = frame::MAX_PAYLOAD_SIZE;
