//! Type definitions for scanlink

pub mod error;
pub mod scanner;

pub use error::{Error, Result};
pub use scanner::{
    AvailableScanner, ConnectionType, OperatingMode, ScannerId, ScannerIdentity, ScannerModel,
};
