//! Result codes carried in scanner responses

use std::fmt;

use crate::error::{Error, Result};

/// Outcome of a command
///
/// Values `0..=9` are sent by scanners. `Cancelled` is produced only by the
/// host when a session ends with the request still outstanding and has no
/// wire representation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResultCode {
    Success = 0,
    Failure = 1,
    ScannerNotAvailable = 2,
    ScannerNotActive = 3,
    InvalidParams = 4,
    ResponseTimeout = 5,
    OpcodeNotSupported = 6,
    ScannerNoSupport = 7,
    BtAddressNotSet = 8,
    ScannerNotConnected = 9,
    Cancelled = 0xFE,
}

impl ResultCode {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl From<ResultCode> for u8 {
    fn from(code: ResultCode) -> u8 {
        code as u8
    }
}

impl TryFrom<u8> for ResultCode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Success),
            1 => Ok(Self::Failure),
            2 => Ok(Self::ScannerNotAvailable),
            3 => Ok(Self::ScannerNotActive),
            4 => Ok(Self::InvalidParams),
            5 => Ok(Self::ResponseTimeout),
            6 => Ok(Self::OpcodeNotSupported),
            7 => Ok(Self::ScannerNoSupport),
            8 => Ok(Self::BtAddressNotSet),
            9 => Ok(Self::ScannerNotConnected),
            _ => Err(Error::InvalidResultCode(value)),
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, *self as u8)
    }
}
