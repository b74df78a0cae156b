//! Transport errors

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not connected")]
    NotConnected,
    
    #[error("Connection timeout")]
    ConnectionTimeout,
    
    #[error("Connection closed by remote")]
    ConnectionClosed,
    
    #[error("Connection rejected by scanner: {0}")]
    Rejected(String),
    
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
    
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}
