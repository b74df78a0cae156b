//! High-level error types

use scanlink_core::{ResultCode, SessionState};
use scanlink_types::ScannerId;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure to open a session with a scanner
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("Connection timeout")]
    Timeout,
    
    #[error("Connection rejected: {0}")]
    Rejected(String),
    
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),
    
    #[error("Cannot connect a session in state {0:?}")]
    InvalidState(SessionState),
}

impl From<scanlink_transport::Error> for ConnectError {
    fn from(err: scanlink_transport::Error) -> Self {
        match err {
            scanlink_transport::Error::ConnectionTimeout => Self::Timeout,
            scanlink_transport::Error::Rejected(reason) => Self::Rejected(reason),
            other => Self::TransportUnavailable(other.to_string()),
        }
    }
}

/// Failure to queue a command on a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("Session is not active")]
    NotActive,
    
    #[error("Session command queue is full")]
    QueueFull,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EstablishError {
    #[error("Scanner {0} is not available")]
    ScannerNotAvailable(ScannerId),
    
    #[error("Failed to connect: {0}")]
    Connect(#[from] ConnectError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TerminateError {
    #[error("Scanner {0} has no active session")]
    ScannerNotActive(ScannerId),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecuteError {
    #[error("Scanner {0} has no active session")]
    ScannerNotActive(ScannerId),
    
    #[error(transparent)]
    Send(#[from] SendError),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Core protocol error: {0}")]
    Core(#[from] scanlink_core::Error),
    
    #[error("Transport error: {0}")]
    Transport(#[from] scanlink_transport::Error),
    
    #[error("Type error: {0}")]
    Types(#[from] scanlink_types::Error),
    
    #[error(transparent)]
    Establish(#[from] EstablishError),
    
    #[error(transparent)]
    Terminate(#[from] TerminateError),
    
    #[error(transparent)]
    Execute(#[from] ExecuteError),
    
    #[error("Session manager is not running")]
    ManagerStopped,
    
    #[error("Host event channel closed")]
    HostDisconnected,
}

impl Error {
    /// Result code a host bridge reports for this failure
    pub fn result_code(&self) -> ResultCode {
        match self {
            Self::Establish(EstablishError::ScannerNotAvailable(_)) => {
                ResultCode::ScannerNotAvailable
            }
            Self::Establish(EstablishError::Connect(ConnectError::Timeout)) => {
                ResultCode::ResponseTimeout
            }
            Self::Establish(EstablishError::Connect(_)) => ResultCode::ScannerNotConnected,
            Self::Terminate(TerminateError::ScannerNotActive(_))
            | Self::Execute(ExecuteError::ScannerNotActive(_))
            | Self::Execute(ExecuteError::Send(SendError::NotActive)) => {
                ResultCode::ScannerNotActive
            }
            Self::Types(_) => ResultCode::InvalidParams,
            Self::Core(scanlink_core::Error::PayloadTooLarge { .. }) => ResultCode::InvalidParams,
            _ => ResultCode::Failure,
        }
    }
}
