//! Transport layer for scanner links
//!
//! Abstracts the accessory and BLE drivers as byte-stream primitives:
//! open a connection for a scanner identity, write bytes, read bytes until
//! the link fails, close.

pub mod error;
pub mod memory;
pub mod stream;
pub mod tcp;

pub use error::{Error, Result};
pub use memory::{MemoryConnector, PeerListener};
pub use stream::StreamLink;
pub use tcp::TcpConnector;

use async_trait::async_trait;
use bytes::BytesMut;
use scanlink_types::ScannerIdentity;

/// Opens transport connections to scanners
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection, completing the transport handshake
    async fn open(&self, identity: &ScannerIdentity) -> Result<Box<dyn Link>>;
}

/// An open connection to one scanner
pub trait Link: Send {
    /// Split into independently owned read and write halves
    fn split(self: Box<Self>) -> (Box<dyn LinkReader>, Box<dyn LinkWriter>);
}

/// Read half of a link
#[async_trait]
pub trait LinkReader: Send {
    /// Receive the next chunk of bytes
    ///
    /// Chunks carry no frame boundaries. Returns an error once the link
    /// fails or the remote side closes it.
    async fn read(&mut self) -> Result<BytesMut>;
}

/// Write half of a link
#[async_trait]
pub trait LinkWriter: Send {
    /// Send raw bytes
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Close the link
    async fn close(&mut self) -> Result<()>;
}
