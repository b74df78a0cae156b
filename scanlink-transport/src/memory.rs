//! In-process connector backed by duplex pipes
//!
//! Each `open` creates a fresh pipe and hands the scanner end to the
//! `PeerListener` registered for that id, so a simulated scanner can accept
//! repeated connections.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use scanlink_types::{ScannerId, ScannerIdentity};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{error::*, Connector, Link, StreamLink};

const DEFAULT_PIPE_SIZE: usize = 64 * 1024;

struct Peer {
    tx: mpsc::UnboundedSender<DuplexStream>,
    rejection: Option<String>,
    opened: usize,
}

/// Connector for simulated scanners
pub struct MemoryConnector {
    peers: Mutex<HashMap<ScannerId, Peer>>,
    pipe_size: usize,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
            pipe_size: DEFAULT_PIPE_SIZE,
        }
    }

    /// Set the in-flight byte capacity of each pipe
    pub fn with_pipe_size(mut self, size: usize) -> Self {
        self.pipe_size = size;
        self
    }

    /// Register a scanner, replacing any previous listener for the id
    pub fn listen(&self, id: ScannerId) -> PeerListener {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.lock().insert(
            id,
            Peer {
                tx,
                rejection: None,
                opened: 0,
            },
        );
        PeerListener { rx }
    }

    /// Make future connections to `id` fail the handshake
    pub fn reject(&self, id: ScannerId, reason: impl Into<String>) {
        if let Some(peer) = self.peers.lock().get_mut(&id) {
            peer.rejection = Some(reason.into());
        }
    }

    /// Number of successful opens for `id`
    pub fn open_count(&self, id: ScannerId) -> usize {
        self.peers.lock().get(&id).map_or(0, |peer| peer.opened)
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, identity: &ScannerIdentity) -> Result<Box<dyn Link>> {
        let mut peers = self.peers.lock();
        let peer = peers
            .get_mut(&identity.id)
            .ok_or_else(|| Error::Unavailable(format!("no simulated scanner {}", identity.id)))?;

        if let Some(reason) = &peer.rejection {
            return Err(Error::Rejected(reason.clone()));
        }

        let (host, scanner) = tokio::io::duplex(self.pipe_size);
        peer.tx
            .send(scanner)
            .map_err(|_| Error::Unavailable(format!("scanner {} stopped listening", identity.id)))?;
        peer.opened += 1;

        debug!("Opened memory link to {}", identity);

        Ok(Box::new(StreamLink::new(host, format!("memory:{}", identity.id))))
    }
}

/// Scanner side of a `MemoryConnector` registration
pub struct PeerListener {
    rx: mpsc::UnboundedReceiver<DuplexStream>,
}

impl PeerListener {
    /// Wait for the host to open the next connection
    pub async fn accept(&mut self) -> Option<DuplexStream> {
        self.rx.recv().await
    }
}
