//! TCP connector for scanners exposed through a network bridge

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use scanlink_types::{ScannerId, ScannerIdentity};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::{error::*, Connector, Link, StreamLink};

/// TCP connector
///
/// Each scanner id maps to the `host:port` of the bridge that relays its
/// byte stream.
pub struct TcpConnector {
    routes: HashMap<ScannerId, String>,
    connect_timeout: Duration,
}

impl TcpConnector {
    /// Create connector with no routes
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            connect_timeout: Duration::from_secs(5),
        }
    }
    
    /// Route a scanner id to a bridge address
    pub fn with_route(mut self, id: ScannerId, addr: impl Into<String>) -> Self {
        self.routes.insert(id, addr.into());
        self
    }
    
    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
    
    /// Resolve a route to a SocketAddr
    async fn resolve_addr(&self, id: ScannerId) -> Result<SocketAddr> {
        let addr_str = self
            .routes
            .get(&id)
            .ok_or_else(|| Error::Unavailable(format!("no route for scanner {}", id)))?;
        
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(addr_str.as_str())
            .await
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", addr_str, e)))?
            .collect();
        
        addrs
            .first()
            .copied()
            .ok_or_else(|| Error::InvalidAddress(format!("No addresses found for {}", addr_str)))
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn open(&self, identity: &ScannerIdentity) -> Result<Box<dyn Link>> {
        let addr = self.resolve_addr(identity.id).await?;
        
        debug!("Connecting to {} at {}...", identity, addr);
        
        let stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::ConnectionTimeout)?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::ConnectionRefused => Error::Rejected(e.to_string()),
                _ => Error::Io(e),
            })?;
        
        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;
        
        debug!("Connected to {} at {}", identity, addr);
        
        Ok(Box::new(StreamLink::new(stream, addr.to_string())))
    }
}
