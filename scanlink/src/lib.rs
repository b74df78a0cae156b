//! # scanlink
//!
//! Session manager for fleets of wireless barcode scanners.
//!
//! ## Features
//!
//! - Discovery with operating-mode filtering (accessory, BLE, or both)
//! - Per-scanner sessions with token-correlated commands and deadlines
//! - Automatic session reestablishment after unintended loss
//! - One ordered event stream for every scanner
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use scanlink::{AvailableScanner, Event, ManagerConfig, ScannerHost};
//! use scanlink_transport::TcpConnector;
//! use scanlink_types::{ConnectionType, ScannerId, ScannerIdentity, ScannerModel};
//!
//! #[tokio::main]
//! async fn main() -> scanlink::Result<()> {
//!     let id = ScannerId::new(7)?;
//!     let connector = TcpConnector::new().with_route(id, "192.168.1.40:5000");
//!
//!     let config = ManagerConfig::default().with_discovery(true);
//!     let (host, discovery, mut events) = ScannerHost::start(config, Arc::new(connector));
//!
//!     // Announce the scanner the way a transport driver would
//!     let identity = ScannerIdentity::new(id, ScannerModel::Ds8178, ConnectionType::Ble);
//!     discovery.appeared(AvailableScanner::new(identity));
//!
//!     host.establish(id).await?;
//!     host.pull_trigger(id).await?;
//!
//!     while let Some(event) = events.next().await {
//!         if let Event::BarcodeData { data, .. } = event {
//!             println!("Scanned {:?}", data);
//!             break;
//!         }
//!     }
//!
//!     host.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod device;
pub mod discovery;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod host;

mod manager;

// Re-exports
pub use config::{ManagerConfig, SessionConfig};
pub use device::{DeviceSession, ResponseHandle, TerminationReason};
pub use discovery::{DiscoveryEvent, DiscoveryFeed};
pub use dispatcher::{Dispatcher, EventSink};
pub use error::{
    ConnectError, EstablishError, Error, ExecuteError, Result, SendError, TerminateError,
};
pub use event::{Event, EventMask, FirmwareUpdate, SessionSnapshot};
pub use host::{EventStream, ScannerHost, Version};

// Re-export types
pub use scanlink_core::{Opcode, Response, ResultCode, SessionState};
pub use scanlink_types::{
    AvailableScanner, ConnectionType, OperatingMode, ScannerId, ScannerIdentity, ScannerModel,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
