//! Host command channel
//!
//! `ScannerHost` is the request/response surface a host application uses to
//! drive the session manager. Events arrive separately, through the
//! `EventStream` returned by [`ScannerHost::start`] or any custom
//! [`EventSink`].

use std::fmt;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use scanlink_core::{Opcode, Response, PROTOCOL_VERSION};
use scanlink_transport::Connector;
use scanlink_types::{AvailableScanner, OperatingMode, ScannerId};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::config::ManagerConfig;
use crate::discovery::{self, DiscoveryFeed};
use crate::dispatcher::{Dispatcher, EventSink};
use crate::error::{Error, Result};
use crate::event::{Event, EventMask, SessionSnapshot};
use crate::manager::{ManagerRequest, SessionManager};

/// Library and protocol versions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub library: &'static str,
    pub protocol: &'static str,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scanlink {} (protocol {})", self.library, self.protocol)
    }
}

/// Ordered stream of events for the host
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<Event>,
}

impl EventStream {
    /// Wait for the next event
    ///
    /// Returns `None` after the session manager has shut down and every
    /// queued event was delivered.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Take an already delivered event without waiting
    pub fn try_next(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

/// Handle to a running session manager
///
/// Cloning is cheap; every clone talks to the same manager.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use scanlink::{Event, ManagerConfig, ScannerHost};
/// use scanlink_transport::TcpConnector;
///
/// #[tokio::main]
/// async fn main() -> scanlink::Result<()> {
///     let connector = Arc::new(TcpConnector::new());
///     let (host, _discovery, mut events) =
///         ScannerHost::start(ManagerConfig::default().with_discovery(true), connector);
///
///     println!("{}", host.get_version());
///
///     while let Some(event) = events.next().await {
///         if let Event::ScannerAppeared(scanner) = event {
///             host.establish(scanner.id()).await?;
///         }
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct ScannerHost {
    requests: mpsc::Sender<ManagerRequest>,
    dispatcher: Dispatcher,
}

impl ScannerHost {
    /// Spawn the session manager and event dispatcher
    ///
    /// Must be called within a tokio runtime.
    pub fn start(
        config: ManagerConfig,
        connector: Arc<dyn Connector>,
    ) -> (Self, DiscoveryFeed, EventStream) {
        // Backpressure stays in the dispatcher queue, where overflow policy applies
        let (tx, rx) = mpsc::channel(1);
        let (host, feed) = Self::start_with_sink(config, connector, tx);
        (host, feed, EventStream { rx })
    }

    /// Spawn the session manager, delivering events to `sink`
    pub fn start_with_sink<S: EventSink>(
        config: ManagerConfig,
        connector: Arc<dyn Connector>,
        sink: S,
    ) -> (Self, DiscoveryFeed) {
        let dispatcher = Dispatcher::new(config.event_queue_capacity);
        let (requests_tx, requests_rx) = mpsc::channel(config.request_queue_capacity);
        let (feed, discovery_rx) = discovery::channel();

        let manager = SessionManager::new(
            config,
            connector,
            dispatcher.clone(),
            requests_rx,
            discovery_rx,
        );
        tokio::spawn(manager.run());
        dispatcher.spawn(sink);

        let host = Self {
            requests: requests_tx,
            dispatcher,
        };
        (host, feed)
    }

    pub fn get_version(&self) -> Version {
        Version {
            library: crate::VERSION,
            protocol: PROTOCOL_VERSION,
        }
    }

    /// Change which transports are eligible
    ///
    /// Available scanners the new mode excludes are reported as disappeared.
    /// Active sessions are not affected.
    pub async fn set_operating_mode(&self, mode: OperatingMode) -> Result<()> {
        self.call(|reply| ManagerRequest::SetOperatingMode { mode, reply })
            .await
    }

    pub async fn enable_discovery(&self, enable: bool) -> Result<()> {
        self.call(|reply| ManagerRequest::EnableDiscovery { enable, reply })
            .await
    }

    /// Snapshot of scanners ready for a session
    pub async fn list_available(&self) -> Result<Vec<AvailableScanner>> {
        self.call(|reply| ManagerRequest::ListAvailable { reply })
            .await
    }

    /// Snapshot of active sessions
    pub async fn list_active(&self) -> Result<Vec<SessionSnapshot>> {
        self.call(|reply| ManagerRequest::ListActive { reply }).await
    }

    /// Open a session with an available scanner
    ///
    /// Resolves once the session is active or the attempt failed.
    ///
    /// # Errors
    ///
    /// - `ScannerNotAvailable` if the scanner is not discovered or already
    ///   has a session
    /// - `Connect` if the transport could not be opened
    pub async fn establish(&self, id: ScannerId) -> Result<()> {
        self.call(|reply| ManagerRequest::Establish { id, reply })
            .await??;
        Ok(())
    }

    /// End the session with a scanner
    ///
    /// Outstanding commands resolve with `Cancelled`.
    pub async fn terminate(&self, id: ScannerId) -> Result<()> {
        self.call(|reply| ManagerRequest::Terminate { id, reply })
            .await??;
        Ok(())
    }

    /// Set the default reconnection policy for every scanner
    pub async fn set_auto_reestablish(&self, enable: bool) -> Result<()> {
        self.call(|reply| ManagerRequest::SetAutoReestablish {
            scope: None,
            enable,
            reply,
        })
        .await
    }

    /// Override the reconnection policy for one scanner
    pub async fn set_auto_reestablish_for(&self, id: ScannerId, enable: bool) -> Result<()> {
        self.call(|reply| ManagerRequest::SetAutoReestablish {
            scope: Some(id),
            enable,
            reply,
        })
        .await
    }

    /// Select which event kinds are delivered
    pub fn subscribe_events(&self, mask: EventMask) {
        debug!("Event mask set to {:?}", mask);
        self.dispatcher.set_mask(mask);
    }

    /// Number of data events dropped because the host fell behind
    pub fn dropped_events(&self) -> u64 {
        self.dispatcher.dropped()
    }

    /// Send a command to a scanner and wait for its response
    ///
    /// The scanner's result code is passed through in the response; only
    /// failures to reach the scanner are returned as errors.
    pub async fn execute(
        &self,
        id: ScannerId,
        opcode: Opcode,
        payload: impl Into<Bytes>,
    ) -> Result<Response> {
        let payload = payload.into();
        let handle = self
            .call(|reply| ManagerRequest::Execute {
                id,
                opcode,
                payload,
                reply,
            })
            .await??;
        Ok(handle.wait().await)
    }

    pub async fn pull_trigger(&self, id: ScannerId) -> Result<Response> {
        self.execute(id, Opcode::PullTrigger, Bytes::new()).await
    }

    pub async fn release_trigger(&self, id: ScannerId) -> Result<Response> {
        self.execute(id, Opcode::ReleaseTrigger, Bytes::new()).await
    }

    /// Enable or disable scanning
    pub async fn set_scanning(&self, id: ScannerId, enable: bool) -> Result<Response> {
        let opcode = if enable {
            Opcode::ScanEnable
        } else {
            Opcode::ScanDisable
        };
        self.execute(id, opcode, Bytes::new()).await
    }

    pub async fn capture_image(&self, id: ScannerId) -> Result<Response> {
        self.execute(id, Opcode::CaptureImage, Bytes::new()).await
    }

    pub async fn capture_barcode(&self, id: ScannerId) -> Result<Response> {
        self.execute(id, Opcode::CaptureBarcode, Bytes::new()).await
    }

    pub async fn capture_video(&self, id: ScannerId) -> Result<Response> {
        self.execute(id, Opcode::CaptureVideo, Bytes::new()).await
    }

    /// List every attribute id the scanner supports
    pub async fn attributes_get_all(&self, id: ScannerId) -> Result<Response> {
        self.execute(id, Opcode::AttrGetAll, Bytes::new()).await
    }

    /// Read attribute values
    ///
    /// Attribute ids are sent as big-endian u16s; the value layout in the
    /// response is scanner-defined.
    pub async fn attributes_get(&self, id: ScannerId, attributes: &[u16]) -> Result<Response> {
        let mut payload = BytesMut::with_capacity(attributes.len() * 2);
        for attribute in attributes {
            payload.put_u16(*attribute);
        }
        self.execute(id, Opcode::AttrGet, payload.freeze()).await
    }

    /// Set attribute values until the scanner powers down
    pub async fn attribute_set(
        &self,
        id: ScannerId,
        payload: impl Into<Bytes>,
    ) -> Result<Response> {
        self.execute(id, Opcode::AttrSet, payload).await
    }

    /// Set attribute values persistently
    pub async fn attribute_store(
        &self,
        id: ScannerId,
        payload: impl Into<Bytes>,
    ) -> Result<Response> {
        self.execute(id, Opcode::AttrStore, payload).await
    }

    /// Trigger a scanner action such as a beep or LED pattern
    pub async fn set_action(&self, id: ScannerId, payload: impl Into<Bytes>) -> Result<Response> {
        self.execute(id, Opcode::SetAction, payload).await
    }

    /// Terminate every session and stop the manager
    ///
    /// Queued events are still delivered; the event stream ends afterwards.
    pub async fn shutdown(&self) -> Result<()> {
        self.call(|reply| ManagerRequest::Shutdown { reply }).await
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<T>) -> ManagerRequest,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(request(reply))
            .await
            .map_err(|_| Error::ManagerStopped)?;
        rx.await.map_err(|_| Error::ManagerStopped)
    }
}

impl fmt::Debug for ScannerHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScannerHost")
            .field("mask", &self.dispatcher.mask())
            .field("queued_events", &self.dispatcher.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanlink_transport::MemoryConnector;

    #[tokio::test]
    async fn test_version() {
        let (host, _feed, _events) =
            ScannerHost::start(ManagerConfig::default(), Arc::new(MemoryConnector::new()));
        let version = host.get_version();
        assert_eq!(version.protocol, "1.0");
        assert_eq!(version.library, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_calls_fail_after_shutdown() {
        let (host, _feed, mut events) =
            ScannerHost::start(ManagerConfig::default(), Arc::new(MemoryConnector::new()));

        host.shutdown().await.unwrap();
        assert!(events.next().await.is_none());
        assert!(matches!(host.list_available().await, Err(Error::ManagerStopped)));
    }
}
