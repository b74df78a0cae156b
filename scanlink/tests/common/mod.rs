//! Simulated scanner for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use scanlink::{
    AvailableScanner, ConnectionType, Event, EventStream, ManagerConfig, ScannerHost, ScannerId,
    ScannerIdentity, ScannerModel,
};
use scanlink_core::{Command, Notification, Response, ResultCode, HEADER_SIZE};
use scanlink_transport::{MemoryConnector, PeerListener};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn id(raw: u16) -> ScannerId {
    ScannerId::new(raw).unwrap()
}

pub fn scanner(raw: u16, connection_type: ConnectionType) -> AvailableScanner {
    AvailableScanner::new(ScannerIdentity::new(id(raw), ScannerModel::Ds8178, connection_type))
        .with_name(format!("DS8178-{}", raw))
}

/// A running manager plus the handles a test needs to drive it
pub struct Harness {
    pub host: ScannerHost,
    pub discovery: scanlink::DiscoveryFeed,
    pub events: EventStream,
    pub connector: Arc<MemoryConnector>,
}

impl Harness {
    pub fn start(config: ManagerConfig) -> Self {
        init_tracing();
        let connector = Arc::new(MemoryConnector::new());
        let (host, discovery, events) = ScannerHost::start(config, connector.clone());
        Self {
            host,
            discovery,
            events,
            connector,
        }
    }

    /// Next event, failing the test if none arrives in time
    pub async fn next_event(&mut self) -> Event {
        tokio::time::timeout(Duration::from_secs(30), self.events.next())
            .await
            .expect("timed out waiting for an event")
            .expect("event stream ended")
    }

    /// Announce a scanner and wait for the manager to report it
    pub async fn announce(&mut self, scanner: AvailableScanner) {
        let expected = scanner.clone();
        assert!(self.discovery.appeared(scanner));
        assert_eq!(self.next_event().await, Event::ScannerAppeared(expected));
    }

    /// Announce, establish and accept a session with a simulated scanner
    pub async fn connect(&mut self, scanner: AvailableScanner) -> FakeScanner {
        let id = scanner.id();
        let mut listener = self.connector.listen(id);
        self.announce(scanner).await;

        self.host.establish(id).await.unwrap();
        match self.next_event().await {
            Event::SessionEstablished(snapshot) => assert_eq!(snapshot.id(), id),
            other => panic!("expected SessionEstablished, got {:?}", other),
        }

        FakeScanner::accept(&mut listener).await
    }
}

/// Scanner end of a memory link
pub struct FakeScanner {
    stream: DuplexStream,
}

impl FakeScanner {
    pub async fn accept(listener: &mut PeerListener) -> Self {
        let stream = listener.accept().await.expect("host never connected");
        Self { stream }
    }

    pub async fn next_command(&mut self) -> Command {
        let mut header = [0u8; HEADER_SIZE];
        self.stream.read_exact(&mut header).await.unwrap();
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;

        let mut frame = header.to_vec();
        frame.resize(HEADER_SIZE + length, 0);
        self.stream.read_exact(&mut frame[HEADER_SIZE..]).await.unwrap();

        Command::decode(Bytes::from(frame)).unwrap()
    }

    pub async fn respond(&mut self, command: &Command, result: ResultCode, payload: &[u8]) {
        let response = Response::new(command.opcode, command.token, result, payload.to_vec());
        self.send_raw(&response.encode().unwrap()).await;
    }

    pub async fn notify(&mut self, notification: Notification) {
        self.send_raw(&notification.encode().unwrap()).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Drop the link as if the radio went out of range
    pub fn vanish(self) {
        drop(self.stream);
    }
}
