//! Two simulated scanners streaming barcodes into one event stream

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use scanlink::{
    AvailableScanner, ConnectionType, Event, ManagerConfig, ScannerHost, ScannerId,
    ScannerIdentity, ScannerModel,
};
use scanlink_core::{Command, Notification, Response, ResultCode, HEADER_SIZE};
use scanlink_transport::{MemoryConnector, PeerListener};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing_subscriber::EnvFilter;

/// Answers every command and emits a barcode after each trigger pull
async fn run_scanner(mut listener: PeerListener, label: &'static str) -> anyhow::Result<()> {
    let Some(mut stream) = listener.accept().await else {
        return Ok(());
    };

    let mut scans = 0u32;
    loop {
        let mut header = [0u8; HEADER_SIZE];
        if stream.read_exact(&mut header).await.is_err() {
            return Ok(());
        }
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let mut frame = header.to_vec();
        frame.resize(HEADER_SIZE + length, 0);
        stream.read_exact(&mut frame[HEADER_SIZE..]).await?;

        let command = Command::decode(Bytes::from(frame))?;
        let response =
            Response::new(command.opcode, command.token, ResultCode::Success, Bytes::new());
        stream.write_all(&response.encode()?).await?;

        if command.opcode == scanlink::Opcode::PullTrigger {
            scans += 1;
            let barcode = Notification::Barcode {
                barcode_type: 3,
                data: Bytes::from(format!("{}-{:04}", label, scans)),
            };
            stream.write_all(&barcode.encode()?).await?;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let connector = Arc::new(MemoryConnector::new());
    let scanners = [
        (ScannerId::new(1)?, ConnectionType::Ble, "LEFT"),
        (ScannerId::new(2)?, ConnectionType::Accessory, "RIGHT"),
    ];
    for (id, _, label) in scanners {
        tokio::spawn(run_scanner(connector.listen(id), label));
    }

    let config = ManagerConfig::default().with_discovery(true);
    let (host, discovery, mut events) = ScannerHost::start(config, connector);

    for (id, connection_type, label) in scanners {
        let identity = ScannerIdentity::new(id, ScannerModel::Ds2278, connection_type);
        let scanner = AvailableScanner::new(identity)
            .with_name(label)
            .with_signal_strength(-48);
        discovery.appeared(scanner);
    }

    let mut barcodes = 0;
    while let Some(event) = tokio::time::timeout(Duration::from_secs(5), events.next()).await? {
        match event {
            Event::ScannerAppeared(scanner) => {
                println!("Found {}", scanner);
                host.establish(scanner.id()).await?;
            }
            Event::SessionEstablished(session) => {
                println!("Session with {} since {}", session.identity, session.established_at);
                for _ in 0..3 {
                    host.pull_trigger(session.id()).await?;
                }
            }
            Event::BarcodeData { scanner_id, data, .. } => {
                println!("{} scanned {}", scanner_id, String::from_utf8_lossy(&data));
                barcodes += 1;
                if barcodes == 6 {
                    break;
                }
            }
            other => println!("{:?}", other),
        }
    }

    for session in host.list_active().await? {
        host.terminate(session.id()).await?;
    }
    host.shutdown().await?;

    Ok(())
}
