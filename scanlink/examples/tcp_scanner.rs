//! Scanner reachable through a TCP gateway

use std::sync::Arc;

use scanlink::{
    AvailableScanner, ConnectionType, ManagerConfig, ScannerHost, ScannerId, ScannerIdentity,
    ScannerModel,
};
use scanlink_transport::TcpConnector;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> scanlink::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Change to your gateway address
    let addr = std::env::var("SCANNER_ADDR").unwrap_or_else(|_| "192.168.1.40:5000".to_string());
    let id = ScannerId::new(1)?;

    println!("Connecting to scanner {} via {}...", id, addr);

    let connector = TcpConnector::new().with_route(id, addr);
    let config = ManagerConfig::default().with_discovery(true);
    let (host, discovery, _events) = ScannerHost::start(config, Arc::new(connector));

    println!("{}", host.get_version());

    discovery.appeared(AvailableScanner::new(ScannerIdentity::new(
        id,
        ScannerModel::Cs4070,
        ConnectionType::Accessory,
    )));

    host.establish(id).await?;
    println!("✓ Connected!");

    let attributes = host.attributes_get_all(id).await?;
    println!("✓ Attributes: {} ({} bytes)", attributes.result, attributes.payload.len());

    host.terminate(id).await?;
    println!("✓ Disconnected");

    host.shutdown().await
}
