// Link monitor: READ-ONLY decoder for frames on the IR bus
//
// Usage: cargo run --example link_monitor -- [config.json]
use std::collections::HashMap;
use towerbot::config::{RobotConfig, TOPIC_IR};
use towerbot::link::Command;
use towerbot::messages::IrFrame;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => RobotConfig::load(path)?,
        None => RobotConfig::default(),
    };
    let layout = config.link.layout;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let subscriber = session.declare_subscriber(TOPIC_IR).await?;
    info!("Monitoring {} ({} bit frames)", TOPIC_IR, layout.width());

    let mut counts: HashMap<u8, u64> = HashMap::new();
    while let Ok(sample) = subscriber.recv_async().await {
        let payload = sample.payload().to_bytes();
        let ir = match serde_json::from_slice::<IrFrame>(&payload) {
            Ok(ir) => ir,
            Err(e) => {
                warn!("Failed to parse IR frame: {}", e);
                continue;
            }
        };
        let count = counts.entry(ir.from).or_default();
        *count += 1;

        match layout.decode(ir.frame) {
            Ok(packet) => match layout.claim_of(&packet) {
                Some((origin, tower)) => println!(
                    "node {:>2} #{:<5} {:?} by robot {} on tower {}",
                    ir.from, count, packet.command, origin, tower
                ),
                None if packet.command == Command::TowerHeight => {
                    let (tower, height) = layout.unpack_height(packet.data);
                    println!(
                        "node {:>2} #{:<5} tower {} is {} high",
                        ir.from, count, tower, height
                    );
                }
                None => println!("node {:>2} #{:<5} {}", ir.from, count, packet),
            },
            Err(e) => println!("node {:>2} #{:<5} noise 0x{:X}: {}", ir.from, count, ir.frame, e),
        }
    }

    Ok(())
}
