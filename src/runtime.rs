// Host node: one robot on simulated hardware, talking over a real IR medium
//
// The robot loop is synchronous and owns everything it touches, so it runs on a
// blocking thread. Status snapshots cross to the async side over a watch channel
// and are published as JSON.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::sync::watch;
use tracing::{info, warn};

// local imports
use crate::clock::SystemClock;
use crate::config::{LOOP_HZ, MODEM_PORT, RobotConfig, STATUS_PERIOD, TOPIC_IR, TOPIC_STATUS};
use crate::link::Medium;
use crate::link::serial::SerialMedium;
use crate::link::zenoh_bus::ZenohMedium;
use crate::messages::RobotStatus;
use crate::robot::sim::{self, SimWorld};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MediumKind {
    /// IR frames emulated on a zenoh key
    Zenoh,
    /// USB IR modem
    Serial,
}

#[derive(Debug, Parser)]
#[command(name = "towerbot")]
#[command(about = "Tower-building robot node")]
#[command(version)]
pub struct Args {
    /// Robot address on the IR link
    #[arg(long)]
    pub address: u8,

    /// JSON robot configuration; defaults are used when omitted
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = MediumKind::Zenoh)]
    pub medium: MediumKind,

    /// Serial device of the IR modem
    #[arg(long, default_value = MODEM_PORT)]
    pub port: String,
}

impl Args {
    /// Configuration file (or defaults) with the command-line address applied
    pub fn robot_config(&self) -> Result<RobotConfig, BoxError> {
        let mut config = match &self.config {
            Some(path) => RobotConfig::load(path)?,
            None => RobotConfig::default(),
        };
        config.address = self.address;
        config.validate()?;
        Ok(config)
    }
}

/// Run the robot until the status receiver goes away
fn drive(
    config: RobotConfig,
    medium: Box<dyn Medium + Send>,
    status: watch::Sender<Option<RobotStatus>>,
) {
    let clock = SystemClock::shared();
    let period = Duration::from_micros(1_000_000 / LOOP_HZ);
    let ticker = Box::new(move || std::thread::sleep(period));
    let world = SimWorld::new(config.heights.clone());
    let (mut robot, _rig) = sim::build(&config, medium, clock.clone(), &world, ticker);

    if !robot.home() {
        warn!("Homing failed, slide positions are unreliable");
    }

    let mut published_at = Duration::ZERO;
    loop {
        robot.idle();
        let now = clock.now();
        if now.saturating_sub(published_at) >= STATUS_PERIOD {
            published_at = now;
            if status.send(Some(robot.status())).is_err() {
                break;
            }
        }
    }
    info!("Robot loop stopped");
}

pub async fn run() -> Result<(), BoxError> {
    let args = Args::parse();
    let config = args.robot_config()?;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    let status_key = format!("{}/{}", TOPIC_STATUS, config.address);
    let pub_status = session.declare_publisher(status_key.clone()).await?;

    let medium: Box<dyn Medium + Send> = match args.medium {
        MediumKind::Zenoh => {
            info!("IR medium on {}", TOPIC_IR);
            Box::new(ZenohMedium::declare(&session, TOPIC_IR, config.address).await?)
        }
        MediumKind::Serial => {
            info!("IR modem on {}", args.port);
            Box::new(SerialMedium::open(&args.port, config.link.layout.width())?)
        }
    };

    info!(
        "Robot {} started: {}Hz loop, {} towers",
        config.address,
        LOOP_HZ,
        config.heights.len()
    );
    info!("Publishing to: {}", status_key);

    let (status_tx, mut status_rx) = watch::channel(None);
    let robot = tokio::task::spawn_blocking(move || drive(config, medium, status_tx));

    while status_rx.changed().await.is_ok() {
        let status = status_rx.borrow_and_update().clone();
        if let Some(status) = status {
            let status_json = serde_json::to_string(&status)?;
            pub_status.put(status_json).await?;
        }
    }

    robot.await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["towerbot", "--address", "3"]).unwrap();
        assert_eq!(args.address, 3);
        assert_eq!(args.medium, MediumKind::Zenoh);
        assert_eq!(args.port, MODEM_PORT);
        let config = args.robot_config().unwrap();
        assert_eq!(config.address, 3);
    }

    #[test]
    fn test_args_serial_medium() {
        let args = Args::try_parse_from([
            "towerbot",
            "--address",
            "2",
            "--medium",
            "serial",
            "--port",
            "/dev/ttyACM0",
        ])
        .unwrap();
        assert_eq!(args.medium, MediumKind::Serial);
        assert_eq!(args.port, "/dev/ttyACM0");
    }

    #[test]
    fn test_address_out_of_range_rejected() {
        let args = Args::try_parse_from(["towerbot", "--address", "0"]).unwrap();
        assert!(args.robot_config().is_err());
    }
}
