// Keyboard teleop: remote-control packets onto the IR bus
//
// 1-9 select robot, W/S slide up/down, A/D previous/next tower, C carry beside tower,
// G grip toggle, H home, Space stop, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::Duration;
use towerbot::config::{RobotConfig, TOPIC_IR};
use towerbot::link::{BROADCAST, Command, Packet, PacketLayout};
use towerbot::messages::IrFrame;
use tracing::{info, warn};

const POLL_MS: u64 = 20;

struct Teleop {
    layout: PacketLayout,
    towers: usize,
    upper_block: u32,
    robot: u8,
    block: u32,
    tower: usize,
    open: bool,
}

impl Teleop {
    fn packet(&self, command: Command, data: u32) -> Packet {
        Packet::new(self.robot, command, data)
    }

    /// Packet for a key, `None` if the key is not bound
    fn on_key(&mut self, code: KeyCode) -> Option<Packet> {
        match code {
            KeyCode::Char(c @ '1'..='9') => {
                self.robot = c as u8 - b'0';
                info!("Robot: {}", self.robot);
                None
            }
            KeyCode::Char('w') => {
                self.block = (self.block + 1).min(self.upper_block);
                Some(self.packet(Command::SlideTo, self.block))
            }
            KeyCode::Char('s') => {
                self.block = self.block.saturating_sub(1);
                Some(self.packet(Command::SlideTo, self.block))
            }
            KeyCode::Char('a') => {
                self.tower = (self.tower + self.towers - 1) % self.towers;
                Some(self.packet(Command::TurretTo, self.tower as u32))
            }
            KeyCode::Char('d') => {
                self.tower = (self.tower + 1) % self.towers;
                Some(self.packet(Command::TurretTo, self.tower as u32))
            }
            KeyCode::Char('c') => Some(self.packet(Command::CarryTo, self.tower as u32)),
            KeyCode::Char('g') => {
                self.open = !self.open;
                Some(self.packet(Command::Grip, self.open as u32))
            }
            KeyCode::Char('h') => {
                self.block = 0;
                Some(self.packet(Command::Home, 0))
            }
            KeyCode::Char(' ') => Some(self.packet(Command::Stop, 0)),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    // Optional robot configuration for the layout and tower count
    let config = match std::env::args().nth(1) {
        Some(path) => RobotConfig::load(path)?,
        None => RobotConfig::default(),
    };

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_IR).await?;

    info!("Controls: 1-9=robot, W/S=slide, A/D=tower, C=carry, G=grip, H=home, Space=stop, Q=quit");

    let mut teleop = Teleop {
        layout: config.link.layout,
        towers: config.turret.towers.len(),
        upper_block: config.slide.upper_limit.floor() as u32,
        robot: config.address,
        block: 0,
        tower: config.turret.start_tower,
        open: true,
    };
    info!("Robot: {}", teleop.robot);

    enable_raw_mode()?;
    let result = run_teleop(&publisher, &mut teleop).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
    teleop: &mut Teleop,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    loop {
        if !event::poll(Duration::from_millis(POLL_MS))? {
            continue;
        }
        let Event::Key(KeyEvent { code, kind, .. }) = event::read()? else {
            continue;
        };
        if kind != KeyEventKind::Press {
            continue;
        }
        if matches!(code, KeyCode::Char('q') | KeyCode::Esc) {
            break;
        }

        let Some(packet) = teleop.on_key(code) else {
            continue;
        };
        match teleop.layout.encode(&packet) {
            Ok(frame) => {
                info!("Sending {}", packet);
                // The teleop is not a robot, so it publishes as the broadcast node
                let ir = IrFrame {
                    from: BROADCAST,
                    frame,
                };
                publisher.put(serde_json::to_string(&ir)?).await?;
            }
            Err(e) => warn!("Cannot encode {}: {}", packet, e),
        }
    }

    Ok(())
}
