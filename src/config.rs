// Timeouts, topics, robot configuration
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::link::PacketLayout;
use crate::motor::Palette;

// Host loop frequency (control cycles are paced by the tick callback)
pub const LOOP_HZ: u64 = 2000;

// Status publishing period
pub const STATUS_PERIOD: Duration = Duration::from_millis(200);

// Zenoh topics
pub const TOPIC_IR: &str = "towerbot/ir"; // emulated IR medium
pub const TOPIC_STATUS: &str = "towerbot/status"; // status, suffixed with the address

// Serial port for the USB IR modem
pub const MODEM_PORT: &str = "/dev/ttyUSB0";

/// Error types for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SlideConfig {
    /// Full steps per block
    pub steps_per_block: f64,
    /// Highest reachable position, in blocks
    pub upper_limit: f64,
    /// Margin above a stack the gripper needs to pass over it, in blocks
    pub clearance: f64,
    /// Homing speed, blocks/s
    pub home_speed: f64,
    /// blocks/s
    pub max_speed: f64,
    /// blocks/s²
    pub acceleration: f64,
    /// Raw steps/s band for automatic mode selection
    pub speed_band: [f64; 2],
    /// Permitted microstep divisors
    pub mode_range: [u32; 2],
}

impl Default for SlideConfig {
    fn default() -> Self {
        Self {
            steps_per_block: 100.0,
            upper_limit: 6.0,
            clearance: 0.5,
            home_speed: 0.5,
            max_speed: 2.0,
            acceleration: 4.0,
            speed_band: [250.0, 500.0],
            mode_range: [1, 16],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TurretConfig {
    /// Full steps per output degree (motor steps times gear ratio over 360)
    pub steps_per_degree: f64,
    /// Tower angles in degrees, increasing round the ring
    pub towers: Vec<f64>,
    /// Tower the turret faces at power-up
    pub start_tower: usize,
    /// Offset beside a tower where the gripper waits clear of it, degrees
    pub carry_offset: f64,
    /// Gear slop, degrees
    pub backlash: f64,
    /// How many towers the colour sensor trails the gripper by
    pub sensor_lag: usize,
    /// degrees/s
    pub max_speed: f64,
    /// degrees/s²
    pub acceleration: f64,
    pub speed_band: [f64; 2],
    pub mode_range: [u32; 2],
}

impl Default for TurretConfig {
    fn default() -> Self {
        Self {
            steps_per_degree: 800.0 / 360.0,
            towers: vec![0.0, 90.0, 180.0, 270.0],
            start_tower: 0,
            carry_offset: 30.0,
            backlash: 1.5,
            sensor_lag: 1,
            max_speed: 90.0,
            acceleration: 180.0,
            speed_band: [250.0, 500.0],
            mode_range: [1, 16],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LinkConfig {
    pub layout: PacketLayout,
    /// Default number of transmissions per message
    pub repeats: u32,
    /// Default gap between repeats
    pub interval_ms: u64,
    /// Receiver blind time after our own transmission
    pub shield_ms: u64,
    pub auto_relay: bool,
    /// Identical frames are relayed at most once within this window
    pub relay_holdoff_ms: u64,
    pub channel_sync: bool,
    pub slot_ms: u64,
    pub channel_count: u8,
    /// Keep returning the last message instead of consuming it
    pub latched: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            layout: PacketLayout::default(),
            repeats: 3,
            interval_ms: 60,
            shield_ms: 20,
            auto_relay: false,
            relay_holdoff_ms: 500,
            channel_sync: true,
            slot_ms: 50,
            channel_count: 4,
            latched: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoordConfig {
    /// Turret travel between intent broadcasts, degrees
    pub send_angle: f64,
    /// Peer claims expire if not refreshed within this time
    pub claim_ttl_ms: u64,
    /// Give up a blocked move with cargo after this long
    pub block_timeout_ms: u64,
    /// Random gap between intent repeats
    pub intent_interval_ms: [u64; 2],
    /// Transmissions of the closing Done
    pub done_repeats: u32,
    pub done_interval_ms: u64,
}

impl Default for CoordConfig {
    fn default() -> Self {
        Self {
            send_angle: 15.0,
            claim_ttl_ms: 3000,
            block_timeout_ms: 20_000,
            intent_interval_ms: [80, 240],
            done_repeats: 5,
            done_interval_ms: 100,
        }
    }
}

impl CoordConfig {
    pub fn claim_ttl(&self) -> Duration {
        Duration::from_millis(self.claim_ttl_ms)
    }

    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms)
    }
}

/// Complete configuration of one robot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RobotConfig {
    pub address: u8,
    /// Believed tower heights at start, in blocks
    pub heights: Vec<u32>,
    /// Block position the slide limit switch marks
    pub home_block: f64,
    /// Time the gripper servo needs to open or close
    pub gripper_settle_ms: u64,
    pub slide: SlideConfig,
    pub turret: TurretConfig,
    pub link: LinkConfig,
    pub coord: CoordConfig,
    pub palette: Palette,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            address: 1,
            heights: vec![0; 4],
            home_block: 0.0,
            gripper_settle_ms: 300,
            slide: SlideConfig::default(),
            turret: TurretConfig::default(),
            link: LinkConfig::default(),
            coord: CoordConfig::default(),
            palette: Palette::default(),
        }
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

impl RobotConfig {
    /// Read a JSON configuration file and validate it
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: RobotConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn gripper_settle(&self) -> Duration {
        Duration::from_millis(self.gripper_settle_ms)
    }

    pub fn validate(&self) -> Result<()> {
        let layout = &self.link.layout;
        layout
            .validate()
            .map_err(|e| invalid(e.to_string()))?;

        if self.address == 0 || self.address > layout.max_address() {
            return Err(invalid(format!(
                "address {} outside 1..={}",
                self.address,
                layout.max_address()
            )));
        }

        let towers = &self.turret.towers;
        if towers.len() < 2 {
            return Err(invalid("need at least two towers"));
        }
        if towers.windows(2).any(|w| w[1] <= w[0]) || towers[towers.len() - 1] - towers[0] >= 360.0 {
            return Err(invalid("tower angles must increase within one turn"));
        }
        let tower_bits = (layout.data_bits - layout.address_bits).min(layout.data_bits / 2);
        if towers.len() > 1 << tower_bits {
            return Err(invalid(format!(
                "{} towers do not fit in {} bits",
                towers.len(),
                tower_bits
            )));
        }
        if self.turret.start_tower >= towers.len() {
            return Err(invalid("start tower out of range"));
        }
        if self.heights.len() != towers.len() {
            return Err(invalid(format!(
                "{} heights for {} towers",
                self.heights.len(),
                towers.len()
            )));
        }

        let slide = &self.slide;
        if slide.steps_per_block <= 0.0 || self.turret.steps_per_degree <= 0.0 {
            return Err(invalid("steps per unit must be positive"));
        }
        if slide.upper_limit <= self.home_block {
            return Err(invalid("slide upper limit must be above the home block"));
        }
        if slide.clearance < 0.0 || self.turret.carry_offset < 0.0 || self.turret.backlash < 0.0 {
            return Err(invalid("clearance, carry offset and backlash must not be negative"));
        }
        Ok(())
    }
}
