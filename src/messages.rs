// Message types carried over zenoh

use serde::{Deserialize, Serialize};

use crate::coord::CoordState;
use crate::motor::BlockColor;

// One IR frame as seen on the emulated medium
// `from` identifies the transmitting node so it can ignore its own publications
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct IrFrame {
    pub from: u8,
    pub frame: u64,
}

/// What the robot is currently doing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    #[default]
    Idle,
    Homing,
    Loading,
    Unloading,
    Scanning,
    Remote,
}

/// Status published by the runtime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RobotStatus {
    pub address: u8,
    pub activity: Activity,
    pub coordination: CoordState,
    pub slide_block: f64,
    pub turret_angle: f64,
    pub tower: usize,
    pub gripper_open: bool,
    pub cargo: u32,
    pub heights: Vec<u32>,
    pub last_color: Option<BlockColor>,
}
