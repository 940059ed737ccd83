// Task orchestration for one tower robot
//
// Provides:
// - The robot: sole owner of axes, gripper, sensor, transceiver and coordinator
// - Load, unload, scan and height-finding tasks with coordinated travel
// - Remote-control opcode handling
// - Simulated assembly for host runs and tests

mod orchestrator;
mod remote;
pub mod sim;
mod tasks;

pub use orchestrator::{Hardware, TowerRobot};
pub use tasks::Scan;
