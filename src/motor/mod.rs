// Motion layer for the tower robot
//
// Provides:
// - Constant-acceleration step timing over a pulse driver
// - Physical-unit scaling with automatic microstep selection
// - Block-indexed slide and tower-indexed turret axes
// - Gripper, limit switch and colour sensor collaborators
// - Simulated collaborators for host runs and tests

pub mod accel;
pub mod color;
pub mod gripper;
pub mod scaled;
pub mod sim;
mod slide;
mod turret;

pub use accel::{AccelStepper, ModeLines, StepDriver, Stepper};
pub use color::{BlockColor, ColorSensor, Palette, PaletteSensor, RawColorSource, Rgbc};
pub use gripper::{Gripper, LimitSwitch};
pub use scaled::{ScaledStepper, SpeedBand, StepMode};
pub use slide::Slide;
pub use turret::{localize, TowerRing, Turret};
