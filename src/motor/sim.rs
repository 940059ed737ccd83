// Simulated collaborators for host runs and tests
//
// The simulated shaft position is tracked in sixteenth steps regardless of the
// selected microstep mode, like a real A4988 where one step in full-step mode moves
// the rotor sixteen microstep positions.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tracing::trace;

use super::accel::{ModeLines, StepDriver};
use super::color::{BlockColor, ColorSensor, RawColorSource, Rgbc};
use super::gripper::{Gripper, LimitSwitch};
use super::scaled::StepMode;
use crate::clock::SharedClock;

/// Read-only view of a simulated shaft, in sixteenth steps
#[derive(Debug, Clone, Default)]
pub struct ShaftProbe {
    sixteenths: Arc<AtomicI64>,
}

impl ShaftProbe {
    pub fn sixteenths(&self) -> i64 {
        self.sixteenths.load(Ordering::Relaxed)
    }

    /// Full steps as a float
    pub fn full_steps(&self) -> f64 {
        self.sixteenths() as f64 / StepMode::SIXTEENTH.divisor() as f64
    }
}

/// Step driver that only counts pulses
#[derive(Debug, Default)]
pub struct SimDriver {
    shaft: ShaftProbe,
    mode: Option<StepMode>,
    pulses: u64,
}

impl SimDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the shaft at an offset (sixteenth steps) from the zero the robot will find
    pub fn with_offset(sixteenths: i64) -> Self {
        let driver = Self::default();
        driver.shaft.sixteenths.store(sixteenths, Ordering::Relaxed);
        driver
    }

    pub fn probe(&self) -> ShaftProbe {
        self.shaft.clone()
    }

    pub fn sixteenths(&self) -> i64 {
        self.shaft.sixteenths()
    }

    pub fn pulses(&self) -> u64 {
        self.pulses
    }

    pub fn mode(&self) -> StepMode {
        self.mode.unwrap_or(StepMode::FULL)
    }
}

impl StepDriver for SimDriver {
    fn step(&mut self, forward: bool) {
        let increment = (StepMode::SIXTEENTH.divisor() / self.mode().divisor()) as i64;
        let delta = if forward { increment } else { -increment };
        self.shaft.sixteenths.fetch_add(delta, Ordering::Relaxed);
        self.pulses += 1;
    }

    fn set_mode_lines(&mut self, lines: ModeLines) {
        self.mode = Some(StepMode::from_lines(lines));
    }
}

/// Limit switch closed whenever the shaft is at or below a position
#[derive(Debug, Clone)]
pub struct SimLimit {
    shaft: ShaftProbe,
    trigger_at: i64,
}

impl SimLimit {
    pub fn new(shaft: ShaftProbe, trigger_at: i64) -> Self {
        Self { shaft, trigger_at }
    }
}

impl LimitSwitch for SimLimit {
    fn triggered(&mut self) -> bool {
        self.shaft.sixteenths() <= self.trigger_at
    }
}

/// Servo gripper that settles after a fixed delay
pub struct SimGripper {
    clock: SharedClock,
    settle: Duration,
    open: bool,
    changed_at: Duration,
}

impl SimGripper {
    pub fn new(clock: SharedClock, settle: Duration) -> Self {
        let changed_at = clock.now();
        Self {
            clock,
            settle,
            open: true,
            changed_at,
        }
    }

    fn command(&mut self, open: bool) {
        if self.open != open {
            trace!("Sim gripper {}", if open { "opening" } else { "closing" });
            self.open = open;
            self.changed_at = self.clock.now();
        }
    }
}

impl Gripper for SimGripper {
    fn open(&mut self) {
        self.command(true);
    }

    fn close(&mut self) {
        self.command(false);
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn settled(&self) -> bool {
        self.clock.now().saturating_sub(self.changed_at) >= self.settle
    }
}

/// Raw colour source answering from a closure
pub struct SimColorSource {
    read: Box<dyn FnMut() -> Rgbc + Send>,
}

impl SimColorSource {
    pub fn new(read: impl FnMut() -> Rgbc + Send + 'static) -> Self {
        Self {
            read: Box::new(read),
        }
    }
}

impl RawColorSource for SimColorSource {
    fn read(&mut self) -> Rgbc {
        (self.read)()
    }
}

/// Colour sensor answering already-classified colours from a closure
pub struct SimColorSensor {
    read: Box<dyn FnMut() -> Option<BlockColor> + Send>,
}

impl SimColorSensor {
    pub fn new(read: impl FnMut() -> Option<BlockColor> + Send + 'static) -> Self {
        Self {
            read: Box::new(read),
        }
    }
}

impl ColorSensor for SimColorSensor {
    fn block_color(&mut self) -> Option<BlockColor> {
        (self.read)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimClock;

    #[test]
    fn test_driver_counts_sixteenths_per_mode() {
        let mut driver = SimDriver::new();
        driver.step(true);
        assert_eq!(driver.sixteenths(), 16);
        driver.set_mode_lines(StepMode::new(4).lines());
        driver.step(true);
        driver.step(false);
        driver.step(false);
        assert_eq!(driver.sixteenths(), 12);
        assert_eq!(driver.pulses(), 4);
    }

    #[test]
    fn test_limit_follows_shaft() {
        let mut driver = SimDriver::with_offset(32);
        let mut limit = SimLimit::new(driver.probe(), 0);
        assert!(!limit.triggered());
        driver.step(false);
        assert!(!limit.triggered());
        driver.step(false);
        assert!(limit.triggered());
    }

    #[test]
    fn test_gripper_settles_after_delay() {
        let clock = SimClock::new();
        let mut gripper = SimGripper::new(clock.shared(), Duration::from_millis(300));
        clock.advance(Duration::from_millis(300));
        assert!(gripper.is_open());
        assert!(gripper.settled());
        gripper.close();
        assert!(!gripper.settled());
        clock.advance(Duration::from_millis(299));
        assert!(!gripper.settled());
        clock.advance(Duration::from_millis(1));
        assert!(gripper.settled());
        assert!(gripper.toggle());
    }
}
