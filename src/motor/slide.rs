// Vertical rack and pinion axis, positioned in blocks

use tracing::{debug, info, warn};

use super::accel::Stepper;
use super::gripper::LimitSwitch;
use super::scaled::ScaledStepper;
use crate::config::SlideConfig;

/// Block-indexed vertical axis with homing and a clearance margin
pub struct Slide<S> {
    axis: ScaledStepper<S>,
    limit: Box<dyn LimitSwitch + Send>,
    home_position: f64,
    upper_limit: f64,
    clearance: f64,
    home_speed: f64,
    max_speed: f64,
    acceleration: f64,
    homed: bool,
}

impl<S: Stepper> Slide<S> {
    pub fn new(
        mut axis: ScaledStepper<S>,
        limit: Box<dyn LimitSwitch + Send>,
        config: &SlideConfig,
    ) -> Self {
        axis.set_max_speed(config.max_speed);
        axis.set_acceleration(config.acceleration);
        Self {
            axis,
            limit,
            home_position: 0.0,
            upper_limit: config.upper_limit,
            clearance: config.clearance,
            home_speed: config.home_speed.abs(),
            max_speed: config.max_speed,
            acceleration: config.acceleration,
            homed: false,
        }
    }

    /// Drive down slowly until the limit switch closes, then call that `home_block`
    ///
    /// Returns false if the switch never closed within the travel of the slide.
    pub fn home(&mut self, home_block: f64, mut tick: impl FnMut()) -> bool {
        info!("Homing slide to block {}", home_block);
        let start = self.axis.current_position();
        let max_travel = self.upper_limit - home_block + 1.0;

        self.axis.set_speed(-self.home_speed);
        while !self.limit.triggered() {
            self.axis.run_speed();
            tick();
            if start - self.axis.current_position() > max_travel {
                warn!("Slide limit switch not found after {} blocks", max_travel);
                self.axis.set_speed(0.0);
                return false;
            }
        }

        self.axis.set_current_position(home_block);
        self.axis.set_max_speed(self.max_speed);
        self.axis.set_acceleration(self.acceleration);
        self.home_position = home_block;
        self.homed = true;
        info!("Slide homed");
        true
    }

    pub fn is_homed(&self) -> bool {
        self.homed
    }

    pub fn home_position(&self) -> f64 {
        self.home_position
    }

    pub fn upper_limit(&self) -> f64 {
        self.upper_limit
    }

    pub fn clearance(&self) -> f64 {
        self.clearance
    }

    pub fn current_position(&self) -> f64 {
        self.axis.current_position()
    }

    pub fn target_position(&self) -> f64 {
        self.axis.target_position()
    }

    pub fn distance_to_go(&self) -> f64 {
        self.axis.distance_to_go()
    }

    /// Half a microstep in blocks, the tolerance for "at position"
    pub fn step_error(&self) -> f64 {
        self.axis.step_error()
    }

    pub fn run(&mut self) -> bool {
        self.axis.run()
    }

    pub fn is_moving(&self) -> bool {
        self.axis.is_moving()
    }

    pub fn stop(&mut self) {
        self.axis.stop();
    }

    pub fn halt(&mut self) {
        self.axis.halt();
    }

    /// Spin until the slide stops, calling `tick` every iteration
    pub fn wait(&mut self, mut tick: impl FnMut()) {
        while self.run() {
            tick();
        }
    }

    /// Move to a block position, clamped to the travel of the slide
    pub fn move_to_block(&mut self, block: f64) {
        let clamped = block.clamp(self.home_position, self.upper_limit);
        if clamped != block {
            debug!("Slide target {} clamped to {}", block, clamped);
        }
        self.axis.set_max_speed(self.max_speed);
        self.axis.set_acceleration(self.acceleration);
        self.axis.move_to(clamped);
    }

    pub fn move_by_block(&mut self, delta: f64) {
        self.move_to_block(self.current_position() + delta);
    }

    /// Height the gripper must reach to pass over a stack of `height` blocks
    pub fn clear_height(&self, height: f64) -> f64 {
        height + self.clearance
    }

    /// Whether the slide can physically clear a stack of `height` blocks
    pub fn can_clear(&self, height: f64) -> bool {
        self.clear_height(height) <= self.upper_limit + self.step_error()
    }

    /// Move to the clearance height above a stack of `height` blocks
    pub fn move_to_clear(&mut self, height: f64) {
        self.move_to_block(self.clear_height(height));
    }

    /// Whether the gripper is currently above a stack of `height` blocks
    pub fn is_clear_of(&self, height: f64) -> bool {
        self.current_position() >= self.clear_height(height) - self.step_error()
    }

    /// Whether the slide has arrived at `block` within the step error
    pub fn is_at(&self, block: f64) -> bool {
        (self.current_position() - block).abs() <= self.step_error()
    }

    pub fn axis(&self) -> &ScaledStepper<S> {
        &self.axis
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimClock;
    use crate::motor::accel::AccelStepper;
    use crate::motor::scaled::SpeedBand;
    use crate::motor::sim::{SimDriver, SimLimit};
    use std::time::Duration;

    fn slide(clock: &SimClock, offset_blocks: f64) -> Slide<AccelStepper<SimDriver>> {
        let config = SlideConfig::default();
        let offset = (offset_blocks * config.steps_per_block * 16.0) as i64;
        let driver = SimDriver::with_offset(offset);
        let limit = SimLimit::new(driver.probe(), 0);
        let stepper = AccelStepper::new(driver, clock.shared());
        let axis = ScaledStepper::new(stepper, config.steps_per_block)
            .with_speed_band(SpeedBand::new(config.speed_band[0], config.speed_band[1]));
        Slide::new(axis, Box::new(limit), &config)
    }

    fn tick(clock: &SimClock) -> impl FnMut() + '_ {
        move || clock.advance(Duration::from_micros(50))
    }

    #[test]
    fn test_home_resets_reference() {
        let clock = SimClock::new();
        let mut slide = slide(&clock, 1.5);
        assert!(slide.home(0.0, tick(&clock)));
        assert!(slide.is_homed());
        assert_eq!(slide.current_position(), 0.0);
        assert_eq!(slide.home_position(), 0.0);
    }

    #[test]
    fn test_home_gives_up_without_switch() {
        let clock = SimClock::new();
        let config = SlideConfig::default();
        let driver = SimDriver::new();
        // switch far below the travel of the slide
        let limit = SimLimit::new(driver.probe(), -1_000_000_000);
        let stepper = AccelStepper::new(driver, clock.shared());
        let axis = ScaledStepper::new(stepper, config.steps_per_block);
        let mut slide = Slide::new(axis, Box::new(limit), &config);
        assert!(!slide.home(0.0, tick(&clock)));
        assert!(!slide.is_homed());
    }

    #[test]
    fn test_targets_clamped_to_travel() {
        let clock = SimClock::new();
        let mut slide = slide(&clock, 0.5);
        slide.home(0.0, tick(&clock));
        let upper = slide.upper_limit();

        slide.move_to_block(upper + 3.0);
        assert_eq!(slide.target_position(), upper);
        slide.move_to_block(-2.0);
        assert_eq!(slide.target_position(), 0.0);
    }

    #[test]
    fn test_move_to_clear_adds_margin() {
        let clock = SimClock::new();
        let mut slide = slide(&clock, 0.5);
        slide.home(0.0, tick(&clock));

        slide.move_to_clear(2.0);
        slide.wait(tick(&clock));
        assert!(slide.is_at(2.0 + slide.clearance()));
        assert!(slide.is_clear_of(2.0));
        assert!(!slide.is_clear_of(3.0));
        assert!(slide.can_clear(1.0));
        assert!(!slide.can_clear(slide.upper_limit()));
    }
}
