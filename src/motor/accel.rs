// Step timing for step/direction stepper drivers
//
// Constant-acceleration profile in step space: after every step the squared speed
// changes by 2a, and the stepper starts decelerating once the steps needed to stop
// reach the steps left to go.

use tracing::trace;

use crate::clock::SharedClock;

/// Levels of the three microstep selection lines (MS1, MS2, MS3)
pub type ModeLines = [bool; 3];

/// Pin-level collaborator beneath a stepper
pub trait StepDriver {
    /// Issue one step pulse in the given direction
    fn step(&mut self, forward: bool);

    /// Drive the microstep selection lines
    fn set_mode_lines(&mut self, lines: ModeLines);
}

/// Raw-step capability interface consumed by the axis scaler
///
/// Positions are in raw (micro)steps, speeds in raw steps per second.
pub trait Stepper {
    /// Advance the profile; returns true while motion is pending
    fn run(&mut self) -> bool;

    /// Step at the current constant speed, ignoring the target; returns true if a step was taken
    fn run_speed(&mut self) -> bool;

    fn move_to(&mut self, absolute: i64);
    fn current_position(&self) -> i64;
    fn target_position(&self) -> i64;

    fn distance_to_go(&self) -> i64 {
        self.target_position() - self.current_position()
    }

    /// Redefine the current position; also stops motion
    fn set_current_position(&mut self, position: i64);

    fn speed(&self) -> f64;
    fn set_speed(&mut self, speed: f64);
    fn max_speed(&self) -> f64;
    fn set_max_speed(&mut self, speed: f64);
    fn acceleration(&self) -> f64;
    fn set_acceleration(&mut self, acceleration: f64);

    /// Decelerate to a stop as fast as the acceleration allows
    fn stop(&mut self);

    /// Stop on the current step without decelerating
    fn halt(&mut self);

    fn set_mode_lines(&mut self, lines: ModeLines);
}

/// Software step generator with acceleration, driving a [`StepDriver`]
pub struct AccelStepper<D> {
    driver: D,
    clock: SharedClock,
    position: i64,
    target: i64,
    /// Signed, raw steps per second
    speed: f64,
    max_speed: f64,
    acceleration: f64,
    step_interval_us: u64,
    last_step_us: u64,
}

impl<D: StepDriver> AccelStepper<D> {
    pub fn new(driver: D, clock: SharedClock) -> Self {
        Self {
            driver,
            clock,
            position: 0,
            target: 0,
            speed: 0.0,
            max_speed: 1.0,
            acceleration: 1.0,
            step_interval_us: 0,
            last_step_us: 0,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    fn now_us(&self) -> u64 {
        self.clock.now().as_micros() as u64
    }

    /// Speed reached after a single step from rest
    fn min_speed(&self) -> f64 {
        (2.0 * self.acceleration).sqrt()
    }

    fn update_interval(&mut self) {
        self.step_interval_us = if self.speed == 0.0 {
            0
        } else {
            ((1e6 / self.speed.abs()) as u64).max(1)
        };
    }

    fn compute_new_speed(&mut self) {
        let distance = self.distance_to_go();
        let magnitude = self.speed.abs();
        let steps_to_stop = magnitude * magnitude / (2.0 * self.acceleration);

        if distance == 0 && steps_to_stop <= 1.0 {
            self.speed = 0.0;
            self.step_interval_us = 0;
            return;
        }

        let wanted = distance.signum() as f64;
        let heading = self.speed.signum();
        let reversing = magnitude > 0.0 && heading != wanted;

        let next = if reversing || steps_to_stop >= distance.abs() as f64 {
            (magnitude * magnitude - 2.0 * self.acceleration).max(0.0).sqrt()
        } else {
            (magnitude * magnitude + 2.0 * self.acceleration).sqrt()
        };

        let floor = self.min_speed();
        self.speed = if reversing && next >= floor {
            heading * next.min(self.max_speed)
        } else if wanted == 0.0 {
            0.0
        } else {
            wanted * next.max(floor).min(self.max_speed)
        };
        self.update_interval();
    }
}

impl<D: StepDriver> Stepper for AccelStepper<D> {
    fn run(&mut self) -> bool {
        if self.run_speed() {
            self.compute_new_speed();
        }
        self.speed != 0.0 || self.distance_to_go() != 0
    }

    fn run_speed(&mut self) -> bool {
        if self.step_interval_us == 0 {
            return false;
        }

        let now = self.now_us();
        if now.saturating_sub(self.last_step_us) < self.step_interval_us {
            return false;
        }

        let forward = self.speed > 0.0;
        self.position += if forward { 1 } else { -1 };
        self.driver.step(forward);
        self.last_step_us = now;
        true
    }

    fn move_to(&mut self, absolute: i64) {
        self.target = absolute;
        if self.speed == 0.0 {
            self.compute_new_speed();
        }
    }

    fn current_position(&self) -> i64 {
        self.position
    }

    fn target_position(&self) -> i64 {
        self.target
    }

    fn set_current_position(&mut self, position: i64) {
        self.position = position;
        self.target = position;
        self.speed = 0.0;
        self.step_interval_us = 0;
    }

    fn speed(&self) -> f64 {
        self.speed
    }

    fn set_speed(&mut self, speed: f64) {
        self.speed = speed.clamp(-self.max_speed, self.max_speed);
        self.update_interval();
    }

    fn max_speed(&self) -> f64 {
        self.max_speed
    }

    fn set_max_speed(&mut self, speed: f64) {
        let speed = speed.abs();
        if speed == 0.0 {
            return;
        }
        self.max_speed = speed;
        if self.speed.abs() > speed {
            self.speed = self.speed.signum() * speed;
            self.update_interval();
        }
    }

    fn acceleration(&self) -> f64 {
        self.acceleration
    }

    fn set_acceleration(&mut self, acceleration: f64) {
        let acceleration = acceleration.abs();
        if acceleration > 0.0 {
            self.acceleration = acceleration;
        }
    }

    fn stop(&mut self) {
        if self.speed == 0.0 {
            self.target = self.position;
            return;
        }
        let steps_to_stop =
            (self.speed * self.speed / (2.0 * self.acceleration)).ceil() as i64;
        let target = self.position + steps_to_stop * self.speed.signum() as i64;
        trace!("Soft stop at {} (from {})", target, self.position);
        self.target = target;
    }

    fn halt(&mut self) {
        trace!("Halt at {}", self.position);
        self.target = self.position;
        self.speed = 0.0;
        self.step_interval_us = 0;
    }

    fn set_mode_lines(&mut self, lines: ModeLines) {
        self.driver.set_mode_lines(lines);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimClock;
    use crate::motor::sim::SimDriver;
    use std::time::Duration;

    fn stepper(clock: &SimClock) -> AccelStepper<SimDriver> {
        let mut stepper = AccelStepper::new(SimDriver::new(), clock.shared());
        stepper.set_max_speed(2000.0);
        stepper.set_acceleration(4000.0);
        stepper
    }

    fn run_until_idle(stepper: &mut AccelStepper<SimDriver>, clock: &SimClock) -> usize {
        let mut ticks = 0;
        while stepper.run() {
            clock.advance(Duration::from_micros(50));
            ticks += 1;
            assert!(ticks < 1_000_000, "stepper never settled");
        }
        ticks
    }

    #[test]
    fn test_reaches_target_and_stops() {
        let clock = SimClock::new();
        let mut stepper = stepper(&clock);
        stepper.move_to(500);
        run_until_idle(&mut stepper, &clock);
        assert_eq!(stepper.current_position(), 500);
        assert_eq!(stepper.speed(), 0.0);
    }

    #[test]
    fn test_speed_never_exceeds_max() {
        let clock = SimClock::new();
        let mut stepper = stepper(&clock);
        stepper.move_to(-3000);
        let mut peak: f64 = 0.0;
        while stepper.run() {
            peak = peak.max(stepper.speed().abs());
            clock.advance(Duration::from_micros(50));
        }
        assert!(peak <= 2000.0);
        assert!(peak > 1500.0, "never got near cruise speed: {}", peak);
        assert_eq!(stepper.current_position(), -3000);
    }

    #[test]
    fn test_reversal_mid_move() {
        let clock = SimClock::new();
        let mut stepper = stepper(&clock);
        stepper.move_to(1000);
        for _ in 0..4000 {
            stepper.run();
            clock.advance(Duration::from_micros(50));
        }
        assert!(stepper.current_position() > 0);
        stepper.move_to(-200);
        run_until_idle(&mut stepper, &clock);
        assert_eq!(stepper.current_position(), -200);
    }

    #[test]
    fn test_soft_stop_lands_past_current() {
        let clock = SimClock::new();
        let mut stepper = stepper(&clock);
        stepper.move_to(10_000);
        for _ in 0..6000 {
            stepper.run();
            clock.advance(Duration::from_micros(50));
        }
        let at_stop = stepper.current_position();
        stepper.stop();
        run_until_idle(&mut stepper, &clock);
        assert!(stepper.current_position() >= at_stop);
        assert!(stepper.current_position() < 10_000);
    }

    #[test]
    fn test_halt_stops_on_current_step() {
        let clock = SimClock::new();
        let mut stepper = stepper(&clock);
        stepper.move_to(10_000);
        for _ in 0..6000 {
            stepper.run();
            clock.advance(Duration::from_micros(50));
        }
        let at_halt = stepper.current_position();
        let pulses = stepper.driver().pulses();
        assert!(at_halt > 0);
        stepper.halt();
        assert!(!stepper.run());
        for _ in 0..100 {
            stepper.run();
            clock.advance(Duration::from_micros(50));
        }
        assert_eq!(stepper.current_position(), at_halt);
        assert_eq!(stepper.driver().pulses(), pulses);
        assert_eq!(stepper.speed(), 0.0);
    }

    #[test]
    fn test_run_speed_constant() {
        let clock = SimClock::new();
        let mut stepper = stepper(&clock);
        stepper.set_speed(-100.0);
        let mut steps = 0;
        for _ in 0..20_000 {
            if stepper.run_speed() {
                steps += 1;
            }
            clock.advance(Duration::from_micros(50));
        }
        // one second at 100 steps/s
        assert!((99..=101).contains(&steps), "steps = {}", steps);
        assert_eq!(stepper.current_position(), -steps);
    }
}
