// Axis scaler: physical units on top of a raw stepper, with dynamic microstepping
//
// The scaler owns a mode-change anchor (raw, physical) so that the reported
// position stays continuous when the microstep divisor changes mid-travel:
//
//     physical = (raw - anchor.raw) / (divisor * steps_per_unit) + anchor.physical

use tracing::debug;

use super::accel::{ModeLines, Stepper};

/// Microstep divisor (1 = full step, 16 = sixteenth step)
///
/// Always a power of two in `1..=16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StepMode(u8);

impl StepMode {
    pub const FULL: StepMode = StepMode(1);
    pub const SIXTEENTH: StepMode = StepMode(16);

    /// Clamp to `1..=16` and round down to a power of two
    pub fn new(divisor: u32) -> Self {
        let divisor = divisor.clamp(1, 16);
        StepMode(1 << (31 - divisor.leading_zeros()))
    }

    pub fn divisor(self) -> u8 {
        self.0
    }

    /// A4988 selection line levels for this mode
    pub fn lines(self) -> ModeLines {
        match self.0 {
            1 => [false, false, false],
            2 => [true, false, false],
            4 => [false, true, false],
            8 => [true, true, false],
            _ => [true, true, true],
        }
    }

    pub fn from_lines(lines: ModeLines) -> Self {
        match lines {
            [true, false, false] => StepMode(2),
            [false, true, false] => StepMode(4),
            [true, true, false] => StepMode(8),
            [true, true, true] => StepMode(16),
            _ => StepMode(1),
        }
    }

    pub fn finer(self) -> Self {
        StepMode::new(self.0 as u32 * 2)
    }

    pub fn coarser(self) -> Self {
        StepMode::new((self.0 / 2) as u32)
    }
}

/// Raw step-speed band the automatic mode controller keeps the stepper in
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedBand {
    pub low: f64,
    pub high: f64,
}

impl SpeedBand {
    /// The upper bound is raised to twice the lower bound if needed, otherwise
    /// halving the divisor above `high` could land below `low` and oscillate.
    pub fn new(low: f64, high: f64) -> Self {
        let low = low.abs();
        Self {
            low,
            high: high.abs().max(low * 2.0),
        }
    }
}

impl Default for SpeedBand {
    fn default() -> Self {
        Self::new(250.0, 500.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct Anchor {
    raw: i64,
    position: f64,
}

/// Stepper axis expressed in a physical unit (blocks, degrees)
pub struct ScaledStepper<S> {
    stepper: S,
    /// Full steps per physical unit
    steps_per_unit: f64,
    mode: StepMode,
    min_mode: StepMode,
    max_mode: StepMode,
    band: SpeedBand,
    auto_mode: bool,
    anchor: Anchor,
    /// Physical target, kept exact so re-expressing it after a mode change does
    /// not accumulate rounding from coarse modes
    target: f64,
}

impl<S: Stepper> ScaledStepper<S> {
    pub fn new(mut stepper: S, steps_per_unit: f64) -> Self {
        stepper.set_mode_lines(StepMode::FULL.lines());
        let raw = stepper.current_position();
        Self {
            stepper,
            steps_per_unit,
            mode: StepMode::FULL,
            min_mode: StepMode::FULL,
            max_mode: StepMode::SIXTEENTH,
            band: SpeedBand::default(),
            auto_mode: false,
            anchor: Anchor { raw, position: 0.0 },
            target: 0.0,
        }
    }

    /// Set the speed band and enable automatic mode switching
    pub fn with_speed_band(mut self, band: SpeedBand) -> Self {
        self.band = band;
        self.auto_mode = true;
        self
    }

    /// Set the permitted mode range and enable automatic mode switching
    pub fn with_mode_range(mut self, min: StepMode, max: StepMode) -> Self {
        self.min_mode = min.min(max);
        self.max_mode = max.max(min);
        self.auto_mode = true;
        let clamped = self.mode.clamp(self.min_mode, self.max_mode);
        self.set_step_mode(clamped);
        self
    }

    pub fn set_auto_mode(&mut self, enabled: bool) {
        self.auto_mode = enabled;
    }

    pub fn auto_mode(&self) -> bool {
        self.auto_mode
    }

    pub fn speed_band(&self) -> SpeedBand {
        self.band
    }

    pub fn step_mode(&self) -> StepMode {
        self.mode
    }

    pub fn steps_per_unit(&self) -> f64 {
        self.steps_per_unit
    }

    /// Raw steps per physical unit in the active mode
    fn raw_per_unit(&self) -> f64 {
        self.steps_per_unit * self.mode.divisor() as f64
    }

    fn scale_pos(&self, raw: i64) -> f64 {
        (raw - self.anchor.raw) as f64 / self.raw_per_unit() + self.anchor.position
    }

    fn unscale_pos(&self, position: f64) -> i64 {
        ((position - self.anchor.position) * self.raw_per_unit()).round() as i64 + self.anchor.raw
    }

    /// Force the microstep mode, clamped to the permitted range
    pub fn set_step_mode(&mut self, mode: StepMode) {
        let mode = mode.clamp(self.min_mode, self.max_mode);
        if mode == self.mode {
            return;
        }

        // Anchor before the divisor changes so the position stays continuous
        self.anchor = Anchor {
            raw: self.stepper.current_position(),
            position: self.current_position(),
        };

        let ratio = mode.divisor() as f64 / self.mode.divisor() as f64;
        debug!(
            "Step mode {} -> {} at {:.4}",
            self.mode.divisor(),
            mode.divisor(),
            self.anchor.position
        );
        self.mode = mode;
        self.stepper.set_mode_lines(mode.lines());

        let max_speed = self.stepper.max_speed() * ratio;
        let acceleration = self.stepper.acceleration() * ratio;
        let speed = self.stepper.speed() * ratio;
        self.stepper.set_max_speed(max_speed);
        self.stepper.set_acceleration(acceleration);
        self.stepper.set_speed(speed);
        let raw_target = self.unscale_pos(self.target);
        self.stepper.move_to(raw_target);
    }

    fn check_mode_switch(&mut self) {
        let raw_speed = self.stepper.speed().abs();
        if raw_speed < self.band.low && self.mode < self.max_mode {
            self.set_step_mode(self.mode.finer());
        } else if raw_speed > self.band.high && self.mode > self.min_mode {
            self.set_step_mode(self.mode.coarser());
        }
    }

    /// Advance motion; call every control cycle. Returns true while motion is pending.
    pub fn run(&mut self) -> bool {
        if self.auto_mode {
            self.check_mode_switch();
        }
        self.stepper.run()
    }

    /// Step at constant speed regardless of the target
    pub fn run_speed(&mut self) -> bool {
        self.stepper.run_speed()
    }

    pub fn current_position(&self) -> f64 {
        self.scale_pos(self.stepper.current_position())
    }

    pub fn target_position(&self) -> f64 {
        self.target
    }

    pub fn distance_to_go(&self) -> f64 {
        self.target - self.current_position()
    }

    /// Redefine the current position without moving
    pub fn set_current_position(&mut self, position: f64) {
        self.stepper.set_current_position(0);
        self.anchor = Anchor { raw: 0, position };
        self.target = position;
    }

    pub fn move_to(&mut self, position: f64) {
        self.target = position;
        let raw = self.unscale_pos(position);
        self.stepper.move_to(raw);
    }

    pub fn move_by(&mut self, delta: f64) {
        self.move_to(self.current_position() + delta);
    }

    pub fn stop(&mut self) {
        self.stepper.stop();
        self.target = self.scale_pos(self.stepper.target_position());
    }

    pub fn halt(&mut self) {
        self.stepper.halt();
        self.target = self.scale_pos(self.stepper.target_position());
    }

    pub fn is_moving(&self) -> bool {
        self.stepper.speed() != 0.0 || self.stepper.distance_to_go() != 0
    }

    pub fn speed(&self) -> f64 {
        self.stepper.speed() / self.raw_per_unit()
    }

    pub fn set_speed(&mut self, speed: f64) {
        let raw = speed * self.raw_per_unit();
        self.stepper.set_speed(raw);
    }

    pub fn max_speed(&self) -> f64 {
        self.stepper.max_speed() / self.raw_per_unit()
    }

    pub fn set_max_speed(&mut self, speed: f64) {
        let raw = speed * self.raw_per_unit();
        self.stepper.set_max_speed(raw);
    }

    pub fn acceleration(&self) -> f64 {
        self.stepper.acceleration() / self.raw_per_unit()
    }

    pub fn set_acceleration(&mut self, acceleration: f64) {
        let raw = acceleration * self.raw_per_unit();
        self.stepper.set_acceleration(raw);
    }

    /// Half a microstep in physical units at the active mode
    pub fn step_error(&self) -> f64 {
        0.5 / self.raw_per_unit()
    }

    pub fn inner(&self) -> &S {
        &self.stepper
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.stepper
    }
}
