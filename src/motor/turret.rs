// Rotary axis carrying the slide, positioned in degrees
//
// Angles are kept unwrapped on the motor side so the axis never spins the long way
// round; every tower-relative calculation goes through `localize`.

use tracing::debug;

use super::accel::Stepper;
use super::scaled::ScaledStepper;
use crate::config::TurretConfig;

/// Wrap an angle into [-180, 180)
pub fn localize(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped >= 180.0 { wrapped - 360.0 } else { wrapped }
}

fn direction(delta: f64) -> i32 {
    if delta > 0.0 {
        1
    } else if delta < 0.0 {
        -1
    } else {
        0
    }
}

/// Tower ring geometry, independent of the motor
#[derive(Debug, Clone)]
pub struct TowerRing {
    angles: Vec<f64>,
}

impl TowerRing {
    /// Tower angles must be listed in increasing order around the ring
    pub fn new(angles: Vec<f64>) -> Self {
        Self { angles }
    }

    pub fn len(&self) -> usize {
        self.angles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.angles.is_empty()
    }

    pub fn angle(&self, tower: usize) -> f64 {
        self.angles[tower % self.angles.len()]
    }

    /// Neighbour of `curr` walking `dir` steps round the ring
    pub fn next_tower(&self, curr: usize, dir: i32) -> usize {
        let n = self.angles.len() as i64;
        (curr as i64 + dir as i64).rem_euclid(n) as usize
    }

    /// Direction (+1 or -1) of the shortest rotation from `curr` to `target`, 0 if equal
    pub fn direction_to(&self, curr: usize, target: usize) -> i32 {
        if curr == target {
            return 0;
        }
        // localize maps exactly opposite towers to -180, so ties go the negative way
        direction(localize(self.angle(target) - self.angle(curr)))
    }

    /// Adjacent tower one hop from `curr` towards `target`
    pub fn next_tower_to(&self, curr: usize, target: usize) -> usize {
        match self.direction_to(curr, target) {
            0 => curr,
            dir => self.next_tower(curr, dir),
        }
    }

    /// Every tower entered on the way from `curr` to `target`, target last
    pub fn path_to(&self, curr: usize, target: usize) -> Vec<usize> {
        let mut path = Vec::new();
        let mut tower = curr;
        while tower != target && path.len() < self.angles.len() {
            tower = self.next_tower_to(tower, target);
            path.push(tower);
        }
        path
    }

    /// Tower with the smallest wrapped distance to `angle`
    pub fn closest_tower(&self, angle: f64) -> usize {
        (0..self.angles.len())
            .min_by(|&a, &b| {
                let da = localize(self.angles[a] - angle).abs();
                let db = localize(self.angles[b] - angle).abs();
                da.total_cmp(&db)
            })
            .unwrap_or(0)
    }
}

/// Rotary axis with a tower table and backlash compensation
pub struct Turret<S> {
    axis: ScaledStepper<S>,
    ring: TowerRing,
    carry_offset: f64,
    backlash: f64,
    sensor_lag: usize,
    max_speed: f64,
    acceleration: f64,
    /// Direction of the first move; 0 until the axis has moved
    first_dir: i32,
    /// Gears currently engaged against `first_dir`
    reversed: bool,
}

impl<S: Stepper> Turret<S> {
    pub fn new(mut axis: ScaledStepper<S>, config: &TurretConfig) -> Self {
        axis.set_max_speed(config.max_speed);
        axis.set_acceleration(config.acceleration);
        let ring = TowerRing::new(config.towers.clone());
        axis.set_current_position(ring.angle(config.start_tower));
        Self {
            axis,
            ring,
            carry_offset: config.carry_offset,
            backlash: config.backlash,
            sensor_lag: config.sensor_lag,
            max_speed: config.max_speed,
            acceleration: config.acceleration,
            first_dir: 0,
            reversed: false,
        }
    }

    pub fn ring(&self) -> &TowerRing {
        &self.ring
    }

    pub fn num_towers(&self) -> usize {
        self.ring.len()
    }

    pub fn tower_angle(&self, tower: usize) -> f64 {
        self.ring.angle(tower)
    }

    pub fn carry_offset(&self) -> f64 {
        self.carry_offset
    }

    fn correction(&self) -> f64 {
        if self.reversed {
            self.backlash * self.first_dir as f64
        } else {
            0.0
        }
    }

    /// Output shaft angle, unwrapped
    pub fn current_angle(&self) -> f64 {
        self.axis.current_position() + self.correction()
    }

    pub fn target_angle(&self) -> f64 {
        self.axis.target_position() + self.correction()
    }

    pub fn local_angle(&self) -> f64 {
        localize(self.current_angle())
    }

    pub fn distance_to_go(&self) -> f64 {
        self.axis.distance_to_go()
    }

    /// Declare the current output angle without moving
    pub fn set_current_angle(&mut self, angle: f64) {
        self.reversed = false;
        self.axis.set_current_position(angle);
    }

    pub fn step_error(&self) -> f64 {
        self.axis.step_error()
    }

    /// Move the output shaft to an unwrapped angle
    pub fn move_to_angle(&mut self, angle: f64) {
        let delta = angle - self.current_angle();
        let dir = direction(delta);
        if self.first_dir == 0 {
            self.first_dir = dir;
        }
        if dir != 0 {
            let reverse = dir != self.first_dir;
            if reverse != self.reversed {
                debug!("Turret backlash {}", if reverse { "engaged" } else { "released" });
            }
            self.reversed = reverse;
        }

        self.axis.set_max_speed(self.max_speed);
        self.axis.set_acceleration(self.acceleration);
        self.axis.move_to(angle - self.correction());
    }

    /// Shortest move to a wrapped angle
    pub fn move_to_local(&mut self, angle: f64) {
        let current = self.current_angle();
        self.move_to_angle(current + localize(angle - current));
    }

    pub fn move_by(&mut self, delta: f64) {
        self.move_to_angle(self.current_angle() + delta);
    }

    pub fn closest_tower(&self) -> usize {
        self.ring.closest_tower(self.current_angle())
    }

    pub fn next_tower(&self, curr: usize, dir: i32) -> usize {
        self.ring.next_tower(curr, dir)
    }

    pub fn next_tower_to(&self, curr: usize, target: usize) -> usize {
        self.ring.next_tower_to(curr, target)
    }

    pub fn path_to(&self, curr: usize, target: usize) -> Vec<usize> {
        self.ring.path_to(curr, target)
    }

    /// Signed wrapped distance from the current angle to a tower
    pub fn offset_to(&self, tower: usize) -> f64 {
        localize(self.ring.angle(tower) - self.current_angle())
    }

    pub fn is_at_tower(&self, tower: usize) -> bool {
        self.offset_to(tower).abs() <= self.step_error()
    }

    pub fn move_to_tower(&mut self, tower: usize) {
        self.move_to_local(self.ring.angle(tower));
    }

    /// Angle beside `tower` on the side the turret is approaching from
    pub fn carry_angle(&self, tower: usize) -> f64 {
        let offset = self.offset_to(tower);
        let side = if offset < 0.0 { -1.0 } else { 1.0 };
        self.current_angle() + offset - self.carry_offset * side
    }

    pub fn move_to_carry(&mut self, tower: usize) {
        let angle = self.carry_angle(tower);
        self.move_to_angle(angle);
    }

    /// Tower the gripper sits at so the trailing colour sensor faces `target`
    pub fn scan_tower_for(&self, target: usize) -> usize {
        self.ring.next_tower(target, -(self.sensor_lag as i32))
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

    pub fn wait(&mut self, mut tick: impl FnMut()) {
        while self.run() {
            tick();
        }
    }

    pub fn axis(&self) -> &ScaledStepper<S> {
        &self.axis
    }
}
