// Load, unload, scan and homing tasks
//
// Gripper position is measured in blocks: at block b the jaws hold block b of the
// stack, and any cargo rests on top of it. Passing over a stack of height h needs
// the jaws at h + clearance.

use std::iter;

use tracing::{info, warn};

use super::orchestrator::TowerRobot;
use crate::coord::Role;
use crate::link::Medium;
use crate::messages::Activity;
use crate::motor::{BlockColor, Stepper};

/// Outcome of a colour scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    Block(BlockColor),
    Empty,
}

impl<S: Stepper, M: Medium> TowerRobot<S, M> {
    /// Home the slide against its limit switch
    pub fn home(&mut self) -> bool {
        self.activity = Activity::Homing;
        let home_block = self.home_block;
        let comms = &mut self.comms;
        let homed = self.slide.home(home_block, || comms.cycle());
        self.activity = Activity::Idle;
        homed
    }

    fn role(&self) -> Role {
        if self.cargo > 0 { Role::Unload } else { Role::Load }
    }

    /// Tower about to be entered: the first tower on `path` not yet passed
    fn upcoming(&self, path: &[usize], dir: f64) -> usize {
        let eps = self.turret.step_error();
        path.iter()
            .copied()
            .find(|&t| self.turret.offset_to(t) * dir > eps)
            .or_else(|| path.last().copied())
            .unwrap_or_else(|| self.turret.closest_tower())
    }

    /// Rotate to `target`, raising the slide over every tower on the way and
    /// yielding to peers. The caller owns begin_yield / end_yield.
    pub(crate) fn travel(&mut self, target: usize) -> bool {
        let start = self.turret.closest_tower();
        let path = self.turret.path_to(start, target);

        let highest = path
            .iter()
            .chain(iter::once(&target))
            .map(|&t| self.height(t))
            .max()
            .unwrap_or(0);
        if !self.slide.can_clear(highest as f64) {
            warn!(
                "Cannot clear height {} on the way to tower {}",
                highest, target
            );
            return false;
        }
        // Only ever raise the slide before rotating
        if !self.slide.is_clear_of(highest as f64) {
            self.slide.move_to_clear(highest as f64);
            self.wait_slide();
        }

        if self.cargo == 0 {
            self.set_gripper(true);
        }

        self.turret.move_to_tower(target);
        let dir = if self.turret.target_angle() < self.turret.current_angle() {
            -1.0
        } else {
            1.0
        };
        let mut parked: Option<usize> = None;

        loop {
            let next = self.upcoming(&path, dir);
            let angle = self.turret.current_angle();
            self.comms.coord.observe(angle, next, &mut self.comms.link);

            match self.comms.coord.blocked_tower() {
                Some(tower) => {
                    if parked != Some(tower) {
                        info!("Parking beside tower {}", tower);
                        self.turret.move_to_carry(tower);
                        parked = Some(tower);
                    }
                    let now = self.comms.now();
                    if !self.gripper.is_open()
                        && self.comms.coord.blocked_for(now) > self.block_timeout
                    {
                        warn!("Blocked on tower {} too long with cargo, aborting", tower);
                        self.turret.stop();
                        self.wait_axes();
                        return false;
                    }
                }
                None => {
                    if parked.take().is_some() {
                        info!("Resuming to tower {}", target);
                        self.turret.move_to_tower(target);
                    }
                }
            }

            let moving = self.slide.run() | self.turret.run();
            if !moving && parked.is_none() {
                break;
            }
            self.comms.cycle();
        }

        info!("Arrived at tower {}", target);
        true
    }

    fn has_tower(&self, tower: usize) -> bool {
        let known = tower < self.comms.heights.len().min(self.turret.num_towers());
        if !known {
            warn!("No tower {}", tower);
        }
        known
    }

    /// Take blocks `block..` off `tower`
    pub fn load(&mut self, tower: usize, block: u32) -> bool {
        if !self.has_tower(tower) {
            return false;
        }
        if self.cargo > 0 {
            warn!("Already holding {} blocks", self.cargo);
            return false;
        }
        let height = self.height(tower);
        if height == 0 {
            warn!("Tower {} is empty", tower);
            return false;
        }
        let block = block.min(height - 1);

        info!("Loading tower {} from block {}", tower, block);
        self.activity = Activity::Loading;
        let angle = self.turret.current_angle();
        self.comms.coord.begin_yield(Role::Load, tower, angle);

        let ok = self.travel(tower);
        if ok {
            self.comms.coord.occupy(&mut self.comms.link);
            self.slide.move_to_block(block as f64);
            self.wait_slide();
            self.set_gripper(false);

            self.cargo = height - block;
            self.comms.heights[tower] = block;
            self.slide.move_to_clear(block as f64);
            self.wait_slide();
        }

        self.comms.coord.end_yield(&mut self.comms.link);
        self.activity = Activity::Idle;
        ok
    }

    /// Take the top block off `tower`
    pub fn load_top(&mut self, tower: usize) -> bool {
        let height = self.height(tower);
        self.load(tower, height.saturating_sub(1))
    }

    /// Put all held blocks on top of `tower`
    pub fn unload(&mut self, tower: usize) -> bool {
        if !self.has_tower(tower) {
            return false;
        }
        if self.cargo == 0 {
            warn!("Nothing to unload");
            return false;
        }
        let height = self.height(tower);
        let stacked = height + self.cargo;
        if !self.slide.can_clear(stacked as f64) {
            warn!("Stack of {} on tower {} would be too high", stacked, tower);
            return false;
        }

        info!("Unloading {} blocks onto tower {}", self.cargo, tower);
        self.activity = Activity::Unloading;
        let angle = self.turret.current_angle();
        self.comms.coord.begin_yield(Role::Unload, tower, angle);

        let ok = self.travel(tower);
        if ok {
            self.comms.coord.occupy(&mut self.comms.link);
            self.slide.move_to_block(height as f64);
            self.wait_slide();
            self.set_gripper(true);

            self.comms.heights[tower] = stacked;
            self.cargo = 0;
            self.slide.move_to_clear(stacked as f64);
            self.wait_slide();
        }

        self.comms.coord.end_yield(&mut self.comms.link);
        self.activity = Activity::Idle;
        ok
    }

    /// Read the colour of `block` on `tower` and correct the believed height
    ///
    /// The sensor trails the gripper, so the gripper works at the tower before the
    /// target. Returns `None` if the scan position cannot be reached.
    pub fn scan_block(&mut self, tower: usize, block: u32) -> Option<Scan> {
        if !self.has_tower(tower) {
            return None;
        }
        let scan_at = self.turret.scan_tower_for(tower);
        if self.height(scan_at) > block {
            warn!(
                "Tower {} is too high to scan block {} of tower {}",
                scan_at, block, tower
            );
            return None;
        }

        self.activity = Activity::Scanning;
        let angle = self.turret.current_angle();
        let role = self.role();
        self.comms.coord.begin_yield(role, scan_at, angle);

        let result = if self.travel(scan_at) {
            self.comms.coord.occupy(&mut self.comms.link);
            self.slide.move_to_block(block as f64);
            self.wait_slide();

            let color = self.sensor.block_color();
            self.last_color = color;
            let scan = match color {
                Some(color) => Scan::Block(color),
                None => Scan::Empty,
            };
            self.reconcile(tower, block, scan);

            let clear = self.height(scan_at) as f64;
            self.slide.move_to_clear(clear);
            self.wait_slide();
            Some(scan)
        } else {
            None
        };

        self.comms.coord.end_yield(&mut self.comms.link);
        self.activity = Activity::Idle;
        result
    }

    fn reconcile(&mut self, tower: usize, block: u32, scan: Scan) {
        let predicted = self.height(tower);
        let corrected = match scan {
            Scan::Empty if block < predicted => block,
            Scan::Block(_) if block >= predicted => block + 1,
            _ => return,
        };
        info!(
            "Tower {} height corrected from {} to {}",
            tower, predicted, corrected
        );
        if let Some(h) = self.comms.heights.get_mut(tower) {
            *h = corrected;
        }
    }

    /// Probe from the believed height until the top of `tower` is found
    pub fn find_height(&mut self, tower: usize) -> Option<u32> {
        if !self.has_tower(tower) {
            return None;
        }
        let predicted = self.height(tower);
        let highest = self.slide.upper_limit().floor() as u32;

        let below_empty = predicted > 0 && self.scan_block(tower, predicted - 1)? == Scan::Empty;
        if below_empty {
            let mut block = predicted - 1;
            while block > 0 {
                block -= 1;
                if let Scan::Block(_) = self.scan_block(tower, block)? {
                    break;
                }
            }
        } else {
            let mut block = predicted;
            while block <= highest {
                if self.scan_block(tower, block)? == Scan::Empty {
                    break;
                }
                block += 1;
            }
        }

        let height = self.height(tower);
        info!("Tower {} is {} blocks high", tower, height);
        Some(height)
    }

    /// Coordinated move of the gripper to `tower` without touching blocks
    pub fn move_to_tower(&mut self, tower: usize) -> bool {
        if !self.has_tower(tower) {
            return false;
        }
        let angle = self.turret.current_angle();
        let role = self.role();
        self.comms.coord.begin_yield(role, tower, angle);
        let ok = self.travel(tower);
        self.comms.coord.end_yield(&mut self.comms.link);
        ok
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    use crate::clock::SimClock;
    use crate::config::RobotConfig;
    use crate::coord::CoordState;
    use crate::link::{BusPort, Command, Medium, Packet, PacketLayout, SharedBus};
    use crate::motor::BlockColor;
    use crate::robot::Scan;
    use crate::robot::sim::{SimRig, SimRobot, SimWorld, build};

    fn config(heights: Vec<u32>) -> RobotConfig {
        let mut config = RobotConfig {
            address: 2,
            ..RobotConfig::default()
        };
        config.link.channel_sync = false;
        config.turret.towers = (0..heights.len())
            .map(|i| i as f64 * 360.0 / heights.len() as f64)
            .collect();
        config.heights = heights;
        config
    }

    fn robot(
        config: &RobotConfig,
        bus: &SharedBus,
        clock: &SimClock,
        world: &SimWorld,
        mut script: impl FnMut(Duration) + 'static,
    ) -> (SimRobot<BusPort>, SimRig) {
        let ticker_clock = clock.clone();
        let ticker = Box::new(move || {
            ticker_clock.advance(Duration::from_micros(100));
            script(ticker_clock.now());
        });
        build(config, bus.port(config.address), clock.shared(), world, ticker)
    }

    #[test]
    fn test_basic_load() {
        let (bus, clock) = (SharedBus::new(), SimClock::new());
        let config = config(vec![2, 0, 0, 0]);
        let world = SimWorld::new(config.heights.clone());
        let (mut robot, rig) = robot(&config, &bus, &clock, &world, |_| {});

        assert!(robot.home());
        assert!(robot.load(0, 1));

        assert_eq!(robot.tower(), 0);
        assert!(!robot.gripper_open());
        assert_eq!(robot.cargo(), 1);
        assert_eq!(robot.height(0), 1);
        let clear = 1.0 + config.slide.clearance;
        assert!(robot.slide().is_at(clear));
        assert!((rig.slide_block() - clear).abs() < 0.01);
        assert_eq!(robot.coordinator().state(), CoordState::Dormant);
    }

    #[test]
    fn test_load_rejects_empty_tower_and_full_gripper() {
        let (bus, clock) = (SharedBus::new(), SimClock::new());
        let config = config(vec![1, 0, 0, 0]);
        let world = SimWorld::new(config.heights.clone());
        let (mut robot, _rig) = robot(&config, &bus, &clock, &world, |_| {});
        robot.home();

        assert!(!robot.load(1, 0));
        assert!(robot.load_top(0));
        assert!(!robot.load_top(0));
        assert_eq!(robot.cargo(), 1);
    }

    #[test]
    fn test_unknown_tower_rejected() {
        let (bus, clock) = (SharedBus::new(), SimClock::new());
        let config = config(vec![1, 0, 0, 0]);
        let world = SimWorld::new(config.heights.clone());
        let (mut robot, _rig) = robot(&config, &bus, &clock, &world, |_| {});
        robot.home();

        assert!(!robot.load(9, 0));
        assert!(robot.load_top(0));
        assert!(!robot.unload(7));
        assert_eq!(robot.cargo(), 1);
        assert!(!robot.gripper_open());

        assert_eq!(robot.scan_block(7, 0), None);
        assert_eq!(robot.find_height(4), None);
        assert!(!robot.move_to_tower(4));
        assert_eq!(robot.tower(), 0);
        assert_eq!(robot.heights(), &[0, 0, 0, 0]);
        assert_eq!(robot.coordinator().state(), CoordState::Dormant);
    }

    #[test]
    fn test_unload_stacks_cargo() {
        let (bus, clock) = (SharedBus::new(), SimClock::new());
        let config = config(vec![3, 0, 1, 0]);
        let world = SimWorld::new(config.heights.clone());
        let (mut robot, _rig) = robot(&config, &bus, &clock, &world, |_| {});
        robot.home();

        assert!(robot.load(0, 1));
        assert_eq!(robot.cargo(), 2);
        assert!(robot.unload(2));
        assert_eq!(robot.heights(), &[1, 0, 3, 0]);
        assert_eq!(robot.cargo(), 0);
        assert!(robot.gripper_open());
        assert_eq!(robot.tower(), 2);
        assert!(!robot.unload(1));
    }

    #[test]
    fn test_unload_refuses_unclearable_stack() {
        let (bus, clock) = (SharedBus::new(), SimClock::new());
        let config = config(vec![2, 5, 0, 0]);
        let world = SimWorld::new(config.heights.clone());
        let (mut robot, _rig) = robot(&config, &bus, &clock, &world, |_| {});
        robot.home();

        assert!(robot.load(0, 0));
        // 5 + 2 blocks cannot be cleared under the upper limit
        assert!(!robot.unload(1));
        assert_eq!(robot.cargo(), 2);
    }

    #[test]
    fn test_clearance_monotonic_while_rotating() {
        let (bus, clock) = (SharedBus::new(), SimClock::new());
        let config = config(vec![0, 0, 1, 3]);
        let world = SimWorld::new(config.heights.clone());
        let samples = Rc::new(RefCell::new(Vec::new()));

        let (mut robot, rig) = robot(&config, &bus, &clock, &world, |_| {});
        let recorder = samples.clone();
        let probe = rig.clone();
        robot.home();
        robot.add_tick_hook(Box::new(move || {
            recorder.borrow_mut().push((probe.turret_angle(), probe.slide_block()));
        }));

        assert!(robot.load(2, 0));

        let clear = 3.0 + config.slide.clearance;
        let samples = samples.borrow();
        let rotating: Vec<_> = samples.iter().filter(|(angle, _)| angle.abs() > 0.5).collect();
        assert!(!rotating.is_empty());
        // clear of tower 3 for the whole rotation, and never lowered until arrival
        let arrival = rotating
            .iter()
            .position(|(angle, _)| (angle.abs() - 180.0).abs() < 0.5)
            .unwrap();
        for window in rotating[..arrival].windows(2) {
            assert!(window[0].1 >= clear - 0.01);
            assert!(window[1].1 >= window[0].1 - 0.01);
        }
    }

    #[test]
    fn test_blocked_crossing() {
        let (bus, clock) = (SharedBus::new(), SimClock::new());
        let mut config = config(vec![2, 0, 0, 0, 0, 0]);
        config.turret.carry_offset = 20.0;
        config.coord.block_timeout_ms = 120_000;
        let world = SimWorld::new(config.heights.clone());

        // robot 1 holds a final unload claim on tower 1 until 30 s, then releases it
        let layout = PacketLayout::default();
        let mut peer = bus.port(1);
        let claim = layout.encode(&Packet::broadcast(
            Command::UnloadTarget,
            layout.pack_claim(1, 1).unwrap(),
        ));
        let done = layout.encode(&Packet::broadcast(Command::Done, layout.pack_claim(1, 1).unwrap()));
        let (claim, done) = (claim.unwrap(), done.unwrap());
        let release = Duration::from_secs(30);
        let mut next_send = Duration::ZERO;
        let script = move |now: Duration| {
            if now >= next_send {
                let frame = if now < release { claim } else { done };
                peer.transmit(frame).unwrap();
                next_send = now + Duration::from_millis(100);
            }
            while peer.poll().unwrap().is_some() {}
        };

        let (mut robot, rig) = robot(&config, &bus, &clock, &world, script);
        let max_before_release = Rc::new(RefCell::new(f64::MIN));
        let recorder = max_before_release.clone();
        let probe = rig.clone();
        let hook_clock = clock.clone();
        robot.add_tick_hook(Box::new(move || {
            if hook_clock.now() < release {
                let mut max = recorder.borrow_mut();
                *max = max.max(probe.turret_angle());
            }
        }));

        assert!(robot.home());
        assert!(robot.load_top(0));
        assert!(clock.now() < release);

        assert!(robot.unload(2));
        assert!(clock.now() >= release);
        assert_eq!(robot.tower(), 2);
        assert_eq!(robot.height(2), 1);

        // parked at the carry offset short of tower 1 while the claim was live
        let max = *max_before_release.borrow();
        assert!((max - 40.0).abs() < 1.0, "max angle {}", max);
    }

    #[test]
    fn test_blocked_with_cargo_times_out() {
        let (bus, clock) = (SharedBus::new(), SimClock::new());
        let mut config = config(vec![2, 0, 0, 0, 0, 0]);
        config.coord.block_timeout_ms = 2_000;
        let world = SimWorld::new(config.heights.clone());

        let layout = PacketLayout::default();
        let mut peer = bus.port(1);
        let claim = layout
            .encode(&Packet::broadcast(
                Command::UnloadOccupy,
                layout.pack_claim(1, 1).unwrap(),
            ))
            .unwrap();
        let mut next_send = Duration::ZERO;
        let script = move |now: Duration| {
            if now >= next_send {
                peer.transmit(claim).unwrap();
                next_send = now + Duration::from_millis(100);
            }
            while peer.poll().unwrap().is_some() {}
        };

        let (mut robot, _rig) = robot(&config, &bus, &clock, &world, script);
        robot.home();
        assert!(robot.load_top(0));
        assert!(!robot.unload(2));
        assert_eq!(robot.cargo(), 1);
        assert_eq!(robot.coordinator().state(), CoordState::Dormant);
    }

    #[test]
    fn test_scan_reconciles_heights() {
        let (bus, clock) = (SharedBus::new(), SimClock::new());
        let config = config(vec![2, 0, 1, 0]);
        // the world really has no blocks on tower 0 and 3 on tower 2
        let world = SimWorld::new(vec![0, 0, 3, 0]);
        let (mut robot, _rig) = robot(&config, &bus, &clock, &world, |_| {});
        robot.home();

        let scan = robot.scan_block(2, 1).unwrap();
        assert!(matches!(scan, Scan::Block(_)));
        assert_eq!(robot.height(2), 2);
        assert_eq!(robot.tower(), 1);

        assert_eq!(robot.scan_block(0, 1), Some(Scan::Empty));
        assert_eq!(robot.height(0), 1);
        assert_eq!(robot.tower(), 3);

        assert_eq!(robot.find_height(2), Some(3));
    }

    #[test]
    fn test_scan_reports_world_color() {
        let (bus, clock) = (SharedBus::new(), SimClock::new());
        let config = config(vec![0, 0, 2, 0]);
        let world = SimWorld::new(config.heights.clone());
        let (mut robot, _rig) = robot(&config, &bus, &clock, &world, |_| {});
        robot.home();

        let expected = world.color_at(2, 0).map(Scan::Block).unwrap();
        assert_eq!(robot.scan_block(2, 0), Some(expected));
        assert_eq!(robot.status().last_color, world.color_at(2, 0));
        assert!(matches!(world.color_at(2, 0), Some(BlockColor::Blue)));
    }

    #[test]
    fn test_find_height_downward() {
        let (bus, clock) = (SharedBus::new(), SimClock::new());
        let config = config(vec![0, 0, 4, 0]);
        let world = SimWorld::new(vec![0, 0, 1, 0]);
        let (mut robot, _rig) = robot(&config, &bus, &clock, &world, |_| {});
        robot.home();

        assert_eq!(robot.find_height(2), Some(1));
    }
}
