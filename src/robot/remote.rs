// Remote-control opcodes, applied while the robot is idle

use tracing::{info, warn};

use super::orchestrator::TowerRobot;
use crate::link::{Command, Medium, Packet};
use crate::messages::Activity;
use crate::motor::Stepper;

impl<S: Stepper, M: Medium> TowerRobot<S, M> {
    /// Apply every queued remote-control packet
    pub(crate) fn serve_remote(&mut self) {
        while let Some(packet) = self.comms.inbox.pop_front() {
            self.apply_remote(packet);
        }
    }

    fn apply_remote(&mut self, packet: Packet) {
        info!("Remote {}", packet);
        let towers = self.turret.num_towers();
        self.activity = Activity::Remote;
        match packet.command {
            Command::SlideTo => {
                self.slide.move_to_block(packet.data as f64);
                self.wait_axes();
            }
            Command::TurretTo | Command::CarryTo if packet.data as usize >= towers => {
                warn!("No tower {}", packet.data);
            }
            Command::TurretTo => {
                self.move_to_tower(packet.data as usize);
            }
            Command::CarryTo => {
                self.turret.move_to_carry(packet.data as usize);
                self.wait_axes();
            }
            Command::Grip => self.set_gripper(packet.data != 0),
            Command::Home => {
                self.home_block = packet.data as f64;
                self.home();
            }
            Command::Stop => {
                self.comms.stop = None;
                self.stop_axes(packet.data != 0);
                self.wait_axes();
            }
            other => warn!("Unexpected remote command {:?}", other),
        }
        self.activity = Activity::Idle;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::clock::SimClock;
    use crate::config::RobotConfig;
    use crate::link::{BusPort, Command, Medium, Packet, PacketLayout, SharedBus};
    use crate::messages::Activity;
    use crate::robot::sim::{SimRobot, SimWorld, build};

    fn robot(
        bus: &SharedBus,
        clock: &SimClock,
        mut script: impl FnMut(Duration) + 'static,
    ) -> SimRobot<BusPort> {
        let mut config = RobotConfig {
            address: 2,
            heights: vec![1, 0, 0, 0],
            ..RobotConfig::default()
        };
        config.link.channel_sync = false;
        let world = SimWorld::new(config.heights.clone());
        let ticker_clock = clock.clone();
        let ticker = Box::new(move || {
            ticker_clock.advance(Duration::from_micros(100));
            script(ticker_clock.now());
        });
        let (robot, _rig) = build(&config, bus.port(2), clock.shared(), &world, ticker);
        robot
    }

    fn frame(command: Command, data: u32) -> u64 {
        PacketLayout::default()
            .encode(&Packet::new(2, command, data))
            .unwrap()
    }

    fn idle_for(robot: &mut SimRobot<BusPort>, cycles: usize) {
        for _ in 0..cycles {
            robot.idle();
        }
    }

    #[test]
    fn test_remote_moves_and_grip() {
        let (bus, clock) = (SharedBus::new(), SimClock::new());
        let mut remote = bus.port(9);
        let mut robot = robot(&bus, &clock, |_| {});
        assert!(robot.home());

        remote.transmit(frame(Command::SlideTo, 3)).unwrap();
        idle_for(&mut robot, 10);
        assert!(robot.slide().is_at(3.0));

        remote.transmit(frame(Command::Grip, 0)).unwrap();
        idle_for(&mut robot, 10);
        assert!(!robot.gripper_open());

        remote.transmit(frame(Command::TurretTo, 1)).unwrap();
        idle_for(&mut robot, 10);
        assert_eq!(robot.tower(), 1);
        assert_eq!(robot.activity(), Activity::Idle);
    }

    #[test]
    fn test_remote_carry_and_bad_tower() {
        let (bus, clock) = (SharedBus::new(), SimClock::new());
        let mut remote = bus.port(9);
        let mut robot = robot(&bus, &clock, |_| {});
        robot.home();

        remote.transmit(frame(Command::TurretTo, 7)).unwrap();
        idle_for(&mut robot, 10);
        assert_eq!(robot.turret().current_angle(), 0.0);

        remote.transmit(frame(Command::CarryTo, 1)).unwrap();
        idle_for(&mut robot, 10);
        assert!((robot.turret().current_angle() - 60.0).abs() < 0.5);
    }

    #[test]
    fn test_tower_height_update() {
        let (bus, clock) = (SharedBus::new(), SimClock::new());
        let mut master = bus.port(9);
        let mut robot = robot(&bus, &clock, |_| {});
        let layout = PacketLayout::default();
        let data = layout.pack_height(3, 5).unwrap();
        master
            .transmit(layout.encode(&Packet::broadcast(Command::TowerHeight, data)).unwrap())
            .unwrap();
        idle_for(&mut robot, 10);
        assert_eq!(robot.heights(), &[1, 0, 0, 5]);
    }

    /// Slide position after a SlideTo interrupted by a Stop carrying `data`
    fn stopped_at(data: u32) -> f64 {
        let (bus, clock) = (SharedBus::new(), SimClock::new());
        let mut remote = bus.port(9);
        let (mut sent_move, mut sent_stop) = (false, false);
        let script = move |now: Duration| {
            if !sent_move && now >= Duration::from_secs(2) {
                remote.transmit(frame(Command::SlideTo, 5)).unwrap();
                sent_move = true;
            }
            if !sent_stop && now >= Duration::from_millis(2500) {
                remote.transmit(frame(Command::Stop, data)).unwrap();
                sent_stop = true;
            }
        };
        let mut robot = robot(&bus, &clock, script);
        robot.home();
        while clock.now() < Duration::from_secs(6) {
            robot.idle();
        }
        assert!(!robot.slide().is_moving());
        assert_eq!(robot.activity(), Activity::Idle);
        robot.slide().current_position()
    }

    #[test]
    fn test_stop_halts_remote_motion() {
        let position = stopped_at(0);
        assert!(position > 0.2 && position < 2.0, "stopped at {}", position);
    }

    #[test]
    fn test_braking_stop_skips_deceleration() {
        let soft = stopped_at(0);
        let braked = stopped_at(1);
        assert!(braked > 0.0, "never moved: {}", braked);
        assert!(braked < soft, "braked {} vs soft {}", braked, soft);
    }
}
