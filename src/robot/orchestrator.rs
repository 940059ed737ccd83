// Robot state and the cooperative control cycle
//
// Every blocking wait in the robot spins `Comms::cycle`, which services the link,
// dispatches received packets and calls the injected tick.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::config::RobotConfig;
use crate::coord::Coordinator;
use crate::link::{Command, Medium, Packet, Transceiver};
use crate::messages::{Activity, RobotStatus};
use crate::motor::{BlockColor, ColorSensor, Gripper, Slide, Stepper, Turret};

/// Physical parts of one robot
pub struct Hardware<S> {
    pub slide: Slide<S>,
    pub turret: Turret<S>,
    pub gripper: Box<dyn Gripper>,
    pub sensor: Box<dyn ColorSensor>,
}

/// Link, coordination and shared beliefs, serviced every control cycle
pub(crate) struct Comms<M> {
    pub(crate) link: Transceiver<M>,
    pub(crate) coord: Coordinator,
    pub(crate) clock: SharedClock,
    ticker: Box<dyn FnMut()>,
    hooks: Vec<Box<dyn FnMut()>>,
    /// Remote-control packets waiting for the robot to be idle
    pub(crate) inbox: VecDeque<Packet>,
    pub(crate) heights: Vec<u32>,
    /// Pending remote stop; true brakes instead of decelerating
    pub(crate) stop: Option<bool>,
}

impl<M: Medium> Comms<M> {
    pub(crate) fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Service the link and coordination without advancing time
    pub(crate) fn poll(&mut self) {
        self.link.update();
        let now = self.clock.now();
        if let Some(packet) = self.link.take_arrival() {
            self.dispatch(packet, now);
        }
        self.coord.update(now);
    }

    /// One control cycle
    pub(crate) fn cycle(&mut self) {
        self.poll();
        (self.ticker)();
        for hook in self.hooks.iter_mut() {
            hook();
        }
    }

    fn dispatch(&mut self, packet: Packet, now: Duration) {
        match packet.command {
            command if command.is_coordination() => self.coord.handle(&packet, now),
            Command::TowerHeight => {
                let (tower, height) = self.link.layout().unpack_height(packet.data);
                match self.heights.get_mut(tower) {
                    Some(h) => {
                        info!("Tower {} height set to {}", tower, height);
                        *h = height;
                    }
                    None => debug!("Height update for unknown tower {}", tower),
                }
            }
            // The transceiver already re-anchored the channel
            Command::Sync => {}
            Command::Stop => {
                self.stop = Some(packet.data != 0);
                self.inbox.push_back(packet);
            }
            _ => self.inbox.push_back(packet),
        }
    }
}

pub struct TowerRobot<S, M> {
    pub(crate) address: u8,
    pub(crate) slide: Slide<S>,
    pub(crate) turret: Turret<S>,
    pub(crate) gripper: Box<dyn Gripper>,
    pub(crate) sensor: Box<dyn ColorSensor>,
    pub(crate) comms: Comms<M>,
    /// Blocks held by the gripper
    pub(crate) cargo: u32,
    pub(crate) activity: Activity,
    pub(crate) last_color: Option<BlockColor>,
    pub(crate) home_block: f64,
    pub(crate) block_timeout: Duration,
}

impl<S: Stepper, M: Medium> TowerRobot<S, M> {
    pub fn new(
        config: &RobotConfig,
        hardware: Hardware<S>,
        link: Transceiver<M>,
        clock: SharedClock,
        ticker: Box<dyn FnMut()>,
    ) -> Self {
        let coord = Coordinator::new(config.address, config.link.layout, config.coord.clone());
        info!(
            "Robot {} with {} towers, heights {:?}",
            config.address,
            config.heights.len(),
            config.heights
        );
        Self {
            address: config.address,
            slide: hardware.slide,
            turret: hardware.turret,
            gripper: hardware.gripper,
            sensor: hardware.sensor,
            comms: Comms {
                link,
                coord,
                clock,
                ticker,
                hooks: Vec::new(),
                inbox: VecDeque::new(),
                heights: config.heights.clone(),
                stop: None,
            },
            cargo: 0,
            activity: Activity::Idle,
            last_color: None,
            home_block: config.home_block,
            block_timeout: config.coord.block_timeout(),
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn heights(&self) -> &[u32] {
        &self.comms.heights
    }

    pub fn height(&self, tower: usize) -> u32 {
        self.comms.heights.get(tower).copied().unwrap_or(0)
    }

    pub fn cargo(&self) -> u32 {
        self.cargo
    }

    pub fn activity(&self) -> Activity {
        self.activity
    }

    pub fn slide(&self) -> &Slide<S> {
        &self.slide
    }

    pub fn turret(&self) -> &Turret<S> {
        &self.turret
    }

    pub fn gripper_open(&self) -> bool {
        self.gripper.is_open()
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.comms.coord
    }

    pub fn link(&self) -> &Transceiver<M> {
        &self.comms.link
    }

    pub fn link_mut(&mut self) -> &mut Transceiver<M> {
        &mut self.comms.link
    }

    /// Tower the gripper is at or nearest to
    pub fn tower(&self) -> usize {
        self.turret.closest_tower()
    }

    /// Run `hook` after every control cycle
    pub fn add_tick_hook(&mut self, hook: Box<dyn FnMut()>) {
        self.comms.hooks.push(hook);
    }

    /// One idle control cycle: service the link and apply pending remote commands
    pub fn idle(&mut self) {
        self.comms.cycle();
        self.serve_remote();
    }

    /// Spin both axes until they stop
    pub(crate) fn wait_axes(&mut self) {
        loop {
            if self.activity == Activity::Remote {
                if let Some(brake) = self.comms.stop.take() {
                    self.stop_axes(brake);
                }
            }
            let moving = self.slide.run() | self.turret.run();
            if !moving {
                break;
            }
            self.comms.cycle();
        }
    }

    pub(crate) fn stop_axes(&mut self, brake: bool) {
        if brake {
            self.slide.halt();
            self.turret.halt();
        } else {
            self.slide.stop();
            self.turret.stop();
        }
    }

    pub(crate) fn wait_slide(&mut self) {
        let comms = &mut self.comms;
        self.slide.wait(|| comms.cycle());
    }

    pub(crate) fn wait_gripper(&mut self) {
        while !self.gripper.settled() {
            self.comms.cycle();
        }
    }

    pub(crate) fn set_gripper(&mut self, open: bool) {
        if self.gripper.is_open() != open {
            self.gripper.set_open(open);
        }
        self.wait_gripper();
    }

    pub fn status(&self) -> RobotStatus {
        RobotStatus {
            address: self.address,
            activity: self.activity,
            coordination: self.comms.coord.state(),
            slide_block: self.slide.current_position(),
            turret_angle: self.turret.current_angle(),
            tower: self.tower(),
            gripper_open: self.gripper.is_open(),
            cargo: self.cargo,
            heights: self.comms.heights.clone(),
            last_color: self.last_color,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::clock::SimClock;
    use crate::config::RobotConfig;
    use crate::link::{BusPort, Command, Medium, Packet, PacketLayout, SharedBus};
    use crate::robot::sim::{SimRobot, SimWorld, build};

    fn latched_robot(bus: &SharedBus, clock: &SimClock) -> SimRobot<BusPort> {
        let mut config = RobotConfig {
            address: 2,
            heights: vec![1, 0, 0, 0],
            ..RobotConfig::default()
        };
        config.link.channel_sync = false;
        config.link.latched = true;
        let world = SimWorld::new(config.heights.clone());
        let ticker_clock = clock.clone();
        let ticker = Box::new(move || ticker_clock.advance(Duration::from_micros(100)));
        let (robot, _rig) = build(&config, bus.port(2), clock.shared(), &world, ticker);
        robot
    }

    #[test]
    fn test_latched_claim_still_expires() {
        let (bus, clock) = (SharedBus::new(), SimClock::new());
        let mut peer = bus.port(1);
        let mut robot = latched_robot(&bus, &clock);
        let layout = PacketLayout::default();
        let data = layout.pack_claim(1, 1).unwrap();
        peer.transmit(layout.encode(&Packet::broadcast(Command::LoadOccupy, data)).unwrap())
            .unwrap();

        robot.idle();
        assert!(robot.coordinator().is_contested(1));
        while clock.now() < Duration::from_secs(10) {
            robot.idle();
        }
        assert!(!robot.coordinator().is_contested(1));
        // Latched reads still see the last message
        let latched = robot.link_mut().receive();
        assert_eq!(latched.map(|p| p.command), Some(Command::LoadOccupy));
    }

    #[test]
    fn test_latched_remote_command_queued_once() {
        let (bus, clock) = (SharedBus::new(), SimClock::new());
        let mut remote = bus.port(9);
        let mut robot = latched_robot(&bus, &clock);
        let frame = PacketLayout::default()
            .encode(&Packet::new(2, Command::Grip, 0))
            .unwrap();
        remote.transmit(frame).unwrap();

        for _ in 0..51 {
            robot.comms.cycle();
        }
        assert_eq!(robot.comms.inbox.len(), 1);

        robot.idle();
        assert!(robot.comms.inbox.is_empty());
        assert!(!robot.gripper_open());
    }
}
