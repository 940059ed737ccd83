// Simulated robot assembly for host runs and tests

use std::sync::{Arc, Mutex, MutexGuard};

use crate::clock::SharedClock;
use crate::config::RobotConfig;
use crate::link::{Medium, Transceiver};
use crate::motor::sim::{ShaftProbe, SimColorSensor, SimDriver, SimGripper, SimLimit};
use crate::motor::{
    AccelStepper, BlockColor, ScaledStepper, Slide, SpeedBand, StepMode, TowerRing, Turret,
};

use super::orchestrator::{Hardware, TowerRobot};

pub type SimAxis = AccelStepper<SimDriver>;
pub type SimRobot<M> = TowerRobot<SimAxis, M>;

const COLORS: [BlockColor; 5] = [
    BlockColor::Red,
    BlockColor::Green,
    BlockColor::Blue,
    BlockColor::Yellow,
    BlockColor::White,
];

/// Slide shaft position at power-up, above the limit switch, in blocks
const SLIDE_START: f64 = 0.5;

/// The real tower heights, which the robot's beliefs may disagree with
#[derive(Debug, Clone)]
pub struct SimWorld {
    heights: Arc<Mutex<Vec<u32>>>,
}

impl SimWorld {
    pub fn new(heights: Vec<u32>) -> Self {
        Self {
            heights: Arc::new(Mutex::new(heights)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u32>> {
        self.heights.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_height(&self, tower: usize, height: u32) {
        if let Some(h) = self.lock().get_mut(tower) {
            *h = height;
        }
    }

    pub fn height(&self, tower: usize) -> u32 {
        self.lock().get(tower).copied().unwrap_or(0)
    }

    /// Colour of a block, `None` above the top of the stack
    pub fn color_at(&self, tower: usize, block: u32) -> Option<BlockColor> {
        (block < self.height(tower)).then(|| COLORS[(tower + block as usize) % COLORS.len()])
    }
}

/// Physical shaft positions of a simulated robot, in axis units
#[derive(Debug, Clone)]
pub struct SimRig {
    slide: ShaftProbe,
    turret: ShaftProbe,
    home_block: f64,
    steps_per_block: f64,
    start_angle: f64,
    steps_per_degree: f64,
}

impl SimRig {
    /// Gripper height in blocks, measured from the limit switch
    pub fn slide_block(&self) -> f64 {
        self.home_block + self.slide.full_steps() / self.steps_per_block
    }

    pub fn turret_angle(&self) -> f64 {
        self.start_angle + self.turret.full_steps() / self.steps_per_degree
    }
}

fn axis(
    driver: SimDriver,
    clock: &SharedClock,
    steps_per_unit: f64,
    band: [f64; 2],
    modes: [u32; 2],
) -> ScaledStepper<SimAxis> {
    ScaledStepper::new(AccelStepper::new(driver, clock.clone()), steps_per_unit)
        .with_speed_band(SpeedBand::new(band[0], band[1]))
        .with_mode_range(StepMode::new(modes[0]), StepMode::new(modes[1]))
}

/// Assemble a robot on simulated hardware over `medium`
pub fn build<M: Medium>(
    config: &RobotConfig,
    medium: M,
    clock: SharedClock,
    world: &SimWorld,
    ticker: Box<dyn FnMut()>,
) -> (SimRobot<M>, SimRig) {
    let slide_cfg = &config.slide;
    let turret_cfg = &config.turret;
    let sixteenths = StepMode::SIXTEENTH.divisor() as f64;

    let slide_driver =
        SimDriver::with_offset((SLIDE_START * slide_cfg.steps_per_block * sixteenths) as i64);
    let turret_driver = SimDriver::new();
    let rig = SimRig {
        slide: slide_driver.probe(),
        turret: turret_driver.probe(),
        home_block: config.home_block,
        steps_per_block: slide_cfg.steps_per_block,
        start_angle: turret_cfg.towers[turret_cfg.start_tower],
        steps_per_degree: turret_cfg.steps_per_degree,
    };

    let limit = SimLimit::new(slide_driver.probe(), 0);
    let slide = Slide::new(
        axis(
            slide_driver,
            &clock,
            slide_cfg.steps_per_block,
            slide_cfg.speed_band,
            slide_cfg.mode_range,
        ),
        Box::new(limit),
        slide_cfg,
    );
    let turret = Turret::new(
        axis(
            turret_driver,
            &clock,
            turret_cfg.steps_per_degree,
            turret_cfg.speed_band,
            turret_cfg.mode_range,
        ),
        turret_cfg,
    );

    // The sensor looks at the tower `sensor_lag` places ahead of the gripper
    let ring = TowerRing::new(turret_cfg.towers.clone());
    let lag = turret_cfg.sensor_lag as i32;
    let probe = rig.clone();
    let sensed = world.clone();
    let sensor = SimColorSensor::new(move || {
        let gripper_tower = ring.closest_tower(probe.turret_angle());
        let tower = ring.next_tower(gripper_tower, lag);
        let block = probe.slide_block().round().max(0.0) as u32;
        sensed.color_at(tower, block)
    });

    let hardware = Hardware {
        slide,
        turret,
        gripper: Box::new(SimGripper::new(clock.clone(), config.gripper_settle())),
        sensor: Box::new(sensor),
    };
    let link = Transceiver::new(medium, config.address, clock.clone(), &config.link);
    let robot = TowerRobot::new(config, hardware, link, clock, ticker);
    (robot, rig)
}
