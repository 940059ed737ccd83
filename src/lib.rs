// Tower-building robot: motion, IR link, coordination and tasks

pub mod clock;
pub mod config;
pub mod coord;
pub mod link;
pub mod messages;
pub mod motor;
pub mod robot;
pub mod runtime;
