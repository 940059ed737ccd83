// Multi-robot tower coordination
//
// Robots broadcast which tower they are about to enter and whether it is their
// final tower. Each robot decides locally whether to yield, using one total order
// over (role, address) so two robots never both proceed onto a contested tower.

mod engine;
pub mod intent;

pub use engine::{CoordState, Coordinator};
pub use intent::{Intent, Priority, Role, Stage};
