// Shared broadcast media
//
// A medium carries raw frames. There is no collision detection and no delivery
// guarantee; anything that transmits is heard by every receiver in line of sight.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;

use tracing::trace;

use super::Result;

pub trait Medium {
    fn transmit(&mut self, frame: u64) -> Result<()>;

    /// Next received frame, if any. Never blocks.
    fn poll(&mut self) -> Result<Option<u64>>;
}

impl<M: Medium + ?Sized> Medium for Box<M> {
    fn transmit(&mut self, frame: u64) -> Result<()> {
        (**self).transmit(frame)
    }

    fn poll(&mut self) -> Result<Option<u64>> {
        (**self).poll()
    }
}

#[derive(Default)]
struct BusState {
    ports: Vec<(u8, VecDeque<u64>)>,
    /// Unordered pairs of ports that cannot see each other
    blocked: HashSet<(u8, u8)>,
    echo: bool,
    log: Vec<(u8, u64)>,
}

impl BusState {
    fn in_sight(&self, a: u8, b: u8) -> bool {
        !self.blocked.contains(&(a.min(b), a.max(b)))
    }

    fn deliver(&mut self, from: u8, frame: u64) {
        for (id, queue) in self.ports.iter_mut() {
            let visible = !self.blocked.contains(&(from.min(*id), from.max(*id)));
            if (*id != from || self.echo) && visible {
                queue.push_back(frame);
            }
        }
    }
}

/// In-memory broadcast medium for simulations and tests
#[derive(Clone, Default)]
pub struct SharedBus {
    state: Rc<RefCell<BusState>>,
}

impl SharedBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transmitters also hear their own frames, like a real IR receiver next to its LED
    pub fn with_echo(self) -> Self {
        self.state.borrow_mut().echo = true;
        self
    }

    /// Attach a receiver/transmitter pair identified by `id`
    pub fn port(&self, id: u8) -> BusPort {
        self.state.borrow_mut().ports.push((id, VecDeque::new()));
        BusPort {
            id,
            bus: self.clone(),
        }
    }

    pub fn block_sight(&self, a: u8, b: u8) {
        self.state.borrow_mut().blocked.insert((a.min(b), a.max(b)));
    }

    pub fn restore_sight(&self, a: u8, b: u8) {
        self.state.borrow_mut().blocked.remove(&(a.min(b), a.max(b)));
    }

    pub fn in_sight(&self, a: u8, b: u8) -> bool {
        self.state.borrow().in_sight(a, b)
    }

    /// Every transmission so far as (port id, frame)
    pub fn log(&self) -> Vec<(u8, u64)> {
        self.state.borrow().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.borrow_mut().log.clear();
    }
}

/// One robot's view of a `SharedBus`
pub struct BusPort {
    id: u8,
    bus: SharedBus,
}

impl BusPort {
    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn bus(&self) -> &SharedBus {
        &self.bus
    }
}

impl Medium for BusPort {
    fn transmit(&mut self, frame: u64) -> Result<()> {
        trace!("Bus port {} -> 0x{:X}", self.id, frame);
        let mut state = self.bus.state.borrow_mut();
        state.log.push((self.id, frame));
        state.deliver(self.id, frame);
        Ok(())
    }

    fn poll(&mut self) -> Result<Option<u64>> {
        let mut state = self.bus.state.borrow_mut();
        let frame = state
            .ports
            .iter_mut()
            .find(|(id, _)| *id == self.id)
            .and_then(|(_, queue)| queue.pop_front());
        Ok(frame)
    }
}
