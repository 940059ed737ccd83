// Broadcast transceiver
//
// Holds one staged outgoing message and the most recent accepted incoming message.
// `update` must be called every cycle; it transmits at most once and reads at most
// one frame per call.

use std::collections::VecDeque;
use std::time::Duration;

use rand_core::{RngCore, SeedableRng};
use rand_wyrand::WyRand;
use tracing::{debug, trace, warn};

use super::medium::Medium;
use super::packet::{BROADCAST, Command, Packet, PacketLayout, ProtocolError};
use crate::clock::SharedClock;
use crate::config::LinkConfig;

/// How many times a staged message is transmitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Finite(u32),
    Forever,
}

/// Delay between repeats of a staged message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Fixed(Duration),
    /// Re-rolled uniformly in [min, max] after every transmission
    Random { min: Duration, max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendPolicy {
    pub repeats: Repeat,
    pub interval: Interval,
}

impl SendPolicy {
    pub fn once() -> Self {
        Self::finite(1, Duration::ZERO)
    }

    pub fn finite(repeats: u32, interval: Duration) -> Self {
        Self {
            repeats: Repeat::Finite(repeats),
            interval: Interval::Fixed(interval),
        }
    }

    pub fn forever(min: Duration, max: Duration) -> Self {
        Self {
            repeats: Repeat::Forever,
            interval: Interval::Random { min, max },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiveMode {
    /// `receive` hands a message out once
    #[default]
    ConsumeOnce,
    /// `receive` keeps returning the last message until a new one arrives
    Latched,
}

#[derive(Debug)]
struct Outgoing {
    packet: Packet,
    frame: u64,
    policy: SendPolicy,
    sent: u32,
    next_at: Duration,
}

impl Outgoing {
    fn exhausted(&self) -> bool {
        match self.policy.repeats {
            Repeat::Finite(n) => self.sent >= n,
            Repeat::Forever => false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Channel {
    origin: Duration,
    slot: Duration,
    count: u8,
}

pub struct Transceiver<M> {
    medium: M,
    layout: PacketLayout,
    address: u8,
    clock: SharedClock,
    rng: WyRand,
    default_policy: SendPolicy,
    receive_mode: ReceiveMode,
    shield: Duration,
    auto_relay: bool,
    relay_holdoff: Duration,
    channel: Option<Channel>,
    outgoing: Option<Outgoing>,
    relay_queue: VecDeque<u64>,
    /// Recently relayed frames with the time they were relayed
    relayed: VecDeque<(u64, Duration)>,
    received: Option<Packet>,
    /// Set when a message arrives, cleared once the arrival is taken
    fresh: bool,
    last_sent_at: Option<Duration>,
}

impl<M: Medium> Transceiver<M> {
    pub fn new(medium: M, address: u8, clock: SharedClock, config: &LinkConfig) -> Self {
        let seed = ((address as u64) << 32) ^ clock.now().as_micros() as u64;
        let channel = config.channel_sync.then(|| Channel {
            origin: Duration::ZERO,
            slot: Duration::from_millis(config.slot_ms.max(1)),
            count: config.channel_count.max(1),
        });
        Self {
            medium,
            layout: config.layout,
            address,
            clock,
            rng: WyRand::seed_from_u64(seed),
            default_policy: SendPolicy::finite(
                config.repeats,
                Duration::from_millis(config.interval_ms),
            ),
            receive_mode: if config.latched {
                ReceiveMode::Latched
            } else {
                ReceiveMode::ConsumeOnce
            },
            shield: Duration::from_millis(config.shield_ms),
            auto_relay: config.auto_relay,
            relay_holdoff: Duration::from_millis(config.relay_holdoff_ms),
            channel,
            outgoing: None,
            relay_queue: VecDeque::new(),
            relayed: VecDeque::new(),
            received: None,
            fresh: false,
            last_sent_at: None,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn layout(&self) -> &PacketLayout {
        &self.layout
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn medium(&self) -> &M {
        &self.medium
    }

    pub fn set_receive_mode(&mut self, mode: ReceiveMode) {
        self.receive_mode = mode;
    }

    pub fn set_auto_relay(&mut self, enabled: bool) {
        self.auto_relay = enabled;
    }

    /// Stage a message with the default policy, replacing any staged message
    pub fn send(&mut self, address: u8, command: Command, data: u32) -> Result<(), ProtocolError> {
        self.send_with(Packet::new(address, command, data), self.default_policy)
    }

    /// Stage a message with an explicit repeat policy, replacing any staged message
    pub fn send_with(&mut self, packet: Packet, policy: SendPolicy) -> Result<(), ProtocolError> {
        let frame = self.layout.encode(&packet)?;
        debug!("Staging {} with {:?}", packet, policy.repeats);
        let outgoing = Outgoing {
            packet,
            frame,
            policy,
            sent: 0,
            next_at: self.clock.now(),
        };
        self.outgoing = (!outgoing.exhausted()).then_some(outgoing);
        Ok(())
    }

    /// Drop the staged message
    pub fn cancel(&mut self) {
        self.outgoing = None;
    }

    /// Packet still being repeated, if any
    pub fn sending(&self) -> Option<Packet> {
        self.outgoing.as_ref().map(|o| o.packet)
    }

    /// Advance transmission and reception by one cycle
    pub fn update(&mut self) {
        let now = self.clock.now();
        self.transmit_due(now);
        self.poll_medium(now);
    }

    fn roll_interval(&mut self, interval: Interval) -> Duration {
        match interval {
            Interval::Fixed(d) => d,
            Interval::Random { min, max } => {
                let (min, max) = (min.min(max), min.max(max));
                let span = (max - min).as_micros() as u64 + 1;
                min + Duration::from_micros(self.rng.next_u64() % span)
            }
        }
    }

    fn transmit(&mut self, frame: u64, now: Duration) -> bool {
        match self.medium.transmit(frame) {
            Ok(()) => {
                self.last_sent_at = Some(now);
                true
            }
            Err(e) => {
                warn!("Transmit failed: {}", e);
                false
            }
        }
    }

    fn transmit_due(&mut self, now: Duration) {
        if !self.slot_open_at(now) {
            return;
        }

        if let Some(out) = self.outgoing.as_ref() {
            if now >= out.next_at {
                let (frame, interval) = (out.frame, out.policy.interval);
                self.transmit(frame, now);
                let delay = self.roll_interval(interval);
                if let Some(out) = self.outgoing.as_mut() {
                    out.sent += 1;
                    out.next_at = now + delay;
                    if out.exhausted() {
                        trace!("Finished sending {}", out.packet);
                        self.outgoing = None;
                    }
                }
                return;
            }
        }

        if let Some(frame) = self.relay_queue.pop_front() {
            trace!("Relaying 0x{:X}", frame);
            self.transmit(frame, now);
        }
    }

    fn poll_medium(&mut self, now: Duration) {
        let frame = match self.medium.poll() {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(e) => {
                warn!("Receive failed: {}", e);
                return;
            }
        };

        if let Some(sent) = self.last_sent_at {
            if now.saturating_sub(sent) < self.shield {
                trace!("Shielded frame 0x{:X}", frame);
                return;
            }
        }

        let packet = match self.layout.decode(frame) {
            Ok(packet) if packet.command.is_reserved() => {
                trace!("Discarding reserved command in 0x{:X}", frame);
                return;
            }
            Ok(packet) => packet,
            Err(e) => {
                trace!("Discarding noise: {}", e);
                return;
            }
        };

        if packet.is_broadcast() && packet.command == Command::Sync {
            self.sync_channel(now);
        }

        if self.auto_relay && packet.address != self.address {
            self.queue_relay(frame, &packet, now);
        }

        if packet.address == self.address || packet.address == BROADCAST {
            trace!("Received {}", packet);
            self.received = Some(packet);
            self.fresh = true;
        }
    }

    fn queue_relay(&mut self, frame: u64, packet: &Packet, now: Duration) {
        if let Some((origin, _)) = self.layout.claim_of(packet) {
            if origin == self.address || packet.address == origin {
                return;
            }
        }

        while let Some(&(_, at)) = self.relayed.front() {
            if now.saturating_sub(at) < self.relay_holdoff {
                break;
            }
            self.relayed.pop_front();
        }
        if self.relayed.iter().any(|&(f, _)| f == frame) || self.relay_queue.contains(&frame) {
            return;
        }

        self.relayed.push_back((frame, now));
        self.relay_queue.push_back(frame);
    }

    /// Most recent accepted message
    pub fn receive(&mut self) -> Option<Packet> {
        match self.receive_mode {
            ReceiveMode::ConsumeOnce => {
                self.fresh = false;
                self.received.take()
            }
            ReceiveMode::Latched => self.received,
        }
    }

    /// Message that arrived since the last call, at most once per arrival
    ///
    /// A latched message stays readable through `receive`.
    pub fn take_arrival(&mut self) -> Option<Packet> {
        if !std::mem::take(&mut self.fresh) {
            return None;
        }
        match self.receive_mode {
            ReceiveMode::ConsumeOnce => self.received.take(),
            ReceiveMode::Latched => self.received,
        }
    }

    /// Spin `update` until a message arrives or the timeout expires
    pub fn wait_receive(
        &mut self,
        timeout: Option<Duration>,
        mut tick: impl FnMut(),
    ) -> Option<Packet> {
        let start = self.clock.now();
        loop {
            self.update();
            if let Some(packet) = self.receive() {
                return Some(packet);
            }
            if let Some(timeout) = timeout {
                if self.clock.now().saturating_sub(start) >= timeout {
                    return None;
                }
            }
            tick();
        }
    }

    fn slot_open_at(&self, now: Duration) -> bool {
        let Some(channel) = self.channel else {
            return true;
        };
        let elapsed = now.saturating_sub(channel.origin).as_micros();
        let slot = (elapsed / channel.slot.as_micros()) as u64;
        slot % channel.count as u64 == self.address as u64 % channel.count as u64
    }

    /// Whether this robot may transmit right now
    pub fn slot_open(&self) -> bool {
        self.slot_open_at(self.clock.now())
    }

    /// Block until the local time slot opens
    pub fn wait_channel(&mut self, mut tick: impl FnMut()) {
        while !self.slot_open() {
            tick();
        }
    }

    /// Re-anchor the shared slot origin
    pub fn sync_channel(&mut self, origin: Duration) {
        if let Some(channel) = self.channel.as_mut() {
            debug!("Channel origin synced to {:?}", origin);
            channel.origin = origin;
        }
    }
}
