// Coordination state machine
//
// Dormant -> Pending on begin_yield, Pending <-> Blocked while an outranking peer
// contests the next tower, back to Dormant on end_yield.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::intent::{Intent, Role, Stage, yields_to};
use crate::config::CoordConfig;
use crate::link::{Command, Medium, Packet, PacketLayout, SendPolicy, Transceiver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordState {
    #[default]
    Dormant,
    Pending,
    Blocked,
}

#[derive(Debug, Clone, Copy)]
struct PeerClaim {
    intent: Intent,
    seen_at: Duration,
}

pub struct Coordinator {
    address: u8,
    layout: PacketLayout,
    config: CoordConfig,
    state: CoordState,
    role: Role,
    target: usize,
    next: Option<usize>,
    occupying: bool,
    /// Turret angle at the last intent broadcast
    reference_angle: f64,
    blocked_by: Option<u8>,
    blocked_since: Duration,
    claims: HashMap<u8, PeerClaim>,
}

impl Coordinator {
    pub fn new(address: u8, layout: PacketLayout, config: CoordConfig) -> Self {
        Self {
            address,
            layout,
            config,
            state: CoordState::Dormant,
            role: Role::Load,
            target: 0,
            next: None,
            occupying: false,
            reference_angle: 0.0,
            blocked_by: None,
            blocked_since: Duration::ZERO,
            claims: HashMap::new(),
        }
    }

    pub fn state(&self) -> CoordState {
        self.state
    }

    pub fn is_blocked(&self) -> bool {
        self.state == CoordState::Blocked
    }

    /// Tower the robot is held back from, while blocked
    pub fn blocked_tower(&self) -> Option<usize> {
        if self.is_blocked() { self.next } else { None }
    }

    pub fn is_blocked_on(&self, tower: usize) -> bool {
        self.blocked_tower() == Some(tower)
    }

    pub fn blocked_by(&self) -> Option<u8> {
        self.blocked_by
    }

    /// How long the robot has been blocked, zero when not blocked
    pub fn blocked_for(&self, now: Duration) -> Duration {
        if self.is_blocked() {
            now.saturating_sub(self.blocked_since)
        } else {
            Duration::ZERO
        }
    }

    /// Any live peer claim on `tower`
    pub fn is_contested(&self, tower: usize) -> bool {
        self.claims.values().any(|c| c.intent.tower == tower)
    }

    pub fn peer_claim(&self, address: u8) -> Option<Intent> {
        self.claims.get(&address).map(|c| c.intent)
    }

    /// Intent the robot currently advertises
    pub fn intent(&self) -> Option<Intent> {
        if self.state == CoordState::Dormant {
            return None;
        }
        let tower = self.next?;
        let stage = if self.occupying {
            Stage::Occupy
        } else if tower == self.target {
            Stage::Target
        } else {
            Stage::Travel
        };
        Some(Intent::new(self.role, stage, tower))
    }

    fn intent_policy(&self) -> SendPolicy {
        let [min, max] = self.config.intent_interval_ms;
        SendPolicy::forever(Duration::from_millis(min), Duration::from_millis(max))
    }

    fn announce<M: Medium>(&mut self, link: &mut Transceiver<M>) {
        let Some(intent) = self.intent() else {
            return;
        };
        let policy = self.intent_policy();
        let sent = self
            .layout
            .pack_claim(self.address, intent.tower)
            .and_then(|data| link.send_with(Packet::broadcast(intent.command(), data), policy));
        match sent {
            Ok(()) => debug!("Announcing {:?}", intent),
            Err(e) => warn!("Failed to announce {:?}: {}", intent, e),
        }
    }

    /// Start a tower interaction
    pub fn begin_yield(&mut self, role: Role, target: usize, angle: f64) {
        info!("Begin {:?} on tower {}", role, target);
        self.state = CoordState::Pending;
        self.role = role;
        self.target = target;
        self.next = None;
        self.occupying = false;
        self.reference_angle = angle;
        self.blocked_by = None;
    }

    /// Report progress; broadcasts when the next tower changes or the turret has
    /// travelled `send_angle` since the last broadcast
    pub fn observe<M: Medium>(&mut self, angle: f64, next: usize, link: &mut Transceiver<M>) {
        if self.state == CoordState::Dormant || self.occupying {
            return;
        }
        let changed = self.next != Some(next);
        let travelled = (angle - self.reference_angle).abs() >= self.config.send_angle;
        self.next = Some(next);
        if changed || travelled {
            self.reference_angle = angle;
            self.announce(link);
        }
        if changed {
            self.evaluate(link.now());
        }
    }

    /// Arrived at the final tower and working on it
    pub fn occupy<M: Medium>(&mut self, link: &mut Transceiver<M>) {
        if self.state == CoordState::Dormant {
            return;
        }
        self.next = Some(self.target);
        self.occupying = true;
        self.state = CoordState::Pending;
        self.blocked_by = None;
        self.announce(link);
    }

    /// Finish the tower interaction and release the claim
    pub fn end_yield<M: Medium>(&mut self, link: &mut Transceiver<M>) {
        if self.state == CoordState::Dormant {
            return;
        }
        info!("End {:?} on tower {}", self.role, self.target);
        self.state = CoordState::Dormant;
        self.next = None;
        self.occupying = false;
        self.blocked_by = None;

        let policy = SendPolicy::finite(
            self.config.done_repeats,
            Duration::from_millis(self.config.done_interval_ms),
        );
        let sent = self
            .layout
            .pack_claim(self.address, self.target)
            .and_then(|data| link.send_with(Packet::broadcast(Command::Done, data), policy));
        if let Err(e) = sent {
            warn!("Failed to send Done: {}", e);
        }
    }

    /// Apply a received coordination packet; other packets are ignored
    pub fn handle(&mut self, packet: &Packet, now: Duration) {
        let Some((origin, tower)) = self.layout.claim_of(packet) else {
            return;
        };
        if origin == self.address {
            return;
        }

        if packet.command == Command::Done {
            // A late Done for an earlier tower leaves the current claim alone
            if self.claims.get(&origin).is_some_and(|c| c.intent.tower == tower) {
                self.claims.remove(&origin);
                debug!("Robot {} released tower {}", origin, tower);
            }
        } else if let Some(intent) = Intent::from_command(packet.command, tower) {
            self.claims.insert(origin, PeerClaim { intent, seen_at: now });
        }
        self.evaluate(now);
    }

    /// Expire stale claims and re-evaluate; call every cycle
    pub fn update(&mut self, now: Duration) {
        let ttl = self.config.claim_ttl();
        self.claims.retain(|origin, claim| {
            let live = now.saturating_sub(claim.seen_at) < ttl;
            if !live {
                debug!("Claim from robot {} expired", origin);
            }
            live
        });
        self.evaluate(now);
    }

    fn evaluate(&mut self, now: Duration) {
        if self.state == CoordState::Dormant || self.occupying {
            return;
        }
        let Some(local) = self.intent() else {
            return;
        };

        let blocker = self
            .claims
            .iter()
            .filter(|&(&origin, claim)| yields_to(&local, self.address, &claim.intent, origin))
            .map(|(&origin, _)| origin)
            .min();

        match blocker {
            Some(origin) => {
                if self.state != CoordState::Blocked {
                    info!("Blocked on tower {} by robot {}", local.tower, origin);
                    self.blocked_since = now;
                }
                self.state = CoordState::Blocked;
                self.blocked_by = Some(origin);
            }
            None => {
                if self.state == CoordState::Blocked {
                    info!("Tower {} clear", local.tower);
                }
                self.state = CoordState::Pending;
                self.blocked_by = None;
            }
        }
    }
}
