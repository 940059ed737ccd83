// Claims on towers and the rules for resolving them

use std::cmp::{Ordering, Reverse};

use serde::{Deserialize, Serialize};

use crate::link::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Load,
    Unload,
}

/// How a robot relates to the tower it claims
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Passing through on the way elsewhere
    Travel,
    /// Heading for this tower as its final destination
    Target,
    /// Arrived and working on the tower
    Occupy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Intent {
    pub role: Role,
    pub stage: Stage,
    pub tower: usize,
}

impl Intent {
    pub fn new(role: Role, stage: Stage, tower: usize) -> Self {
        Self { role, stage, tower }
    }

    pub fn command(&self) -> Command {
        match (self.role, self.stage) {
            (Role::Load, Stage::Travel) => Command::LoadTravel,
            (Role::Load, Stage::Target) => Command::LoadTarget,
            (Role::Load, Stage::Occupy) => Command::LoadOccupy,
            (Role::Unload, Stage::Travel) => Command::UnloadTravel,
            (Role::Unload, Stage::Target) => Command::UnloadTarget,
            (Role::Unload, Stage::Occupy) => Command::UnloadOccupy,
        }
    }

    /// Intent carried by a coordination command, `None` for Done and everything else
    pub fn from_command(command: Command, tower: usize) -> Option<Self> {
        let (role, stage) = match command {
            Command::LoadTravel => (Role::Load, Stage::Travel),
            Command::LoadTarget => (Role::Load, Stage::Target),
            Command::LoadOccupy => (Role::Load, Stage::Occupy),
            Command::UnloadTravel => (Role::Unload, Stage::Travel),
            Command::UnloadTarget => (Role::Unload, Stage::Target),
            Command::UnloadOccupy => (Role::Unload, Stage::Occupy),
            _ => return None,
        };
        Some(Self { role, stage, tower })
    }

    /// The claimed tower is the robot's final tower
    pub fn is_final(&self) -> bool {
        self.stage != Stage::Travel
    }

    pub fn is_occupying(&self) -> bool {
        self.stage == Stage::Occupy
    }

    pub fn is_loading(&self) -> bool {
        self.role == Role::Load
    }
}

/// Position of a robot in the fleet-wide order; greater wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority {
    /// Unloading outranks loading
    unloading: bool,
    /// Lower address wins within a role
    address: Reverse<u8>,
}

impl Priority {
    pub fn new(role: Role, address: u8) -> Self {
        Self {
            unloading: role == Role::Unload,
            address: Reverse(address),
        }
    }
}

/// Whether two intents on the same tower cannot both proceed
pub fn conflicts(local: &Intent, peer: &Intent) -> bool {
    if local.tower != peer.tower {
        return false;
    }
    if peer.is_occupying() {
        return !(local.is_loading() && peer.is_loading() && !local.is_final());
    }
    if local.is_final() && peer.is_final() {
        return true;
    }
    !(local.is_loading() && peer.is_loading())
}

/// Whether the local robot must give way to a peer claim
pub fn yields_to(local: &Intent, local_address: u8, peer: &Intent, peer_address: u8) -> bool {
    if !conflicts(local, peer) {
        return false;
    }
    match (local.is_occupying(), peer.is_occupying()) {
        (false, true) => true,
        (true, false) => false,
        _ => {
            let ours = Priority::new(local.role, local_address);
            let theirs = Priority::new(peer.role, peer_address);
            theirs.cmp(&ours) == Ordering::Greater
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROLES: [Role; 2] = [Role::Load, Role::Unload];
    const STAGES: [Stage; 3] = [Stage::Travel, Stage::Target, Stage::Occupy];

    #[test]
    fn test_command_mapping() {
        for role in ROLES {
            for stage in STAGES {
                let intent = Intent::new(role, stage, 3);
                assert_eq!(Intent::from_command(intent.command(), 3), Some(intent));
            }
        }
        assert_eq!(Intent::from_command(Command::Done, 1), None);
        assert_eq!(Intent::from_command(Command::Grip, 1), None);
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::new(Role::Unload, 9) > Priority::new(Role::Load, 1));
        assert!(Priority::new(Role::Load, 1) > Priority::new(Role::Load, 2));
        assert!(Priority::new(Role::Unload, 2) > Priority::new(Role::Unload, 3));
    }

    #[test]
    fn test_conflict_rules() {
        let load_travel = Intent::new(Role::Load, Stage::Travel, 1);
        let load_target = Intent::new(Role::Load, Stage::Target, 1);
        let load_occupy = Intent::new(Role::Load, Stage::Occupy, 1);
        let unload_travel = Intent::new(Role::Unload, Stage::Travel, 1);
        let unload_target = Intent::new(Role::Unload, Stage::Target, 1);

        // loaders may pass an occupied tower
        assert!(!conflicts(&load_travel, &load_occupy));
        assert!(conflicts(&load_target, &load_occupy));
        assert!(conflicts(&unload_travel, &load_occupy));
        assert!(conflicts(&load_target, &load_target));
        assert!(!conflicts(&load_travel, &load_target));
        assert!(conflicts(&unload_travel, &load_travel));
        assert!(conflicts(&unload_travel, &unload_target));
        assert!(!conflicts(&load_travel, &Intent::new(Role::Unload, Stage::Target, 2)));
    }

    #[test]
    fn test_blocked_crossing_decision() {
        // robot 2 unloading via tower 1, robot 1 unloading onto tower 1
        let crossing = Intent::new(Role::Unload, Stage::Travel, 1);
        let final_claim = Intent::new(Role::Unload, Stage::Target, 1);
        assert!(yields_to(&crossing, 2, &final_claim, 1));
        assert!(!yields_to(&final_claim, 1, &crossing, 2));
    }

    #[test]
    fn test_occupancy_always_wins() {
        let occupier = Intent::new(Role::Load, Stage::Occupy, 0);
        let unloader = Intent::new(Role::Unload, Stage::Target, 0);
        assert!(yields_to(&unloader, 1, &occupier, 5));
        assert!(!yields_to(&occupier, 5, &unloader, 1));
    }

    #[test]
    fn test_final_claims_mutually_exclusive() {
        for role_a in ROLES {
            for role_b in ROLES {
                for stage_a in [Stage::Target, Stage::Occupy] {
                    for stage_b in [Stage::Target, Stage::Occupy] {
                        for (addr_a, addr_b) in [(1, 2), (2, 1), (3, 7)] {
                            let a = Intent::new(role_a, stage_a, 2);
                            let b = Intent::new(role_b, stage_b, 2);
                            let a_yields = yields_to(&a, addr_a, &b, addr_b);
                            let b_yields = yields_to(&b, addr_b, &a, addr_a);
                            assert!(
                                a_yields != b_yields,
                                "{:?}@{} vs {:?}@{}",
                                a,
                                addr_a,
                                b,
                                addr_b
                            );
                        }
                    }
                }
            }
        }
    }
}
