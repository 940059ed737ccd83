// Fixed-width IR packet codec
//
// Frame format (MSB first): [address:A][command:C][data:D]
// Address 0 is broadcast. Coordination commands pack [origin:A][tower:D-A] into the
// data field; TowerHeight packs [tower:D/2][height:D-D/2].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Broadcast address, accepted by every robot
pub const BROADCAST: u8 = 0;

/// Error types for the packet codec
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("{field} value {value} does not fit in {bits} bits")]
    FieldOverflow {
        field: &'static str,
        value: u64,
        bits: u8,
    },

    #[error("Frame 0x{frame:X} is wider than {width} bits")]
    FrameTooWide { frame: u64, width: u32 },

    #[error("Reserved command code {0}")]
    ReservedCommand(u8),

    #[error("Invalid packet layout: {0}")]
    InvalidLayout(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Command set; codes at or above 15 are reserved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Done,
    LoadTravel,
    LoadTarget,
    LoadOccupy,
    UnloadTravel,
    UnloadTarget,
    UnloadOccupy,
    Sync,
    SlideTo,
    TurretTo,
    CarryTo,
    Grip,
    Home,
    Stop,
    TowerHeight,
    Reserved(u8),
}

impl Command {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Command::Done,
            1 => Command::LoadTravel,
            2 => Command::LoadTarget,
            3 => Command::LoadOccupy,
            4 => Command::UnloadTravel,
            5 => Command::UnloadTarget,
            6 => Command::UnloadOccupy,
            7 => Command::Sync,
            8 => Command::SlideTo,
            9 => Command::TurretTo,
            10 => Command::CarryTo,
            11 => Command::Grip,
            12 => Command::Home,
            13 => Command::Stop,
            14 => Command::TowerHeight,
            other => Command::Reserved(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Command::Done => 0,
            Command::LoadTravel => 1,
            Command::LoadTarget => 2,
            Command::LoadOccupy => 3,
            Command::UnloadTravel => 4,
            Command::UnloadTarget => 5,
            Command::UnloadOccupy => 6,
            Command::Sync => 7,
            Command::SlideTo => 8,
            Command::TurretTo => 9,
            Command::CarryTo => 10,
            Command::Grip => 11,
            Command::Home => 12,
            Command::Stop => 13,
            Command::TowerHeight => 14,
            Command::Reserved(code) => code,
        }
    }

    /// Commands whose data carries [origin][tower]
    pub fn is_coordination(self) -> bool {
        self.code() <= 6
    }

    pub fn is_reserved(self) -> bool {
        matches!(self, Command::Reserved(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    pub address: u8,
    pub command: Command,
    pub data: u32,
}

impl Packet {
    pub fn new(address: u8, command: Command, data: u32) -> Self {
        Self {
            address,
            command,
            data,
        }
    }

    pub fn broadcast(command: Command, data: u32) -> Self {
        Self::new(BROADCAST, command, data)
    }

    pub fn is_broadcast(&self) -> bool {
        self.address == BROADCAST
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {:?} {}]", self.address, self.command, self.data)
    }
}

/// Field widths shared by the whole fleet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacketLayout {
    pub address_bits: u8,
    pub command_bits: u8,
    pub data_bits: u8,
}

impl Default for PacketLayout {
    fn default() -> Self {
        Self {
            address_bits: 4,
            command_bits: 4,
            data_bits: 8,
        }
    }
}

fn mask(bits: u8) -> u64 {
    if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 }
}

fn check(field: &'static str, value: u64, bits: u8) -> Result<()> {
    if value > mask(bits) {
        return Err(ProtocolError::FieldOverflow { field, value, bits });
    }
    Ok(())
}

impl PacketLayout {
    pub fn validate(&self) -> Result<()> {
        if self.address_bits == 0 || self.address_bits > 8 {
            return Err(ProtocolError::InvalidLayout(format!(
                "address needs 1..=8 bits, got {}",
                self.address_bits
            )));
        }
        if self.command_bits < 4 || self.command_bits > 8 {
            return Err(ProtocolError::InvalidLayout(format!(
                "command needs 4..=8 bits, got {}",
                self.command_bits
            )));
        }
        if self.data_bits <= self.address_bits || self.data_bits > 32 {
            return Err(ProtocolError::InvalidLayout(format!(
                "data needs more bits than the address and at most 32, got {}",
                self.data_bits
            )));
        }
        Ok(())
    }

    /// Total frame width in bits
    pub fn width(&self) -> u32 {
        self.address_bits as u32 + self.command_bits as u32 + self.data_bits as u32
    }

    pub fn max_address(&self) -> u8 {
        mask(self.address_bits) as u8
    }

    pub fn encode(&self, packet: &Packet) -> Result<u64> {
        let command = packet.command.code();
        check("address", packet.address as u64, self.address_bits)?;
        check("command", command as u64, self.command_bits)?;
        check("data", packet.data as u64, self.data_bits)?;

        Ok(((packet.address as u64) << (self.command_bits + self.data_bits))
            | ((command as u64) << self.data_bits)
            | packet.data as u64)
    }

    pub fn decode(&self, frame: u64) -> Result<Packet> {
        let width = self.width();
        if width < 64 && frame >> width != 0 {
            return Err(ProtocolError::FrameTooWide { frame, width });
        }

        let data = (frame & mask(self.data_bits)) as u32;
        let command = ((frame >> self.data_bits) & mask(self.command_bits)) as u8;
        let address = ((frame >> (self.data_bits + self.command_bits)) & mask(self.address_bits)) as u8;
        Ok(Packet {
            address,
            command: Command::from_code(command),
            data,
        })
    }

    fn tower_bits(&self) -> u8 {
        self.data_bits - self.address_bits
    }

    /// Coordination data: [origin:A][tower:D-A]
    pub fn pack_claim(&self, origin: u8, tower: usize) -> Result<u32> {
        check("origin", origin as u64, self.address_bits)?;
        check("tower", tower as u64, self.tower_bits())?;
        Ok(((origin as u32) << self.tower_bits()) | tower as u32)
    }

    pub fn unpack_claim(&self, data: u32) -> (u8, usize) {
        let origin = (data as u64 >> self.tower_bits()) & mask(self.address_bits);
        let tower = data as u64 & mask(self.tower_bits());
        (origin as u8, tower as usize)
    }

    /// TowerHeight data: [tower:D/2][height:D-D/2]
    pub fn pack_height(&self, tower: usize, height: u32) -> Result<u32> {
        let tower_bits = self.data_bits / 2;
        let height_bits = self.data_bits - tower_bits;
        check("tower", tower as u64, tower_bits)?;
        check("height", height as u64, height_bits)?;
        Ok(((tower as u32) << height_bits) | height)
    }

    pub fn unpack_height(&self, data: u32) -> (usize, u32) {
        let tower_bits = self.data_bits / 2;
        let height_bits = self.data_bits - tower_bits;
        let tower = (data as u64 >> height_bits) & mask(tower_bits);
        let height = data as u64 & mask(height_bits);
        (tower as usize, height as u32)
    }

    /// Tower and origin of a coordination packet, `None` for other commands
    pub fn claim_of(&self, packet: &Packet) -> Option<(u8, usize)> {
        packet
            .command
            .is_coordination()
            .then(|| self.unpack_claim(packet.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let layout = PacketLayout::default();
        let packet = Packet::new(0x3, Command::SlideTo, 0xA5);
        assert_eq!(layout.encode(&packet).unwrap(), 0x38A5);
        assert_eq!(layout.decode(0x38A5).unwrap(), packet);
    }

    #[test]
    fn test_decode_encode_idempotent_over_all_frames() {
        let layout = PacketLayout::default();
        for frame in 0..(1u64 << layout.width()) {
            let packet = layout.decode(frame).unwrap();
            assert_eq!(layout.encode(&packet).unwrap(), frame);
        }
    }

    #[test]
    fn test_wide_frame_rejected() {
        let layout = PacketLayout::default();
        assert_eq!(
            layout.decode(0x1_0000),
            Err(ProtocolError::FrameTooWide {
                frame: 0x1_0000,
                width: 16
            })
        );
    }

    #[test]
    fn test_reserved_command() {
        let layout = PacketLayout::default();
        let packet = layout.decode(0x0F00).unwrap();
        assert!(packet.command.is_reserved());
        assert_eq!(packet.command.code(), 15);
    }

    #[test]
    fn test_field_overflow() {
        let layout = PacketLayout::default();
        let err = layout.encode(&Packet::new(16, Command::Done, 0)).unwrap_err();
        assert!(matches!(err, ProtocolError::FieldOverflow { field: "address", .. }));
        let err = layout.encode(&Packet::new(1, Command::Done, 256)).unwrap_err();
        assert!(matches!(err, ProtocolError::FieldOverflow { field: "data", .. }));
    }

    #[test]
    fn test_claim_and_height_packing() {
        let layout = PacketLayout::default();
        let data = layout.pack_claim(5, 3).unwrap();
        assert_eq!(data, 0x53);
        assert_eq!(layout.unpack_claim(data), (5, 3));
        assert!(layout.pack_claim(1, 16).is_err());

        let data = layout.pack_height(2, 7).unwrap();
        assert_eq!(data, 0x27);
        assert_eq!(layout.unpack_height(data), (2, 7));

        let packet = Packet::broadcast(Command::UnloadTarget, 0x21);
        assert_eq!(layout.claim_of(&packet), Some((2, 1)));
        assert_eq!(layout.claim_of(&Packet::broadcast(Command::Grip, 1)), None);
    }

    #[test]
    fn test_layout_validation() {
        assert!(PacketLayout::default().validate().is_ok());
        let narrow = PacketLayout {
            address_bits: 4,
            command_bits: 3,
            data_bits: 8,
        };
        assert!(narrow.validate().is_err());
        let no_tower = PacketLayout {
            address_bits: 4,
            command_bits: 4,
            data_bits: 4,
        };
        assert!(no_tower.validate().is_err());
    }
}
