// Broadcast IR link
//
// Provides:
// - Fixed-width packet codec
// - Medium abstraction with in-memory, zenoh and serial modem backends
// - Transceiver with repeat/backoff, address filtering, relaying and time slots

pub mod medium;
pub mod packet;
pub mod serial;
mod transceiver;
pub mod zenoh_bus;

pub use medium::{BusPort, Medium, SharedBus};
pub use packet::{BROADCAST, Command, Packet, PacketLayout, ProtocolError};
pub use transceiver::{Interval, ReceiveMode, Repeat, SendPolicy, Transceiver};

/// Error types for IR media
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zenoh error: {0}")]
    Zenoh(String),

    #[error("Frame encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

pub type Result<T> = std::result::Result<T, LinkError>;
