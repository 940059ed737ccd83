// USB IR modem over a serial port
//
// Frame format: [0xA5, Payload..., Checksum]
// Payload is the IR frame big-endian in ceil(width / 8) bytes; the checksum is the
// inverted low byte of the payload sum.

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, trace};

use super::Result;
use super::medium::Medium;

/// Default serial configuration for the IR modem
pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT_MS: u64 = 10;

const HEADER: u8 = 0xA5;

fn checksum(payload: &[u8]) -> u8 {
    let sum: u16 = payload.iter().map(|&b| b as u16).sum();
    (!sum & 0xFF) as u8
}

/// Bytes needed for a frame of `width` bits
pub fn payload_len(width: u32) -> usize {
    width.div_ceil(8) as usize
}

/// Build the byte frame for one IR frame
pub fn build_frame(frame: u64, width: u32) -> Vec<u8> {
    let len = payload_len(width);
    let mut bytes = Vec::with_capacity(len + 2);
    bytes.push(HEADER);
    bytes.extend_from_slice(&frame.to_be_bytes()[8 - len..]);
    bytes.push(checksum(&bytes[1..]));
    bytes
}

/// Incremental parser for the modem byte stream
#[derive(Debug)]
pub struct FrameParser {
    len: usize,
    buf: Vec<u8>,
}

impl FrameParser {
    pub fn new(width: u32) -> Self {
        Self {
            len: payload_len(width),
            buf: Vec::new(),
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete frame, skipping garbage and bad checksums
    pub fn next_frame(&mut self) -> Option<u64> {
        loop {
            let start = self.buf.iter().position(|&b| b == HEADER)?;
            if start > 0 {
                trace!("Modem resync, dropped {} bytes", start);
                self.buf.drain(..start);
            }
            if self.buf.len() < self.len + 2 {
                return None;
            }

            let payload = &self.buf[1..1 + self.len];
            if checksum(payload) == self.buf[1 + self.len] {
                let frame = payload.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
                self.buf.drain(..self.len + 2);
                return Some(frame);
            }

            debug!("Modem checksum mismatch");
            self.buf.drain(..1);
        }
    }
}

/// IR modem attached over USB serial
pub struct SerialMedium {
    port: Box<dyn SerialPort>,
    width: u32,
    parser: FrameParser,
}

impl SerialMedium {
    /// Open a new connection to the modem
    pub fn open(port_name: &str, width: u32) -> Result<Self> {
        Self::open_with_baudrate(port_name, width, DEFAULT_BAUDRATE)
    }

    pub fn open_with_baudrate(port_name: &str, width: u32, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self {
            port,
            width,
            parser: FrameParser::new(width),
        })
    }
}

impl Medium for SerialMedium {
    fn transmit(&mut self, frame: u64) -> Result<()> {
        let bytes = build_frame(frame, self.width);
        self.port.write_all(&bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn poll(&mut self) -> Result<Option<u64>> {
        let available = self.port.bytes_to_read()? as usize;
        if available > 0 {
            let mut bytes = vec![0u8; available];
            let n = self.port.read(&mut bytes)?;
            self.parser.push(&bytes[..n]);
        }
        Ok(self.parser.next_frame())
    }
}
