//! Card Memory Protocol
//!
//! Implements the framed binary protocol used to read and write the memory
//! banks (SD card, EEPROM, CPU) of a remote card over a serial link.
//!
//! Frame format:
//! - 1 byte: total frame length (including itself and the CRC)
//! - 1 byte: command (`0xAA` read / `0xDD` write)
//! - 1 byte: bank selector
//! - 1 byte: intention tag
//! - 3 bytes: low address (little-endian)
//! - 3 bytes: high address (little-endian)
//! - N bytes: payload (write only)
//! - 4 bytes: CRC32 of every preceding byte

pub mod assembler;
pub mod checksum;
mod config;
pub mod crc;
mod error;
pub mod frame;
pub mod serial;
pub mod session;
pub mod timeout;

pub use assembler::{AssemblerState, ChunkOutcome, ReceiveAssembler};
pub use checksum::ChecksumValidator;
pub use config::ProtocolConfig;
pub use crc::Crc32;
pub use error::ProtocolError;
pub use frame::{
    build_read_frame, build_write_frame, expected_response_length, random_payload, Bank, Command,
    Frame, Intention, MAX_READ_LEN,
};
pub use serial::{list_ports, open_port, PortInfo, SerialTransport};
pub use session::{ChunkSink, DisplaySink, Response, TransactionSession, Transport};
pub use timeout::{SupervisorOutcome, TimeoutState, TimeoutSupervisor, UserDecision, Watch};

/// Default baud rate of the card's UART
pub const DEFAULT_BAUD_RATE: u32 = 38400;

/// First timeout threshold in milliseconds; doubles every time the user keeps waiting
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Interval at which the timeout supervisor checks for completion
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Largest frame the card accepts (the length field is a single byte)
pub const MAX_FRAME_LEN: usize = 250;

/// Size of the CRC32 trailer
pub const CHECKSUM_LEN: usize = 4;

/// Size of a response's leading status byte
pub const STATUS_LEN: usize = 1;
