//! Frame codec
//!
//! Builds the READ and WRITE frames sent to the card and decodes them again
//! (the card simulator and diagnostics need the reverse direction).

use byteorder::{ByteOrder, LittleEndian};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{Crc32, ProtocolError, CHECKSUM_LEN, MAX_FRAME_LEN, STATUS_LEN};

/// Bytes between the length byte and the payload
const HEADER_LEN: usize = 9;

/// Offset of the first payload byte
const DATA_START: usize = 1 + HEADER_LEN;

const LOW_ADDR_START: usize = 4;
const HI_ADDR_START: usize = LOW_ADDR_START + 3;

/// Addresses travel as 24-bit values
const ADDR_MASK: u32 = 0x00FF_FFFF;

/// Longest range a 24-bit address pair can describe
pub const MAX_READ_LEN: usize = 0x0100_0000;

/// Frame command byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Read a range from the card
    Read,
    /// Write a range to the card
    Write,
}

impl Command {
    /// Wire value
    pub fn code(&self) -> u8 {
        match self {
            Command::Read => 0xAA,
            Command::Write => 0xDD,
        }
    }

    /// Decode a wire value
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0xAA => Some(Command::Read),
            0xDD => Some(Command::Write),
            _ => None,
        }
    }
}

/// Memory bank on the card
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Bank {
    /// SD card storage
    SdCard,
    /// On-board EEPROM
    Eeprom,
    /// CPU memory
    Cpu,
}

impl Bank {
    /// All banks, in selector-index order
    pub const ALL: [Bank; 3] = [Bank::SdCard, Bank::Eeprom, Bank::Cpu];

    /// Map a UI selector index (0 = SD card, 1 = EEPROM, 2 = CPU)
    pub fn from_index(index: usize) -> Result<Self, ProtocolError> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or(ProtocolError::UnknownBank(index))
    }

    /// Wire value
    pub fn code(&self) -> u8 {
        match self {
            Bank::SdCard => 0x1A,
            Bank::Eeprom => 0x1B,
            Bank::Cpu => 0x1C,
        }
    }

    /// Decode a wire value
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|bank| bank.code() == code)
    }
}

impl TryFrom<usize> for Bank {
    type Error = ProtocolError;

    fn try_from(index: usize) -> Result<Self, Self::Error> {
        Bank::from_index(index)
    }
}

/// Opaque classification tag carried in every frame.
///
/// The codec never interprets it; any byte is forwarded as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Intention(pub u8);

impl Intention {
    /// Log data
    pub const LOG: Intention = Intention(0x2A);
    /// Command for the card
    pub const COMMAND: Intention = Intention(0x2B);
    /// Card configuration
    pub const CONFIG: Intention = Intention(0x2C);
}

impl From<Intention> for u8 {
    fn from(intention: Intention) -> u8 {
        intention.0
    }
}

/// One complete outbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
    command: Command,
    bank: Bank,
    intention: Intention,
    start_addr: u32,
    span: usize,
}

impl Frame {
    /// Raw frame bytes, trailer included
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the frame into its raw bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Total encoded size
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Frames always contain at least a header and trailer
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Read or write
    pub fn command(&self) -> Command {
        self.command
    }

    /// Target memory bank
    pub fn bank(&self) -> Bank {
        self.bank
    }

    /// Classification tag
    pub fn intention(&self) -> Intention {
        self.intention
    }

    /// Start address (24-bit)
    pub fn start_addr(&self) -> u32 {
        self.start_addr
    }

    /// Number of bytes addressed: the read count, or the write payload length
    pub fn span(&self) -> usize {
        self.span
    }

    /// Write payload (empty for reads)
    pub fn payload(&self) -> &[u8] {
        &self.bytes[DATA_START..self.bytes.len() - CHECKSUM_LEN]
    }

    /// CRC trailer
    pub fn crc(&self) -> &[u8] {
        &self.bytes[self.bytes.len() - CHECKSUM_LEN..]
    }

    /// Bytes the card sends back for this frame
    pub fn expected_response_len(&self) -> usize {
        expected_response_length(self.command == Command::Write, self.span)
    }

    /// Decode and CRC-check a frame received from the wire
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let min_len = DATA_START + CHECKSUM_LEN;
        if bytes.len() < min_len {
            return Err(ProtocolError::MalformedFrame(format!(
                "{} bytes is shorter than the {} byte minimum",
                bytes.len(),
                min_len
            )));
        }
        if bytes[0] as usize != bytes.len() {
            return Err(ProtocolError::MalformedFrame(format!(
                "length byte {} does not match frame size {}",
                bytes[0],
                bytes.len()
            )));
        }

        let command = Command::from_code(bytes[1]).ok_or_else(|| {
            ProtocolError::MalformedFrame(format!("unknown command {:#04x}", bytes[1]))
        })?;
        let bank = Bank::from_code(bytes[2]).ok_or_else(|| {
            ProtocolError::MalformedFrame(format!("unknown bank {:#04x}", bytes[2]))
        })?;
        let intention = Intention(bytes[3]);

        let crc_start = bytes.len() - CHECKSUM_LEN;
        let expected = Crc32::compute_hash(&bytes[..crc_start]);
        if expected[..] != bytes[crc_start..] {
            return Err(ProtocolError::ChecksumMismatch {
                expected: expected.to_vec(),
                received: bytes[crc_start..].to_vec(),
            });
        }

        let start_addr = LittleEndian::read_u24(&bytes[LOW_ADDR_START..HI_ADDR_START]);
        let end_addr = LittleEndian::read_u24(&bytes[HI_ADDR_START..DATA_START]);
        let span = (end_addr.wrapping_sub(start_addr) & ADDR_MASK) as usize + 1;

        let payload_len = crc_start - DATA_START;
        match command {
            Command::Read if payload_len != 0 => {
                return Err(ProtocolError::MalformedFrame(
                    "read frame carries a payload".to_string(),
                ))
            }
            Command::Write if payload_len != span => {
                return Err(ProtocolError::MalformedFrame(format!(
                    "write payload of {} bytes does not match address span {}",
                    payload_len, span
                )))
            }
            _ => {}
        }

        Ok(Self {
            bytes: bytes.to_vec(),
            command,
            bank,
            intention,
            start_addr,
            span,
        })
    }
}

/// Build a READ frame for `length` bytes starting at `start_addr`
pub fn build_read_frame(
    start_addr: u32,
    length: usize,
    bank: Bank,
    intention: Intention,
) -> Result<Frame, ProtocolError> {
    if length < 1 {
        return Err(ProtocolError::InvalidArgument(format!(
            "read length {} must be at least 1",
            length
        )));
    }
    if length > MAX_READ_LEN {
        return Err(ProtocolError::InvalidArgument(format!(
            "read length {} exceeds the 24-bit address range of {} bytes",
            length, MAX_READ_LEN
        )));
    }
    encode(Command::Read, start_addr, length, bank, intention, &[])
}

/// Build a WRITE frame carrying `data` to `start_addr`
pub fn build_write_frame(
    start_addr: u32,
    data: &[u8],
    bank: Bank,
    intention: Intention,
) -> Result<Frame, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::InvalidArgument(
            "write data length 0 must be at least 1".to_string(),
        ));
    }
    encode(Command::Write, start_addr, data.len(), bank, intention, data)
}

/// Response size for a request: status byte, read data (none for a write ack), CRC
pub fn expected_response_length(is_write: bool, length: usize) -> usize {
    let data_len = if is_write { 0 } else { length };
    STATUS_LEN
        .saturating_add(data_len)
        .saturating_add(CHECKSUM_LEN)
}

/// Random payload bytes in `1..=254`, for exercising writes
pub fn random_payload(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen_range(1..=254)).collect()
}

fn frame_len(payload_len: usize) -> Result<usize, ProtocolError> {
    let size = 1 + HEADER_LEN + payload_len + CHECKSUM_LEN;
    if size > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            size,
            max: MAX_FRAME_LEN,
        });
    }
    Ok(size)
}

fn encode(
    command: Command,
    start_addr: u32,
    span: usize,
    bank: Bank,
    intention: Intention,
    payload: &[u8],
) -> Result<Frame, ProtocolError> {
    let size = frame_len(payload.len())?;

    let mut bytes = vec![0u8; size];
    bytes[0] = size as u8;
    bytes[1] = command.code();
    bytes[2] = bank.code();
    bytes[3] = intention.0;

    let start = start_addr & ADDR_MASK;
    let end = start_addr.wrapping_add((span as u32).wrapping_sub(1)) & ADDR_MASK;
    LittleEndian::write_u24(&mut bytes[LOW_ADDR_START..HI_ADDR_START], start);
    LittleEndian::write_u24(&mut bytes[HI_ADDR_START..DATA_START], end);

    let crc_start = DATA_START + payload.len();
    bytes[DATA_START..crc_start].copy_from_slice(payload);

    let crc = Crc32::compute_hash(&bytes[..crc_start]);
    bytes[crc_start..].copy_from_slice(&crc);

    Ok(Frame {
        bytes,
        command,
        bank,
        intention,
        start_addr: start,
        span,
    })
}
