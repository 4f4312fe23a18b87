//! Protocol errors

use thiserror::Error;

/// Errors that can occur while framing, sending or receiving
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A request argument was out of range (empty read/write, missing buffer, short response)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The bank selector index does not name a known memory bank
    #[error("Unknown memory bank selection {0}")]
    UnknownBank(usize),

    #[error("Frame too large: {size} bytes exceeds maximum of {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Receive overrun: received {received} bytes, expected {expected}")]
    ReceiveOverrun { received: usize, expected: usize },

    #[error("Checksum mismatch: received {received:02X?}, expected {expected:02X?}")]
    ChecksumMismatch { expected: Vec<u8>, received: Vec<u8> },

    #[error("Transport not ready")]
    TransportNotReady,

    #[error("Transmission aborted after {elapsed_ms} ms ({attempts} timeout(s))")]
    TimeoutAborted { elapsed_ms: u64, attempts: u32 },

    /// A transaction is still waiting for its response
    #[error("Transaction already in progress")]
    Busy,

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
