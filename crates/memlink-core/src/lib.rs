//! # memlink Core Library
//!
//! Host side of the memlink card protocol.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - READ/WRITE frame encoding with CRC32 trailers
//! - Reassembly and checksum validation of fragmented responses
//! - Escalating timeout supervision with a pluggable decision callback
//! - A serial port transport and a simulated card
//!
//! ## Memory banks
//!
//! - SD card
//! - EEPROM
//! - CPU memory
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use memlink_core::protocol::{Bank, Intention, ProtocolConfig, SerialTransport, TransactionSession};
//!
//! let config = ProtocolConfig::default();
//! let port = Arc::new(SerialTransport::open("/dev/ttyUSB0", &config)?);
//! let session = TransactionSession::new(config, port.clone(), display, decision);
//! port.start_reader(session.chunk_sink())?;
//!
//! // Read 16 bytes of EEPROM; the response arrives via `display`
//! session.read(0x000100, 16, Bank::Eeprom, Intention::LOG)?;
//! session.wait();
//! ```

pub mod demo;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::demo::{CardSimulator, Fault};
    pub use crate::protocol::{
        Bank, ChunkSink, DisplaySink, Frame, Intention, ProtocolConfig, ProtocolError, Response,
        SerialTransport, SupervisorOutcome, TransactionSession, Transport, UserDecision,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
