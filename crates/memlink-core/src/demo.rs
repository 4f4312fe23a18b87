//! Demo Mode - Simulated memory card for testing
//!
//! Emulates the remote card without hardware: frames sent to it are decoded
//! and CRC-checked, reads and writes go to sparse in-memory banks, and the
//! response comes back in randomly sized chunks from a background thread, the
//! way a serial adapter delivers it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::protocol::{Bank, ChunkSink, Command, Crc32, Frame, ProtocolError, Transport};

/// Status byte for an accepted request
pub const STATUS_OK: u8 = 0x00;

/// Status byte for a frame the card could not decode
pub const STATUS_BAD_FRAME: u8 = 0xE1;

/// Value of memory that was never written
pub const ERASED: u8 = 0xFF;

/// Misbehaviour to inject into the next responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Answer correctly
    None,
    /// Flip the last trailer byte
    CorruptChecksum,
    /// Append this many stray bytes after the response
    ExtraBytes(usize),
    /// Never answer
    Silent,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated card implementing [`Transport`]
pub struct CardSimulator {
    /// Sparse memory, keyed by bank and 24-bit address
    memory: Mutex<BTreeMap<(Bank, u32), u8>>,
    /// Where responses are delivered
    sink: Mutex<Option<ChunkSink>>,
    /// Injected fault
    fault: Mutex<Fault>,
    /// Whether the simulated link is open
    ready: AtomicBool,
    /// Random chunk sizes (thread-safe)
    rng: Mutex<StdRng>,
    /// Delay before each chunk
    chunk_delay: Duration,
    /// Every frame received, for inspection
    received: Mutex<Vec<Vec<u8>>>,
}

impl Default for CardSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl CardSimulator {
    /// Create a simulator with random chunking
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create a simulator with reproducible chunking
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            memory: Mutex::new(BTreeMap::new()),
            sink: Mutex::new(None),
            fault: Mutex::new(Fault::None),
            ready: AtomicBool::new(true),
            rng: Mutex::new(rng),
            chunk_delay: Duration::from_millis(1),
            received: Mutex::new(Vec::new()),
        }
    }

    /// Deliver responses to `sink`
    pub fn attach(&self, sink: ChunkSink) {
        *lock(&self.sink) = Some(sink);
    }

    /// Inject a fault into subsequent responses
    pub fn set_fault(&self, fault: Fault) {
        *lock(&self.fault) = fault;
    }

    /// Open or close the simulated link
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    /// Store bytes directly, bypassing the protocol
    pub fn load(&self, bank: Bank, start_addr: u32, data: &[u8]) {
        let mut memory = lock(&self.memory);
        for (i, &b) in data.iter().enumerate() {
            memory.insert((bank, address(start_addr, i)), b);
        }
    }

    /// Read bytes directly, bypassing the protocol
    pub fn peek(&self, bank: Bank, start_addr: u32, len: usize) -> Vec<u8> {
        let memory = lock(&self.memory);
        (0..len)
            .map(|i| {
                memory
                    .get(&(bank, address(start_addr, i)))
                    .copied()
                    .unwrap_or(ERASED)
            })
            .collect()
    }

    /// Frames received so far
    pub fn received_frames(&self) -> Vec<Vec<u8>> {
        lock(&self.received).clone()
    }

    fn respond(&self, request: &[u8]) -> Vec<u8> {
        let frame = match Frame::parse(request) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("simulator rejected frame: {}", e);
                return with_trailer(vec![STATUS_BAD_FRAME]);
            }
        };

        let mut body = vec![STATUS_OK];
        match frame.command() {
            Command::Read => {
                body.extend(self.peek(frame.bank(), frame.start_addr(), frame.span()));
            }
            Command::Write => {
                self.load(frame.bank(), frame.start_addr(), frame.payload());
            }
        }
        with_trailer(body)
    }

    fn split(&self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut rng = lock(&self.rng);
        let mut chunks = Vec::new();
        let mut rest = bytes;
        while !rest.is_empty() {
            let n = rng.gen_range(1..=rest.len().min(8));
            let (chunk, tail) = rest.split_at(n);
            chunks.push(chunk.to_vec());
            rest = tail;
        }
        chunks
    }
}

fn address(start_addr: u32, offset: usize) -> u32 {
    start_addr.wrapping_add(offset as u32) & 0x00FF_FFFF
}

fn with_trailer(mut body: Vec<u8>) -> Vec<u8> {
    let crc = Crc32::compute_hash(&body);
    body.extend_from_slice(&crc);
    body
}

impl Transport for CardSimulator {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn send(&self, bytes: &[u8]) -> Result<(), ProtocolError> {
        if !self.is_ready() {
            return Err(ProtocolError::TransportNotReady);
        }
        lock(&self.received).push(bytes.to_vec());

        let mut response = self.respond(bytes);
        match *lock(&self.fault) {
            Fault::None => {}
            Fault::CorruptChecksum => {
                if let Some(last) = response.last_mut() {
                    *last ^= 0xFF;
                }
            }
            Fault::ExtraBytes(n) => response.extend(std::iter::repeat(0x55).take(n)),
            Fault::Silent => {
                debug!("simulator staying silent");
                return Ok(());
            }
        }

        let Some(sink) = lock(&self.sink).clone() else {
            warn!("simulator has no sink attached, dropping response");
            return Ok(());
        };
        let chunks = self.split(&response);
        let delay = self.chunk_delay;
        debug!(
            "simulator answering with {} bytes in {} chunks",
            response.len(),
            chunks.len()
        );
        thread::spawn(move || {
            for chunk in chunks {
                thread::sleep(delay);
                sink.deliver(&chunk);
            }
        });
        Ok(())
    }
}
