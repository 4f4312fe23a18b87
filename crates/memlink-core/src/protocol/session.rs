//! Transaction session
//!
//! Runs one request/response cycle at a time: the frame is written from the
//! caller's thread, response chunks arrive on the transport's I/O thread via
//! [`ChunkSink`], and a [`TimeoutSupervisor`] thread watches for the end.
//! Outcomes are reported through [`DisplaySink`] and [`UserDecision`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::{
    build_read_frame, build_write_frame, Bank, ChecksumValidator, ChunkOutcome, Frame, Intention,
    ProtocolConfig, ProtocolError, ReceiveAssembler, SupervisorOutcome, TimeoutSupervisor,
    UserDecision, Watch, CHECKSUM_LEN, STATUS_LEN,
};

/// Byte channel to the card
pub trait Transport: Send + Sync {
    /// Whether the link is open
    fn is_ready(&self) -> bool;

    /// Write a complete frame
    fn send(&self, bytes: &[u8]) -> Result<(), ProtocolError>;
}

/// Receives progress, errors and completed responses
pub trait DisplaySink: Send + Sync {
    /// A chunk belonging to the current response arrived
    fn on_progress(&self, chunk: &[u8]);

    /// The current transaction failed
    fn on_error(&self, message: &str);

    /// The current transaction produced a complete response
    fn on_response(&self, _response: &Response) {}
}

/// A complete response: status byte, data, CRC trailer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    bytes: Vec<u8>,
    checksum_verified: bool,
}

impl Response {
    /// Status byte sent by the card
    pub fn status(&self) -> u8 {
        self.bytes.first().copied().unwrap_or_default()
    }

    /// Data between the status byte and the trailer (empty for a write ack)
    pub fn data(&self) -> &[u8] {
        let end = self.bytes.len().saturating_sub(CHECKSUM_LEN);
        self.bytes.get(STATUS_LEN..end).unwrap_or(&[])
    }

    /// Raw bytes as received
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether the trailer was checked against the data
    pub fn checksum_verified(&self) -> bool {
        self.checksum_verified
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the caller, the I/O thread and the supervisor
struct Shared {
    config: ProtocolConfig,
    display: Arc<dyn DisplaySink>,
    busy: AtomicBool,
    ended: AtomicBool,
    receive: Mutex<ReceiveAssembler>,
    validator: Mutex<ChecksumValidator>,
}

impl Shared {
    fn on_chunk(&self, chunk: &[u8]) {
        let (outcome, chunks) = {
            let mut receive = lock(&self.receive);
            let outcome = receive.on_chunk(chunk);
            let chunks = match outcome {
                ChunkOutcome::Completed { .. } => receive.chunks().to_vec(),
                _ => Vec::new(),
            };
            (outcome, chunks)
        };

        if !outcome.accepted() {
            return;
        }
        debug!("received {} bytes: {:02x?}", chunk.len(), chunk);
        self.display.on_progress(chunk);

        match outcome {
            ChunkOutcome::Completed { .. } => {
                self.complete(chunks);
                self.ended.store(true, Ordering::Release);
            }
            ChunkOutcome::Overrun { received, expected } => {
                let error = ProtocolError::ReceiveOverrun { received, expected };
                warn!("{}", error);
                self.display.on_error(&error.to_string());
                self.ended.store(true, Ordering::Release);
            }
            _ => {}
        }
    }

    fn complete(&self, chunks: Vec<Vec<u8>>) {
        if !self.config.verify_response_checksum {
            self.display.on_response(&Response {
                bytes: chunks.concat(),
                checksum_verified: false,
            });
            return;
        }

        let mut validator = lock(&self.validator);
        match validator.is_checksum_ok(&chunks, CHECKSUM_LEN) {
            Ok(true) => {
                info!("response verified");
                self.display.on_response(&Response {
                    bytes: chunks.concat(),
                    checksum_verified: true,
                });
            }
            Ok(false) => {
                let error = validator.mismatch_error();
                warn!("{}", error);
                self.display.on_error(&error.to_string());
            }
            Err(e) => {
                warn!("cannot verify response: {}", e);
                self.display.on_error(&e.to_string());
            }
        }
    }
}

/// The supervisor's view of the transaction in flight
struct InFlight {
    shared: Arc<Shared>,
}

impl Watch for InFlight {
    fn is_ended(&self) -> bool {
        self.shared.ended.load(Ordering::Acquire)
    }

    fn abandon(&self) -> bool {
        let mut receive = lock(&self.shared.receive);
        if receive.is_ended() {
            return false;
        }
        receive.abandon();
        true
    }
}

/// Entry point for the transport's I/O thread
#[derive(Clone)]
pub struct ChunkSink {
    shared: Arc<Shared>,
}

impl ChunkSink {
    /// Hand over bytes read from the link
    pub fn deliver(&self, chunk: &[u8]) {
        self.shared.on_chunk(chunk);
    }
}

/// One connection to the card; at most one transaction in flight
pub struct TransactionSession {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    decision: Arc<dyn UserDecision>,
    supervisor: Mutex<Option<JoinHandle<SupervisorOutcome>>>,
}

impl TransactionSession {
    /// Create a session over `transport`
    pub fn new(
        config: ProtocolConfig,
        transport: Arc<dyn Transport>,
        display: Arc<dyn DisplaySink>,
        decision: Arc<dyn UserDecision>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                display,
                busy: AtomicBool::new(false),
                ended: AtomicBool::new(false),
                receive: Mutex::new(ReceiveAssembler::new()),
                validator: Mutex::new(ChecksumValidator::new()),
            }),
            transport,
            decision,
            supervisor: Mutex::new(None),
        }
    }

    /// Sink the transport feeds received bytes into
    pub fn chunk_sink(&self) -> ChunkSink {
        ChunkSink {
            shared: self.shared.clone(),
        }
    }

    /// Link configuration
    pub fn config(&self) -> &ProtocolConfig {
        &self.shared.config
    }

    /// Whether a transaction is waiting for its outcome
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    /// Request `length` bytes from `bank` starting at `start_addr`
    pub fn read(
        &self,
        start_addr: u32,
        length: usize,
        bank: Bank,
        intention: Intention,
    ) -> Result<(), ProtocolError> {
        let frame = build_read_frame(start_addr, length, bank, intention)?;
        self.send_frame(&frame)
    }

    /// Write `data` to `bank` starting at `start_addr`
    pub fn write(
        &self,
        start_addr: u32,
        data: &[u8],
        bank: Bank,
        intention: Intention,
    ) -> Result<(), ProtocolError> {
        let frame = build_write_frame(start_addr, data, bank, intention)?;
        self.send_frame(&frame)
    }

    /// Send a prepared frame and start supervising its response.
    ///
    /// Returns once the frame is written; the outcome arrives via callbacks.
    pub fn send_frame(&self, frame: &Frame) -> Result<(), ProtocolError> {
        let shared = &self.shared;
        if shared
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ProtocolError::Busy);
        }

        if !self.transport.is_ready() {
            shared.busy.store(false, Ordering::Release);
            return Err(ProtocolError::TransportNotReady);
        }

        lock(&shared.receive).reset(frame.expected_response_len());
        shared.ended.store(false, Ordering::Release);

        debug!(
            "sending {:?} frame, {} bytes: {:02x?}, expecting {} bytes back",
            frame.command(),
            frame.len(),
            frame.as_bytes(),
            frame.expected_response_len()
        );
        let started = Instant::now();
        if let Err(e) = self.transport.send(frame.as_bytes()) {
            warn!("send failed: {}", e);
            lock(&shared.receive).abandon();
            shared.busy.store(false, Ordering::Release);
            return Err(e);
        }

        let watch = InFlight {
            shared: shared.clone(),
        };
        let on_exit = shared.clone();
        let handle = TimeoutSupervisor::from_config(&shared.config).spawn(
            started,
            watch,
            self.decision.clone(),
            move |_| on_exit.busy.store(false, Ordering::Release),
        );
        *lock(&self.supervisor) = Some(handle);

        Ok(())
    }

    /// Block until the current transaction's supervisor has finished
    pub fn wait(&self) -> Option<SupervisorOutcome> {
        let handle = lock(&self.supervisor).take()?;
        handle.join().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_fields() {
        let response = Response {
            bytes: vec![0x00, 0xAB, 0xCD, 1, 2, 3, 4],
            checksum_verified: true,
        };
        assert_eq!(response.status(), 0x00);
        assert_eq!(response.data(), &[0xAB, 0xCD]);

        let ack = Response {
            bytes: vec![0x00, 1, 2, 3, 4],
            checksum_verified: false,
        };
        assert!(ack.data().is_empty());
    }
}
