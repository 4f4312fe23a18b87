//! Receive assembler
//!
//! Serial input arrives in arbitrary pieces. The assembler collects them until
//! the byte count announced by the outbound request has been reached:
//! - `Idle`: no transaction, input is dropped
//! - `Accumulating`: collecting chunks
//! - `Completed`: exactly the expected number of bytes arrived
//! - `Overrun`: more bytes than expected arrived

use tracing::{debug, warn};

/// Assembler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    /// No transaction in progress
    Idle,
    /// Waiting for more bytes
    Accumulating,
    /// Response complete
    Completed,
    /// Response longer than expected
    Overrun,
}

/// What happened to a delivered chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Chunk dropped: no transaction, or the transaction already ended
    Ignored,
    /// Chunk stored, more bytes needed
    Progress { received: usize, expected: usize },
    /// Chunk stored and the response is complete
    Completed { received: usize },
    /// Chunk stored and the byte count went past the expected total
    Overrun { received: usize, expected: usize },
}

impl ChunkOutcome {
    /// Whether the chunk was accepted into the current transaction
    pub fn accepted(&self) -> bool {
        !matches!(self, ChunkOutcome::Ignored)
    }
}

/// Collects the chunks of one response
#[derive(Debug)]
pub struct ReceiveAssembler {
    chunks: Vec<Vec<u8>>,
    received: usize,
    expected: usize,
    state: AssemblerState,
}

impl Default for ReceiveAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveAssembler {
    /// Create an idle assembler
    pub fn new() -> Self {
        Self {
            chunks: Vec::new(),
            received: 0,
            expected: 0,
            state: AssemblerState::Idle,
        }
    }

    /// Start a new transaction expecting `expected_total` bytes
    pub fn reset(&mut self, expected_total: usize) {
        self.chunks.clear();
        self.received = 0;
        self.expected = expected_total;
        self.state = AssemblerState::Accumulating;
    }

    /// Drop the current transaction; later input is ignored until the next reset
    pub fn abandon(&mut self) {
        if self.state == AssemblerState::Accumulating {
            debug!(
                "abandoning response after {} of {} bytes",
                self.received, self.expected
            );
        }
        self.state = AssemblerState::Idle;
    }

    /// Add a chunk of received bytes
    pub fn on_chunk(&mut self, chunk: &[u8]) -> ChunkOutcome {
        if self.state != AssemblerState::Accumulating {
            debug!(
                "ignoring {} bytes in state {:?}",
                chunk.len(),
                self.state
            );
            return ChunkOutcome::Ignored;
        }

        self.chunks.push(chunk.to_vec());
        self.received += chunk.len();

        if self.received == self.expected {
            self.state = AssemblerState::Completed;
            debug!("response complete: {} bytes", self.received);
            ChunkOutcome::Completed {
                received: self.received,
            }
        } else if self.received > self.expected {
            self.state = AssemblerState::Overrun;
            warn!(
                "received {} bytes, more than the {} expected",
                self.received, self.expected
            );
            ChunkOutcome::Overrun {
                received: self.received,
                expected: self.expected,
            }
        } else {
            ChunkOutcome::Progress {
                received: self.received,
                expected: self.expected,
            }
        }
    }

    /// Current state
    pub fn state(&self) -> AssemblerState {
        self.state
    }

    /// Whether the transaction has ended, successfully or not
    pub fn is_ended(&self) -> bool {
        matches!(
            self.state,
            AssemblerState::Completed | AssemblerState::Overrun
        )
    }

    /// Bytes received so far
    pub fn received(&self) -> usize {
        self.received
    }

    /// Bytes expected in total
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Chunks in arrival order
    pub fn chunks(&self) -> &[Vec<u8>] {
        &self.chunks
    }

    /// All received bytes joined together
    pub fn concatenated(&self) -> Vec<u8> {
        self.chunks.concat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_ignores_input() {
        let mut assembler = ReceiveAssembler::new();
        assert_eq!(assembler.on_chunk(&[1, 2, 3]), ChunkOutcome::Ignored);
        assert_eq!(assembler.received(), 0);
    }

    #[test]
    fn test_completes_exactly_once() {
        let mut assembler = ReceiveAssembler::new();
        assembler.reset(6);

        assert_eq!(
            assembler.on_chunk(&[0x00, 0x01]),
            ChunkOutcome::Progress {
                received: 2,
                expected: 6
            }
        );
        assert!(assembler.on_chunk(&[]).accepted());
        assert_eq!(
            assembler.on_chunk(&[0x02, 0x03, 0x04, 0x05]),
            ChunkOutcome::Completed { received: 6 }
        );
        assert_eq!(assembler.state(), AssemblerState::Completed);

        // Late bytes do not complete again
        assert_eq!(assembler.on_chunk(&[0x06]), ChunkOutcome::Ignored);
        assert_eq!(assembler.concatenated(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_overrun_not_truncated() {
        let mut assembler = ReceiveAssembler::new();
        assembler.reset(5);

        assembler.on_chunk(&[1, 2, 3]);
        assert_eq!(
            assembler.on_chunk(&[4, 5, 6]),
            ChunkOutcome::Overrun {
                received: 6,
                expected: 5
            }
        );
        assert_eq!(assembler.state(), AssemblerState::Overrun);
        assert!(assembler.is_ended());
        assert_eq!(assembler.concatenated().len(), 6);
        assert_eq!(assembler.on_chunk(&[7]), ChunkOutcome::Ignored);
    }

    #[test]
    fn test_reset_starts_fresh() {
        let mut assembler = ReceiveAssembler::new();
        assembler.reset(2);
        assembler.on_chunk(&[1, 2]);
        assert!(assembler.is_ended());

        assembler.reset(3);
        assert_eq!(assembler.state(), AssemblerState::Accumulating);
        assert!(assembler.chunks().is_empty());
        assert_eq!(assembler.received(), 0);
        assert_eq!(assembler.expected(), 3);
    }

    #[test]
    fn test_abandon_drops_late_bytes() {
        let mut assembler = ReceiveAssembler::new();
        assembler.reset(4);
        assembler.on_chunk(&[1]);
        assembler.abandon();
        assert_eq!(assembler.on_chunk(&[2, 3, 4]), ChunkOutcome::Ignored);
        assert!(!assembler.is_ended());
    }
}
