//! CRC32 engine
//!
//! Standard CRC-32 (IEEE 802.3 polynomial, reflected, init and xor-out
//! `0xFFFFFFFF`), serialized most significant byte first. This is the byte
//! order the card expects in a frame trailer.

use byteorder::{BigEndian, ByteOrder};
use crc32fast::Hasher;

use super::ProtocolError;

/// Incremental CRC32 over one or more byte slices
#[derive(Clone, Default)]
pub struct Crc32 {
    hasher: Hasher,
}

impl Crc32 {
    /// Create an engine with an empty state
    pub fn new() -> Self {
        Self {
            hasher: Hasher::new(),
        }
    }

    /// Feed more bytes
    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Finish and return the 4 trailer bytes
    pub fn finalize(self) -> [u8; 4] {
        let mut out = [0u8; 4];
        BigEndian::write_u32(&mut out, self.hasher.finalize());
        out
    }

    /// CRC32 of a whole buffer
    pub fn compute_hash(bytes: &[u8]) -> [u8; 4] {
        let mut crc = Self::new();
        crc.update(bytes);
        crc.finalize()
    }

    /// CRC32 of `count` bytes starting at `offset`.
    ///
    /// Fails with `InvalidArgument` when the buffer is absent or the range
    /// falls outside it.
    pub fn compute_hash_range(
        bytes: Option<&[u8]>,
        offset: usize,
        count: usize,
    ) -> Result<[u8; 4], ProtocolError> {
        let bytes = bytes.ok_or_else(|| {
            ProtocolError::InvalidArgument("buffer to checksum must not be null".to_string())
        })?;
        let end = offset.checked_add(count).filter(|&end| end <= bytes.len());
        match end {
            Some(end) => Ok(Self::compute_hash(&bytes[offset..end])),
            None => Err(ProtocolError::InvalidArgument(format!(
                "range {}+{} is outside a buffer of {} bytes",
                offset,
                count,
                bytes.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_vectors() {
        assert_eq!(Crc32::compute_hash(&[]), [0x00, 0x00, 0x00, 0x00]);
        assert_eq!(Crc32::compute_hash(&[0x00, 0x00, 0x00]), [0xFF, 0x41, 0xD9, 0x12]);
        assert_eq!(Crc32::compute_hash(&[0x00, 0x01, 0x02]), [0x08, 0x54, 0x89, 0x7F]);
        assert_eq!(
            Crc32::compute_hash(&[0xE9, 0x5C, 0xA8, 0xEE, 0xFF, 0x8D, 0xFA, 0xD9, 0xC4, 0xEA]),
            [0xBF, 0x54, 0xE3, 0x63]
        );
    }

    #[test]
    fn test_null_buffer_rejected() {
        let result = Crc32::compute_hash_range(None, 0, 0);
        assert!(matches!(result, Err(ProtocolError::InvalidArgument(_))));
    }

    #[test]
    fn test_range_matches_slice() {
        let data = [0xAA, 0x00, 0x01, 0x02, 0xBB];
        let crc = Crc32::compute_hash_range(Some(&data), 1, 3).unwrap();
        assert_eq!(crc, [0x08, 0x54, 0x89, 0x7F]);
        assert!(Crc32::compute_hash_range(Some(&data), 3, 3).is_err());
        assert!(Crc32::compute_hash_range(Some(&data), usize::MAX, 2).is_err());
    }

    #[test]
    fn test_incremental_equals_one_shot() {
        let mut crc = Crc32::new();
        crc.update(&[0xE9, 0x5C, 0xA8]);
        crc.update(&[0xEE, 0xFF, 0x8D, 0xFA, 0xD9, 0xC4, 0xEA]);
        assert_eq!(crc.finalize(), [0xBF, 0x54, 0xE3, 0x63]);
    }
}
