//! Response checksum validation

use tracing::debug;

use super::{Crc32, ProtocolError, CHECKSUM_LEN};

/// Verifies the CRC trailer of a response that arrived in pieces.
///
/// The last expected/received pair is kept so a mismatch can be reported
/// after the fact.
#[derive(Debug, Clone, Default)]
pub struct ChecksumValidator {
    expected: Vec<u8>,
    received: Vec<u8>,
}

impl ChecksumValidator {
    /// Create a validator with no recorded comparison
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that the last `checksum_len` bytes of the concatenated chunks are
    /// the CRC32 of everything before them.
    ///
    /// Fails when the chunks hold no byte besides the trailer, or when
    /// `checksum_len` is longer than a CRC32.
    pub fn is_checksum_ok<C: AsRef<[u8]>>(
        &mut self,
        chunks: &[C],
        checksum_len: usize,
    ) -> Result<bool, ProtocolError> {
        if checksum_len > CHECKSUM_LEN {
            return Err(ProtocolError::InvalidArgument(format!(
                "checksum length {} exceeds CRC32 size {}",
                checksum_len, CHECKSUM_LEN
            )));
        }

        let total: usize = chunks.iter().map(|c| c.as_ref().len()).sum();
        if total <= checksum_len {
            return Err(ProtocolError::InvalidArgument(format!(
                "byte array size {} must be larger than checksum length {}",
                total, checksum_len
            )));
        }

        let all = chunks.iter().fold(Vec::with_capacity(total), |mut all, c| {
            all.extend_from_slice(c.as_ref());
            all
        });
        let (payload, trailer) = all.split_at(total - checksum_len);

        let crc = Crc32::compute_hash(payload);
        self.expected = crc[..checksum_len].to_vec();
        self.received = trailer.to_vec();

        let ok = self.expected == self.received;
        debug!(
            "checksum over {} bytes: expected {:02X?}, received {:02X?}, ok={}",
            payload.len(),
            self.expected,
            self.received,
            ok
        );
        Ok(ok)
    }

    /// CRC computed by the last check
    pub fn expected(&self) -> &[u8] {
        &self.expected
    }

    /// Trailer found by the last check
    pub fn received(&self) -> &[u8] {
        &self.received
    }

    /// Error describing the last comparison
    pub fn mismatch_error(&self) -> ProtocolError {
        ProtocolError::ChecksumMismatch {
            expected: self.expected.clone(),
            received: self.received.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_over_zero_bytes() {
        let mut validator = ChecksumValidator::new();
        let chunks = vec![vec![0x00, 0x00, 0x00, 0x00], vec![0x21, 0x44, 0xDF, 0x1C]];
        assert!(validator.is_checksum_ok(&chunks, 4).unwrap());
    }

    #[test]
    fn test_checksum_split_chunks() {
        let mut validator = ChecksumValidator::new();
        let chunks: Vec<&[u8]> = vec![
            &[0xE9, 0x5C, 0xA8, 0xEE, 0xFF, 0x8D, 0xFA, 0xD9, 0xC4, 0xEA],
            &[0xBF, 0x54, 0xE3, 0x63],
        ];
        assert!(validator.is_checksum_ok(&chunks, 4).unwrap());
        assert_eq!(validator.expected(), &[0xBF, 0x54, 0xE3, 0x63]);
        assert_eq!(validator.received(), &[0xBF, 0x54, 0xE3, 0x63]);
    }

    #[test]
    fn test_trailer_split_across_chunks() {
        let mut validator = ChecksumValidator::new();
        let chunks: Vec<&[u8]> = vec![&[0x00, 0x01], &[0x02, 0x08, 0x54], &[0x89, 0x7F]];
        assert!(validator.is_checksum_ok(&chunks, 4).unwrap());
    }

    #[test]
    fn test_mismatch_keeps_diagnostics() {
        let mut validator = ChecksumValidator::new();
        let chunks = vec![vec![0x00, 0x01, 0x02, 0x08, 0x54, 0x89, 0x7E]];
        assert!(!validator.is_checksum_ok(&chunks, 4).unwrap());
        assert_eq!(validator.expected(), &[0x08, 0x54, 0x89, 0x7F]);
        assert_eq!(validator.received(), &[0x08, 0x54, 0x89, 0x7E]);
        assert!(validator.mismatch_error().to_string().contains("7E"));
    }

    #[test]
    fn test_only_trailer_is_range_error() {
        let mut validator = ChecksumValidator::new();
        let chunks = vec![vec![], vec![0xBF, 0x54, 0xE3, 0x63]];
        assert!(matches!(
            validator.is_checksum_ok(&chunks, 4),
            Err(ProtocolError::InvalidArgument(_))
        ));

        let empty: Vec<Vec<u8>> = vec![vec![], vec![]];
        assert!(validator.is_checksum_ok(&empty, 4).is_err());
    }
}
