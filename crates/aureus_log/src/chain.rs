//! Hash chain verification for tamper-evident logs.
//!
//! Each record's `prior` must equal the previous record's `digest`, its
//! sequence must follow on, and its digest must match its contents.

use crate::record::Record;
use aureus_core::Digest;
use serde::Serialize;

/// Chain validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// Broken link in chain
    #[error("Broken link at sequence {position}: expected prior {expected}, got {actual}")]
    BrokenLink {
        /// Sequence of the offending record
        position: u64,
        /// Digest the verifier expected
        expected: Digest,
        /// Digest the record carried
        actual: Digest,
    },

    /// Sequence numbers are not contiguous
    #[error("Sequence gap: expected {expected}, got {actual}")]
    SequenceGap {
        /// Expected sequence
        expected: u64,
        /// Actual sequence
        actual: u64,
    },

    /// Record contents do not match its digest
    #[error("Digest mismatch at sequence {position}")]
    DigestMismatch {
        /// Sequence of the offending record
        position: u64,
    },

    /// Record could not be re-encoded
    #[error("Unencodable record at sequence {position}")]
    Unencodable {
        /// Sequence of the offending record
        position: u64,
    },
}

/// Validates record chains incrementally
#[derive(Debug, Clone)]
pub struct ChainVerifier {
    expected_prior: Digest,
    expected_sequence: u64,
}

impl ChainVerifier {
    /// Create a verifier for a chain starting at genesis
    #[must_use]
    pub fn new() -> Self {
        Self {
            expected_prior: Digest::GENESIS,
            expected_sequence: 0,
        }
    }

    /// Resume verification after a known record
    #[must_use]
    pub fn resume_after(sequence: u64, digest: Digest) -> Self {
        Self {
            expected_prior: digest,
            expected_sequence: sequence + 1,
        }
    }

    /// Validate a single record
    ///
    /// # Errors
    ///
    /// Returns error if the record does not extend the chain
    pub fn verify<E: Serialize>(&mut self, record: &Record<E>) -> Result<(), ChainError> {
        if record.sequence != self.expected_sequence {
            return Err(ChainError::SequenceGap {
                expected: self.expected_sequence,
                actual: record.sequence,
            });
        }
        if record.prior != self.expected_prior {
            return Err(ChainError::BrokenLink {
                position: record.sequence,
                expected: self.expected_prior,
                actual: record.prior,
            });
        }
        let recomputed = record
            .recompute_digest()
            .map_err(|_| ChainError::Unencodable {
                position: record.sequence,
            })?;
        if recomputed != record.digest {
            return Err(ChainError::DigestMismatch {
                position: record.sequence,
            });
        }

        self.expected_prior = record.digest;
        self.expected_sequence += 1;
        Ok(())
    }

    /// Validate a sequence of records
    ///
    /// # Errors
    ///
    /// Returns the first validation failure
    pub fn verify_all<'a, E, I>(&mut self, records: I) -> Result<(), ChainError>
    where
        E: Serialize + 'a,
        I: IntoIterator<Item = &'a Record<E>>,
    {
        for record in records {
            self.verify(record)?;
        }
        Ok(())
    }

    /// Digest the next record must carry as its prior
    #[must_use]
    pub fn expected(&self) -> Digest {
        self.expected_prior
    }
}

impl Default for ChainVerifier {
    fn default() -> Self {
        Self::new()
    }
}
