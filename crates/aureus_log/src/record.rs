//! Log records.
//!
//! A record wraps a payload with its sequence number, the time it was
//! recorded, and the digests linking it to its predecessor.

use aureus_core::{CoreResult, Digest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A sealed log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<E> {
    /// Position in the log, starting at 0
    pub sequence: u64,
    /// When the record was appended
    pub recorded_at: DateTime<Utc>,
    /// The logged payload
    pub payload: E,
    /// Digest of the previous record (`Digest::GENESIS` for the first)
    pub prior: Digest,
    /// Digest of this record, chained from `prior`
    pub digest: Digest,
}

impl<E: Serialize> Record<E> {
    /// Seal a payload onto the chain
    ///
    /// # Errors
    ///
    /// Returns error if the payload cannot be encoded
    pub fn seal(sequence: u64, recorded_at: DateTime<Utc>, payload: E, prior: Digest) -> CoreResult<Self> {
        let digest = Self::digest_of(sequence, &recorded_at, &payload, &prior)?;
        Ok(Self {
            sequence,
            recorded_at,
            payload,
            prior,
            digest,
        })
    }

    /// Recompute the digest from the record's contents
    ///
    /// # Errors
    ///
    /// Returns error if the payload cannot be encoded
    pub fn recompute_digest(&self) -> CoreResult<Digest> {
        Self::digest_of(self.sequence, &self.recorded_at, &self.payload, &self.prior)
    }

    fn digest_of(
        sequence: u64,
        recorded_at: &DateTime<Utc>,
        payload: &E,
        prior: &Digest,
    ) -> CoreResult<Digest> {
        let encoded = serde_json::to_vec(&(sequence, recorded_at, payload))?;
        Ok(prior.chain(&encoded))
    }
}
