//! Shared append-only event log.

use crate::chain::{ChainError, ChainVerifier};
use crate::record::Record;
use aureus_core::{Clock, CoreResult, Digest, SystemClock};
use serde::Serialize;
use std::sync::{Arc, RwLock};

struct Inner<E> {
    records: Vec<Record<E>>,
    tip: Digest,
}

/// Append-only, hash-chained log shared between writers
///
/// Cloning the handle shares the same log. Appends take the write lock, so
/// sequence numbers and chain links are assigned in a single total order.
/// There is no API to modify or remove a record once appended.
pub struct EventLog<E> {
    inner: Arc<RwLock<Inner<E>>>,
    clock: Arc<dyn Clock>,
}

impl<E> Clone for EventLog<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<E: Serialize + Clone> EventLog<E> {
    /// Create an empty log on the system clock
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty log reading time from `clock`
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                records: Vec::new(),
                tip: Digest::GENESIS,
            })),
            clock,
        }
    }

    /// Append a payload, returning the sealed record
    ///
    /// # Errors
    ///
    /// Returns error if the payload cannot be encoded
    pub fn append(&self, payload: E) -> CoreResult<Record<E>> {
        let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
        let sequence = inner.records.len() as u64;
        let record = Record::seal(sequence, self.clock.now(), payload, inner.tip)?;
        inner.tip = record.digest;
        inner.records.push(record.clone());
        tracing::trace!(sequence, digest = %record.digest.short(), "log record appended");
        Ok(record)
    }

    /// Snapshot of every record in append order
    #[must_use]
    pub fn records(&self) -> Vec<Record<E>> {
        self.read(|records| records.to_vec())
    }

    /// Records with sequence >= `sequence`
    #[must_use]
    pub fn since(&self, sequence: u64) -> Vec<Record<E>> {
        self.read(|records| {
            records
                .iter()
                .skip(usize::try_from(sequence).unwrap_or(usize::MAX))
                .cloned()
                .collect()
        })
    }

    /// Inspect records under the read lock without cloning them
    pub fn read<R>(&self, f: impl FnOnce(&[Record<E>]) -> R) -> R {
        let inner = self.inner.read().unwrap_or_else(|p| p.into_inner());
        f(&inner.records)
    }

    /// Count records whose payload matches `predicate`
    #[must_use]
    pub fn count_matching(&self, predicate: impl Fn(&E) -> bool) -> usize {
        self.read(|records| records.iter().filter(|r| predicate(&r.payload)).count())
    }

    /// Number of records
    #[must_use]
    pub fn len(&self) -> usize {
        self.read(<[Record<E>]>::len)
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Digest of the latest record
    #[must_use]
    pub fn tip(&self) -> Digest {
        self.inner.read().unwrap_or_else(|p| p.into_inner()).tip
    }

    /// Verify the whole chain
    ///
    /// # Errors
    ///
    /// Returns the first broken link
    pub fn verify(&self) -> Result<(), ChainError> {
        self.read(|records| ChainVerifier::new().verify_all(records))
    }
}

impl<E: Serialize + Clone> Default for EventLog<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventLog<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.inner.read().map(|i| i.records.len()).unwrap_or(0);
        f.debug_struct("EventLog").field("len", &len).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_append_assigns_sequence() {
        let log = EventLog::new();
        let a = log.append("first".to_string()).unwrap();
        let b = log.append("second".to_string()).unwrap();
        assert_eq!(a.sequence, 0);
        assert_eq!(b.sequence, 1);
        assert_eq!(b.prior, a.digest);
        assert_eq!(log.tip(), b.digest);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_clone_shares_log() {
        let log = EventLog::new();
        let other = log.clone();
        other.append(7u32).unwrap();
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_concurrent_appends_stay_chained() {
        let log: EventLog<u32> = EventLog::new();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = log.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        log.append(t * 100 + i).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(log.len(), 400);
        log.verify().unwrap();
    }

    #[test]
    fn test_since_and_count() {
        let log = EventLog::new();
        for i in 0..5u32 {
            log.append(i).unwrap();
        }
        assert_eq!(log.since(3).len(), 2);
        assert_eq!(log.count_matching(|v| v % 2 == 0), 3);
    }
}
