//! Buffer for votes that arrive before their candidate block.
//!
//! An asynchronous broadcast can deliver a peer's vote before the proposer's
//! validation request; the vote is held here keyed by block hash and replayed
//! the instant the candidate is admitted.

use crate::consensus::types::VoteRecord;
use std::collections::HashMap;

/// Default limit on distinct hashes held at once.
pub const DEFAULT_ORPHAN_CAPACITY: usize = 1024;

/// Queues of early votes keyed by block hash.
///
/// Growth is bounded: when a vote for a new hash would exceed the capacity,
/// the oldest-held hash is evicted wholesale. A hash whose candidate never
/// arrives is eventually dropped instead of leaking for the process lifetime.
pub struct OrphanVoteBuffer {
    queues: HashMap<String, Vec<VoteRecord>>,
    /// Hashes in first-hold order, for eviction.
    order: Vec<String>,
    capacity: usize,
}

impl Default for OrphanVoteBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_ORPHAN_CAPACITY)
    }
}

impl OrphanVoteBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        OrphanVoteBuffer {
            queues: HashMap::new(),
            order: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Appends to the queue for the record's hash, creating it if absent.
    pub fn hold(&mut self, record: VoteRecord) {
        if !self.queues.contains_key(&record.block_hash) {
            if self.order.len() >= self.capacity {
                let evicted = self.order.remove(0);
                let dropped = self.queues.remove(&evicted).map(|q| q.len()).unwrap_or(0);
                tracing::warn!(
                    hash = %evicted,
                    dropped_votes = dropped,
                    "orphan buffer full, evicted oldest hash"
                );
            }
            self.order.push(record.block_hash.clone());
        }
        self.queues
            .entry(record.block_hash.clone())
            .or_default()
            .push(record);
    }

    /// Returns and clears the queue for `hash`, preserving arrival order.
    pub fn drain(&mut self, hash: &str) -> Vec<VoteRecord> {
        let drained = self.queues.remove(hash).unwrap_or_default();
        if !drained.is_empty() {
            self.order.retain(|h| h != hash);
        }
        drained
    }

    /// Drops any queue for `hash` without returning it.
    pub fn discard(&mut self, hash: &str) {
        if self.queues.remove(hash).is_some() {
            self.order.retain(|h| h != hash);
        }
    }

    /// Number of distinct hashes currently held.
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::types::Vote;

    fn record(hash: &str, voter: &str, vote: Vote) -> VoteRecord {
        VoteRecord {
            block_hash: hash.to_string(),
            block_index: 2,
            voter_id: voter.to_string(),
            vote,
        }
    }

    #[test]
    fn test_hold_and_drain_preserve_order() {
        let mut buffer = OrphanVoteBuffer::default();
        buffer.hold(record("h1", "10.0.0.1", Vote::Yes));
        buffer.hold(record("h1", "10.0.0.2", Vote::No));
        buffer.hold(record("h2", "10.0.0.3", Vote::Yes));
        assert_eq!(buffer.len(), 2);

        let drained = buffer.drain("h1");
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].voter_id, "10.0.0.1");
        assert_eq!(drained[1].voter_id, "10.0.0.2");
        assert_eq!(buffer.len(), 1);
        assert!(buffer.drain("h1").is_empty());
    }

    #[test]
    fn test_drain_unknown_hash_is_empty() {
        let mut buffer = OrphanVoteBuffer::default();
        assert!(buffer.drain("missing").is_empty());
    }

    #[test]
    fn test_eviction_drops_oldest_hash() {
        let mut buffer = OrphanVoteBuffer::with_capacity(2);
        buffer.hold(record("h1", "a", Vote::Yes));
        buffer.hold(record("h2", "b", Vote::Yes));
        // A third hash evicts h1; votes for existing hashes never evict.
        buffer.hold(record("h2", "c", Vote::No));
        buffer.hold(record("h3", "d", Vote::Yes));
        assert_eq!(buffer.len(), 2);
        assert!(buffer.drain("h1").is_empty());
        assert_eq!(buffer.drain("h2").len(), 2);
        assert_eq!(buffer.drain("h3").len(), 1);
    }

    #[test]
    fn test_discard_is_idempotent() {
        let mut buffer = OrphanVoteBuffer::default();
        buffer.hold(record("h1", "a", Vote::Yes));
        buffer.discard("h1");
        buffer.discard("h1");
        assert!(buffer.is_empty());
    }
}
