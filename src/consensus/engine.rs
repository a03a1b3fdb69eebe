//! Candidate-block lifecycle: admission, vote tallying, commit or discard.
//!
//! Per block hash the lifecycle is `absent -> voting -> committed | discarded`.
//! All mutable consensus state lives behind one lock owned by the engine
//! instance; request handlers share the engine by reference, never through
//! globals. Candidates for different hashes only contend on that lock, which
//! is held for fast tally work only - never across a network call.

use crate::chain::{Block, Blockchain, BlockValidation, ChainError, MetaError, ReplicaMode};
use crate::consensus::evaluator;
use crate::consensus::orphans::OrphanVoteBuffer;
use crate::consensus::types::{
    CandidateEntry, ConsensusError, Decision, Vote, VoteRecord, VoteStatus,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

struct EngineState {
    chain: Blockchain,
    candidates: HashMap<String, CandidateEntry>,
    orphans: OrphanVoteBuffer,
}

impl EngineState {
    /// Routes one vote: already-decided check, then tally + decision, else
    /// orphan hold. Votes for a hash are applied in local arrival order
    /// under the engine lock.
    fn route_vote(&mut self, record: &VoteRecord, peer_count: usize) -> VoteStatus {
        if self
            .chain
            .contains_committed(&record.block_hash, record.block_index)
        {
            return VoteStatus::AlreadyDecided;
        }

        let Some(entry) = self.candidates.get_mut(&record.block_hash) else {
            self.orphans.hold(record.clone());
            return VoteStatus::NotYetReceived;
        };

        let (total_votes, yes_votes) = entry.record(&record.voter_id, record.vote);
        let decision = evaluator::decide(total_votes, yes_votes, peer_count);
        match decision {
            Decision::Accept => match self.commit(&record.block_hash) {
                Ok(block) => {
                    tracing::info!(
                        hash = %block.hash,
                        index = block.index,
                        yes_votes,
                        total_votes,
                        "consensus reached, block committed"
                    );
                }
                Err(e) => {
                    // Unreachable if the entry we just tallied still exists.
                    tracing::error!(error = %e, "invariant violation on commit");
                }
            },
            Decision::Reject => {
                tracing::info!(
                    hash = %record.block_hash,
                    yes_votes,
                    total_votes,
                    peer_count,
                    "consensus not reached, candidate discarded"
                );
                self.discard(&record.block_hash);
            }
            Decision::Pending => {}
        }
        VoteStatus::Accepted {
            total_votes,
            yes_votes,
            decision,
        }
    }

    /// Creates the tally entry if absent, then replays any orphaned votes in
    /// arrival order. Replay can itself settle consensus.
    fn admit(&mut self, block: Block, peer_count: usize) -> Decision {
        let hash = block.hash.clone();
        if !self.candidates.contains_key(&hash) {
            self.candidates.insert(hash.clone(), CandidateEntry::new(block));
        }
        let mut decision = Decision::Pending;
        for record in self.orphans.drain(&hash) {
            if let VoteStatus::Accepted { decision: d, .. } =
                self.route_vote(&record, peer_count)
            {
                decision = d;
            }
        }
        decision
    }

    /// Moves the buffered block into the chain and drops the entry plus any
    /// stale orphan queue for the same key.
    fn commit(&mut self, hash: &str) -> Result<Block, ConsensusError> {
        let entry = self
            .candidates
            .remove(hash)
            .ok_or_else(|| ConsensusError::UnknownCandidate(hash.to_string()))?;
        self.orphans.discard(hash);
        let block = entry.block;
        self.chain.append(block.clone());
        Ok(block)
    }

    fn discard(&mut self, hash: &str) {
        self.candidates.remove(hash);
        self.orphans.discard(hash);
    }
}

/// One node's consensus state: chain store, candidate buffer, orphan votes.
pub struct ConsensusEngine {
    state: RwLock<EngineState>,
}

impl ConsensusEngine {
    pub fn new(mode: ReplicaMode) -> Self {
        ConsensusEngine {
            state: RwLock::new(EngineState {
                chain: Blockchain::new(mode),
                candidates: HashMap::new(),
                orphans: OrphanVoteBuffer::default(),
            }),
        }
    }

    pub fn with_orphan_capacity(mode: ReplicaMode, capacity: usize) -> Self {
        ConsensusEngine {
            state: RwLock::new(EngineState {
                chain: Blockchain::new(mode),
                candidates: HashMap::new(),
                orphans: OrphanVoteBuffer::with_capacity(capacity),
            }),
        }
    }

    /// Builds a candidate on the current tip and admits it into this node's
    /// own candidate buffer. Malformed input never reaches consensus state.
    pub fn create_candidate(
        &self,
        plate: &str,
        data: Value,
        timestamp: Option<String>,
        peer_count: usize,
    ) -> Result<Block, MetaError> {
        let mut state = self.state.write();
        let previous_hash = match state.chain.tip() {
            Ok(tip) => tip.hash.clone(),
            Err(e) => {
                return Err(MetaError {
                    field: "chain".to_string(),
                    reason: e.to_string(),
                })
            }
        };
        let block = state
            .chain
            .create_block(&previous_hash, plate, data, timestamp)?;
        state.admit(block.clone(), peer_count);
        Ok(block)
    }

    /// Peer-side handling of a proposed block: re-derive the chain checks,
    /// admit the candidate, and return this node's vote with per-check
    /// detail. Validation runs against the tip before admission so a replay
    /// commit cannot move the tip under the checks.
    pub fn validate_candidate(
        &self,
        block: Block,
        peer_count: usize,
    ) -> Result<(Vote, BlockValidation), ChainError> {
        let mut state = self.state.write();
        let validation = state.chain.validate(&block)?;
        let vote = if validation.is_valid() {
            Vote::Yes
        } else {
            Vote::No
        };
        state.admit(block, peer_count);
        Ok((vote, validation))
    }

    /// Idempotent admission; an in-progress tally is never reset.
    pub fn admit(&self, block: Block, peer_count: usize) -> Decision {
        self.state.write().admit(block, peer_count)
    }

    /// Routes an incoming vote and re-evaluates the decision.
    pub fn submit_vote(&self, record: &VoteRecord, peer_count: usize) -> VoteStatus {
        self.state.write().route_vote(record, peer_count)
    }

    /// Commits an admitted candidate. Only valid after an accept decision;
    /// anything else is a programming-invariant violation.
    pub fn commit(&self, hash: &str) -> Result<Block, ConsensusError> {
        self.state.write().commit(hash)
    }

    /// Drops a candidate and its orphaned votes. Idempotent.
    pub fn discard(&self, hash: &str) {
        self.state.write().discard(hash)
    }

    /// Read-only access to the committed chain.
    pub fn with_chain<R>(&self, f: impl FnOnce(&Blockchain) -> R) -> R {
        f(&self.state.read().chain)
    }

    /// Bulk chain replacement, used only by the bootstrap sync.
    pub fn replace_chain(&self, blocks: Vec<Block>) {
        self.state.write().chain.replace(blocks);
    }

    /// Candidates currently undergoing consensus.
    pub fn candidate_count(&self) -> usize {
        self.state.read().candidates.len()
    }

    /// Distinct hashes with buffered early votes.
    pub fn orphan_count(&self) -> usize {
        self.state.read().orphans.len()
    }
}
