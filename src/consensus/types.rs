//! Consensus types and data structures.

use crate::chain::Block;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A peer's verdict on a candidate block.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Yes,
    No,
}

impl Vote {
    pub fn is_yes(&self) -> bool {
        matches!(self, Vote::Yes)
    }
}

impl std::fmt::Display for Vote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Vote::Yes => write!(f, "yes"),
            Vote::No => write!(f, "no"),
        }
    }
}

/// One vote as it travels between nodes.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VoteRecord {
    pub block_hash: String,
    pub block_index: u64,
    pub voter_id: String,
    pub vote: Vote,
}

/// Outcome of evaluating a tally against the peer-set size.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Keep collecting votes.
    Pending,
    /// Quorum of yes-votes reached.
    Accept,
    /// Every reachable peer voted and quorum was not reached.
    Reject,
}

/// Closed set of outcomes for a submitted vote.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum VoteStatus {
    /// Counted into the tally; carries the decision reached afterwards.
    Accepted {
        total_votes: usize,
        yes_votes: usize,
        decision: Decision,
    },
    /// The block already reached a decision; no state was touched.
    AlreadyDecided,
    /// The candidate has not arrived yet; the vote was buffered for replay.
    NotYetReceived,
}

/// Per-candidate tally while consensus is in progress.
///
/// Created when a block enters validation, destroyed on accept or reject.
#[derive(Debug, Clone)]
pub struct CandidateEntry {
    pub block: Block,
    /// Votes in local arrival order.
    pub votes: Vec<(String, Vote)>,
    pub yes_votes: usize,
    /// Voters already counted, for exactly-once counting.
    pub voters: HashSet<String>,
}

impl CandidateEntry {
    pub fn new(block: Block) -> Self {
        CandidateEntry {
            block,
            votes: Vec::new(),
            yes_votes: 0,
            voters: HashSet::new(),
        }
    }

    pub fn total_votes(&self) -> usize {
        self.votes.len()
    }

    /// Counts `vote` unless `voter_id` already voted. Returns the updated
    /// `(total, yes)` pair either way.
    pub fn record(&mut self, voter_id: &str, vote: Vote) -> (usize, usize) {
        if self.voters.insert(voter_id.to_string()) {
            self.votes.push((voter_id.to_string(), vote));
            if vote.is_yes() {
                self.yes_votes += 1;
            }
        }
        (self.votes.len(), self.yes_votes)
    }
}

#[derive(Debug, Clone)]
pub enum ConsensusError {
    /// `commit` was called for a hash with no admitted candidate. Can only
    /// happen if commit runs without a preceding accept decision.
    UnknownCandidate(String),
}

impl std::fmt::Display for ConsensusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsensusError::UnknownCandidate(hash) => {
                write!(f, "no candidate admitted for hash {}", hash)
            }
        }
    }
}

impl std::error::Error for ConsensusError {}
