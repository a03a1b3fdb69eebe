//! Candidate-block consensus: majority voting over broadcast candidates.
//!
//! ## Structure
//! - `types.rs` - votes, tallies, decisions, routing outcomes
//! - `evaluator.rs` - quorum arithmetic and the accept/reject decision
//! - `orphans.rs` - buffer for votes that outrun their candidate block
//! - `engine.rs` - candidate buffer and vote routing
//! - `tests.rs` - consensus scenario tests

// Re-export public API
pub use engine::ConsensusEngine;
pub use evaluator::{decide, quorum};
pub use orphans::{OrphanVoteBuffer, DEFAULT_ORPHAN_CAPACITY};
pub use types::{CandidateEntry, ConsensusError, Decision, Vote, VoteRecord, VoteStatus};

mod engine;
mod evaluator;
mod orphans;
mod types;

// Tests
#[cfg(test)]
#[path = "tests.rs"]
mod tests;
