//! Scenario tests for the candidate-block consensus engine.

#[cfg(test)]
mod engine_tests {
    use crate::chain::ReplicaMode;
    use crate::consensus::*;
    use serde_json::json;

    // Initialize logger for tests (only once)
    static INIT: std::sync::Once = std::sync::Once::new();

    fn init() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("error")),
                )
                .with_test_writer()
                .try_init();
        });
    }

    fn engine() -> ConsensusEngine {
        ConsensusEngine::new(ReplicaMode::Full)
    }

    /// A valid candidate for the current tip.
    fn next_block(engine: &ConsensusEngine, plate: &str) -> crate::chain::Block {
        engine.with_chain(|chain| {
            let tip_hash = chain.tip().unwrap().hash.clone();
            chain
                .create_block(&tip_hash, plate, json!({ "owner": "J. Doe" }), None)
                .unwrap()
        })
    }

    fn vote(hash: &str, index: u64, voter: &str, vote: Vote) -> VoteRecord {
        VoteRecord {
            block_hash: hash.to_string(),
            block_index: index,
            voter_id: voter.to_string(),
            vote,
        }
    }

    #[test]
    fn test_lone_node_self_accepts() {
        // Bootstrap: no external peers, quorum(0) = 1. Nothing is accepted
        // implicitly; the node's own explicit yes vote settles it.
        init();
        let engine = engine();
        let block = engine
            .create_candidate("ABC1234", json!({ "owner": "J. Doe" }), None, 0)
            .unwrap();
        assert_eq!(engine.candidate_count(), 1);
        assert_eq!(engine.with_chain(|c| c.len()), 1);

        let status = engine.submit_vote(&vote(&block.hash, block.index, "10.0.0.1", Vote::Yes), 0);
        assert_eq!(
            status,
            VoteStatus::Accepted {
                total_votes: 1,
                yes_votes: 1,
                decision: Decision::Accept
            }
        );
        assert_eq!(engine.candidate_count(), 0);
        assert_eq!(engine.with_chain(|c| c.len()), 2);
        assert_eq!(engine.with_chain(|c| c.tip().unwrap().hash.clone()), block.hash);
    }

    #[test]
    fn test_quorum_of_five_peers_needs_four_yes() {
        init();
        let engine = engine();
        let block = next_block(&engine, "ABC1234");
        engine.admit(block.clone(), 5);

        for (i, voter) in ["10.0.0.1", "10.0.0.2", "10.0.0.3"].iter().enumerate() {
            let status = engine.submit_vote(&vote(&block.hash, block.index, voter, Vote::Yes), 5);
            assert_eq!(
                status,
                VoteStatus::Accepted {
                    total_votes: i + 1,
                    yes_votes: i + 1,
                    decision: Decision::Pending
                }
            );
        }
        assert_eq!(engine.with_chain(|c| c.len()), 1);

        let status = engine.submit_vote(&vote(&block.hash, block.index, "10.0.0.4", Vote::Yes), 5);
        assert_eq!(
            status,
            VoteStatus::Accepted {
                total_votes: 4,
                yes_votes: 4,
                decision: Decision::Accept
            }
        );
        assert_eq!(engine.with_chain(|c| c.len()), 2);
    }

    #[test]
    fn test_full_turnout_without_quorum_rejects() {
        init();
        let engine = engine();
        let block = next_block(&engine, "ABC1234");
        engine.admit(block.clone(), 3);

        for voter in ["10.0.0.1", "10.0.0.2"] {
            let status = engine.submit_vote(&vote(&block.hash, block.index, voter, Vote::No), 3);
            assert!(matches!(
                status,
                VoteStatus::Accepted {
                    decision: Decision::Pending,
                    ..
                }
            ));
        }

        let status = engine.submit_vote(&vote(&block.hash, block.index, "10.0.0.3", Vote::No), 3);
        assert_eq!(
            status,
            VoteStatus::Accepted {
                total_votes: 3,
                yes_votes: 0,
                decision: Decision::Reject
            }
        );
        assert_eq!(engine.candidate_count(), 0);
        assert_eq!(engine.with_chain(|c| c.len()), 1);
    }

    #[test]
    fn test_duplicate_voter_is_counted_once() {
        init();
        let engine = engine();
        let block = next_block(&engine, "ABC1234");
        engine.admit(block.clone(), 5);

        let first = engine.submit_vote(&vote(&block.hash, block.index, "10.0.0.1", Vote::Yes), 5);
        assert_eq!(
            first,
            VoteStatus::Accepted {
                total_votes: 1,
                yes_votes: 1,
                decision: Decision::Pending
            }
        );

        // Same voter again, even flipping the vote: tally unchanged.
        let dup = engine.submit_vote(&vote(&block.hash, block.index, "10.0.0.1", Vote::No), 5);
        assert_eq!(
            dup,
            VoteStatus::Accepted {
                total_votes: 1,
                yes_votes: 1,
                decision: Decision::Pending
            }
        );
    }

    #[test]
    fn test_orphan_vote_buffered_and_replayed_on_admission() {
        init();
        let engine = engine();
        let block = next_block(&engine, "ABC1234");

        let status = engine.submit_vote(&vote(&block.hash, block.index, "10.0.0.1", Vote::Yes), 5);
        assert_eq!(status, VoteStatus::NotYetReceived);
        assert_eq!(engine.orphan_count(), 1);
        assert_eq!(engine.candidate_count(), 0);

        engine.admit(block.clone(), 5);
        assert_eq!(engine.orphan_count(), 0);

        // The buffered vote is already in the tally: two more yes votes would
        // still be pending, the third reaches quorum(5) = 4.
        engine.submit_vote(&vote(&block.hash, block.index, "10.0.0.2", Vote::Yes), 5);
        let status = engine.submit_vote(&vote(&block.hash, block.index, "10.0.0.3", Vote::Yes), 5);
        assert_eq!(
            status,
            VoteStatus::Accepted {
                total_votes: 3,
                yes_votes: 3,
                decision: Decision::Pending
            }
        );
        let status = engine.submit_vote(&vote(&block.hash, block.index, "10.0.0.4", Vote::Yes), 5);
        assert!(matches!(
            status,
            VoteStatus::Accepted {
                decision: Decision::Accept,
                ..
            }
        ));
    }

    #[test]
    fn test_orphan_replay_matches_direct_arrival() {
        init();
        let held = engine();
        let direct = engine();
        let block_held = next_block(&held, "ABC1234");
        let block_direct = next_block(&direct, "ABC1234");

        let voters = ["10.0.0.1", "10.0.0.2", "10.0.0.3"];
        let votes = [Vote::Yes, Vote::No, Vote::Yes];

        // Held engine: votes land before admission, then replay.
        for (voter, v) in voters.iter().zip(votes) {
            let status =
                held.submit_vote(&vote(&block_held.hash, block_held.index, voter, v), 9);
            assert_eq!(status, VoteStatus::NotYetReceived);
        }
        held.admit(block_held.clone(), 9);

        // Direct engine: admission first, same votes in the same order.
        direct.admit(block_direct.clone(), 9);
        let mut last = VoteStatus::NotYetReceived;
        for (voter, v) in voters.iter().zip(votes) {
            last = direct.submit_vote(&vote(&block_direct.hash, block_direct.index, voter, v), 9);
        }

        // Same tally either way: a follow-up duplicate-free vote sees it.
        let probe_held =
            held.submit_vote(&vote(&block_held.hash, block_held.index, "10.0.0.9", Vote::No), 9);
        assert_eq!(
            probe_held,
            VoteStatus::Accepted {
                total_votes: 4,
                yes_votes: 2,
                decision: Decision::Pending
            }
        );
        assert_eq!(
            last,
            VoteStatus::Accepted {
                total_votes: 3,
                yes_votes: 2,
                decision: Decision::Pending
            }
        );
    }

    #[test]
    fn test_orphan_replay_can_settle_consensus() {
        init();
        let engine = engine();
        let block = next_block(&engine, "ABC1234");

        for voter in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            engine.submit_vote(&vote(&block.hash, block.index, voter, Vote::Yes), 3);
        }
        assert_eq!(engine.with_chain(|c| c.len()), 1);

        // quorum(3) = 3: admission alone commits the block.
        let decision = engine.admit(block.clone(), 3);
        assert_eq!(decision, Decision::Accept);
        assert_eq!(engine.with_chain(|c| c.len()), 2);
        assert_eq!(engine.candidate_count(), 0);
        assert_eq!(engine.orphan_count(), 0);
    }

    #[test]
    fn test_vote_after_accept_is_already_decided() {
        init();
        let engine = engine();
        let block = next_block(&engine, "ABC1234");
        engine.admit(block.clone(), 1);
        engine.submit_vote(&vote(&block.hash, block.index, "10.0.0.1", Vote::Yes), 1);
        assert_eq!(engine.with_chain(|c| c.len()), 2);

        // Late straggler cannot change the outcome; no tally is recreated.
        let late = engine.submit_vote(&vote(&block.hash, block.index, "10.0.0.2", Vote::No), 1);
        assert_eq!(late, VoteStatus::AlreadyDecided);
        assert_eq!(engine.candidate_count(), 0);
        assert_eq!(engine.with_chain(|c| c.len()), 2);
    }

    #[test]
    fn test_vote_for_block_deep_in_chain_is_already_decided() {
        init();
        let engine = engine();

        let first = next_block(&engine, "ABC1234");
        engine.admit(first.clone(), 1);
        engine.submit_vote(&vote(&first.hash, first.index, "10.0.0.1", Vote::Yes), 1);

        let second = next_block(&engine, "XYZ9876");
        engine.admit(second.clone(), 1);
        engine.submit_vote(&vote(&second.hash, second.index, "10.0.0.1", Vote::Yes), 1);
        assert_eq!(engine.with_chain(|c| c.len()), 3);

        // `first` is now two positions back in the committed chain.
        let status = engine.submit_vote(&vote(&first.hash, first.index, "10.0.0.2", Vote::Yes), 1);
        assert_eq!(status, VoteStatus::AlreadyDecided);
        assert_eq!(engine.candidate_count(), 0);
    }

    #[test]
    fn test_duplicate_admission_keeps_tally() {
        init();
        let engine = engine();
        let block = next_block(&engine, "ABC1234");
        engine.admit(block.clone(), 5);
        engine.submit_vote(&vote(&block.hash, block.index, "10.0.0.1", Vote::Yes), 5);

        // A duplicate validation request must not reset the tally.
        engine.admit(block.clone(), 5);
        let status = engine.submit_vote(&vote(&block.hash, block.index, "10.0.0.2", Vote::Yes), 5);
        assert_eq!(
            status,
            VoteStatus::Accepted {
                total_votes: 2,
                yes_votes: 2,
                decision: Decision::Pending
            }
        );
    }

    #[test]
    fn test_orphan_capacity_bounds_engine_buffer() {
        init();
        let engine = ConsensusEngine::with_orphan_capacity(ReplicaMode::Full, 2);
        for i in 0..4 {
            engine.submit_vote(
                &vote(&format!("unknown-{}", i), 2, "10.0.0.1", Vote::Yes),
                5,
            );
        }
        assert_eq!(engine.orphan_count(), 2);
    }

    #[test]
    fn test_commit_without_candidate_is_invariant_violation() {
        init();
        let engine = engine();
        let err = engine.commit("no-such-hash").unwrap_err();
        assert!(matches!(err, ConsensusError::UnknownCandidate(_)));
    }

    #[test]
    fn test_discard_is_idempotent_and_drops_orphans() {
        init();
        let engine = engine();
        let block = next_block(&engine, "ABC1234");
        engine.submit_vote(&vote(&block.hash, block.index, "10.0.0.1", Vote::Yes), 5);
        engine.admit(block.clone(), 5);
        engine.submit_vote(&vote(&block.hash, block.index, "10.0.0.2", Vote::Yes), 5);

        engine.discard(&block.hash);
        engine.discard(&block.hash);
        assert_eq!(engine.candidate_count(), 0);
        assert_eq!(engine.orphan_count(), 0);
        assert_eq!(engine.with_chain(|c| c.len()), 1);
    }

    #[test]
    fn test_validate_candidate_votes_yes_for_valid_block() {
        init();
        let engine = engine();
        let block = next_block(&engine, "ABC1234");
        let (vote, detail) = engine.validate_candidate(block, 5).unwrap();
        assert_eq!(vote, Vote::Yes);
        assert!(detail.is_valid());
        assert_eq!(engine.candidate_count(), 1);
    }

    #[test]
    fn test_validate_candidate_votes_no_with_detail() {
        init();
        let engine = engine();
        let mut block = next_block(&engine, "ABC1234");
        block.hash = "deadbeef".to_string();
        let (vote, detail) = engine.validate_candidate(block, 5).unwrap();
        assert_eq!(vote, Vote::No);
        assert!(detail.index_ok && detail.linkage_ok);
        assert!(!detail.hash_ok);
    }

    #[test]
    fn test_create_candidate_rejects_malformed_input() {
        init();
        let engine = engine();
        let err = engine
            .create_candidate("", json!({}), None, 0)
            .unwrap_err();
        assert_eq!(err.field, "plate");
        let err = engine
            .create_candidate("ABC1234", json!({}), Some("yesterday".to_string()), 0)
            .unwrap_err();
        assert_eq!(err.field, "timestamp");
        // Nothing reached consensus state.
        assert_eq!(engine.candidate_count(), 0);
    }
}
