//! Quorum arithmetic and the accept/reject decision.

use crate::consensus::types::Decision;

/// Minimum yes-votes to accept a candidate: `floor(2/3 * peer_count) + 1`.
///
/// With zero known peers the quorum is 1, so a lone bootstrap node accepts
/// its own block after its single self-vote. Intentional, not a bug.
pub fn quorum(peer_count: usize) -> usize {
    peer_count * 2 / 3 + 1
}

/// Decides the current tally against the known peer-set size.
///
/// The tally only grows and votes are never retracted, so re-running this
/// after every recorded vote is both correct and sufficient. Note the reject
/// condition counts unreachable peers in `peer_count`; a candidate whose
/// silent peers never vote stays pending indefinitely. Hardening gap: no
/// deadline-based discard exists here.
pub fn decide(total_votes: usize, yes_votes: usize, peer_count: usize) -> Decision {
    if yes_votes >= quorum(peer_count) {
        Decision::Accept
    } else if total_votes >= peer_count {
        Decision::Reject
    } else {
        Decision::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quorum_values() {
        assert_eq!(quorum(0), 1);
        assert_eq!(quorum(1), 1);
        assert_eq!(quorum(3), 3);
        assert_eq!(quorum(4), 3);
        assert_eq!(quorum(5), 4);
        assert_eq!(quorum(6), 5);
        assert_eq!(quorum(10), 7);
    }

    #[test]
    fn test_pending_until_quorum_with_five_peers() {
        // quorum(5) = 4: three yes votes are not enough, the fourth accepts.
        assert_eq!(decide(1, 1, 5), Decision::Pending);
        assert_eq!(decide(2, 2, 5), Decision::Pending);
        assert_eq!(decide(3, 3, 5), Decision::Pending);
        assert_eq!(decide(4, 4, 5), Decision::Accept);
    }

    #[test]
    fn test_reject_when_all_peers_voted_without_quorum() {
        // quorum(3) = 3: three no votes exhaust the peer set.
        assert_eq!(decide(1, 0, 3), Decision::Pending);
        assert_eq!(decide(2, 0, 3), Decision::Pending);
        assert_eq!(decide(3, 0, 3), Decision::Reject);
    }

    #[test]
    fn test_accept_wins_over_reject_on_full_turnout() {
        assert_eq!(decide(3, 3, 3), Decision::Accept);
        assert_eq!(decide(5, 4, 5), Decision::Accept);
    }

    #[test]
    fn test_lone_node_bootstrap() {
        assert_eq!(quorum(0), 1);
        assert_eq!(decide(1, 1, 0), Decision::Accept);
        // A lone node that somehow votes no exhausts its empty peer set.
        assert_eq!(decide(1, 0, 0), Decision::Reject);
    }
}
