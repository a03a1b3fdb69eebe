//! Timing instrumentation for the proposal -> validation -> consensus
//! pipeline. Observability only; nothing here feeds back into a decision.

use crate::consensus::Vote;
use chrono::{DateTime, Utc};
use serde::Serialize;

fn pretty(ts: &Option<DateTime<Utc>>) -> Option<String> {
    ts.map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
}

fn millis_between(start: &Option<DateTime<Utc>>, end: &Option<DateTime<Utc>>) -> Option<i64> {
    match (start, end) {
        (Some(s), Some(e)) => Some((*e - *s).num_milliseconds()),
        _ => None,
    }
}

/// One received vote with its local arrival time.
#[derive(Serialize, Debug, Clone)]
pub struct VoteArrival {
    pub timestamp: String,
    pub voter: String,
    pub vote: Vote,
}

/// Milestone timestamps for one candidate-block round.
#[derive(Debug, Clone, Default)]
pub struct VotingStatistics {
    started_creation: Option<DateTime<Utc>>,
    local_creation_finished: Option<DateTime<Utc>>,
    creation_results_received: Option<DateTime<Utc>>,
    started_consensus: Option<DateTime<Utc>>,
    consensus_finished: Option<DateTime<Utc>>,
    validation_started: Option<DateTime<Utc>>,
    local_validation_finished: Option<DateTime<Utc>>,
    validation_results_received: Option<DateTime<Utc>>,
    votes: Vec<VoteArrival>,
}

/// Serializable duration report for a finished (or in-flight) round.
#[derive(Serialize, Debug, Clone)]
pub struct StatisticsReport {
    pub block_creation_local_ms: Option<i64>,
    pub block_creation_total_ms: Option<i64>,
    pub validation_local_ms: Option<i64>,
    pub validation_total_ms: Option<i64>,
    pub consensus_total_ms: Option<i64>,
    pub number_of_nodes_in_network: usize,
    pub detailed_timestamps: DetailedTimestamps,
}

#[derive(Serialize, Debug, Clone)]
pub struct DetailedTimestamps {
    pub started_creation: Option<String>,
    pub local_creation_finished: Option<String>,
    pub creation_results_received: Option<String>,
    pub started_consensus: Option<String>,
    pub consensus_finished: Option<String>,
    pub validation_started: Option<String>,
    pub local_validation_finished: Option<String>,
    pub validation_results_received: Option<String>,
    pub received_votes: Vec<VoteArrival>,
}

impl VotingStatistics {
    /// Starts a round at block-creation time.
    pub fn started_now() -> Self {
        VotingStatistics {
            started_creation: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Local block assembly done; consensus clock starts here.
    pub fn creation_local_finished(&mut self) {
        let now = Utc::now();
        self.local_creation_finished = Some(now);
        self.started_consensus = Some(now);
    }

    /// Every peer answered the validation broadcast.
    pub fn creation_results_received(&mut self) {
        self.creation_results_received = Some(Utc::now());
    }

    pub fn validation_started(&mut self) {
        self.validation_started = Some(Utc::now());
    }

    pub fn local_validation_finished(&mut self) {
        self.local_validation_finished = Some(Utc::now());
    }

    pub fn validation_results_received(&mut self) {
        self.validation_results_received = Some(Utc::now());
    }

    pub fn consensus_finished(&mut self) {
        self.consensus_finished = Some(Utc::now());
    }

    pub fn vote_received(&mut self, voter: &str, vote: Vote) {
        self.votes.push(VoteArrival {
            timestamp: Utc::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            voter: voter.to_string(),
            vote,
        });
    }

    pub fn consensus_total_ms(&self) -> Option<i64> {
        millis_between(&self.started_consensus, &self.consensus_finished)
    }

    pub fn validation_local_ms(&self) -> Option<i64> {
        millis_between(&self.validation_started, &self.local_validation_finished)
    }

    pub fn results(&self, number_of_nodes: usize) -> StatisticsReport {
        StatisticsReport {
            block_creation_local_ms: millis_between(
                &self.started_creation,
                &self.local_creation_finished,
            ),
            block_creation_total_ms: millis_between(
                &self.started_creation,
                &self.creation_results_received,
            ),
            validation_local_ms: self.validation_local_ms(),
            validation_total_ms: millis_between(
                &self.validation_started,
                &self.validation_results_received,
            ),
            consensus_total_ms: self.consensus_total_ms(),
            number_of_nodes_in_network: number_of_nodes,
            detailed_timestamps: DetailedTimestamps {
                started_creation: pretty(&self.started_creation),
                local_creation_finished: pretty(&self.local_creation_finished),
                creation_results_received: pretty(&self.creation_results_received),
                started_consensus: pretty(&self.started_consensus),
                consensus_finished: pretty(&self.consensus_finished),
                validation_started: pretty(&self.validation_started),
                local_validation_finished: pretty(&self.local_validation_finished),
                validation_results_received: pretty(&self.validation_results_received),
                received_votes: self.votes.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_round_produces_durations() {
        let mut stats = VotingStatistics::started_now();
        stats.creation_local_finished();
        stats.vote_received("10.0.0.1", Vote::Yes);
        stats.vote_received("10.0.0.2", Vote::No);
        stats.consensus_finished();
        stats.creation_results_received();

        let report = stats.results(3);
        assert!(report.block_creation_local_ms.is_some());
        assert!(report.block_creation_total_ms.is_some());
        assert!(report.consensus_total_ms.is_some());
        assert!(report.consensus_total_ms.unwrap() >= 0);
        assert_eq!(report.number_of_nodes_in_network, 3);
        assert_eq!(report.detailed_timestamps.received_votes.len(), 2);
    }

    #[test]
    fn test_partial_round_leaves_gaps() {
        let mut stats = VotingStatistics::default();
        stats.validation_started();
        stats.local_validation_finished();

        let report = stats.results(1);
        assert!(report.validation_local_ms.is_some());
        assert!(report.validation_total_ms.is_none());
        assert!(report.block_creation_local_ms.is_none());
        assert!(report.detailed_timestamps.started_creation.is_none());
    }

    #[test]
    fn test_report_serializes() {
        let stats = VotingStatistics::started_now();
        let value = serde_json::to_value(stats.results(0)).unwrap();
        assert!(value.get("detailed_timestamps").is_some());
    }
}
