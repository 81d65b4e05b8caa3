use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crypto::hash::{sha3_256, Hash256};
use crate::tx::serde_hex;
use crate::utils::merkle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    NodeSelection,
    ChainSelection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodStatus {
    Active,
    Completed,
}

/// Payload of a chain-selection vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainVoteData {
    pub target_chain_id: String,
    pub fork_height: u64,
    /// Stake backing the vote; quadratic power derives from this.
    pub amount: u128,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub vote_id: Hash256,
    pub period_id: u64,
    pub voter_address: String,
    #[serde(with = "serde_hex")]
    pub voter_public_key: Vec<u8>,
    pub chain_vote_data: Option<ChainVoteData>,
    pub approve: bool,
    pub timestamp: u64,
    #[serde(with = "serde_hex")]
    pub signature: Vec<u8>,
    /// Chain height observed by the voter at submission.
    pub height: u64,
    /// Voter balance at submission; quadratic power falls back to this
    /// when no chain-vote stake is attached.
    pub balance: u128,
    /// `⌊√amount⌋`, filled in by the engine on admission.
    pub voting_power: u128,
}

impl Vote {
    /// Bytes the voter signs. Excludes the signature itself and the
    /// engine-assigned voting power.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(128);
        data.extend_from_slice(&self.period_id.to_le_bytes());
        data.extend_from_slice(self.voter_address.as_bytes());
        data.push(self.approve as u8);
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data.extend_from_slice(&self.height.to_le_bytes());
        data.extend_from_slice(&self.balance.to_le_bytes());
        if let Some(cv) = &self.chain_vote_data {
            data.extend_from_slice(cv.target_chain_id.as_bytes());
            data.extend_from_slice(&cv.fork_height.to_le_bytes());
            data.extend_from_slice(&cv.amount.to_le_bytes());
        }
        data
    }

    pub fn compute_id(&self) -> Hash256 {
        sha3_256(&self.canonical_bytes())
    }

    /// The stake amount quadratic power is computed from.
    pub fn stake(&self) -> u128 {
        self.chain_vote_data
            .as_ref()
            .map(|cv| cv.amount)
            .unwrap_or(self.balance)
    }

    pub fn serialized_size(&self) -> usize {
        bincode::serialize(self).map(|b| b.len()).unwrap_or(512)
    }

    /// Commitment hashed into the block's `validator_merkle_root`:
    /// `{vote_id, voter, timestamp}`.
    pub fn commitment(&self) -> Hash256 {
        let mut data = Vec::with_capacity(32 + self.voter_address.len() + 8);
        data.extend_from_slice(&self.vote_id.0);
        data.extend_from_slice(self.voter_address.as_bytes());
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        sha3_256(&data)
    }
}

/// Merkle root over vote commitments, in vote order.
pub fn votes_merkle_root(votes: &[Vote]) -> Hash256 {
    let leaves: Vec<Hash256> = votes.iter().map(|v| v.commitment()).collect();
    merkle::create_root(&leaves)
}

/// Outcome of a chain-selection period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForkDecision {
    pub selected_chain_id: String,
    pub new_chain_power: u128,
    pub old_chain_power: u128,
    pub decided_at: u64,
    pub fork_height: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetingChains {
    pub old_chain_id: String,
    pub new_chain_id: String,
    pub fork_height: u64,
}

/// One voting period. Votes key on the voter address — the map itself
/// enforces one vote per voter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingPeriod {
    pub period_id: u64,
    pub period_type: PeriodType,
    pub start_block: u64,
    pub end_block: u64,
    /// Unix milliseconds.
    pub start_time: u64,
    pub end_time: u64,
    pub status: PeriodStatus,
    pub votes: BTreeMap<String, Vote>,
    pub votes_merkle_root: Hash256,
    pub is_audited: bool,
    pub fork_decision: Option<ForkDecision>,
    pub competing_chains: Option<CompetingChains>,
    pub created_at: u64,
}

impl VotingPeriod {
    pub fn new(
        period_id: u64,
        period_type: PeriodType,
        start_block: u64,
        block_span: u64,
        now_ms: u64,
        length_ms: u64,
    ) -> Self {
        Self {
            period_id,
            period_type,
            start_block,
            end_block: start_block + block_span,
            start_time: now_ms,
            end_time: now_ms + length_ms,
            status: PeriodStatus::Active,
            votes: BTreeMap::new(),
            votes_merkle_root: Hash256::ZERO,
            is_audited: false,
            fork_decision: None,
            competing_chains: None,
            created_at: now_ms,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == PeriodStatus::Active
    }

    pub fn in_block_window(&self, height: u64) -> bool {
        (self.start_block..=self.end_block).contains(&height)
    }

    pub fn in_time_window(&self, now_ms: u64) -> bool {
        (self.start_time..self.end_time).contains(&now_ms)
    }

    pub fn expired(&self, now_ms: u64) -> bool {
        now_ms >= self.end_time
    }

    pub fn has_voted(&self, voter: &str) -> bool {
        self.votes.contains_key(voter)
    }

    /// Insert a validated vote and refresh the merkle root. Returns false
    /// when the voter already has a vote recorded.
    pub fn insert_vote(&mut self, vote: Vote) -> bool {
        if self.has_voted(&vote.voter_address) {
            return false;
        }
        self.votes.insert(vote.voter_address.clone(), vote);
        self.refresh_merkle_root();
        true
    }

    pub fn refresh_merkle_root(&mut self) {
        let votes: Vec<Vote> = self.votes.values().cloned().collect();
        self.votes_merkle_root = votes_merkle_root(&votes);
    }

    /// Stake totals for chain selection: (approved, rejected).
    pub fn chain_vote_totals(&self) -> (u128, u128) {
        let mut approved: u128 = 0;
        let mut rejected: u128 = 0;
        for vote in self.votes.values() {
            if vote.approve {
                approved += vote.stake();
            } else {
                rejected += vote.stake();
            }
        }
        (approved, rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voting::power::voting_power;

    pub(crate) fn make_vote(voter: &str, period_id: u64, approve: bool, amount: u128) -> Vote {
        let mut vote = Vote {
            vote_id: Hash256::ZERO,
            period_id,
            voter_address: voter.to_string(),
            voter_public_key: vec![],
            chain_vote_data: Some(ChainVoteData {
                target_chain_id: "chain-b".into(),
                fork_height: 90,
                amount,
            }),
            approve,
            timestamp: 1_700_000_000,
            signature: vec![],
            height: 100,
            balance: amount,
            voting_power: 0,
        };
        vote.vote_id = vote.compute_id();
        vote.voting_power = voting_power(amount);
        vote
    }

    #[test]
    fn test_one_vote_per_voter() {
        let mut period = VotingPeriod::new(1, PeriodType::ChainSelection, 100, 10, 0, 1_000);
        assert!(period.insert_vote(make_vote("nvr1a", 1, true, 100)));
        assert!(!period.insert_vote(make_vote("nvr1a", 1, false, 900)));
        assert_eq!(period.votes.len(), 1);
        assert!(period.votes["nvr1a"].approve);
    }

    #[test]
    fn test_merkle_root_tracks_votes() {
        let mut period = VotingPeriod::new(1, PeriodType::ChainSelection, 100, 10, 0, 1_000);
        assert!(period.votes_merkle_root.is_zero());

        period.insert_vote(make_vote("nvr1a", 1, true, 100));
        let after_one = period.votes_merkle_root;
        assert!(!after_one.is_zero());

        period.insert_vote(make_vote("nvr1b", 1, false, 200));
        assert_ne!(period.votes_merkle_root, after_one);
    }

    #[test]
    fn test_windows() {
        let period = VotingPeriod::new(1, PeriodType::NodeSelection, 100, 10, 5_000, 1_000);
        assert!(period.in_block_window(100));
        assert!(period.in_block_window(110));
        assert!(!period.in_block_window(111));
        assert!(period.in_time_window(5_000));
        assert!(period.in_time_window(5_999));
        assert!(!period.in_time_window(6_000));
        assert!(period.expired(6_000));
        assert!(!period.expired(5_999));
    }

    #[test]
    fn test_chain_vote_totals() {
        let mut period = VotingPeriod::new(1, PeriodType::ChainSelection, 100, 10, 0, 1_000);
        period.insert_vote(make_vote("nvr1a", 1, true, 6_000));
        period.insert_vote(make_vote("nvr1b", 1, true, 4_000));
        period.insert_vote(make_vote("nvr1c", 1, false, 2_500));
        assert_eq!(period.chain_vote_totals(), (10_000, 2_500));
    }

    #[test]
    fn test_vote_commitment_depends_on_fields() {
        let a = make_vote("nvr1a", 1, true, 100);
        let mut b = a.clone();
        b.timestamp += 1;
        assert_ne!(a.commitment(), b.commitment());
    }

    #[test]
    fn test_vote_serialized_size_positive() {
        let v = make_vote("nvr1a", 1, true, 100);
        assert!(v.serialized_size() > 0);
    }
}
