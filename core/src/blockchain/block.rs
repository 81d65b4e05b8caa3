use serde::{Deserialize, Serialize};

use crate::crypto::hash::{sha3_256, Hash256};
use crate::tx::Transaction;
use crate::utils::merkle;
use crate::voting::period::{votes_merkle_root, Vote};

/// Maximum serialized block size (header + transactions + metadata).
pub const MAX_BLOCK_SIZE: usize = 2_000_000;

/// Accepted block header versions.
pub const MIN_BLOCK_VERSION: u32 = 1;
pub const MAX_BLOCK_VERSION: u32 = 2;

/// Blocks may be at most this far ahead of wall-clock time: 2 hours.
pub const MAX_FUTURE_DRIFT: u64 = 7_200;

/// Timestamps are bounded below by the median of this many previous blocks.
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Hybrid consensus scores carried with every block.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConsensusData {
    pub pow_score: u64,
    pub voting_score: u64,
    /// Participation rate as an exact rational; rounded only at the
    /// external boundary.
    pub participation_num: u64,
    pub participation_den: u64,
    pub period_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub height: u64,
    pub previous_hash: Hash256,
    pub merkle_root: Hash256,
    /// Merkle root over the block's vote commitments.
    pub validator_merkle_root: Hash256,
    pub timestamp: u64,
    pub difficulty: u64,
    pub nonce: u64,
    /// `MAX_TARGET / difficulty`, restated for light clients.
    pub target: Hash256,
    pub miner_address: String,
    #[serde(default)]
    pub miner_public_key: String,
}

impl BlockHeader {
    /// Canonical hashing input: version ‖ previous_hash ‖ merkle_root ‖
    /// timestamp ‖ difficulty ‖ nonce, fixed-width little-endian integers.
    pub fn canonical_bytes(&self) -> [u8; 92] {
        let mut data = [0u8; 92];
        data[0..4].copy_from_slice(&self.version.to_le_bytes());
        data[4..36].copy_from_slice(&self.previous_hash.0);
        data[36..68].copy_from_slice(&self.merkle_root.0);
        data[68..76].copy_from_slice(&self.timestamp.to_le_bytes());
        data[76..84].copy_from_slice(&self.difficulty.to_le_bytes());
        data[84..92].copy_from_slice(&self.nonce.to_le_bytes());
        data
    }

    pub fn calculate_hash(&self) -> Hash256 {
        sha3_256(&self.canonical_bytes())
    }

    pub fn meets_target(&self, target: &Hash256) -> bool {
        super::consensus::meets_target(&self.calculate_hash(), target)
    }
}

/// Complete block: header, transactions, votes and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub votes: Vec<Vote>,
    /// Addresses of validators that attested this block.
    pub validators: Vec<String>,
    /// Cached header hash; must equal `header.calculate_hash()`.
    pub hash: Hash256,
    /// Miner signature over the header hash.
    #[serde(default)]
    pub signature: Vec<u8>,
    pub fees: u128,
    pub block_reward: u128,
    pub total_supply_at_height: u128,
    pub consensus_data: ConsensusData,
    /// Sync hints (block locator + stop hash).
    #[serde(default)]
    pub locator: Vec<Hash256>,
    #[serde(default)]
    pub hash_stop: Hash256,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        let hash = header.calculate_hash();
        Self {
            header,
            transactions,
            votes: vec![],
            validators: vec![],
            hash,
            signature: vec![],
            fees: 0,
            block_reward: 0,
            total_supply_at_height: 0,
            consensus_data: ConsensusData::default(),
            locator: vec![],
            hash_stop: Hash256::ZERO,
        }
    }

    /// Merkle root over transaction ids.
    pub fn calculate_merkle_root(transactions: &[Transaction]) -> Hash256 {
        let leaves: Vec<Hash256> = transactions.iter().map(|tx| tx.id).collect();
        merkle::create_root(&leaves)
    }

    /// Merkle root over the block's vote commitments.
    pub fn calculate_validator_merkle_root(votes: &[Vote]) -> Hash256 {
        votes_merkle_root(votes)
    }

    /// Recompute the cached hash after header mutation (mining).
    pub fn reseal(&mut self) {
        self.hash = self.header.calculate_hash();
    }

    /// Deterministic block size, computed identically by producer and
    /// validator: header fields + transactions + votes + metadata.
    pub fn size(&self) -> usize {
        let header = 92                                  // canonical fields
            + 32                                         // validator_merkle_root
            + 32                                         // target
            + self.header.miner_address.len()
            + self.header.miner_public_key.len()
            + self.signature.len();
        let txs: usize = self.transactions.iter().map(|tx| tx.serialized_size()).sum();
        let votes: usize = self.votes.iter().map(|v| v.serialized_size()).sum();
        let validators = self.validators.iter().map(|a| a.len() + 1).sum::<usize>();
        // fees + reward + supply (u128 each) + consensus_data (5 × u64)
        let metadata = 16 * 3 + 8 * 5;
        header + txs + votes + validators + metadata
    }

    pub fn total_fees(&self) -> u128 {
        self.transactions
            .iter()
            .filter(|tx| !tx.is_coinbase())
            .map(|tx| tx.fee)
            .sum()
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }

    /// The genesis block. Deterministic for a given timestamp: every node
    /// bootstrapping from an empty store derives the same chain root.
    pub fn genesis(timestamp: u64) -> Self {
        let coinbase = Transaction::coinbase("nvr1genesis", 0, 0, timestamp);
        let merkle_root = Self::calculate_merkle_root(std::slice::from_ref(&coinbase));
        let difficulty = super::consensus::INITIAL_DIFFICULTY;

        let header = BlockHeader {
            version: 1,
            height: 0,
            previous_hash: Hash256::ZERO,
            merkle_root,
            validator_merkle_root: Hash256::ZERO,
            timestamp,
            difficulty,
            nonce: 0,
            target: super::consensus::target_from_difficulty(difficulty),
            miner_address: "nvr1genesis".to_string(),
            miner_public_key: String::new(),
        };

        let mut block = Block::new(header, vec![coinbase]);
        block.total_supply_at_height = 0;
        block
    }
}
