use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::blockchain::block::{
    Block, BlockHeader, MAX_BLOCK_SIZE, MAX_BLOCK_VERSION, MAX_FUTURE_DRIFT, MIN_BLOCK_VERSION,
};
use crate::blockchain::consensus::target_from_difficulty;
use crate::blockchain::reward::reward_schedule;
use crate::crypto::hash::Hash256;
use crate::error::Result;
use crate::ledger::LedgerView;
use crate::mempool::Mempool;
use crate::tx::Transaction;

/// Headroom left for header + metadata when filling a template.
const TEMPLATE_SIZE_MARGIN: usize = 4_096;

/// Miner-facing block template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockTemplate {
    pub version: u32,
    pub height: u64,
    pub previous_hash: Hash256,
    pub timestamp: u64,
    pub difficulty: u64,
    /// Coinbase first, then mempool selection in fee order.
    pub transactions: Vec<Transaction>,
    pub merkle_root: Hash256,
    pub target: Hash256,
    pub min_time: u64,
    pub max_time: u64,
    pub min_version: u32,
    pub max_version: u32,
    pub default_version: u32,
    pub miner_address: String,
    /// Mempool change counter at assembly; a moved counter means the
    /// template is stale.
    pub mempool_seq: u64,
}

impl BlockTemplate {
    pub fn into_block(self) -> Block {
        let fees: u128 = self
            .transactions
            .iter()
            .filter(|tx| !tx.is_coinbase())
            .map(|tx| tx.fee)
            .sum();
        let reward = reward_schedule(self.height);

        let header = BlockHeader {
            version: self.version,
            height: self.height,
            previous_hash: self.previous_hash,
            merkle_root: self.merkle_root,
            validator_merkle_root: Hash256::ZERO,
            timestamp: self.timestamp,
            difficulty: self.difficulty,
            nonce: 0,
            target: self.target,
            miner_address: self.miner_address.clone(),
            miner_public_key: String::new(),
        };

        let mut block = Block::new(header, self.transactions);
        block.fees = fees;
        block.block_reward = reward;
        block.total_supply_at_height = crate::blockchain::reward::total_supply_at(self.height);
        block.consensus_data.pow_score = self.difficulty;
        block
    }
}

/// Assemble a template at the current tip for `miner_address`.
///
/// Mempool transactions are taken in fee-rate order, except that a child
/// is skipped until every in-pool parent is already included.
pub fn build_template(
    ledger: &dyn LedgerView,
    mempool: &Mempool,
    miner_address: &str,
    now: u64,
) -> Result<BlockTemplate> {
    let height = ledger.height() + 1;
    let previous_hash = ledger.best_hash();
    let difficulty = ledger.next_difficulty();
    let mempool_seq = mempool.change_seq();

    let min_time = ledger.median_time_past().map(|m| m + 1).unwrap_or(now);
    let timestamp = now.max(min_time);
    let max_time = now + MAX_FUTURE_DRIFT;

    // Selection: fee order, but a child waits for the pass after its
    // in-pool parents land.
    let mut pending = mempool.get_pending_transactions(None, None);
    let mut included: Vec<Transaction> = Vec::new();
    let mut included_ids: HashSet<Hash256> = HashSet::new();
    let mut budget = MAX_BLOCK_SIZE - TEMPLATE_SIZE_MARGIN;
    let mut fees: u128 = 0;

    let mut progress = true;
    while progress && !pending.is_empty() {
        progress = false;
        let mut deferred = Vec::new();
        for tx in pending {
            let size = tx.serialized_size();
            let parents_ok = tx.inputs.iter().all(|input| {
                included_ids.contains(&input.prev_txid)
                    || ledger
                        .utxo(&input.prev_txid, input.output_index)
                        .map(|u| !u.spent)
                        .unwrap_or(false)
            });
            if size > budget || !parents_ok {
                deferred.push(tx);
                continue;
            }
            budget -= size;
            fees += tx.fee;
            included_ids.insert(tx.id);
            included.push(tx);
            progress = true;
        }
        pending = deferred;
    }

    let reward = reward_schedule(height);
    let coinbase = Transaction::coinbase(miner_address, reward + fees, height, timestamp);
    let mut transactions = Vec::with_capacity(included.len() + 1);
    transactions.push(coinbase);
    transactions.extend(included);

    let merkle_root = Block::calculate_merkle_root(&transactions);

    Ok(BlockTemplate {
        version: 1,
        height,
        previous_hash,
        timestamp,
        difficulty,
        transactions,
        merkle_root,
        target: target_from_difficulty(difficulty),
        min_time,
        max_time,
        min_version: MIN_BLOCK_VERSION,
        max_version: MAX_BLOCK_VERSION,
        default_version: 1,
        miner_address: miner_address.to_string(),
        mempool_seq,
    })
}

/// Refresh a candidate block in place from the live mempool: new
/// transaction set, merkle root, fees and timestamp. The nonce search
/// restarts from zero afterwards.
pub fn refresh_block(
    block: &mut Block,
    ledger: &dyn LedgerView,
    mempool: &Mempool,
    now: u64,
) -> Result<u64> {
    let template = build_template(ledger, mempool, &block.header.miner_address, now)?;
    let seq = template.mempool_seq;
    let rebuilt = template.into_block();
    *block = rebuilt;
    Ok(seq)
}
