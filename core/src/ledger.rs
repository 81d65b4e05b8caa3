use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::blockchain::block::{Block, BlockHeader, MEDIAN_TIME_SPAN};
use crate::blockchain::consensus::{self, ADJUSTMENT_INTERVAL};
use crate::blockchain::reward;
use crate::crypto::hash::Hash256;
use crate::error::{ConsensusError, Result};
use crate::storage::{keys, KvStore, WriteBatch};
use crate::tx::{Utxo, MAX_TX_SIZE};
use crate::validators::Validator;

/// Read-only snapshot interface over chain state. The mempool, the PoW
/// engine and the voting engine all consume the chain exclusively through
/// this trait; only the chain driver writes.
pub trait LedgerView: Send + Sync {
    fn height(&self) -> u64;
    fn best_hash(&self) -> Hash256;
    fn block_by_height(&self, height: u64) -> Option<Block>;
    fn block_by_hash(&self, hash: &Hash256) -> Option<Block>;
    fn utxo(&self, txid: &Hash256, index: u32) -> Option<Utxo>;
    fn utxo_is_spent(&self, txid: &Hash256, index: u32) -> bool;
    fn contains_tx(&self, txid: &Hash256) -> bool;
    fn validator_set(&self) -> Vec<Validator>;
    fn validator(&self, address: &str) -> Option<Validator>;

    /// Block subsidy at `height`.
    fn reward_schedule(&self, height: u64) -> u128 {
        reward::reward_schedule(height)
    }

    /// Transaction size policy ceiling.
    fn max_tx_size(&self) -> usize {
        MAX_TX_SIZE
    }

    /// Median timestamp of the last 11 blocks — the lower timestamp bound
    /// for new blocks.
    fn median_time_past(&self) -> Option<u64>;

    /// Wall-clock span of the retarget window ending at `last`, when the
    /// block after `last` sits on an adjustment boundary.
    fn retarget_span(&self, last: &BlockHeader) -> Option<u64> {
        let next_height = last.height + 1;
        if next_height % ADJUSTMENT_INTERVAL != 0 {
            return None;
        }
        let first_height = next_height.saturating_sub(ADJUSTMENT_INTERVAL);
        let first = self.block_by_height(first_height)?;
        Some(last.timestamp.saturating_sub(first.header.timestamp).max(1))
    }

    /// Difficulty the next block must carry.
    fn next_difficulty(&self) -> u64 {
        let tip = self.height();
        match self.block_by_height(tip) {
            Some(block) => consensus::next_difficulty(
                tip + 1,
                block.header.difficulty,
                self.retarget_span(&block.header),
            ),
            None => consensus::INITIAL_DIFFICULTY,
        }
    }
}

/// Where a confirmed transaction landed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxLocation {
    pub txid: Hash256,
    pub block_height: u64,
    pub block_hash: Hash256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChainHead {
    height: u64,
    hash: Hash256,
}

/// Difficulty log record persisted per accepted block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifficultyRecord {
    pub height: u64,
    pub difficulty: u64,
    pub timestamp: u64,
}

/// Chain state over a `KvStore`. Creates and persists the genesis block on
/// first open (absent `chain:head`).
pub struct StoreLedger {
    store: Arc<dyn KvStore>,
    tip: RwLock<ChainHead>,
}

impl StoreLedger {
    pub fn open(store: Arc<dyn KvStore>, genesis_timestamp: u64) -> Result<Self> {
        let head = store
            .get(&keys::chain_head())
            .map_err(ConsensusError::from_storage)?;

        let tip = match head {
            Some(bytes) => bincode::deserialize::<ChainHead>(&bytes).map_err(|e| {
                ConsensusError::ConsensusStateCorrupted(format!("chain head: {e}"))
            })?,
            None => {
                let genesis = Block::genesis(genesis_timestamp);
                log::info!("bootstrapping genesis block {}", genesis.hash);
                let ledger = Self {
                    store: store.clone(),
                    tip: RwLock::new(ChainHead {
                        height: 0,
                        hash: genesis.hash,
                    }),
                };
                ledger.persist_block(&genesis)?;
                return Ok(ledger);
            }
        };

        Ok(Self {
            store,
            tip: RwLock::new(tip),
        })
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Append a fully validated block at the tip.
    pub fn apply_block(&self, block: &Block) -> Result<()> {
        {
            let tip = self.tip.read();
            if block.header.height != tip.height + 1 {
                return Err(ConsensusError::StructureInvalid(format!(
                    "height {} does not extend tip {}",
                    block.header.height, tip.height
                )));
            }
            if block.header.previous_hash != tip.hash {
                return Err(ConsensusError::StructureInvalid(format!(
                    "previous hash {} does not match tip {}",
                    block.header.previous_hash, tip.hash
                )));
            }
        }
        self.persist_block(block)
    }

    fn persist_block(&self, block: &Block) -> Result<()> {
        let mut batch = WriteBatch::new();
        let encoded = bincode::serialize(block)
            .map_err(|e| ConsensusError::ConsensusStateCorrupted(format!("encode block: {e}")))?;

        batch.put(keys::block_by_height(block.header.height), encoded.clone());
        batch.put(keys::block_by_hash(&block.hash), encoded);

        for tx in &block.transactions {
            let location = TxLocation {
                txid: tx.id,
                block_height: block.header.height,
                block_hash: block.hash,
            };
            batch.put(
                keys::tx(&tx.id),
                bincode::serialize(&location).expect("tx location encodes"),
            );

            // Spend inputs
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    let mut utxo = self
                        .utxo(&input.prev_txid, input.output_index)
                        .ok_or_else(|| {
                            ConsensusError::ConsensusStateCorrupted(format!(
                                "spend of unknown utxo {}",
                                input.outpoint_label()
                            ))
                        })?;
                    if utxo.spent {
                        return Err(ConsensusError::ConsensusStateCorrupted(format!(
                            "double spend of {} reached the ledger",
                            input.outpoint_label()
                        )));
                    }
                    utxo.spent = true;
                    batch.put(
                        keys::utxo(&input.prev_txid, input.output_index),
                        bincode::serialize(&utxo).expect("utxo encodes"),
                    );
                }
            }

            // Create outputs
            for output in &tx.outputs {
                let utxo = Utxo {
                    txid: tx.id,
                    output_index: output.index,
                    address: output.address.clone(),
                    amount: output.amount,
                    script: output.script.clone(),
                    spent: false,
                    height: block.header.height,
                    coinbase: tx.is_coinbase(),
                    currency_tag: output.currency_tag.clone(),
                };
                batch.put(
                    keys::utxo(&tx.id, output.index),
                    bincode::serialize(&utxo).expect("utxo encodes"),
                );
            }
        }

        let record = DifficultyRecord {
            height: block.header.height,
            difficulty: block.header.difficulty,
            timestamp: block.header.timestamp,
        };
        batch.put(
            keys::difficulty(&block.hash),
            bincode::serialize(&record).expect("difficulty record encodes"),
        );

        let head = ChainHead {
            height: block.header.height,
            hash: block.hash,
        };
        batch.put(
            keys::chain_head(),
            bincode::serialize(&head).expect("chain head encodes"),
        );

        self.store
            .write_batch(batch)
            .map_err(ConsensusError::from_storage)?;

        *self.tip.write() = head;
        Ok(())
    }

    pub fn register_validator(&self, validator: &Validator) -> Result<()> {
        self.store
            .put(
                &keys::validator(&validator.address),
                &bincode::serialize(validator)
                    .map_err(|e| ConsensusError::ConsensusStateCorrupted(e.to_string()))?,
            )
            .map_err(ConsensusError::from_storage)
    }

    fn decode_block(bytes: Vec<u8>) -> Option<Block> {
        bincode::deserialize(&bytes).ok()
    }
}

impl LedgerView for StoreLedger {
    fn height(&self) -> u64 {
        self.tip.read().height
    }

    fn best_hash(&self) -> Hash256 {
        self.tip.read().hash
    }

    fn block_by_height(&self, height: u64) -> Option<Block> {
        self.store
            .get(&keys::block_by_height(height))
            .ok()
            .flatten()
            .and_then(Self::decode_block)
    }

    fn block_by_hash(&self, hash: &Hash256) -> Option<Block> {
        self.store
            .get(&keys::block_by_hash(hash))
            .ok()
            .flatten()
            .and_then(Self::decode_block)
    }

    fn utxo(&self, txid: &Hash256, index: u32) -> Option<Utxo> {
        self.store
            .get(&keys::utxo(txid, index))
            .ok()
            .flatten()
            .and_then(|bytes| bincode::deserialize(&bytes).ok())
    }

    fn utxo_is_spent(&self, txid: &Hash256, index: u32) -> bool {
        self.utxo(txid, index).map(|u| u.spent).unwrap_or(false)
    }

    fn contains_tx(&self, txid: &Hash256) -> bool {
        self.store
            .get(&keys::tx(txid))
            .ok()
            .flatten()
            .is_some()
    }

    fn validator_set(&self) -> Vec<Validator> {
        self.store
            .scan_prefix(&keys::validator_prefix())
            .ok()
            .map(|pairs| {
                pairs
                    .into_iter()
                    .filter_map(|(_, v)| bincode::deserialize(&v).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn validator(&self, address: &str) -> Option<Validator> {
        self.store
            .get(&keys::validator(address))
            .ok()
            .flatten()
            .and_then(|bytes| bincode::deserialize(&bytes).ok())
    }

    fn median_time_past(&self) -> Option<u64> {
        let tip = self.tip.read().height;
        let mut timestamps = Vec::with_capacity(MEDIAN_TIME_SPAN);
        let mut height = tip;
        loop {
            let block = self.block_by_height(height)?;
            timestamps.push(block.header.timestamp);
            if timestamps.len() == MEDIAN_TIME_SPAN || height == 0 {
                break;
            }
            height -= 1;
        }
        timestamps.sort_unstable();
        Some(timestamps[timestamps.len() / 2])
    }
}
