pub mod lmdb;
pub mod memory;

pub use lmdb::LmdbStore;
pub use memory::MemoryStore;

use anyhow::Result;

use crate::crypto::hash::Hash256;

/// A single operation in an atomic batch.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Ordered set of writes applied atomically: either every operation
/// commits or none do.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> &mut Self {
        self.ops.push(WriteOp::Put { key, value });
        self
    }

    pub fn delete(&mut self, key: Vec<u8>) -> &mut Self {
        self.ops.push(WriteOp::Delete { key });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Key/value persistence consumed by the consensus core.
///
/// Implementations must provide atomic batches and snapshot-consistent
/// prefix scans; everything else (file format, compaction, caching) is
/// theirs to decide.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;
    fn delete(&self, key: &[u8]) -> Result<()>;
    fn write_batch(&self, batch: WriteBatch) -> Result<()>;
    /// All `(key, value)` pairs whose key starts with `prefix`, key-ordered.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// Key namespaces. Heights are zero-padded decimal so lexicographic scan
/// order equals numeric order.
pub mod keys {
    use super::Hash256;

    pub fn block_by_height(height: u64) -> Vec<u8> {
        format!("block:height:{height:020}").into_bytes()
    }

    pub fn block_by_hash(hash: &Hash256) -> Vec<u8> {
        format!("block:hash:{hash}").into_bytes()
    }

    pub fn tx(hash: &Hash256) -> Vec<u8> {
        format!("tx:{hash}").into_bytes()
    }

    pub fn utxo(txid: &Hash256, index: u32) -> Vec<u8> {
        format!("utxo:{txid}:{index}").into_bytes()
    }

    pub fn validator(address: &str) -> Vec<u8> {
        format!("validator:{address}").into_bytes()
    }

    pub fn validator_prefix() -> Vec<u8> {
        b"validator:".to_vec()
    }

    pub fn voting_period(period_id: u64) -> Vec<u8> {
        format!("voting:period:{period_id:020}").into_bytes()
    }

    pub fn voting_period_prefix() -> Vec<u8> {
        b"voting:period:".to_vec()
    }

    pub fn voting_vote(period_id: u64, voter: &str) -> Vec<u8> {
        format!("voting:vote:{period_id:020}:{voter}").into_bytes()
    }

    pub fn chain_head() -> Vec<u8> {
        b"chain:head".to_vec()
    }

    pub fn difficulty(hash: &Hash256) -> Vec<u8> {
        format!("difficulty:{hash}").into_bytes()
    }

    pub fn pow_solution(hash: &Hash256) -> Vec<u8> {
        format!("pow:solution:{hash}").into_bytes()
    }
}
