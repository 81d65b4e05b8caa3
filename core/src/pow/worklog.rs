use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::crypto::hash::Hash256;
use crate::error::{ConsensusError, Result};
use crate::mempool::PowContribution;
use crate::storage::{keys, KvStore};

/// One accepted proof-of-work solution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionRecord {
    pub hash: Hash256,
    pub miner_address: String,
    pub height: u64,
    pub difficulty: u64,
    pub timestamp: u64,
}

/// Persistent log of accepted solutions with per-address contribution
/// totals. The mempool reads it to gate voter eligibility and reward
/// claims; the engine appends on every mined or accepted block.
pub struct WorkLog {
    store: Arc<dyn KvStore>,
    totals: RwLock<HashMap<String, u64>>,
}

impl WorkLog {
    /// Open the log, rebuilding in-memory totals from the solution
    /// namespace.
    pub fn open(store: Arc<dyn KvStore>) -> Result<Self> {
        let mut totals: HashMap<String, u64> = HashMap::new();
        let records = store
            .scan_prefix(b"pow:solution:")
            .map_err(ConsensusError::from_storage)?;
        for (_, value) in records {
            if let Ok(record) = bincode::deserialize::<SolutionRecord>(&value) {
                *totals.entry(record.miner_address).or_insert(0) += record.difficulty;
            }
        }
        Ok(Self {
            store,
            totals: RwLock::new(totals),
        })
    }

    pub fn record(&self, record: SolutionRecord) -> Result<()> {
        self.store
            .put(
                &keys::pow_solution(&record.hash),
                &bincode::serialize(&record)
                    .map_err(|e| ConsensusError::ConsensusStateCorrupted(e.to_string()))?,
            )
            .map_err(ConsensusError::from_storage)?;
        *self
            .totals
            .write()
            .entry(record.miner_address.clone())
            .or_insert(0) += record.difficulty;
        Ok(())
    }

    pub fn solutions_recorded(&self) -> usize {
        self.totals.read().len()
    }
}

impl PowContribution for WorkLog {
    fn contribution(&self, address: &str) -> u64 {
        self.totals.read().get(address).copied().unwrap_or(0)
    }
}
