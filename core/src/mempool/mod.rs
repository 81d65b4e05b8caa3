pub mod absence;
pub mod ancestry;
pub mod eligibility;
pub mod eviction;
pub mod fees;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::audit::{AuditSink, Severity};
use crate::blockchain::reward::COINBASE_MATURITY;
use crate::blockchain::validation::validate_tx_structure;
use crate::config::ConsensusConfig;
use crate::crypto::hash::Hash256;
use crate::crypto::keys::address_from_public_key;
use crate::error::{ConsensusError, Result};
use crate::ledger::LedgerView;
use crate::p2p::NetworkHealth;
use crate::tx::{Transaction, TxType};
use crate::utils::now_secs;
use crate::utils::rate_limiter::{RateLimiter, RateLimiterConfig};
use crate::utils::timed_lock::KeyedMutex;
use crate::validators::Validator;

use absence::AbsenceTracker;
use ancestry::{AncestryGraph, MAX_ANCESTORS, MAX_DESCENDANTS};
use eligibility::EligibilityTracker;
use fees::{base_rate_scaled, FeeBuckets, MIN_FEE_RATE};

/// One-way read from the mempool into the PoW engine: accumulated work per
/// address, used to gate voter eligibility and reward claims.
pub trait PowContribution: Send + Sync {
    fn contribution(&self, address: &str) -> u64;
}

/// Zero-contribution stub for wiring and tests.
pub struct NoWork;

impl PowContribution for NoWork {
    fn contribution(&self, _address: &str) -> u64 {
        0
    }
}

#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub received_at: u64,
    /// Arrival order, the stable fee-rate tie-break.
    pub seq: u64,
    pub size: usize,
    /// Scaled fee rate (`fees::FEE_RATE_SCALE` fixed point).
    pub fee_rate: u128,
    /// Chain height when admitted.
    pub height: u64,
}

pub(crate) struct PoolState {
    pub(crate) entries: HashMap<Hash256, MempoolEntry>,
    pub(crate) by_outpoint: HashMap<(Hash256, u32), Hash256>,
    pub(crate) buckets: FeeBuckets,
    pub(crate) ancestry: AncestryGraph,
    pub(crate) bytes: usize,
    pub(crate) seq: u64,
    /// Bumped on every mutation; the miner watches it to rebuild templates.
    pub(crate) change_seq: u64,
    pub(crate) last_valid_dynamic_fee: u128,
    pub(crate) eligibility: EligibilityTracker,
    pub(crate) absence: AbsenceTracker,
    pub(crate) accepting: bool,
}

impl PoolState {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            by_outpoint: HashMap::new(),
            buckets: FeeBuckets::new(),
            ancestry: AncestryGraph::new(),
            bytes: 0,
            seq: 0,
            change_seq: 0,
            last_valid_dynamic_fee: base_rate_scaled(),
            eligibility: EligibilityTracker::new(),
            absence: AbsenceTracker::new(),
            accepting: true,
        }
    }

    pub(crate) fn remove_entry(&mut self, txid: &Hash256) -> Option<MempoolEntry> {
        let entry = self.entries.remove(txid)?;
        for input in &entry.tx.inputs {
            if self.by_outpoint.get(&input.outpoint()) == Some(txid) {
                self.by_outpoint.remove(&input.outpoint());
            }
        }
        self.buckets.remove(entry.fee_rate);
        self.ancestry.remove(txid);
        self.bytes = self.bytes.saturating_sub(entry.size);
        self.change_seq += 1;
        Some(entry)
    }

    fn insert_entry(&mut self, entry: MempoolEntry, parents: HashSet<Hash256>) {
        for input in &entry.tx.inputs {
            self.by_outpoint.insert(input.outpoint(), entry.tx.id);
        }
        self.buckets.insert(entry.fee_rate);
        self.ancestry.insert(entry.tx.id, parents);
        self.bytes += entry.size;
        self.change_seq += 1;
        self.entries.insert(entry.tx.id, entry);
    }

    fn dynamic_min_fee(&mut self, cfg: &ConsensusConfig) -> u128 {
        if cfg.mempool_max_size == 0 {
            // No meaningful capacity signal; fall back conservatively.
            return self.last_valid_dynamic_fee.max(base_rate_scaled());
        }
        let fee = fees::dynamic_min_fee(
            self.entries.len(),
            cfg.mempool_max_size,
            base_rate_scaled(),
        );
        self.last_valid_dynamic_fee = fee;
        fee
    }
}

// ---------------------------------------------------------------------------
// Info DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeInfo {
    /// All rates in fixed-point (×10⁵) atomic units per byte.
    pub base: u128,
    pub current: u128,
    pub mean: u128,
    pub median: u128,
    pub min: u128,
    pub max: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MempoolInfo {
    pub size: usize,
    pub bytes: usize,
    /// Byte usage as a fraction of the byte cap.
    pub usage: f64,
    pub max: usize,
    pub fees: FeeInfo,
    /// Entry counts by transaction type.
    pub distribution: HashMap<String, usize>,
    /// Unix seconds of the oldest / youngest entries.
    pub oldest: Option<u64>,
    pub youngest: Option<u64>,
    pub health: bool,
    pub accepting_new: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMempoolEntry {
    pub txid: String,
    pub fee: u128,
    pub vsize: usize,
    /// `base × 3 + total` (simplified non-SegWit form).
    pub weight: usize,
    pub time: u64,
    pub height: u64,
    pub descendant_count: usize,
    pub descendant_size: usize,
    pub ancestor_count: usize,
    pub ancestor_size: usize,
    pub depends: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawMempool {
    Ids(Vec<String>),
    Entries(HashMap<String, RawMempoolEntry>),
}

// ---------------------------------------------------------------------------
// Mempool
// ---------------------------------------------------------------------------

pub struct Mempool {
    cfg: ConsensusConfig,
    ledger: Arc<dyn LedgerView>,
    health: Arc<NetworkHealth>,
    audit: Arc<AuditSink>,
    work: Arc<dyn PowContribution>,
    tx_locks: KeyedMutex<Hash256>,
    /// Per-sender submission throttle; a DoS ceiling, not a fee policy.
    limiter: RateLimiter,
    state: RwLock<PoolState>,
}

/// Submission throttle: generous enough for any honest sender.
fn submission_limiter() -> RateLimiter {
    RateLimiter::new(RateLimiterConfig {
        max_requests: 10_000,
        window: std::time::Duration::from_secs(60),
        block_duration: std::time::Duration::from_secs(300),
        ban_threshold: 20,
    })
}

impl Mempool {
    pub fn new(
        cfg: ConsensusConfig,
        ledger: Arc<dyn LedgerView>,
        health: Arc<NetworkHealth>,
        audit: Arc<AuditSink>,
        work: Arc<dyn PowContribution>,
    ) -> Self {
        Self {
            cfg,
            ledger,
            health,
            audit,
            work,
            tx_locks: KeyedMutex::new(),
            limiter: submission_limiter(),
            state: RwLock::new(PoolState::new()),
        }
    }

    /// Admit a transaction.
    ///
    /// Pipeline: per-tx mutex → health gate → structure → UTXO context →
    /// type gate → fee floor → replace-by-fee → ancestry bounds → insert.
    /// The whole call is bounded by `add_tx_timeout`.
    pub async fn add_transaction(&self, tx: Transaction) -> Result<bool> {
        let txid = tx.id;
        let result = match tokio::time::timeout(
            self.cfg.add_tx_timeout(),
            self.add_transaction_inner(tx),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ConsensusError::MutexTimeout("add_transaction".into())),
        };

        if let Err(err) = &result {
            self.audit.log_event(
                "tx_rejected",
                Severity::Info,
                "mempool",
                serde_json::json!({ "txid": txid.to_hex(), "code": err.code() }),
            );
        }
        result
    }

    async fn add_transaction_inner(&self, tx: Transaction) -> Result<bool> {
        let _guard = self
            .tx_locks
            .lock(tx.id, self.cfg.add_tx_timeout(), "mempool tx")
            .await?;

        let now = now_secs();
        let height = self.ledger.height();

        self.health.check()?;

        if let Some(sender) = tx.inputs.first() {
            self.limiter
                .allow("tx", &address_from_public_key(&sender.public_key))?;
        }

        {
            let state = self.state.read();
            if !state.accepting {
                return Err(ConsensusError::BackpressureRejected);
            }
            if state.entries.contains_key(&tx.id) {
                return Err(ConsensusError::DuplicateTx {
                    txid: tx.id.to_hex(),
                });
            }
        }

        if tx.is_coinbase() {
            return Err(ConsensusError::StructureInvalid(
                "coinbase transactions cannot enter the mempool".into(),
            ));
        }
        if self.ledger.contains_tx(&tx.id) {
            return Err(ConsensusError::DuplicateTx {
                txid: tx.id.to_hex(),
            });
        }

        validate_tx_structure(&tx, now)?;
        let size = tx.serialized_size();

        // UTXO context: each input must reference an unspent ledger output
        // or an output of a transaction already in the pool.
        let mut seen = HashSet::new();
        for input in &tx.inputs {
            if !seen.insert(input.outpoint()) {
                return Err(ConsensusError::DoubleSpend {
                    outpoint: input.outpoint_label(),
                });
            }
            match self.ledger.utxo(&input.prev_txid, input.output_index) {
                Some(utxo) if !utxo.spent => {
                    if utxo.coinbase && height < utxo.height + COINBASE_MATURITY {
                        return Err(ConsensusError::CoinbaseInvalid(format!(
                            "coinbase output {} matures at height {}",
                            input.outpoint_label(),
                            utxo.height + COINBASE_MATURITY
                        )));
                    }
                }
                _ => {
                    let state = self.state.read();
                    let in_pool = state
                        .entries
                        .get(&input.prev_txid)
                        .map(|e| (input.output_index as usize) < e.tx.outputs.len())
                        .unwrap_or(false);
                    if !in_pool {
                        return Err(ConsensusError::SpentUtxo {
                            outpoint: input.outpoint_label(),
                        });
                    }
                }
            }
        }

        if !tx.verify_signatures() {
            return Err(ConsensusError::SignatureInvalid);
        }

        // Type-specific gates
        match tx.tx_type {
            TxType::QuadraticVote => {
                let voter = tx
                    .inputs
                    .first()
                    .map(|i| address_from_public_key(&i.public_key))
                    .unwrap_or_default();
                let mut state = self.state.write();
                let cfg = self.cfg.clone();
                state.eligibility.check(
                    &cfg,
                    self.ledger.as_ref(),
                    self.work.as_ref(),
                    &voter,
                    now,
                    height,
                )?;
            }
            TxType::PowReward => {
                let claimant = tx
                    .outputs
                    .first()
                    .map(|o| o.address.as_str())
                    .unwrap_or_default();
                if self.work.contribution(claimant) < self.cfg.min_pow_contribution {
                    return Err(ConsensusError::CoinbaseInvalid(format!(
                        "reward claim by {claimant} without sufficient pow contribution"
                    )));
                }
            }
            _ => {}
        }

        // Fee floor
        let required = size as u128 * MIN_FEE_RATE;
        if tx.fee < required {
            return Err(ConsensusError::FeeTooLow {
                got: tx.fee,
                required,
            });
        }
        let rate = fees::fee_rate(tx.fee, size);

        {
            let mut state = self.state.write();
            if state.entries.len() > self.cfg.high_congestion_threshold {
                let previous = state.last_valid_dynamic_fee;
                let min = state.dynamic_min_fee(&self.cfg);
                if min != previous {
                    self.audit.log_event(
                        "dynamic_fee_updated",
                        Severity::Info,
                        "mempool",
                        serde_json::json!({ "previous": previous, "current": min }),
                    );
                }
                if rate < min {
                    return Err(ConsensusError::FeeTooLow {
                        got: rate,
                        required: min,
                    });
                }
            }
        }

        let mut state = self.state.write();

        // Replace-by-fee: the conflict set is every pooled tx sharing an
        // outpoint; acceptance requires beating its aggregate rate by >10%.
        let mut conflicts: HashSet<Hash256> = HashSet::new();
        let mut first_conflict = None;
        for input in &tx.inputs {
            if let Some(existing) = state.by_outpoint.get(&input.outpoint()) {
                conflicts.insert(*existing);
                first_conflict.get_or_insert(input.outpoint_label());
            }
        }
        if !conflicts.is_empty() {
            let conflict_rate_sum: u128 = conflicts
                .iter()
                .filter_map(|id| state.entries.get(id))
                .map(|e| e.fee_rate)
                .sum();
            if !fees::rbf_acceptable(rate, conflict_rate_sum) {
                return Err(ConsensusError::DoubleSpend {
                    outpoint: first_conflict.unwrap_or_default(),
                });
            }
            // Replacement evicts the conflicts and everything built on them.
            let mut doomed = conflicts.clone();
            for id in &conflicts {
                doomed.extend(state.ancestry.descendants(id));
            }
            for id in &doomed {
                state.remove_entry(id);
            }
            self.audit.log_event(
                "rbf_replaced",
                Severity::Info,
                "mempool",
                serde_json::json!({
                    "replacement": tx.id.to_hex(),
                    "evicted": doomed.len(),
                }),
            );
        }

        // Ancestry bounds
        let parents: HashSet<Hash256> = tx
            .inputs
            .iter()
            .map(|i| i.prev_txid)
            .filter(|txid| state.entries.contains_key(txid))
            .collect();
        let ancestors = state.ancestry.prospective_ancestors(&parents);
        if ancestors.len() > MAX_ANCESTORS {
            return Err(ConsensusError::AncestryLimitExceeded {
                count: ancestors.len(),
                max: MAX_ANCESTORS,
            });
        }
        for ancestor in &ancestors {
            let descendants = state.ancestry.descendants(ancestor).len();
            if descendants + 1 > MAX_DESCENDANTS {
                return Err(ConsensusError::AncestryLimitExceeded {
                    count: descendants + 1,
                    max: MAX_DESCENDANTS,
                });
            }
        }

        state.seq += 1;
        let entry = MempoolEntry {
            received_at: now,
            seq: state.seq,
            size,
            fee_rate: rate,
            height,
            tx: tx.clone(),
        };
        state.insert_entry(entry, parents);

        if tx.tx_type == TxType::QuadraticVote {
            let voter = tx
                .inputs
                .first()
                .map(|i| address_from_public_key(&i.public_key))
                .unwrap_or_default();
            state.eligibility.record_vote(&voter, now, height);
        }

        let evicted = eviction::evict_to_limits(
            &mut state,
            self.cfg.mempool_max_size,
            self.cfg.mempool_max_bytes,
        );
        drop(state);

        if !evicted.is_empty() {
            self.audit.log_event(
                "mempool_evicted",
                Severity::Info,
                "mempool",
                serde_json::json!({ "count": evicted.len() }),
            );
        }
        self.audit.log_event(
            "transaction_added",
            Severity::Info,
            "mempool",
            serde_json::json!({ "txid": tx.id.to_hex(), "fee_rate": rate }),
        );

        Ok(true)
    }

    /// Remove confirmed (or otherwise dead) transactions. Idempotent.
    pub fn remove_transactions(&self, txs: &[Transaction]) {
        let mut state = self.state.write();
        for tx in txs {
            state.remove_entry(&tx.id);
        }
    }

    /// Return non-coinbase transactions from rolled-back blocks to the
    /// pool. Conflicting or known transactions are silently skipped.
    pub fn restore_transactions(&self, txs: &[Transaction]) {
        let now = now_secs();
        let height = self.ledger.height();
        let mut state = self.state.write();
        'next: for tx in txs {
            if tx.is_coinbase() || state.entries.contains_key(&tx.id) {
                continue;
            }
            for input in &tx.inputs {
                if state.by_outpoint.contains_key(&input.outpoint()) {
                    continue 'next;
                }
            }
            let size = tx.serialized_size();
            let parents: HashSet<Hash256> = tx
                .inputs
                .iter()
                .map(|i| i.prev_txid)
                .filter(|txid| state.entries.contains_key(txid))
                .collect();
            state.seq += 1;
            let entry = MempoolEntry {
                received_at: now,
                seq: state.seq,
                size,
                fee_rate: fees::fee_rate(tx.fee, size),
                height,
                tx: tx.clone(),
            };
            state.insert_entry(entry, parents);
        }
    }

    /// Pending transactions ordered by descending fee rate, stable on
    /// arrival order.
    pub fn get_pending_transactions(
        &self,
        limit: Option<usize>,
        min_fee_rate: Option<u128>,
    ) -> Vec<Transaction> {
        let state = self.state.read();
        let mut entries: Vec<(u128, u64, &MempoolEntry)> = state
            .entries
            .values()
            .filter(|e| min_fee_rate.map(|m| e.fee_rate >= m).unwrap_or(true))
            .map(|e| (e.fee_rate, e.seq, e))
            .collect();
        entries.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        entries
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|(_, _, e)| e.tx.clone())
            .collect()
    }

    /// Fee-rate estimate (scaled) for confirmation within `target_blocks`.
    pub fn estimate_fee(&self, target_blocks: u32) -> u128 {
        self.state.read().buckets.estimate(target_blocks, base_rate_scaled())
    }

    pub fn get_mempool_info(&self) -> MempoolInfo {
        let mut state = self.state.write();
        let base = base_rate_scaled();
        let current = state.dynamic_min_fee(&self.cfg);

        let mut rates: Vec<u128> = state.entries.values().map(|e| e.fee_rate).collect();
        rates.sort_unstable();
        let median = if rates.is_empty() {
            0
        } else {
            rates[rates.len() / 2]
        };
        let mean = state.buckets.weighted_average().unwrap_or(0);

        let mut distribution: HashMap<String, usize> = HashMap::new();
        for entry in state.entries.values() {
            *distribution
                .entry(type_label(entry.tx.tx_type).to_string())
                .or_insert(0) += 1;
        }

        MempoolInfo {
            size: state.entries.len(),
            bytes: state.bytes,
            usage: state.bytes as f64 / self.cfg.mempool_max_bytes.max(1) as f64,
            max: self.cfg.mempool_max_size,
            fees: FeeInfo {
                base,
                current,
                mean,
                median,
                min: state.buckets.min_rate().unwrap_or(0),
                max: state.buckets.max_rate().unwrap_or(0),
            },
            distribution,
            oldest: state.entries.values().map(|e| e.received_at).min(),
            youngest: state.entries.values().map(|e| e.received_at).max(),
            health: self.health.check().is_ok(),
            accepting_new: state.accepting,
        }
    }

    pub fn get_raw_mempool(&self, verbose: bool) -> RawMempool {
        let state = self.state.read();
        if !verbose {
            return RawMempool::Ids(state.entries.keys().map(|id| id.to_hex()).collect());
        }

        let mut entries = HashMap::with_capacity(state.entries.len());
        for (txid, entry) in &state.entries {
            let ancestors = state.ancestry.ancestors(txid);
            let descendants = state.ancestry.descendants(txid);
            let size_of = |ids: &HashSet<Hash256>| -> usize {
                ids.iter()
                    .filter_map(|id| state.entries.get(id))
                    .map(|e| e.size)
                    .sum()
            };
            entries.insert(
                txid.to_hex(),
                RawMempoolEntry {
                    txid: txid.to_hex(),
                    fee: entry.tx.fee,
                    vsize: entry.size,
                    weight: entry.tx.weight(),
                    time: entry.received_at,
                    height: entry.height,
                    descendant_count: descendants.len(),
                    descendant_size: size_of(&descendants),
                    ancestor_count: ancestors.len(),
                    ancestor_size: size_of(&ancestors),
                    depends: state
                        .ancestry
                        .direct_parents(txid)
                        .iter()
                        .map(|id| id.to_hex())
                        .collect(),
                },
            );
        }
        RawMempool::Entries(entries)
    }

    /// Validators currently expected to perform duties.
    pub fn get_expected_validators(&self) -> Vec<Validator> {
        self.ledger
            .validator_set()
            .into_iter()
            .filter(|v| v.is_eligible())
            .collect()
    }

    /// Record a missed validation duty and pick a backup. Absence errors
    /// never propagate to admitting clients — the result is advisory.
    pub fn handle_validation_failure(&self, task_id: &str, absent: &str) -> Option<String> {
        let candidates = self.get_expected_validators();
        let mut state = self.state.write();
        let penalty = state.absence.record_missed(&self.cfg, absent);

        self.audit.log_event(
            "validator_absence",
            Severity::Warn,
            "mempool",
            serde_json::json!({
                "task_id": task_id,
                "validator": absent,
                "penalty": penalty.penalty,
                "consecutive": penalty.consecutive,
            }),
        );
        if penalty.flag_suspension {
            self.audit.log_event(
                "validator_suspension_flagged",
                Severity::High,
                "mempool",
                serde_json::json!({ "validator": absent }),
            );
        }

        let backup = state.absence.select_backup(&self.cfg, &candidates, absent);
        if let Some(address) = &backup {
            state.absence.task_assigned(address);
            self.audit.log_event(
                "backup_validator_selected",
                Severity::Info,
                "mempool",
                serde_json::json!({ "task_id": task_id, "backup": address }),
            );
        }
        backup
    }

    /// A validator completed a duty: reset its miss streak, release a task.
    pub fn record_validator_participation(&self, address: &str) {
        let mut state = self.state.write();
        state.absence.record_participation(address);
        state.absence.task_finished(address);
    }

    /// Drop entries older than the expiry horizon.
    pub fn house_keep(&self) {
        let cutoff = now_secs().saturating_sub(self.cfg.tx_expiry_secs);
        let expired: Vec<Hash256> = {
            let state = self.state.read();
            state
                .entries
                .values()
                .filter(|e| e.received_at < cutoff)
                .map(|e| e.tx.id)
                .collect()
        };
        if expired.is_empty() {
            return;
        }
        let mut state = self.state.write();
        for txid in &expired {
            state.remove_entry(txid);
        }
        drop(state);
        self.audit.log_event(
            "mempool_expired",
            Severity::Info,
            "mempool",
            serde_json::json!({ "count": expired.len() }),
        );
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.state.write().accepting = accepting;
    }

    pub fn size(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn bytes(&self) -> usize {
        self.state.read().bytes
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.state.read().entries.contains_key(txid)
    }

    /// Monotone counter that moves whenever pool content changes.
    pub fn change_seq(&self) -> u64 {
        self.state.read().change_seq
    }
}

fn type_label(tx_type: TxType) -> &'static str {
    match tx_type {
        TxType::Standard => "STANDARD",
        TxType::Transfer => "TRANSFER",
        TxType::Regular => "REGULAR",
        TxType::Coinbase => "COINBASE",
        TxType::PowReward => "POW_REWARD",
        TxType::QuadraticVote => "QUADRATIC_VOTE",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audit::AuditSink;
    use crate::blockchain::block::{Block, BlockHeader};
    use crate::blockchain::consensus::{target_from_difficulty, INITIAL_DIFFICULTY};
    use crate::crypto::hash::sha3_256;
    use crate::crypto::keys::Keypair;
    use crate::ledger::StoreLedger;
    use crate::p2p::{StaticNetwork, SyncState};
    use crate::storage::MemoryStore;
    use crate::tx::{p2pkh_script, TxInput, TxOutput, TxStatus, CURRENCY_TAG};
    use std::time::Duration;

    pub(crate) const FUNDING_OUTPUTS: u32 = 64;
    pub(crate) const FUNDING_AMOUNT: u128 = 10_000_000;

    pub(crate) struct Ctx {
        pub ledger: Arc<StoreLedger>,
        pub network: Arc<StaticNetwork>,
        pub audit: Arc<AuditSink>,
        pub kp: Keypair,
        pub funding: Transaction,
        pub now: u64,
    }

    /// Build a mempool over a ledger holding one block with a fan-out
    /// funding transaction (64 spendable non-coinbase outputs).
    pub(crate) async fn harness(cfg: ConsensusConfig) -> (Mempool, Ctx) {
        let now = now_secs();
        let ledger = Arc::new(
            StoreLedger::open(Arc::new(MemoryStore::new()), now.saturating_sub(600)).unwrap(),
        );
        let kp = Keypair::from_secret_bytes(&[9u8; 32]);

        // Zero-input Standard tx: its outputs become ordinary (non-coinbase)
        // UTXOs, so maturity rules stay out of the way.
        let funding = Transaction {
            id: Hash256::ZERO,
            version: 1,
            tx_type: TxType::Standard,
            inputs: vec![],
            outputs: (0..FUNDING_OUTPUTS)
                .map(|i| TxOutput {
                    address: kp.address(),
                    amount: FUNDING_AMOUNT,
                    script: p2pkh_script(&kp.address()),
                    currency_tag: CURRENCY_TAG.into(),
                    index: i,
                })
                .collect(),
            fee: 0,
            timestamp: now.saturating_sub(600),
            witness: None,
            status: TxStatus::Pending,
        }
        .seal();

        let coinbase = Transaction::coinbase(
            "nvr1miner",
            crate::blockchain::reward::reward_schedule(1),
            1,
            now.saturating_sub(300),
        );
        let txs = vec![coinbase, funding.clone()];
        let merkle_root = Block::calculate_merkle_root(&txs);
        let header = BlockHeader {
            version: 1,
            height: 1,
            previous_hash: ledger.best_hash(),
            merkle_root,
            validator_merkle_root: Hash256::ZERO,
            timestamp: now.saturating_sub(300),
            difficulty: INITIAL_DIFFICULTY,
            nonce: 0,
            target: target_from_difficulty(INITIAL_DIFFICULTY),
            miner_address: "nvr1miner".into(),
            miner_public_key: String::new(),
        };
        ledger.apply_block(&Block::new(header, txs)).unwrap();

        let network = Arc::new(StaticNetwork::new(5, vec![], SyncState::Synced));
        let audit = Arc::new(AuditSink::new(256));
        let health = Arc::new(NetworkHealth::new(
            network.clone(),
            audit.clone(),
            cfg.min_peer_count,
            cfg.network_failure_threshold,
            Duration::from_secs(cfg.network_failure_reset_secs),
            Duration::from_secs(cfg.breaker_cooloff_secs),
        ));

        let mempool = Mempool::new(
            cfg,
            ledger.clone(),
            health,
            audit.clone(),
            Arc::new(NoWork),
        );

        (
            mempool,
            Ctx {
                ledger,
                network,
                audit,
                kp,
                funding,
                now,
            },
        )
    }

    /// A signed transfer spending funding output `index`.
    ///
    /// The input script is padded to 19 bytes so the serialized size is
    /// exactly 200: fee 400 → rate 2.0, fee 500 → 2.5, matching the
    /// replace-by-fee scenarios byte for byte.
    pub(crate) fn signed_transfer(ctx: &Ctx, index: u32, fee: u128) -> Transaction {
        transfer_spending(ctx, ctx.funding.id, index, FUNDING_AMOUNT, fee)
    }

    pub(crate) fn transfer_spending(
        ctx: &Ctx,
        prev_txid: Hash256,
        index: u32,
        input_amount: u128,
        fee: u128,
    ) -> Transaction {
        let mut tx = Transaction {
            id: Hash256::ZERO,
            version: 1,
            tx_type: TxType::Transfer,
            inputs: vec![TxInput {
                prev_txid,
                output_index: index,
                script: vec![0x51; 19],
                signature: vec![],
                public_key: ctx.kp.public_key_bytes().to_vec(),
                amount: input_amount,
                sequence: 0,
            }],
            outputs: vec![TxOutput {
                address: "nvr1recipient".into(),
                amount: input_amount - fee,
                script: p2pkh_script("nvr1recipient"),
                currency_tag: CURRENCY_TAG.into(),
                index: 0,
            }],
            fee,
            timestamp: ctx.now,
            witness: None,
            status: TxStatus::Pending,
        };
        let sig = ctx.kp.sign(&tx.canonical_bytes());
        tx.inputs[0].signature = sig;
        tx.seal()
    }

    #[tokio::test]
    async fn test_admission_and_size_invariant() {
        let (mempool, ctx) = harness(ConsensusConfig::default()).await;
        let a = signed_transfer(&ctx, 0, 400);
        let b = signed_transfer(&ctx, 1, 500);
        assert_eq!(a.serialized_size(), 200);

        assert_eq!(mempool.add_transaction(a.clone()).await, Ok(true));
        assert_eq!(mempool.add_transaction(b.clone()).await, Ok(true));

        // Accounting invariant: bytes == Σ sizes, size == |entries|
        assert_eq!(mempool.size(), 2);
        assert_eq!(mempool.bytes(), a.serialized_size() + b.serialized_size());
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let (mempool, ctx) = harness(ConsensusConfig::default()).await;
        let tx = signed_transfer(&ctx, 0, 400);
        mempool.add_transaction(tx.clone()).await.unwrap();
        assert!(matches!(
            mempool.add_transaction(tx).await,
            Err(ConsensusError::DuplicateTx { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_utxo_rejected() {
        let (mempool, ctx) = harness(ConsensusConfig::default()).await;
        let tx = transfer_spending(&ctx, sha3_256(b"nowhere"), 0, FUNDING_AMOUNT, 400);
        assert!(matches!(
            mempool.add_transaction(tx).await,
            Err(ConsensusError::SpentUtxo { .. })
        ));
    }

    #[tokio::test]
    async fn test_fee_floor_rejected() {
        let (mempool, ctx) = harness(ConsensusConfig::default()).await;
        // 200-byte tx needs at least 200 atomic units
        let tx = signed_transfer(&ctx, 0, 150);
        assert!(matches!(
            mempool.add_transaction(tx).await,
            Err(ConsensusError::FeeTooLow { .. })
        ));
    }

    #[tokio::test]
    async fn test_network_unhealthy_gate() {
        let (mempool, ctx) = harness(ConsensusConfig::default()).await;
        ctx.network.set_peers(0);
        let tx = signed_transfer(&ctx, 0, 400);
        assert!(matches!(
            mempool.add_transaction(tx).await,
            Err(ConsensusError::NetworkUnhealthy(_))
        ));
    }

    #[tokio::test]
    async fn test_rbf_acceptance_s1() {
        let (mempool, ctx) = harness(ConsensusConfig::default()).await;
        // A (200 B, fee 400 → 2.0), B spends the same outpoint with
        // fee 500 (→ 2.5 > 2.2) ⇒ accept, A evicted.
        let a = signed_transfer(&ctx, 0, 400);
        let b = signed_transfer(&ctx, 0, 500);
        mempool.add_transaction(a.clone()).await.unwrap();
        assert_eq!(mempool.add_transaction(b.clone()).await, Ok(true));
        assert!(!mempool.contains(&a.id));
        assert!(mempool.contains(&b.id));
    }

    #[tokio::test]
    async fn test_rbf_rejection_s2() {
        let (mempool, ctx) = harness(ConsensusConfig::default()).await;
        // Replacement at exactly 1.1 × (fee 440 → 2.2) ⇒ reject.
        let a = signed_transfer(&ctx, 0, 400);
        let b = signed_transfer(&ctx, 0, 440);
        mempool.add_transaction(a.clone()).await.unwrap();
        assert!(matches!(
            mempool.add_transaction(b.clone()).await,
            Err(ConsensusError::DoubleSpend { .. })
        ));
        assert!(mempool.contains(&a.id));
        assert!(!mempool.contains(&b.id));
    }

    #[tokio::test]
    async fn test_chained_unconfirmed_and_ancestry_limit() {
        let (mempool, ctx) = harness(ConsensusConfig::default()).await;

        // Build a chain: t0 spends funding, t1 spends t0, ... Each child
        // output shrinks by the fee.
        let mut prev = signed_transfer(&ctx, 0, 400);
        mempool.add_transaction(prev.clone()).await.unwrap();
        let mut amount = FUNDING_AMOUNT - 400;

        for _ in 0..MAX_ANCESTORS {
            let child = transfer_spending(&ctx, prev.id, 0, amount, 400);
            assert_eq!(mempool.add_transaction(child.clone()).await, Ok(true));
            amount -= 400;
            prev = child;
        }

        // The next link would have MAX_ANCESTORS + 1 ancestors.
        let too_deep = transfer_spending(&ctx, prev.id, 0, amount, 400);
        assert!(matches!(
            mempool.add_transaction(too_deep).await,
            Err(ConsensusError::AncestryLimitExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn test_pending_ordering() {
        let (mempool, ctx) = harness(ConsensusConfig::default()).await;
        let low = signed_transfer(&ctx, 0, 400);
        let high = signed_transfer(&ctx, 1, 5_000);
        let mid = signed_transfer(&ctx, 2, 1_000);
        for tx in [&low, &high, &mid] {
            mempool.add_transaction(tx.clone()).await.unwrap();
        }

        let pending = mempool.get_pending_transactions(None, None);
        assert_eq!(pending[0].id, high.id);
        assert_eq!(pending[1].id, mid.id);
        assert_eq!(pending[2].id, low.id);

        let limited = mempool.get_pending_transactions(Some(1), None);
        assert_eq!(limited.len(), 1);

        let filtered =
            mempool.get_pending_transactions(None, Some(fees::fee_rate(1_000, 200)));
        assert_eq!(filtered.len(), 2);
    }

    #[tokio::test]
    async fn test_arrival_tie_break_is_stable() {
        let (mempool, ctx) = harness(ConsensusConfig::default()).await;
        let first = signed_transfer(&ctx, 0, 400);
        let second = signed_transfer(&ctx, 1, 400);
        mempool.add_transaction(first.clone()).await.unwrap();
        mempool.add_transaction(second.clone()).await.unwrap();
        let pending = mempool.get_pending_transactions(None, None);
        assert_eq!(pending[0].id, first.id);
        assert_eq!(pending[1].id, second.id);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (mempool, ctx) = harness(ConsensusConfig::default()).await;
        let tx = signed_transfer(&ctx, 0, 400);
        mempool.add_transaction(tx.clone()).await.unwrap();
        mempool.remove_transactions(std::slice::from_ref(&tx));
        mempool.remove_transactions(std::slice::from_ref(&tx));
        assert_eq!(mempool.size(), 0);
        assert_eq!(mempool.bytes(), 0);
    }

    #[tokio::test]
    async fn test_mempool_info() {
        let (mempool, ctx) = harness(ConsensusConfig::default()).await;
        mempool
            .add_transaction(signed_transfer(&ctx, 0, 400))
            .await
            .unwrap();
        let info = mempool.get_mempool_info();
        assert_eq!(info.size, 1);
        assert_eq!(info.bytes, 200);
        assert!(info.health);
        assert!(info.accepting_new);
        assert_eq!(info.distribution.get("TRANSFER"), Some(&1));
        assert_eq!(info.fees.min, fees::fee_rate(400, 200));
    }

    #[tokio::test]
    async fn test_raw_mempool_shapes() {
        let (mempool, ctx) = harness(ConsensusConfig::default()).await;
        let parent = signed_transfer(&ctx, 0, 400);
        mempool.add_transaction(parent.clone()).await.unwrap();
        let child = transfer_spending(&ctx, parent.id, 0, FUNDING_AMOUNT - 400, 400);
        mempool.add_transaction(child.clone()).await.unwrap();

        match mempool.get_raw_mempool(false) {
            RawMempool::Ids(ids) => assert_eq!(ids.len(), 2),
            _ => panic!("expected id list"),
        }

        match mempool.get_raw_mempool(true) {
            RawMempool::Entries(entries) => {
                let c = &entries[&child.id.to_hex()];
                assert_eq!(c.ancestor_count, 1);
                assert_eq!(c.depends, vec![parent.id.to_hex()]);
                let p = &entries[&parent.id.to_hex()];
                assert_eq!(p.descendant_count, 1);
                assert_eq!(p.weight, parent.weight());
            }
            _ => panic!("expected verbose map"),
        }
    }

    #[tokio::test]
    async fn test_coinbase_maturity_s5() {
        let (mempool, ctx) = harness(ConsensusConfig::default()).await;
        // The harness chain has a coinbase at height 1; tip is height 1, so
        // a spend must wait until height 101.
        let coinbase_id = ctx.ledger.block_by_height(1).unwrap().transactions[0].id;
        let spend = transfer_spending(
            &ctx,
            coinbase_id,
            0,
            crate::blockchain::reward::reward_schedule(1),
            400,
        );
        assert!(matches!(
            mempool.add_transaction(spend).await,
            Err(ConsensusError::CoinbaseInvalid(_))
        ));
    }

    #[tokio::test]
    async fn test_validator_absence_reporting() {
        let (mempool, ctx) = harness(ConsensusConfig::default()).await;
        let mut backup = Validator::new("nvr1backup", 0);
        backup.reputation = 90;
        backup.uptime = 0.99;
        ctx.ledger.register_validator(&backup).unwrap();
        ctx.ledger
            .register_validator(&Validator::new("nvr1absent", 0))
            .unwrap();

        let selected = mempool.handle_validation_failure("task-1", "nvr1absent");
        assert_eq!(selected.as_deref(), Some("nvr1backup"));
    }

    #[tokio::test]
    async fn test_restore_skips_conflicts() {
        let (mempool, ctx) = harness(ConsensusConfig::default()).await;
        let live = signed_transfer(&ctx, 0, 500);
        mempool.add_transaction(live.clone()).await.unwrap();

        let conflicting = signed_transfer(&ctx, 0, 400);
        let fresh = signed_transfer(&ctx, 1, 400);
        mempool.restore_transactions(&[conflicting.clone(), fresh.clone()]);

        assert!(!mempool.contains(&conflicting.id));
        assert!(mempool.contains(&fresh.id));
        assert!(mempool.contains(&live.id));
    }

    #[tokio::test]
    async fn test_change_seq_moves_on_mutation() {
        let (mempool, ctx) = harness(ConsensusConfig::default()).await;
        let before = mempool.change_seq();
        let tx = signed_transfer(&ctx, 0, 400);
        mempool.add_transaction(tx.clone()).await.unwrap();
        let after_add = mempool.change_seq();
        assert!(after_add > before);
        mempool.remove_transactions(&[tx]);
        assert!(mempool.change_seq() > after_add);
    }
}
