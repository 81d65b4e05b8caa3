use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audit::{AuditSink, Severity};
use crate::blockchain::block::Block;
use crate::config::ConsensusConfig;
use crate::error::{ConsensusError, Result};
use crate::ledger::{LedgerView, StoreLedger};
use crate::mempool::Mempool;
use crate::p2p::{NetworkHealth, PeerNetwork};
use crate::pow::gpu::{GpuMiner, NullGpuMiner};
use crate::pow::template::BlockTemplate;
use crate::pow::worklog::WorkLog;
use crate::pow::{MiningInfo, ProofOfWork};
use crate::storage::KvStore;
use crate::tx::Transaction;
use crate::voting::period::Vote;
use crate::voting::{DirectVoting, VoteProvider};

/// Cadence of the mempool housekeeping sweep.
const HOUSEKEEP_INTERVAL: Duration = Duration::from_secs(60);

/// The consensus bundle: owns the mempool, the PoW engine and the voting
/// engine, wires their back-references, and exposes the caller surface.
///
/// The bundle holds the only strong references between components —
/// engines see each other through `Weak` handles, so teardown order can
/// never cycle.
pub struct Inner {
    cfg: ConsensusConfig,
    store: Arc<dyn KvStore>,
    ledger: Arc<StoreLedger>,
    network: Arc<dyn PeerNetwork>,
    health: Arc<NetworkHealth>,
    audit: Arc<AuditSink>,
    pub mempool: Arc<Mempool>,
    pub pow: Arc<ProofOfWork>,
    pub voting: Arc<DirectVoting>,
    miner_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    housekeeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
    disposed: AtomicBool,
}

pub type State = Arc<Inner>;

impl Inner {
    /// Open the bundle over a store. Creates and persists the genesis
    /// block when `chain:head` is absent.
    pub async fn open(
        cfg: ConsensusConfig,
        store: Arc<dyn KvStore>,
        network: Arc<dyn PeerNetwork>,
        vote_provider: Arc<dyn VoteProvider>,
        gpu: Option<Box<dyn GpuMiner>>,
        genesis_timestamp: u64,
    ) -> Result<State> {
        cfg.validate().map_err(ConsensusError::InvariantViolated)?;

        let audit = Arc::new(AuditSink::new(cfg.audit_buffer_size));
        let ledger = Arc::new(StoreLedger::open(store.clone(), genesis_timestamp)?);
        let health = Arc::new(NetworkHealth::new(
            network.clone(),
            audit.clone(),
            cfg.min_peer_count,
            cfg.network_failure_threshold,
            Duration::from_secs(cfg.network_failure_reset_secs),
            Duration::from_secs(cfg.breaker_cooloff_secs),
        ));
        let work_log = Arc::new(WorkLog::open(store.clone())?);

        let mempool = Arc::new(Mempool::new(
            cfg.clone(),
            ledger.clone(),
            health.clone(),
            audit.clone(),
            work_log.clone(),
        ));
        let pow = Arc::new(ProofOfWork::new(
            cfg.clone(),
            ledger.clone(),
            audit.clone(),
            work_log,
            gpu.unwrap_or_else(|| Box::new(NullGpuMiner)),
        ));
        let voting = Arc::new(DirectVoting::new(
            cfg.clone(),
            ledger.clone(),
            store.clone(),
            audit.clone(),
            health.clone(),
            vote_provider,
        ));

        pow.set_mempool(Arc::downgrade(&mempool));
        pow.set_voting(Arc::downgrade(&voting));
        voting.set_mempool(Arc::downgrade(&mempool));
        voting.initialize().await?;

        let state = Arc::new(Inner {
            cfg,
            store,
            ledger,
            network,
            health,
            audit,
            mempool,
            pow,
            voting,
            miner_task: Mutex::new(None),
            housekeeper: Mutex::new(None),
            disposed: AtomicBool::new(false),
        });

        // Periodic mempool housekeeping (expiry, rate-record cleanup).
        let weak = Arc::downgrade(&state);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(HOUSEKEEP_INTERVAL).await;
                let Some(state) = weak.upgrade() else { break };
                state.mempool.house_keep();
            }
        });
        *state.housekeeper.lock() = Some(handle);

        Ok(state)
    }

    pub fn ledger(&self) -> &Arc<StoreLedger> {
        &self.ledger
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.cfg
    }

    /// Bundle health: stable network and a live voting schedule.
    pub fn health_check(&self) -> bool {
        self.health.check().is_ok() && self.voting.health_check()
    }

    // -----------------------------------------------------------------
    // Caller surface
    // -----------------------------------------------------------------

    pub async fn submit_transaction(&self, tx: Transaction) -> Result<bool> {
        self.ensure_live()?;
        self.mempool.add_transaction(tx).await
    }

    pub async fn submit_vote(&self, vote: Vote) -> Result<bool> {
        self.ensure_live()?;
        self.voting.submit_vote(vote).await
    }

    /// Validate a block and commit it to the chain tip.
    pub async fn submit_block(&self, block: Block) -> Result<bool> {
        self.ensure_live()?;
        self.pow.submit_block(&block).await?;
        self.ledger
            .apply_block(&block)
            .map_err(|e| ConsensusError::ChainAppendFailed(e.to_string()))?;
        self.mempool.remove_transactions(&block.transactions);
        self.audit.log_event(
            "block_connected",
            Severity::Info,
            "chain",
            serde_json::json!({
                "height": block.header.height,
                "hash": block.hash.to_hex(),
                "transactions": block.transactions.len(),
            }),
        );
        Ok(true)
    }

    pub fn get_block_template(&self, miner_address: &str) -> Result<BlockTemplate> {
        self.ensure_live()?;
        self.pow.get_block_template(miner_address)
    }

    pub fn get_mining_info(&self) -> MiningInfo {
        self.pow.get_mining_info()
    }

    /// Arbitrate a chain fork with the currently live validator set.
    pub async fn handle_chain_fork(
        &self,
        old_chain_id: &str,
        new_chain_id: &str,
        fork_height: u64,
    ) -> Result<String> {
        self.ensure_live()?;
        let validators = self.network.active_validators();
        self.voting
            .handle_chain_fork(old_chain_id, new_chain_id, fork_height, &validators)
            .await
    }

    // -----------------------------------------------------------------
    // Mining control
    // -----------------------------------------------------------------

    /// Start the template→mine→submit loop for `miner_address`.
    pub fn start_mining(self: &Arc<Self>, miner_address: &str) -> Result<()> {
        self.ensure_live()?;
        let mut task = self.miner_task.lock();
        if task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            return Ok(());
        }

        self.pow.start_mining();
        let weak = Arc::downgrade(self);
        let address = miner_address.to_string();
        *task = Some(tokio::spawn(async move {
            loop {
                let Some(state) = weak.upgrade() else { break };
                if !state.pow.is_mining() {
                    break;
                }

                let template = match state.pow.get_block_template(&address) {
                    Ok(t) => t,
                    Err(err) => {
                        log::warn!("template assembly failed: {err}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };

                match state.pow.mine_block(template.into_block()).await {
                    Ok(block) => {
                        if let Err(err) = state.submit_block(block).await {
                            log::warn!("mined block rejected: {err}");
                        }
                    }
                    Err(err) if err.is_transient() => {
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                    Err(err) => {
                        log::debug!("mining stopped: {err}");
                        tokio::time::sleep(Duration::from_millis(250)).await;
                    }
                }
            }
        }));
        Ok(())
    }

    pub fn stop_mining(&self) {
        self.pow.stop_mining();
        if let Some(task) = self.miner_task.lock().take() {
            task.abort();
        }
    }

    pub fn interrupt_mining(&self) {
        self.pow.interrupt_mining();
    }

    pub fn resume_mining(&self) {
        self.pow.resume_mining();
    }

    /// Tear everything down. Idempotent: stops timers and worker pools,
    /// flushes caches, stops accepting new work.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_mining();
        self.pow.dispose();
        self.voting.dispose();
        self.mempool.set_accepting(false);
        if let Some(task) = self.housekeeper.lock().take() {
            task.abort();
        }
        self.audit.log_event(
            "consensus_disposed",
            Severity::Info,
            "state",
            serde_json::json!({ "height": self.ledger.height() }),
        );
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(ConsensusError::InvariantViolated(
                "consensus bundle disposed".into(),
            ));
        }
        Ok(())
    }
}
