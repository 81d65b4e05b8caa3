pub mod gpu;
pub mod inflight;
pub mod miner;
pub mod template;
pub mod worklog;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crate::audit::{AuditSink, Severity};
use crate::blockchain::block::Block;
use crate::blockchain::consensus::{
    self, meets_target, target_from_difficulty, MAX_NONCE, TARGET_BLOCK_TIME,
};
use crate::blockchain::validation;
use crate::config::ConsensusConfig;
use crate::crypto::hash::{hybrid_digest, sha3_256, Hash256};
use crate::error::{ConsensusError, Result};
use crate::ledger::LedgerView;
use crate::mempool::Mempool;
use crate::utils::cache::TtlCache;
use crate::utils::now_secs;
use crate::voting::DirectVoting;

use gpu::{CircuitBreaker, GpuMiner, GpuStatus};
use inflight::InflightTracker;
pub use template::BlockTemplate;
use worklog::{SolutionRecord, WorkLog};

/// Quorum fraction of expected validators that must attest a block.
pub const QUORUM_FACTOR: f64 = 0.67;

/// A candidate abandoned after this much wall clock is rebuilt from the
/// live mempool even if nothing changed.
const TEMPLATE_MAX_AGE: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Mining info DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareInfo {
    pub gpu: String,
    pub gpu_status: GpuStatus,
    pub cpu_threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MempoolSummary {
    pub pending: usize,
    pub bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceInfo {
    /// Mean wall-clock seconds per mined block.
    pub avg_block_time: f64,
    /// Mined / attempted.
    pub success_rate: f64,
    pub cache_hit_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkStats {
    pub active_miners: usize,
    pub participation_rate: f64,
    pub target_block_time: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningInfo {
    pub pow_enabled: bool,
    pub mining: bool,
    pub hash_rate: f64,
    pub difficulty: u64,
    pub network_hash_rate: f64,
    pub block_height: u64,
    pub last_block_time: Option<u64>,
    pub workers: WorkerInfo,
    pub hardware: HardwareInfo,
    pub mempool: MempoolSummary,
    pub performance: PerformanceInfo,
    pub network: NetworkStats,
}

#[derive(Default)]
struct MiningStats {
    blocks_attempted: AtomicU64,
    blocks_mined: AtomicU64,
    mining_ms_total: AtomicU64,
    hashes_total: AtomicU64,
    last_block_time: AtomicU64,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct ProofOfWork {
    cfg: ConsensusConfig,
    ledger: Arc<dyn LedgerView>,
    mempool: RwLock<Weak<Mempool>>,
    voting: RwLock<Weak<DirectVoting>>,
    audit: Arc<AuditSink>,
    work_log: Arc<WorkLog>,
    /// `(previous_hash, merkle_root)` → `(nonce, hash)`.
    solution_cache: TtlCache<(Hash256, Hash256), (u64, Hash256)>,
    inflight: InflightTracker,
    gpu: Box<dyn GpuMiner>,
    gpu_breaker: CircuitBreaker,
    stop_flag: Arc<AtomicBool>,
    mining: AtomicBool,
    workers_active: AtomicUsize,
    stats: MiningStats,
}

impl ProofOfWork {
    pub fn new(
        cfg: ConsensusConfig,
        ledger: Arc<dyn LedgerView>,
        audit: Arc<AuditSink>,
        work_log: Arc<WorkLog>,
        gpu: Box<dyn GpuMiner>,
    ) -> Self {
        let solution_cache = TtlCache::new(
            cfg.solution_cache_size,
            Duration::from_secs(cfg.solution_cache_ttl_secs),
        );
        let inflight = InflightTracker::new(cfg.max_blocks_in_flight, cfg.inflight_timeout());
        let gpu_breaker = CircuitBreaker::new(
            cfg.gpu_failure_threshold,
            Duration::from_secs(cfg.gpu_failure_window_secs),
            Duration::from_secs(cfg.gpu_cooloff_secs),
        );

        Self {
            cfg,
            ledger,
            mempool: RwLock::new(Weak::new()),
            voting: RwLock::new(Weak::new()),
            audit,
            work_log,
            solution_cache,
            inflight,
            gpu,
            gpu_breaker,
            stop_flag: Arc::new(AtomicBool::new(false)),
            mining: AtomicBool::new(false),
            workers_active: AtomicUsize::new(0),
            stats: MiningStats::default(),
        }
    }

    pub fn set_mempool(&self, mempool: Weak<Mempool>) {
        *self.mempool.write() = mempool;
    }

    pub fn set_voting(&self, voting: Weak<DirectVoting>) {
        *self.voting.write() = voting;
    }

    pub fn work_log(&self) -> &Arc<WorkLog> {
        &self.work_log
    }

    fn mempool(&self) -> Result<Arc<Mempool>> {
        self.mempool.read().upgrade().ok_or_else(|| {
            ConsensusError::InvariantViolated("mempool handle expired".into())
        })
    }

    fn voting_engine(&self) -> Result<Arc<DirectVoting>> {
        self.voting.read().upgrade().ok_or_else(|| {
            ConsensusError::InvariantViolated("voting handle expired".into())
        })
    }

    // -----------------------------------------------------------------
    // Templates & mining
    // -----------------------------------------------------------------

    pub fn get_block_template(&self, miner_address: &str) -> Result<BlockTemplate> {
        let mempool = self.mempool()?;
        template::build_template(self.ledger.as_ref(), &mempool, miner_address, now_secs())
    }

    /// Find a nonce for `block`.
    ///
    /// Strategy order per attempt: solution cache, GPU (breaker
    /// permitting), parallel CPU workers. The candidate is rebuilt from
    /// the mempool whenever the pool moves or the template ages out; each
    /// attempt is deadline-bounded with exponential retry, and exhaustion
    /// emits `block_failed`.
    pub async fn mine_block(&self, mut block: Block) -> Result<Block> {
        let cache_key = (block.header.previous_hash, block.header.merkle_root);
        if let Some((nonce, hash)) = self.solution_cache.get(&cache_key) {
            block.header.nonce = nonce;
            block.reseal();
            if block.hash == hash {
                return Ok(block);
            }
        }

        let work_key = work_key(&block);
        let guard = self.inflight.register(work_key)?;
        self.stats.blocks_attempted.fetch_add(1, Ordering::Relaxed);
        self.stop_flag.store(false, Ordering::Relaxed);
        let started = Instant::now();

        loop {
            let attempt = guard.note_attempt();
            let outcome = tokio::time::timeout(
                self.cfg.inflight_timeout(),
                self.mine_attempt(&mut block),
            )
            .await;

            match outcome {
                Ok(Ok(true)) => {
                    let elapsed = started.elapsed();
                    self.finish_mined_block(&block, elapsed)?;
                    return Ok(block);
                }
                Ok(Ok(false)) => {
                    // Interrupted or nonce space exhausted without a hit.
                    if self.stop_flag.load(Ordering::Relaxed) {
                        return Err(ConsensusError::WorkerError("mining interrupted".into()));
                    }
                }
                Ok(Err(err)) if !err.is_transient() => return Err(err),
                Ok(Err(err)) => {
                    log::debug!("mining attempt {attempt} error: {err}");
                }
                Err(_) => {
                    log::debug!("mining attempt {attempt} timed out");
                }
            }

            if attempt >= self.cfg.max_retry_attempts {
                self.audit.log_event(
                    "block_failed",
                    Severity::Warn,
                    "pow",
                    serde_json::json!({
                        "height": block.header.height,
                        "attempts": attempt,
                    }),
                );
                return Err(ConsensusError::BlockInflightTimeout(
                    block.header.previous_hash.to_hex(),
                ));
            }
            // Exponential pause between attempts.
            tokio::time::sleep(Duration::from_millis(50u64 << attempt.min(6))).await;
        }
    }

    /// One bounded attempt. Returns `Ok(true)` when `block` now carries a
    /// satisfying nonce.
    async fn mine_attempt(&self, block: &mut Block) -> Result<bool> {
        let mempool = self.mempool()?;
        let mut pool_seq = mempool.change_seq();
        let mut template_age = Instant::now();

        // GPU first while its breaker allows.
        if self.gpu.is_available() && !self.gpu_breaker.is_open() {
            match self
                .gpu
                .search(&block.header, &block.header.target, 0, MAX_NONCE, &self.stop_flag)
            {
                Ok(Some((nonce, _))) => {
                    self.gpu_breaker.record_success();
                    block.header.nonce = nonce;
                    block.reseal();
                    return Ok(true);
                }
                Ok(None) => self.gpu_breaker.record_success(),
                Err(err) => {
                    if self.gpu_breaker.record_failure() {
                        self.audit.log_event(
                            "gpu_breaker_opened",
                            Severity::Warn,
                            "pow",
                            serde_json::json!({ "error": err.to_string() }),
                        );
                    }
                    log::debug!("gpu search failed, falling back to cpu: {err}");
                }
            }
        }

        let workers = self.cfg.worker_threads();
        let batch = self.cfg.mining_batch_size;
        let slice = (batch * workers as u64).max(1);
        let counter = Arc::new(AtomicU64::new(0));
        let mut cursor = 0u64;

        self.workers_active.store(workers, Ordering::Relaxed);
        let result = loop {
            if self.stop_flag.load(Ordering::Relaxed) {
                break Ok(false);
            }
            if cursor >= MAX_NONCE {
                break Ok(false);
            }

            // Stale template: pool moved or candidate aged out.
            if mempool.change_seq() != pool_seq || template_age.elapsed() > TEMPLATE_MAX_AGE {
                pool_seq =
                    template::refresh_block(block, self.ledger.as_ref(), &mempool, now_secs())?;
                template_age = Instant::now();
                cursor = 0;
                continue;
            }

            // Keep the header timestamp live while grinding.
            let now = now_secs();
            if now > block.header.timestamp {
                block.header.timestamp = now;
            }

            let end = cursor.saturating_add(slice).min(MAX_NONCE);
            let found = miner::search_range(
                &block.header,
                &block.header.target,
                cursor,
                end,
                workers,
                batch,
                self.stop_flag.clone(),
                counter.clone(),
            )
            .await?;

            if let Some((nonce, _)) = found {
                block.header.nonce = nonce;
                block.reseal();
                break Ok(true);
            }
            cursor = end;
        };
        self.workers_active.store(0, Ordering::Relaxed);
        self.stats
            .hashes_total
            .fetch_add(counter.load(Ordering::Relaxed), Ordering::Relaxed);
        result
    }

    fn finish_mined_block(&self, block: &Block, elapsed: Duration) -> Result<()> {
        self.solution_cache.put(
            (block.header.previous_hash, block.header.merkle_root),
            (block.header.nonce, block.hash),
        );
        self.work_log.record(SolutionRecord {
            hash: block.hash,
            miner_address: block.header.miner_address.clone(),
            height: block.header.height,
            difficulty: block.header.difficulty,
            timestamp: now_secs(),
        })?;

        self.stats.blocks_mined.fetch_add(1, Ordering::Relaxed);
        self.stats
            .mining_ms_total
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        self.stats
            .last_block_time
            .store(now_secs(), Ordering::Relaxed);

        self.audit.log_event(
            "block_mined",
            Severity::Info,
            "pow",
            serde_json::json!({
                "height": block.header.height,
                "hash": block.hash.to_hex(),
                "nonce": block.header.nonce,
                "elapsed_ms": elapsed.as_millis() as u64,
            }),
        );
        Ok(())
    }

    // -----------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------

    /// Full block validation, deadline-bounded.
    pub async fn validate_block(&self, block: &Block) -> Result<bool> {
        tokio::time::timeout(
            self.cfg.validate_block_timeout(),
            self.validate_block_inner(block),
        )
        .await
        .map_err(|_| ConsensusError::MutexTimeout("validate_block".into()))?
    }

    async fn validate_block_inner(&self, block: &Block) -> Result<bool> {
        if block.header.height == 0 {
            return Err(ConsensusError::StructureInvalid(
                "genesis is not submittable".into(),
            ));
        }
        let prev = self
            .ledger
            .block_by_height(block.header.height - 1)
            .ok_or_else(|| ConsensusError::StructureInvalid("unknown parent block".into()))?;
        let expected_difficulty = self.ledger.next_difficulty();

        validation::validate_block(
            block,
            &prev,
            self.ledger.as_ref(),
            expected_difficulty,
            now_secs(),
        )?;

        if !block.votes.is_empty() {
            self.voting_engine()?.validate_votes(block)?;
        }

        self.check_quorum(block)?;
        Ok(true)
    }

    /// Submit an externally produced block: validate, log the solution.
    /// The chain driver commits accepted blocks to the ledger.
    pub async fn submit_block(&self, block: &Block) -> Result<bool> {
        self.validate_block(block).await?;

        self.work_log.record(SolutionRecord {
            hash: block.hash,
            miner_address: block.header.miner_address.clone(),
            height: block.header.height,
            difficulty: block.header.difficulty,
            timestamp: now_secs(),
        })?;
        self.audit.log_event(
            "block_accepted",
            Severity::Info,
            "pow",
            serde_json::json!({
                "height": block.header.height,
                "hash": block.hash.to_hex(),
            }),
        );
        Ok(true)
    }

    /// Validator-quorum check: live attesters ≥ ⌈0.67 × expected⌉.
    /// Absences are reported to the mempool's duty tracker.
    fn check_quorum(&self, block: &Block) -> Result<()> {
        let mempool = self.mempool()?;
        let expected = mempool.get_expected_validators();
        if expected.is_empty() {
            return Ok(());
        }

        let need = (QUORUM_FACTOR * expected.len() as f64).ceil() as usize;
        let present: HashSet<&str> = block.validators.iter().map(|a| a.as_str()).collect();

        let mut live = 0usize;
        let task_id = block.hash.to_hex();
        for validator in &expected {
            if present.contains(validator.address.as_str()) {
                live += 1;
                mempool.record_validator_participation(&validator.address);
            } else {
                mempool.handle_validation_failure(&task_id, &validator.address);
            }
        }

        if live < need {
            return Err(ConsensusError::StructureInvalid(format!(
                "validator quorum not met: {live}/{need}"
            )));
        }
        Ok(())
    }

    /// Standalone proof check: hybrid digest of `data` under the target
    /// for `difficulty`.
    pub fn validate_work(&self, data: &[u8], difficulty: u64) -> Result<bool> {
        if !consensus::difficulty_in_range(difficulty) {
            return Err(ConsensusError::DifficultyOutOfRange(difficulty));
        }
        let digest = hybrid_digest(data);
        Ok(meets_target(&digest, &target_from_difficulty(difficulty)))
    }

    /// Difficulty the block after `last_block` must carry.
    pub fn calculate_next_difficulty(&self, last_block: &Block) -> u64 {
        consensus::next_difficulty(
            last_block.header.height + 1,
            last_block.header.difficulty,
            self.ledger.retarget_span(&last_block.header),
        )
    }

    // -----------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------

    /// Estimated network hash rate over the last `blocks` blocks
    /// (`difficulty × 2³²` work per block over the observed span).
    pub fn get_network_hash_ps(&self, blocks: usize, height: Option<u64>) -> f64 {
        let tip = height.unwrap_or_else(|| self.ledger.height());
        let first = tip.saturating_sub(blocks as u64);

        let mut headers = Vec::new();
        for h in first..=tip {
            if let Some(block) = self.ledger.block_by_height(h) {
                headers.push(block.header);
            }
        }

        if headers.len() < 2 {
            let difficulty = headers
                .last()
                .map(|h| h.difficulty)
                .unwrap_or(consensus::INITIAL_DIFFICULTY);
            return consensus::work_per_block(difficulty) as f64 / TARGET_BLOCK_TIME as f64;
        }

        let span = headers
            .last()
            .map(|l| l.timestamp)
            .unwrap_or(0)
            .saturating_sub(headers[0].timestamp)
            .max(1);
        let work: u128 = headers
            .iter()
            .skip(1)
            .map(|h| consensus::work_per_block(h.difficulty))
            .sum();
        work as f64 / span as f64
    }

    pub fn get_mining_info(&self) -> MiningInfo {
        let mempool_stats = self
            .mempool()
            .ok()
            .map(|m| (m.size(), m.bytes(), m.get_expected_validators().len()))
            .unwrap_or((0, 0, 0));

        let mined = self.stats.blocks_mined.load(Ordering::Relaxed);
        let attempted = self.stats.blocks_attempted.load(Ordering::Relaxed);
        let mining_ms = self.stats.mining_ms_total.load(Ordering::Relaxed);
        let hashes = self.stats.hashes_total.load(Ordering::Relaxed);
        let last_block = self.stats.last_block_time.load(Ordering::Relaxed);

        let workers_total = self.cfg.worker_threads();
        let active = self.workers_active.load(Ordering::Relaxed);

        let participation = self
            .voting
            .read()
            .upgrade()
            .map(|v| v.participation_fraction())
            .unwrap_or(0.0);

        let gpu_status = if !self.gpu.is_available() {
            GpuStatus::Unavailable
        } else if self.gpu_breaker.is_open() {
            GpuStatus::CircuitOpen
        } else {
            GpuStatus::Ready
        };

        MiningInfo {
            pow_enabled: true,
            mining: self.mining.load(Ordering::Relaxed),
            hash_rate: if mining_ms > 0 {
                hashes as f64 / (mining_ms as f64 / 1_000.0)
            } else {
                0.0
            },
            difficulty: self.ledger.next_difficulty(),
            network_hash_rate: self.get_network_hash_ps(120, None),
            block_height: self.ledger.height(),
            last_block_time: (last_block > 0).then_some(last_block),
            workers: WorkerInfo {
                total: workers_total,
                active,
                idle: workers_total.saturating_sub(active),
            },
            hardware: HardwareInfo {
                gpu: self.gpu.name().to_string(),
                gpu_status,
                cpu_threads: workers_total,
            },
            mempool: MempoolSummary {
                pending: mempool_stats.0,
                bytes: mempool_stats.1,
            },
            performance: PerformanceInfo {
                avg_block_time: if mined > 0 {
                    mining_ms as f64 / mined as f64 / 1_000.0
                } else {
                    0.0
                },
                success_rate: if attempted > 0 {
                    mined as f64 / attempted as f64
                } else {
                    0.0
                },
                cache_hit_rate: self.solution_cache.hit_rate(),
            },
            network: NetworkStats {
                active_miners: mempool_stats.2,
                participation_rate: participation,
                target_block_time: TARGET_BLOCK_TIME,
            },
        }
    }

    // -----------------------------------------------------------------
    // Control
    // -----------------------------------------------------------------

    pub fn start_mining(&self) {
        self.stop_flag.store(false, Ordering::Relaxed);
        self.mining.store(true, Ordering::Relaxed);
    }

    pub fn stop_mining(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        self.mining.store(false, Ordering::Relaxed);
    }

    /// Pause the current search without leaving mining mode.
    pub fn interrupt_mining(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }

    pub fn resume_mining(&self) {
        self.stop_flag.store(false, Ordering::Relaxed);
        self.mining.store(true, Ordering::Relaxed);
    }

    pub fn is_mining(&self) -> bool {
        self.mining.load(Ordering::Relaxed)
    }

    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    /// Stop everything and drop caches. Idempotent.
    pub fn dispose(&self) {
        self.stop_mining();
        self.solution_cache.clear();
    }
}

fn work_key(block: &Block) -> Hash256 {
    let mut data = Vec::with_capacity(64);
    data.extend_from_slice(&block.header.previous_hash.0);
    data.extend_from_slice(&block.header.merkle_root.0);
    sha3_256(&data)
}
