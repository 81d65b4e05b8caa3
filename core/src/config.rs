use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Operational tunables for the consensus core.
///
/// Consensus-critical constants (difficulty clamps, reward schedule, RBF
/// increment, ancestry caps) are `pub const` in their owning modules and are
/// NOT configurable — changing them is a hard fork. Everything here is an
/// operational knob a node operator may legitimately vary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    // ── Mempool ──
    /// Maximum number of transactions held in the pool.
    pub mempool_max_size: usize,
    /// Maximum total serialized bytes held in the pool.
    pub mempool_max_bytes: usize,
    /// Pool population above which the dynamic minimum fee gate engages.
    pub high_congestion_threshold: usize,
    /// Hard deadline for a single `add_transaction` call.
    pub add_tx_timeout_secs: u64,
    /// Entries older than this are dropped by housekeeping.
    pub tx_expiry_secs: u64,

    // ── Vote eligibility ──
    /// Minimum validator account age, in blocks.
    pub min_account_age_blocks: u64,
    /// Minimum accumulated PoW contribution (sum of solution difficulties).
    pub min_pow_contribution: u64,
    /// Minimum reputation score [0, 100].
    pub reputation_threshold: u32,
    /// Blocks a voter must wait between quadratic-vote transactions.
    pub vote_cooldown_blocks: u64,
    /// Maximum vote transactions per rolling window.
    pub max_votes_per_window: u32,
    /// Rolling window length for the per-address vote counter.
    pub vote_rate_window_secs: u64,

    // ── Validator absence ──
    /// Penalty for the first consecutive missed duty.
    pub absence_base_penalty: f64,
    /// Multiplier compounded per consecutive miss.
    pub absence_penalty_multiplier: f64,
    /// Consecutive misses after which a validator is flagged for suspension.
    pub max_consecutive_misses: u32,
    pub min_backup_reputation: u32,
    pub min_backup_uptime: f64,
    /// A backup already handling this many tasks is ineligible.
    pub max_backup_tasks: u32,

    // ── Proof of work ──
    /// Concurrent mining attempts reserved against the engine.
    pub max_blocks_in_flight: usize,
    /// Per-attempt mining deadline.
    pub inflight_timeout_secs: u64,
    /// Retry budget per in-flight block before `block_failed`.
    pub max_retry_attempts: u32,
    /// Nonces each worker iterates between stop-flag checks.
    pub mining_batch_size: u64,
    /// Worker threads; 0 = one per available core.
    pub worker_threads: usize,
    /// Hard deadline for a single `validate_block` call.
    pub validate_block_timeout_secs: u64,
    /// GPU failures within the window that open the breaker.
    pub gpu_failure_threshold: u32,
    pub gpu_failure_window_secs: u64,
    pub gpu_cooloff_secs: u64,
    /// Solution cache capacity (entries) and TTL.
    pub solution_cache_size: usize,
    pub solution_cache_ttl_secs: u64,

    // ── Voting ──
    /// Periods begin at multiples of this block count.
    pub voting_period_blocks: u64,
    /// Wall-clock length of a voting period, milliseconds.
    pub voting_period_ms: u64,
    /// Cadence of the period-transition checker, milliseconds.
    pub period_check_interval_ms: u64,
    pub max_vote_size: usize,
    /// Minimum participation rate for `health_check`, in percent.
    pub min_participation_percent: u32,
    /// Per-vote signature verification deadline.
    pub vote_verify_timeout_secs: u64,
    /// Deepest fork the voting engine will arbitrate.
    pub max_fork_depth: u64,

    // ── Network health ──
    pub min_peer_count: usize,
    /// Consecutive stability failures that open the breaker.
    pub network_failure_threshold: u32,
    /// Cadence at which the sticky failure counter decays to zero.
    pub network_failure_reset_secs: u64,
    /// How long the breaker stays open once tripped.
    pub breaker_cooloff_secs: u64,

    // ── Audit ──
    /// Ring-buffer capacity of the audit channel; slowest observers drop
    /// the oldest records past this.
    pub audit_buffer_size: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            mempool_max_size: 50_000,
            mempool_max_bytes: 64 * 1024 * 1024,
            high_congestion_threshold: 25_000,
            add_tx_timeout_secs: 30,
            tx_expiry_secs: 3_600,

            min_account_age_blocks: 1_000,
            min_pow_contribution: 1_000,
            reputation_threshold: 50,
            vote_cooldown_blocks: 10,
            max_votes_per_window: 5,
            vote_rate_window_secs: 3_600,

            absence_base_penalty: 5.0,
            absence_penalty_multiplier: 1.5,
            max_consecutive_misses: 5,
            min_backup_reputation: 60,
            min_backup_uptime: 0.95,
            max_backup_tasks: 3,

            max_blocks_in_flight: 16,
            inflight_timeout_secs: 60,
            max_retry_attempts: 3,
            mining_batch_size: 10_000,
            worker_threads: 0,
            validate_block_timeout_secs: 30,
            gpu_failure_threshold: 3,
            gpu_failure_window_secs: 300,
            gpu_cooloff_secs: 300,
            solution_cache_size: 512,
            solution_cache_ttl_secs: 600,

            voting_period_blocks: 100,
            voting_period_ms: 600_000,
            period_check_interval_ms: 1_000,
            max_vote_size: 16 * 1024,
            min_participation_percent: 10,
            vote_verify_timeout_secs: 5,
            max_fork_depth: 50,

            min_peer_count: 3,
            network_failure_threshold: 3,
            network_failure_reset_secs: 300,
            breaker_cooloff_secs: 300,

            audit_buffer_size: 4_096,
        }
    }
}

impl ConsensusConfig {
    /// Sanity-check operator-supplied values before wiring the bundle.
    pub fn validate(&self) -> Result<(), String> {
        if self.mempool_max_size == 0 {
            return Err("mempool_max_size must be > 0".into());
        }
        if self.high_congestion_threshold > self.mempool_max_size {
            return Err("high_congestion_threshold cannot exceed mempool_max_size".into());
        }
        if self.max_blocks_in_flight == 0 {
            return Err("max_blocks_in_flight must be > 0".into());
        }
        if self.voting_period_blocks == 0 {
            return Err("voting_period_blocks must be > 0".into());
        }
        if self.min_participation_percent > 100 {
            return Err("min_participation_percent must be <= 100".into());
        }
        if self.absence_penalty_multiplier < 1.0 {
            return Err("absence_penalty_multiplier must be >= 1.0".into());
        }
        if !(0.0..=1.0).contains(&self.min_backup_uptime) {
            return Err("min_backup_uptime must be within [0, 1]".into());
        }
        Ok(())
    }

    pub fn add_tx_timeout(&self) -> Duration {
        Duration::from_secs(self.add_tx_timeout_secs)
    }

    pub fn validate_block_timeout(&self) -> Duration {
        Duration::from_secs(self.validate_block_timeout_secs)
    }

    pub fn inflight_timeout(&self) -> Duration {
        Duration::from_secs(self.inflight_timeout_secs)
    }

    pub fn worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            self.worker_threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}
