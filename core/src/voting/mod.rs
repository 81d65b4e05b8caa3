pub mod period;
pub mod power;

use parking_lot::RwLock as SyncRwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::audit::{AuditSink, Severity};
use crate::blockchain::block::Block;
use crate::config::ConsensusConfig;
use crate::crypto::keys;
use crate::error::{ConsensusError, Result};
use crate::ledger::LedgerView;
use crate::mempool::Mempool;
use crate::p2p::NetworkHealth;
use crate::storage::{keys as kv_keys, KvStore};
use crate::utils::now_ms;
use crate::utils::rate_limiter::{RateLimiter, RateLimiterConfig};
use crate::utils::timed_lock::lock_timeout;
use crate::voting::period::{
    votes_merkle_root, CompetingChains, ForkDecision, PeriodStatus, PeriodType, Vote, VotingPeriod,
};
use crate::voting::power::voting_power;

/// Longest single timer arm; longer waits re-arm in chunks.
pub const MAX_TIMER_MS: u64 = (1 << 31) - 1;

/// Block votes must sit within ±5 minutes of the validator's clock.
pub const VOTE_TIMESTAMP_TOLERANCE_SECS: u64 = 300;

/// Wait budget for the vote/period mutexes.
const VOTE_LOCK_WAIT: Duration = Duration::from_secs(5);

/// Context handed to the vote collector during fork arbitration.
#[derive(Debug, Clone)]
pub struct ForkContext {
    pub old_chain_id: String,
    pub new_chain_id: String,
    pub fork_height: u64,
    pub period_id: u64,
}

/// Source of validator votes during fork resolution. Production wires a
/// peer-query implementation; tests script it.
pub trait VoteProvider: Send + Sync {
    fn collect_votes(&self, validators: &[String], context: &ForkContext) -> Vec<Vote>;
}

/// Collector that never returns votes (ties resolve to the old chain).
pub struct NoVotes;

impl VoteProvider for NoVotes {
    fn collect_votes(&self, _validators: &[String], _context: &ForkContext) -> Vec<Vote> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingSchedule {
    pub current_period: Option<VotingPeriod>,
    pub next_voting_height: u64,
    pub blocks_until_next_voting: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingMetrics {
    pub current_period_id: Option<u64>,
    pub votes_in_period: usize,
    pub votes_accepted: u64,
    pub votes_rejected: u64,
    pub periods_completed: u64,
    pub forks_resolved: u64,
    /// Participation as an exact rational (active, eligible).
    pub participation: (u64, u64),
}

#[derive(Default)]
struct VoteCounters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    periods_completed: AtomicU64,
    forks_resolved: AtomicU64,
}

/// Direct quadratic-voting engine: period lifecycle, vote admission,
/// vote-carrying block validation, and fork arbitration.
pub struct DirectVoting {
    cfg: ConsensusConfig,
    ledger: Arc<dyn LedgerView>,
    store: Arc<dyn KvStore>,
    audit: Arc<AuditSink>,
    health: Arc<NetworkHealth>,
    mempool: SyncRwLock<Weak<Mempool>>,
    provider: Arc<dyn VoteProvider>,
    /// Outer vote mutex; held (before the period mutex) for any vote write.
    vote_mutex: tokio::sync::Mutex<()>,
    /// Inner period mutex guarding the current period.
    period: tokio::sync::Mutex<Option<VotingPeriod>>,
    next_voting_height: AtomicU64,
    initialized: AtomicBool,
    checker: SyncRwLock<Option<tokio::task::JoinHandle<()>>>,
    counters: VoteCounters,
    /// Per-voter submission throttle.
    limiter: RateLimiter,
    /// Short-lived participation cache; eligibility scans are not free.
    participation_cache: SyncRwLock<Option<(std::time::Instant, (u64, u64))>>,
}

impl DirectVoting {
    pub fn new(
        cfg: ConsensusConfig,
        ledger: Arc<dyn LedgerView>,
        store: Arc<dyn KvStore>,
        audit: Arc<AuditSink>,
        health: Arc<NetworkHealth>,
        provider: Arc<dyn VoteProvider>,
    ) -> Self {
        Self {
            cfg,
            ledger,
            store,
            audit,
            health,
            mempool: SyncRwLock::new(Weak::new()),
            provider,
            vote_mutex: tokio::sync::Mutex::new(()),
            period: tokio::sync::Mutex::new(None),
            next_voting_height: AtomicU64::new(0),
            initialized: AtomicBool::new(false),
            checker: SyncRwLock::new(None),
            counters: VoteCounters::default(),
            limiter: RateLimiter::new(RateLimiterConfig {
                max_requests: 30,
                window: Duration::from_secs(60),
                block_duration: Duration::from_secs(300),
                ban_threshold: 10,
            }),
            participation_cache: SyncRwLock::new(None),
        }
    }

    pub fn set_mempool(&self, mempool: Weak<Mempool>) {
        *self.mempool.write() = mempool;
    }

    // -----------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------

    /// Recover persisted state and start the period checker.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Recover the newest persisted period, if any.
        let recovered = self.latest_persisted_period()?;
        {
            let mut period = self.period.lock().await;
            *period = recovered.filter(|p| p.is_active());
            if let Some(p) = period.as_ref() {
                log::info!("recovered active voting period {}", p.period_id);
            }
        }

        let height = self.ledger.height();
        let blocks = self.cfg.voting_period_blocks;
        let next = height.div_ceil(blocks) * blocks;
        self.next_voting_height.store(next, Ordering::SeqCst);

        // Period checker; doubles as the chunk-bounded start timer.
        let weak = Arc::downgrade(self);
        let interval = Duration::from_millis(self.cfg.period_check_interval_ms.max(10));
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval.min(Duration::from_millis(MAX_TIMER_MS))).await;
                let Some(engine) = weak.upgrade() else { break };
                if let Err(err) = engine.check_period_transition().await {
                    log::warn!("period transition failed: {err}");
                }
            }
        });
        *self.checker.write() = Some(handle);

        Ok(())
    }

    fn latest_persisted_period(&self) -> Result<Option<VotingPeriod>> {
        let rows = self
            .store
            .scan_prefix(&kv_keys::voting_period_prefix())
            .map_err(ConsensusError::from_storage)?;
        // Keys are zero-padded, so the scan is id-ordered; last wins.
        Ok(rows
            .last()
            .and_then(|(_, value)| bincode::deserialize(value).ok()))
    }

    /// Ensure an active period exists, opening one if needed. Returns the
    /// period id.
    pub async fn ensure_period(&self) -> Result<u64> {
        let mut period = lock_timeout(&self.period, VOTE_LOCK_WAIT, "voting period").await?;
        if period.as_ref().map(|p| p.is_active()).unwrap_or(false) {
            return Ok(period.as_ref().expect("checked").period_id);
        }
        let next_id = period.as_ref().map(|p| p.period_id + 1).unwrap_or_else(|| {
            self.latest_persisted_period()
                .ok()
                .flatten()
                .map(|p| p.period_id + 1)
                .unwrap_or(1)
        });
        let opened = self.open_period(next_id, PeriodType::NodeSelection)?;
        *period = Some(opened);
        Ok(next_id)
    }

    fn open_period(&self, period_id: u64, period_type: PeriodType) -> Result<VotingPeriod> {
        let period = VotingPeriod::new(
            period_id,
            period_type,
            self.ledger.height(),
            self.cfg.voting_period_blocks,
            now_ms(),
            self.cfg.voting_period_ms,
        );
        self.persist_period(&period)?;
        self.audit.log_event(
            "period_opened",
            Severity::Info,
            "voting",
            serde_json::json!({
                "period_id": period.period_id,
                "start_block": period.start_block,
                "end_block": period.end_block,
            }),
        );
        Ok(period)
    }

    fn persist_period(&self, period: &VotingPeriod) -> Result<()> {
        self.store
            .put(
                &kv_keys::voting_period(period.period_id),
                &bincode::serialize(period)
                    .map_err(|e| ConsensusError::ConsensusStateCorrupted(e.to_string()))?,
            )
            .map_err(ConsensusError::from_storage)
    }

    fn persist_vote(&self, vote: &Vote) -> Result<()> {
        self.store
            .put(
                &kv_keys::voting_vote(vote.period_id, &vote.voter_address),
                &bincode::serialize(vote)
                    .map_err(|e| ConsensusError::ConsensusStateCorrupted(e.to_string()))?,
            )
            .map_err(ConsensusError::from_storage)
    }

    /// Atomic state update: snapshot → mutate-or-abort → persist → commit.
    /// A persistence failure leaves memory untouched.
    fn update_voting_state<F>(&self, slot: &mut Option<VotingPeriod>, mutate: F) -> Result<bool>
    where
        F: FnOnce(VotingPeriod) -> Option<VotingPeriod>,
    {
        let Some(snapshot) = slot.clone() else {
            return Err(ConsensusError::NoActivePeriod);
        };
        let Some(updated) = mutate(snapshot) else {
            return Ok(false);
        };
        self.persist_period(&updated)?;
        *slot = Some(updated);
        Ok(true)
    }

    /// Close an expired period and open its successor; arms the very
    /// first period when none is running yet.
    pub async fn check_period_transition(&self) -> Result<()> {
        // Transition holds only the period mutex.
        let mut slot = lock_timeout(&self.period, VOTE_LOCK_WAIT, "voting period").await?;
        let now = now_ms();

        let Some(current) = slot.as_ref() else {
            let next_id = self
                .latest_persisted_period()?
                .map(|p| p.period_id + 1)
                .unwrap_or(1);
            *slot = Some(self.open_period(next_id, PeriodType::NodeSelection)?);
            return Ok(());
        };
        if !current.expired(now) || !current.is_active() {
            return Ok(());
        }

        let closing_id = current.period_id;
        self.update_voting_state(&mut slot, |mut p| {
            p.status = PeriodStatus::Completed;
            p.is_audited = true;
            Some(p)
        })?;
        self.counters.periods_completed.fetch_add(1, Ordering::Relaxed);
        self.audit.log_event(
            "period_transitioned",
            Severity::Info,
            "voting",
            serde_json::json!({ "period_id": closing_id }),
        );

        let next = self.open_period(closing_id + 1, PeriodType::NodeSelection)?;
        *slot = Some(next);
        self.participation_cache.write().take();

        let blocks = self.cfg.voting_period_blocks;
        let next_height = self.ledger.height().div_ceil(blocks) * blocks + blocks;
        self.next_voting_height.store(next_height, Ordering::SeqCst);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Vote admission
    // -----------------------------------------------------------------

    /// Admit a vote into the active period.
    pub async fn submit_vote(&self, mut vote: Vote) -> Result<bool> {
        self.limiter.allow("vote", &vote.voter_address)?;

        // Lock order: vote mutex, then period mutex.
        let _outer = lock_timeout(&self.vote_mutex, VOTE_LOCK_WAIT, "vote").await?;
        let mut slot = lock_timeout(&self.period, VOTE_LOCK_WAIT, "voting period").await?;

        let now = now_ms();
        let current = slot.as_ref().ok_or(ConsensusError::NoActivePeriod)?;
        if !current.is_active() {
            return Err(ConsensusError::NoActivePeriod);
        }
        if vote.period_id != current.period_id || !current.in_time_window(now) {
            return Err(ConsensusError::OutsidePeriodWindow);
        }
        if !current.in_block_window(vote.height) {
            return Err(ConsensusError::OutsidePeriodWindow);
        }
        if current.has_voted(&vote.voter_address) {
            return Err(ConsensusError::DuplicateVote(vote.voter_address.clone()));
        }

        let size = vote.serialized_size();
        if size > self.cfg.max_vote_size {
            return Err(ConsensusError::VoteTooLarge {
                size,
                max: self.cfg.max_vote_size,
            });
        }

        self.ledger
            .validator(&vote.voter_address)
            .filter(|v| v.is_eligible())
            .ok_or_else(|| ConsensusError::UnauthorizedValidator(vote.voter_address.clone()))?;

        // Signature verification under its own deadline; a hung verifier
        // rejects the vote rather than stalling the period.
        let payload = vote.canonical_bytes();
        let public_key = vote.voter_public_key.clone();
        let signature = vote.signature.clone();
        let verified = tokio::time::timeout(
            Duration::from_secs(self.cfg.vote_verify_timeout_secs),
            tokio::task::spawn_blocking(move || keys::verify(&public_key, &payload, &signature)),
        )
        .await;
        match verified {
            Ok(Ok(true)) => {}
            Ok(_) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(ConsensusError::SignatureInvalid);
            }
            Err(_) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                self.audit.log_event(
                    "vote_verify_timeout",
                    Severity::Warn,
                    "voting",
                    serde_json::json!({ "voter": vote.voter_address }),
                );
                return Err(ConsensusError::SignatureInvalid);
            }
        }

        vote.voting_power = voting_power(vote.stake());
        if vote.vote_id.is_zero() {
            vote.vote_id = vote.compute_id();
        }

        let accepted = vote.clone();
        let inserted = self.update_voting_state(&mut slot, move |mut p| {
            if p.insert_vote(accepted) {
                Some(p)
            } else {
                None
            }
        })?;
        if !inserted {
            return Err(ConsensusError::DuplicateVote(vote.voter_address));
        }
        self.persist_vote(&vote)?;

        // Voting counts as performed duty for the absence tracker.
        if let Some(mempool) = self.mempool.read().upgrade() {
            mempool.record_validator_participation(&vote.voter_address);
        }
        self.participation_cache.write().take();

        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
        self.audit.log_event(
            "vote_submitted",
            Severity::Info,
            "voting",
            serde_json::json!({
                "voter": vote.voter_address,
                "period_id": vote.period_id,
                "voting_power": vote.voting_power.to_string(),
            }),
        );
        Ok(true)
    }

    // -----------------------------------------------------------------
    // Fork arbitration
    // -----------------------------------------------------------------

    /// Resolve a chain fork by quadratic tally. Returns the winning chain
    /// id; ties keep the old chain.
    pub async fn handle_chain_fork(
        &self,
        old_chain_id: &str,
        new_chain_id: &str,
        fork_height: u64,
        validators: &[String],
    ) -> Result<String> {
        self.health.check()?;

        let height = self.ledger.height();
        let depth = height.saturating_sub(fork_height);
        if depth > self.cfg.max_fork_depth {
            return Err(ConsensusError::ForkTooDeep {
                depth,
                max: self.cfg.max_fork_depth,
            });
        }

        let _outer = lock_timeout(&self.vote_mutex, VOTE_LOCK_WAIT, "vote").await?;
        let mut slot = lock_timeout(&self.period, VOTE_LOCK_WAIT, "voting period").await?;

        // Close whatever period is running; arbitration gets its own.
        let next_id = match slot.take() {
            Some(mut previous) => {
                if previous.is_active() {
                    previous.status = PeriodStatus::Completed;
                    self.persist_period(&previous)?;
                    self.counters.periods_completed.fetch_add(1, Ordering::Relaxed);
                }
                previous.period_id + 1
            }
            None => self
                .latest_persisted_period()?
                .map(|p| p.period_id + 1)
                .unwrap_or(1),
        };

        let mut period = self.open_period(next_id, PeriodType::ChainSelection)?;
        period.competing_chains = Some(CompetingChains {
            old_chain_id: old_chain_id.to_string(),
            new_chain_id: new_chain_id.to_string(),
            fork_height,
        });

        // Collect and admit validator votes.
        let context = ForkContext {
            old_chain_id: old_chain_id.to_string(),
            new_chain_id: new_chain_id.to_string(),
            fork_height,
            period_id: next_id,
        };
        let eligible: std::collections::HashSet<&str> =
            validators.iter().map(|s| s.as_str()).collect();
        for mut vote in self.provider.collect_votes(validators, &context) {
            if !eligible.contains(vote.voter_address.as_str()) {
                continue;
            }
            vote.period_id = next_id;
            vote.voting_power = voting_power(vote.stake());
            if vote.vote_id.is_zero() {
                vote.vote_id = vote.compute_id();
            }
            period.insert_vote(vote);
        }

        // Quadratic tally: approvals back the new chain, rejections the old.
        let (approved, rejected) = period.chain_vote_totals();
        let new_power = voting_power(approved);
        let old_power = voting_power(rejected);
        let selected = if new_power > old_power {
            new_chain_id.to_string()
        } else {
            old_chain_id.to_string()
        };

        period.fork_decision = Some(ForkDecision {
            selected_chain_id: selected.clone(),
            new_chain_power: new_power,
            old_chain_power: old_power,
            decided_at: now_ms(),
            fork_height,
        });
        period.status = PeriodStatus::Completed;
        period.is_audited = true;
        self.persist_period(&period)?;
        *slot = Some(period);

        self.counters.forks_resolved.fetch_add(1, Ordering::Relaxed);
        self.counters.periods_completed.fetch_add(1, Ordering::Relaxed);
        self.audit.log_event(
            "fork_resolved",
            Severity::High,
            "voting",
            serde_json::json!({
                "old_chain": old_chain_id,
                "new_chain": new_chain_id,
                "selected": selected,
                "new_power": new_power.to_string(),
                "old_power": old_power.to_string(),
                "fork_height": fork_height,
            }),
        );
        Ok(selected)
    }

    // -----------------------------------------------------------------
    // Block vote validation
    // -----------------------------------------------------------------

    /// Validate a vote-carrying block: commitment root, timestamps, and
    /// signatures under attested validators.
    pub fn validate_votes(&self, block: &Block) -> Result<bool> {
        let expected_root = votes_merkle_root(&block.votes);
        if block.header.validator_merkle_root != expected_root {
            return Err(ConsensusError::MerkleMismatch);
        }

        let now = crate::utils::now_secs();
        let current = self.current_period_snapshot();

        for vote in &block.votes {
            let drift = now.abs_diff(vote.timestamp);
            if drift > VOTE_TIMESTAMP_TOLERANCE_SECS {
                return Err(ConsensusError::TimestampOutOfRange(format!(
                    "vote from {} drifted {drift}s",
                    vote.voter_address
                )));
            }

            if !block.validators.iter().any(|v| v == &vote.voter_address) {
                return Err(ConsensusError::UnauthorizedValidator(
                    vote.voter_address.clone(),
                ));
            }

            if !keys::verify(
                &vote.voter_public_key,
                &vote.canonical_bytes(),
                &vote.signature,
            ) {
                return Err(ConsensusError::SignatureInvalid);
            }

            if let Some(period) = &current {
                let ts_ms = vote.timestamp * 1_000;
                if ts_ms < period.start_time || ts_ms >= period.end_time {
                    return Err(ConsensusError::OutsidePeriodWindow);
                }
            }
        }
        Ok(true)
    }

    // -----------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------

    fn current_period_snapshot(&self) -> Option<VotingPeriod> {
        // Non-blocking read; a held period mutex means a mutation is in
        // flight and the pre-mutation view is still coherent for readers.
        self.period.try_lock().ok().and_then(|p| p.clone())
    }

    pub async fn get_voting_schedule(&self) -> Result<VotingSchedule> {
        let slot = lock_timeout(&self.period, VOTE_LOCK_WAIT, "voting period").await?;
        let next = self.next_voting_height.load(Ordering::SeqCst);
        Ok(VotingSchedule {
            current_period: slot.clone(),
            next_voting_height: next,
            blocks_until_next_voting: next.saturating_sub(self.ledger.height()),
        })
    }

    /// Participation as an exact rational (active voters, eligible
    /// voters), clamped to ≤ 1. Cached for a few seconds.
    pub fn get_participation_rate(&self) -> (u64, u64) {
        const CACHE_TTL: Duration = Duration::from_secs(5);
        if let Some((at, rate)) = *self.participation_cache.read() {
            if at.elapsed() < CACHE_TTL {
                return rate;
            }
        }
        let rate = self.compute_participation_rate();
        *self.participation_cache.write() = Some((std::time::Instant::now(), rate));
        rate
    }

    fn compute_participation_rate(&self) -> (u64, u64) {
        let eligible = self
            .ledger
            .validator_set()
            .iter()
            .filter(|v| v.is_eligible())
            .count() as u64;
        let active = self
            .current_period_snapshot()
            .map(|p| p.votes.len() as u64)
            .unwrap_or(0);
        if eligible == 0 {
            return (0, 1);
        }
        (active.min(eligible), eligible)
    }

    /// Participation rounded to a float — external boundary only.
    pub fn participation_fraction(&self) -> f64 {
        let (num, den) = self.get_participation_rate();
        num as f64 / den as f64
    }

    pub fn get_voting_metrics(&self) -> VotingMetrics {
        let snapshot = self.current_period_snapshot();
        VotingMetrics {
            current_period_id: snapshot.as_ref().map(|p| p.period_id),
            votes_in_period: snapshot.map(|p| p.votes.len()).unwrap_or(0),
            votes_accepted: self.counters.accepted.load(Ordering::Relaxed),
            votes_rejected: self.counters.rejected.load(Ordering::Relaxed),
            periods_completed: self.counters.periods_completed.load(Ordering::Relaxed),
            forks_resolved: self.counters.forks_resolved.load(Ordering::Relaxed),
            participation: self.get_participation_rate(),
        }
    }

    /// Healthy when the schedule is armed and participation clears the
    /// configured floor.
    pub fn health_check(&self) -> bool {
        if !self.initialized.load(Ordering::SeqCst) {
            return false;
        }
        let (num, den) = self.get_participation_rate();
        if den == 0 {
            return false;
        }
        num * 100 >= den * self.cfg.min_participation_percent as u64
    }

    /// Stop the checker task. Idempotent.
    pub fn dispose(&self) {
        if let Some(handle) = self.checker.write().take() {
            handle.abort();
        }
        self.initialized.store(false, Ordering::SeqCst);
    }
}

impl Drop for DirectVoting {
    fn drop(&mut self) {
        self.dispose();
    }
}
