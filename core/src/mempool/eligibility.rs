use std::collections::{HashMap, VecDeque};

use crate::config::ConsensusConfig;
use crate::error::{ConsensusError, Result};
use crate::ledger::LedgerView;
use crate::mempool::PowContribution;

#[derive(Debug, Default)]
struct VoterHistory {
    last_vote_height: Option<u64>,
    /// Unix-second timestamps of vote transactions inside the rolling window.
    window: VecDeque<u64>,
}

/// Admission gate for `QUADRATIC_VOTE` transactions.
///
/// A voter qualifies when the account is old enough, has contributed real
/// proof-of-work, holds sufficient reputation, has waited out the cooldown
/// since its previous vote, and stays under the rolling-window vote budget.
#[derive(Debug, Default)]
pub struct EligibilityTracker {
    history: HashMap<String, VoterHistory>,
}

impl EligibilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(
        &mut self,
        cfg: &ConsensusConfig,
        ledger: &dyn LedgerView,
        work: &dyn PowContribution,
        address: &str,
        now: u64,
        current_height: u64,
    ) -> Result<()> {
        let validator = ledger.validator(address).ok_or_else(|| {
            ConsensusError::UnauthorizedValidator(address.to_string())
        })?;

        if validator.account_age(current_height) < cfg.min_account_age_blocks {
            return Err(ConsensusError::VoteIneligible {
                address: address.to_string(),
                reason: format!(
                    "account age {} below minimum {}",
                    validator.account_age(current_height),
                    cfg.min_account_age_blocks
                ),
            });
        }

        let contribution = work.contribution(address);
        if contribution < cfg.min_pow_contribution {
            return Err(ConsensusError::VoteIneligible {
                address: address.to_string(),
                reason: format!(
                    "pow contribution {contribution} below minimum {}",
                    cfg.min_pow_contribution
                ),
            });
        }

        if validator.reputation < cfg.reputation_threshold {
            return Err(ConsensusError::VoteIneligible {
                address: address.to_string(),
                reason: format!(
                    "reputation {} below threshold {}",
                    validator.reputation, cfg.reputation_threshold
                ),
            });
        }

        let history = self.history.entry(address.to_string()).or_default();

        if let Some(last) = history.last_vote_height {
            let elapsed = current_height.saturating_sub(last);
            if elapsed < cfg.vote_cooldown_blocks {
                return Err(ConsensusError::VoteIneligible {
                    address: address.to_string(),
                    reason: format!(
                        "cooldown: {elapsed} blocks since last vote (need {})",
                        cfg.vote_cooldown_blocks
                    ),
                });
            }
        }

        // The rolling window resets the counter by expiry, not by epoch.
        let window_start = now.saturating_sub(cfg.vote_rate_window_secs);
        while history.window.front().is_some_and(|&t| t < window_start) {
            history.window.pop_front();
        }
        if history.window.len() as u32 >= cfg.max_votes_per_window {
            return Err(ConsensusError::RateLimited {
                actor: address.to_string(),
            });
        }

        Ok(())
    }

    /// Record an admitted vote transaction.
    pub fn record_vote(&mut self, address: &str, now: u64, height: u64) {
        let history = self.history.entry(address.to_string()).or_default();
        history.last_vote_height = Some(height);
        history.window.push_back(now);
    }

    pub fn last_vote_height(&self, address: &str) -> Option<u64> {
        self.history.get(address).and_then(|h| h.last_vote_height)
    }
}
