use std::collections::HashMap;

use crate::config::ConsensusConfig;
use crate::validators::Validator;

/// Outcome of recording one missed duty.
#[derive(Debug, Clone, PartialEq)]
pub struct AbsencePenalty {
    pub penalty: f64,
    pub consecutive: u32,
    /// The validator crossed the miss cap and should be suspended.
    pub flag_suspension: bool,
}

#[derive(Debug, Default, Clone)]
struct AbsenceRecord {
    consecutive: u32,
    total_penalty: f64,
    flagged: bool,
}

/// Missed-duty accounting and backup selection.
///
/// Penalties are subtractive and compound per consecutive miss:
/// `BASE × MULT^(consecutive−1)`; participation resets the streak.
#[derive(Debug, Default)]
pub struct AbsenceTracker {
    records: HashMap<String, AbsenceRecord>,
    active_tasks: HashMap<String, u32>,
}

impl AbsenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_missed(&mut self, cfg: &ConsensusConfig, address: &str) -> AbsencePenalty {
        let record = self.records.entry(address.to_string()).or_default();
        record.consecutive += 1;

        let penalty = cfg.absence_base_penalty
            * cfg
                .absence_penalty_multiplier
                .powi(record.consecutive as i32 - 1);
        record.total_penalty += penalty;

        if record.consecutive >= cfg.max_consecutive_misses {
            record.flagged = true;
        }

        AbsencePenalty {
            penalty,
            consecutive: record.consecutive,
            flag_suspension: record.flagged,
        }
    }

    /// Participation ends the consecutive-miss streak.
    pub fn record_participation(&mut self, address: &str) {
        if let Some(record) = self.records.get_mut(address) {
            record.consecutive = 0;
        }
    }

    pub fn is_flagged(&self, address: &str) -> bool {
        self.records.get(address).map(|r| r.flagged).unwrap_or(false)
    }

    pub fn total_penalty(&self, address: &str) -> f64 {
        self.records
            .get(address)
            .map(|r| r.total_penalty)
            .unwrap_or(0.0)
    }

    pub fn task_assigned(&mut self, address: &str) {
        *self.active_tasks.entry(address.to_string()).or_insert(0) += 1;
    }

    pub fn task_finished(&mut self, address: &str) {
        if let Some(count) = self.active_tasks.get_mut(address) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn active_tasks(&self, address: &str) -> u32 {
        self.active_tasks.get(address).copied().unwrap_or(0)
    }

    /// Pick a backup for an absent validator.
    ///
    /// Candidates already at the task cap, under the reputation floor or
    /// under the uptime floor are ineligible. The rest rank by
    /// `0.4·reputation + 0.3·recent_performance + 0.2·uptime·100 +
    /// 0.1·(1−load)·100`.
    pub fn select_backup(
        &self,
        cfg: &ConsensusConfig,
        candidates: &[Validator],
        absent: &str,
    ) -> Option<String> {
        candidates
            .iter()
            .filter(|v| v.address != absent)
            .filter(|v| v.is_eligible())
            .filter(|v| self.active_tasks(&v.address) < cfg.max_backup_tasks)
            .filter(|v| v.reputation >= cfg.min_backup_reputation)
            .filter(|v| v.uptime >= cfg.min_backup_uptime)
            .map(|v| {
                let load = self.active_tasks(&v.address) as f64 / cfg.max_backup_tasks as f64;
                let recent = v.metrics.block_production * 100.0;
                let score = 0.4 * v.reputation as f64
                    + 0.3 * recent
                    + 0.2 * v.uptime * 100.0
                    + 0.1 * (1.0 - load) * 100.0;
                (score, v.address.clone())
            })
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(_, address)| address)
    }
}
