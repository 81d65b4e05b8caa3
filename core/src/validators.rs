use serde::{Deserialize, Serialize};

/// Rolling performance metrics for a validator, all in [0, 1].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidatorMetrics {
    pub uptime: f64,
    pub vote_participation: f64,
    pub block_production: f64,
}

/// A registered validator as seen by consensus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validator {
    pub address: String,
    #[serde(default)]
    pub public_key: String,
    /// Block height at which the account was first seen.
    pub registered_height: u64,
    /// Unix seconds of last observed activity.
    pub last_active: u64,
    /// Reputation score, [0, 100].
    pub reputation: u32,
    pub is_active: bool,
    pub is_suspended: bool,
    pub is_absent: bool,
    /// Fraction of observed time online, [0, 1].
    pub uptime: f64,
    pub metrics: ValidatorMetrics,
    /// Opaque per-validator data carried for external tooling.
    #[serde(default)]
    pub validation_data: serde_json::Value,
}

impl Validator {
    pub fn new(address: &str, registered_height: u64) -> Self {
        Self {
            address: address.to_string(),
            public_key: String::new(),
            registered_height,
            last_active: 0,
            reputation: 50,
            is_active: true,
            is_suspended: false,
            is_absent: false,
            uptime: 1.0,
            metrics: ValidatorMetrics::default(),
            validation_data: serde_json::Value::Null,
        }
    }

    /// Eligible for consensus duties right now.
    pub fn is_eligible(&self) -> bool {
        self.is_active && !self.is_suspended
    }

    pub fn account_age(&self, current_height: u64) -> u64 {
        current_height.saturating_sub(self.registered_height)
    }
}
