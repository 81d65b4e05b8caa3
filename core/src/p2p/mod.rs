use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audit::{AuditSink, Severity};
use crate::error::{ConsensusError, Result};

/// Sync progress as reported by the node's block-sync machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    Syncing,
    Synced,
    Failed,
}

/// Read-only view of the peer layer consumed by consensus. The wire
/// protocol behind it is out of scope; embedders supply the implementation.
pub trait PeerNetwork: Send + Sync {
    fn peer_count(&self) -> usize;
    fn active_validators(&self) -> Vec<String>;
    fn sync_state(&self) -> SyncState;
}

/// Fixed-state network handle for tests and single-node operation.
pub struct StaticNetwork {
    peers: Mutex<usize>,
    validators: Mutex<Vec<String>>,
    sync: Mutex<SyncState>,
}

impl Default for StaticNetwork {
    fn default() -> Self {
        Self {
            peers: Mutex::new(0),
            validators: Mutex::new(vec![]),
            sync: Mutex::new(SyncState::Synced),
        }
    }
}

impl StaticNetwork {
    pub fn new(peers: usize, validators: Vec<String>, sync: SyncState) -> Self {
        Self {
            peers: Mutex::new(peers),
            validators: Mutex::new(validators),
            sync: Mutex::new(sync),
        }
    }

    pub fn set_peers(&self, count: usize) {
        *self.peers.lock() = count;
    }

    pub fn set_sync_state(&self, state: SyncState) {
        *self.sync.lock() = state;
    }

    pub fn set_validators(&self, validators: Vec<String>) {
        *self.validators.lock() = validators;
    }
}

impl PeerNetwork for StaticNetwork {
    fn peer_count(&self) -> usize {
        *self.peers.lock()
    }

    fn active_validators(&self) -> Vec<String> {
        self.validators.lock().clone()
    }

    fn sync_state(&self) -> SyncState {
        *self.sync.lock()
    }
}

#[derive(Debug)]
struct HealthState {
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    breaker_open_until: Option<Instant>,
}

/// Network stability gate shared by the mempool (admission health check)
/// and the voting engine (fork arbitration).
///
/// Failures are sticky: `network_failure_threshold` consecutive failed
/// checks open a circuit breaker for `breaker_cooloff`; the counter itself
/// decays to zero after `failure_reset` without failures.
pub struct NetworkHealth {
    network: Arc<dyn PeerNetwork>,
    audit: Arc<AuditSink>,
    min_peers: usize,
    failure_threshold: u32,
    failure_reset: Duration,
    breaker_cooloff: Duration,
    state: Mutex<HealthState>,
}

impl NetworkHealth {
    pub fn new(
        network: Arc<dyn PeerNetwork>,
        audit: Arc<AuditSink>,
        min_peers: usize,
        failure_threshold: u32,
        failure_reset: Duration,
        breaker_cooloff: Duration,
    ) -> Self {
        Self {
            network,
            audit,
            min_peers,
            failure_threshold,
            failure_reset,
            breaker_cooloff,
            state: Mutex::new(HealthState {
                consecutive_failures: 0,
                last_failure: None,
                breaker_open_until: None,
            }),
        }
    }

    pub fn network(&self) -> &Arc<dyn PeerNetwork> {
        &self.network
    }

    /// Stability check: enough peers and fully synced.
    pub fn check(&self) -> Result<()> {
        let now = Instant::now();
        let mut state = self.state.lock();

        if let Some(until) = state.breaker_open_until {
            if now < until {
                return Err(ConsensusError::NetworkUnhealthy(
                    "circuit breaker open".into(),
                ));
            }
            state.breaker_open_until = None;
            state.consecutive_failures = 0;
        }

        // Failure counter decays once the reset cadence passes quietly.
        if let Some(last) = state.last_failure {
            if now.duration_since(last) >= self.failure_reset {
                state.consecutive_failures = 0;
                state.last_failure = None;
            }
        }

        let peers = self.network.peer_count();
        let sync = self.network.sync_state();
        let failure = if peers < self.min_peers {
            Some(format!("{peers} peers (minimum {})", self.min_peers))
        } else if sync != SyncState::Synced {
            Some(format!("sync state {sync:?}"))
        } else {
            None
        };

        match failure {
            None => {
                state.consecutive_failures = 0;
                state.last_failure = None;
                Ok(())
            }
            Some(reason) => {
                state.consecutive_failures += 1;
                state.last_failure = Some(now);
                if state.consecutive_failures >= self.failure_threshold {
                    state.breaker_open_until = Some(now + self.breaker_cooloff);
                    self.audit.log_event(
                        "network_breaker_opened",
                        Severity::High,
                        "p2p",
                        serde_json::json!({
                            "failures": state.consecutive_failures,
                            "reason": reason,
                        }),
                    );
                }
                Err(ConsensusError::NetworkUnhealthy(reason))
            }
        }
    }

    pub fn is_breaker_open(&self) -> bool {
        let state = self.state.lock();
        state
            .breaker_open_until
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }
}
