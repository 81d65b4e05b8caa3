use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use crate::blockchain::block::BlockHeader;
use crate::crypto::hash::Hash256;
use crate::error::{ConsensusError, Result};

/// A GPU nonce-search backend. Shader/kernel code is a deployment concern;
/// consensus only needs this seam.
pub trait GpuMiner: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_available(&self) -> bool;
    /// Search `[start_nonce, end_nonce)`; returns the first satisfying
    /// `(nonce, hash)` if any. Must poll `stop` between batches.
    fn search(
        &self,
        header: &BlockHeader,
        target: &Hash256,
        start_nonce: u64,
        end_nonce: u64,
        stop: &AtomicBool,
    ) -> Result<Option<(u64, Hash256)>>;
}

/// Placeholder backend for nodes without GPU support.
pub struct NullGpuMiner;

impl GpuMiner for NullGpuMiner {
    fn name(&self) -> &'static str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn search(
        &self,
        _header: &BlockHeader,
        _target: &Hash256,
        _start_nonce: u64,
        _end_nonce: u64,
        _stop: &AtomicBool,
    ) -> Result<Option<(u64, Hash256)>> {
        Err(ConsensusError::GpuFailure("no gpu backend".into()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpuStatus {
    Unavailable,
    Ready,
    CircuitOpen,
}

/// Failure-window circuit breaker for the GPU path: `threshold` failures
/// inside `window` open it for `cooloff`, after which it half-opens.
pub struct CircuitBreaker {
    threshold: u32,
    window: Duration,
    cooloff: Duration,
    failures: Mutex<VecDeque<Instant>>,
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, window: Duration, cooloff: Duration) -> Self {
        Self {
            threshold,
            window,
            cooloff,
            failures: Mutex::new(VecDeque::new()),
            opened_at: Mutex::new(None),
        }
    }

    pub fn is_open(&self) -> bool {
        let mut opened = self.opened_at.lock();
        match *opened {
            Some(at) if at.elapsed() < self.cooloff => true,
            Some(_) => {
                *opened = None;
                self.failures.lock().clear();
                false
            }
            None => false,
        }
    }

    /// Returns true when this failure opened the breaker.
    pub fn record_failure(&self) -> bool {
        let now = Instant::now();
        let mut failures = self.failures.lock();
        failures.push_back(now);
        while failures
            .front()
            .is_some_and(|&t| now.duration_since(t) > self.window)
        {
            failures.pop_front();
        }
        if failures.len() as u32 >= self.threshold {
            let mut opened = self.opened_at.lock();
            if opened.is_none() {
                *opened = Some(now);
                return true;
            }
        }
        false
    }

    pub fn record_success(&self) {
        self.failures.lock().clear();
        *self.opened_at.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(3, Duration::from_secs(300), Duration::from_millis(40))
    }

    #[test]
    fn test_stays_closed_below_threshold() {
        let cb = breaker();
        cb.record_failure();
        cb.record_failure();
        assert!(!cb.is_open());
    }

    #[test]
    fn test_opens_at_threshold_and_cools_off() {
        let cb = breaker();
        cb.record_failure();
        cb.record_failure();
        assert!(cb.record_failure());
        assert!(cb.is_open());

        std::thread::sleep(Duration::from_millis(50));
        assert!(!cb.is_open());
    }

    #[test]
    fn test_success_resets() {
        let cb = breaker();
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert!(!cb.is_open());
    }

    #[test]
    fn test_null_gpu_reports_failure() {
        let gpu = NullGpuMiner;
        assert!(!gpu.is_available());
        let header = crate::blockchain::block::Block::genesis(0).header;
        let stop = AtomicBool::new(false);
        assert!(matches!(
            gpu.search(&header, &Hash256::MAX, 0, 100, &stop),
            Err(ConsensusError::GpuFailure(_))
        ));
    }
}
