use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::crypto::hash::Hash256;
use crate::error::{ConsensusError, Result};

#[derive(Debug)]
struct InflightEntry {
    started: Instant,
    attempts: u32,
}

struct Inner {
    capacity: usize,
    stale_after: Duration,
    entries: Mutex<HashMap<Hash256, InflightEntry>>,
}

/// Capacity-bounded registry of mining attempts.
///
/// A slot is held for the life of its guard; entries whose guard leaked
/// (task cancelled without drop running is impossible, but timers protect
/// against deadlocked holders) expire after `stale_after` and are swept on
/// the next registration.
#[derive(Clone)]
pub struct InflightTracker {
    inner: Arc<Inner>,
}

impl InflightTracker {
    pub fn new(capacity: usize, stale_after: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity,
                stale_after,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Reserve a slot for `work_key`. Fails with `BackpressureRejected`
    /// when the table is full and nothing is stale.
    pub fn register(&self, work_key: Hash256) -> Result<InflightGuard> {
        let mut entries = self.inner.entries.lock();

        let stale = self.inner.stale_after;
        entries.retain(|_, e| e.started.elapsed() < stale * 4);

        if entries.contains_key(&work_key) {
            return Err(ConsensusError::BackpressureRejected);
        }
        if entries.len() >= self.inner.capacity {
            return Err(ConsensusError::BackpressureRejected);
        }
        entries.insert(
            work_key,
            InflightEntry {
                started: Instant::now(),
                attempts: 0,
            },
        );
        drop(entries);

        Ok(InflightGuard {
            inner: self.inner.clone(),
            work_key,
        })
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, work_key: &Hash256) -> bool {
        self.inner.entries.lock().contains_key(work_key)
    }
}

/// Releases the slot on drop; tracks attempt counts for the retry loop.
pub struct InflightGuard {
    inner: Arc<Inner>,
    work_key: Hash256,
}

impl InflightGuard {
    /// Bump and return the attempt counter.
    pub fn note_attempt(&self) -> u32 {
        let mut entries = self.inner.entries.lock();
        match entries.get_mut(&self.work_key) {
            Some(entry) => {
                entry.attempts += 1;
                entry.attempts
            }
            None => 0,
        }
    }

    pub fn work_key(&self) -> Hash256 {
        self.work_key
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.inner.entries.lock().remove(&self.work_key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::sha3_256;

    fn key(n: u8) -> Hash256 {
        sha3_256(&[n])
    }

    #[test]
    fn test_capacity_enforced() {
        let tracker = InflightTracker::new(2, Duration::from_secs(60));
        let _a = tracker.register(key(1)).unwrap();
        let _b = tracker.register(key(2)).unwrap();
        assert!(matches!(
            tracker.register(key(3)),
            Err(ConsensusError::BackpressureRejected)
        ));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let tracker = InflightTracker::new(4, Duration::from_secs(60));
        let _a = tracker.register(key(1)).unwrap();
        assert!(tracker.register(key(1)).is_err());
    }

    #[test]
    fn test_guard_drop_frees_slot() {
        let tracker = InflightTracker::new(1, Duration::from_secs(60));
        {
            let _a = tracker.register(key(1)).unwrap();
            assert_eq!(tracker.len(), 1);
        }
        assert_eq!(tracker.len(), 0);
        assert!(tracker.register(key(2)).is_ok());
    }

    #[test]
    fn test_attempt_counter() {
        let tracker = InflightTracker::new(1, Duration::from_secs(60));
        let guard = tracker.register(key(1)).unwrap();
        assert_eq!(guard.note_attempt(), 1);
        assert_eq!(guard.note_attempt(), 2);
        assert_eq!(guard.note_attempt(), 3);
    }
}
