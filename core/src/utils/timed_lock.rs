use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};

use crate::error::{ConsensusError, Result};

/// Acquire an async mutex or fail with `MutexTimeout` after `wait`.
///
/// Every consensus critical section goes through this so a stuck holder
/// degrades into a retriable error instead of a wedged task.
pub async fn lock_timeout<'a, T>(
    mutex: &'a Mutex<T>,
    wait: Duration,
    what: &str,
) -> Result<MutexGuard<'a, T>> {
    tokio::time::timeout(wait, mutex.lock())
        .await
        .map_err(|_| ConsensusError::MutexTimeout(what.to_string()))
}

/// Per-key async mutexes, created on demand.
///
/// Used for per-transaction admission exclusion: two concurrent
/// `add_transaction` calls for the same txid serialize here while calls
/// for different txids proceed independently.
pub struct KeyedMutex<K: Hash + Eq + Clone> {
    locks: SyncMutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Hash + Eq + Clone> Default for KeyedMutex<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq + Clone> KeyedMutex<K> {
    pub fn new() -> Self {
        Self {
            locks: SyncMutex::new(HashMap::new()),
        }
    }

    pub async fn lock(&self, key: K, wait: Duration, what: &str) -> Result<OwnedMutexGuard<()>> {
        let mutex = {
            let mut locks = self.locks.lock();
            // Opportunistic sweep: entries nobody holds or awaits.
            if locks.len() > 1_024 {
                locks.retain(|_, m| Arc::strong_count(m) > 1);
            }
            locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        tokio::time::timeout(wait, mutex.lock_owned())
            .await
            .map_err(|_| ConsensusError::MutexTimeout(what.to_string()))
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
